//! Core types for the dependency graph.
//!
//! Defines edge strengths and the errors reported when an edge would
//! violate the graph's invariants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use super::hash::Hash;

/// The strength of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStrength {
    /// Orders the dependent after the dependency and takes part in cycle
    /// detection.
    Strong,
    /// Test-only back-reference. Ignored by cycle detection and readiness
    /// ordering.
    Weak,
}

impl fmt::Display for EdgeStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeStrength::Strong => write!(f, "strong"),
            EdgeStrength::Weak => write!(f, "weak"),
        }
    }
}

/// Data stored on a graph edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EdgeData {
    pub strength: EdgeStrength,
}

impl EdgeData {
    pub fn new(strength: EdgeStrength) -> Self {
        Self { strength }
    }
}

/// Protocol violations detected by the graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A strong edge `from -> to` would close a cycle of strong edges.
    #[error("connecting {} -> {} would create an import cycle", .from.display(), .to.display())]
    Cycle { from: PathBuf, to: PathBuf },

    #[error("no node with hash {0}")]
    MissingNode(Hash),
}
