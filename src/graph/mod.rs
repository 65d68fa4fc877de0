//! Dependency graph module.
//!
//! Provides path identity hashing, edge types and the concurrent graph
//! that links compilation units to their dependencies.

pub mod dependency;
pub mod hash;
pub mod types;

pub use dependency::{DependencyGraph, Keyed};
pub use hash::Hash;
pub use types::{EdgeData, EdgeStrength, GraphError};
