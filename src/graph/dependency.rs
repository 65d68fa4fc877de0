//! The concurrent dependency graph.
//!
//! Uses petgraph to store dependency edges between units and a hash index
//! for lookup. All state sits behind a single mutex; no method calls back
//! into a node while the lock is held.

use parking_lot::Mutex;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{EdgeFiltered, EdgeRef};
use petgraph::Direction;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

use super::hash::Hash;
use super::types::{EdgeData, EdgeStrength, GraphError};

/// The interface by which an element of the graph exposes its key.
pub trait Keyed: Send + Sync {
    fn hash(&self) -> Hash;
    fn path(&self) -> &Path;
}

struct Inner<T> {
    graph: DiGraph<Hash, EdgeData>,
    /// Index: hash -> (node index, element).
    nodes: HashMap<Hash, (NodeIndex, Arc<T>)>,
}

/// Directed graph of units keyed by [`Hash`], with strong and weak edges.
pub struct DependencyGraph<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Keyed> DependencyGraph<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                graph: DiGraph::new(),
                nodes: HashMap::new(),
            }),
        }
    }

    /// Atomic get-or-create. The factory runs at most once per hash, no
    /// matter how many callers race; every caller gets the same element.
    pub fn ensure<F>(&self, hash: Hash, factory: F) -> (Arc<T>, bool)
    where
        F: FnOnce() -> T,
    {
        let mut inner = self.inner.lock();
        if let Some((_, element)) = inner.nodes.get(&hash) {
            return (Arc::clone(element), false);
        }

        trace!(%hash, "miss on hash; creating node");
        let element = Arc::new(factory());
        let idx = inner.graph.add_node(hash);
        inner.nodes.insert(hash, (idx, Arc::clone(&element)));
        (element, true)
    }

    pub fn find(&self, hash: Hash) -> Option<Arc<T>> {
        self.inner
            .lock()
            .nodes
            .get(&hash)
            .map(|(_, element)| Arc::clone(element))
    }

    /// Add a strong edge from a dependent to its dependency.
    ///
    /// Fails with [`GraphError::Cycle`] if the dependency already reaches
    /// the dependent through strong edges.
    pub fn connect(&self, from: &T, to: &T) -> Result<(), GraphError> {
        self.add_edge(from, to, EdgeStrength::Strong)
    }

    /// Add a weak edge. Weak edges never fail on cycles.
    pub fn weak_connect(&self, from: &T, to: &T) -> Result<(), GraphError> {
        self.add_edge(from, to, EdgeStrength::Weak)
    }

    fn add_edge(&self, from: &T, to: &T, strength: EdgeStrength) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        let from_idx = inner.index_of(from.hash())?;
        let to_idx = inner.index_of(to.hash())?;

        let exists = inner
            .graph
            .edges_connecting(from_idx, to_idx)
            .any(|e| e.weight().strength == strength);
        if exists {
            return Ok(());
        }

        if strength == EdgeStrength::Strong && inner.strong_path(to_idx, from_idx) {
            return Err(GraphError::Cycle {
                from: from.path().to_path_buf(),
                to: to.path().to_path_buf(),
            });
        }

        inner.graph.add_edge(from_idx, to_idx, EdgeData::new(strength));
        Ok(())
    }

    /// Whether `to` is reachable from `from` through strong edges.
    pub fn has_path(&self, from: Hash, to: Hash) -> bool {
        let inner = self.inner.lock();
        match (inner.nodes.get(&from), inner.nodes.get(&to)) {
            (Some((a, _)), Some((b, _))) => inner.strong_path(*a, *b),
            _ => false,
        }
    }

    /// Direct dependencies of a node connected with the given strength.
    pub fn dependencies(&self, hash: Hash, strength: EdgeStrength) -> Vec<Hash> {
        let inner = self.inner.lock();
        let Some((idx, _)) = inner.nodes.get(&hash) else {
            return Vec::new();
        };
        let mut deps: Vec<Hash> = inner
            .graph
            .edges_directed(*idx, Direction::Outgoing)
            .filter(|e| e.weight().strength == strength)
            .map(|e| inner.graph[e.target()])
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.inner.lock().graph.edge_count()
    }

    /// Snapshot of every element in the graph.
    pub fn elements(&self) -> Vec<Arc<T>> {
        self.inner
            .lock()
            .nodes
            .values()
            .map(|(_, element)| Arc::clone(element))
            .collect()
    }
}

impl<T> Inner<T> {
    fn index_of(&self, hash: Hash) -> Result<NodeIndex, GraphError> {
        self.nodes
            .get(&hash)
            .map(|(idx, _)| *idx)
            .ok_or(GraphError::MissingNode(hash))
    }

    fn strong_path(&self, from: NodeIndex, to: NodeIndex) -> bool {
        let strong = EdgeFiltered::from_fn(&self.graph, |e| {
            e.weight().strength == EdgeStrength::Strong
        });
        has_path_connecting(&strong, from, to, None)
    }
}

impl<T: Keyed> Default for DependencyGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}
