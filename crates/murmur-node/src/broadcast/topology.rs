//! Neighbour table.

use std::sync::Arc;

use murmur_proto::{NodeId, Topology};
use parking_lot::RwLock;

/// Neighbour lists for every node, replaced as a whole.
///
/// Readers clone the current `Arc` and release the lock, so a reader sees
/// either the table before a [`set`](Self::set) or the one after it.
#[derive(Debug, Default)]
pub struct TopologyTable {
    table: RwLock<Arc<Topology>>,
}

impl TopologyTable {
    /// Creates an empty table; every node has no neighbours.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole table.
    pub fn set(&self, topology: Topology) {
        *self.table.write() = Arc::new(topology);
    }

    /// Neighbours of `node`, or empty if the node is not in the table.
    #[must_use]
    pub fn neighbors_of(&self, node: &NodeId) -> Vec<NodeId> {
        self.snapshot().get(node).cloned().unwrap_or_default()
    }

    /// The current table.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Topology> {
        Arc::clone(&*self.table.read())
    }

    /// Returns true if no topology has been set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}
