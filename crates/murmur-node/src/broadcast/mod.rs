//! Gossip broadcast.
//!
//! Values broadcast to any node reach every node through two mechanisms:
//! an immediate fan-out of each newly seen value to the node's peers, and a
//! periodic anti-entropy round that repairs anything the fan-out missed.
//!
//! ## Architecture
//!
//! - [`SeenSet`]: deduplicating store of values in arrival order
//! - [`TopologyTable`]: neighbour lists, replaced as a whole
//! - [`GossipPropagator`]: fan-out and the anti-entropy loop
//! - [`BroadcastService`]: the operations the request handler calls

mod propagator;
mod store;
mod topology;

pub use propagator::GossipPropagator;
pub use store::SeenSet;
pub use topology::TopologyTable;

use std::sync::Arc;

use murmur_proto::{NodeId, Topology};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::GossipConfig;
use crate::transport::Transport;

/// Broadcast state of one node.
#[derive(Debug)]
pub struct BroadcastService<T> {
    store: Arc<SeenSet>,
    topology: Arc<TopologyTable>,
    propagator: Arc<GossipPropagator<T>>,
}

impl<T: Transport + 'static> BroadcastService<T> {
    /// Creates an empty broadcast service.
    #[must_use]
    pub fn new(transport: Arc<T>, config: GossipConfig) -> Self {
        let store = Arc::new(SeenSet::new());
        let topology = Arc::new(TopologyTable::new());
        let propagator = Arc::new(GossipPropagator::new(
            transport,
            Arc::clone(&store),
            Arc::clone(&topology),
            config,
        ));
        Self {
            store,
            topology,
            propagator,
        }
    }

    /// Accepts a value from a client. Returns true if it was new.
    pub fn broadcast(&self, value: i64) -> bool {
        let fresh = self.store.append(value);
        if fresh {
            debug!(value, "new value from client");
            self.propagator.on_local_value(value);
        }
        fresh
    }

    /// Accepts a value fanned out by `from`. Returns true if it was new.
    pub fn receive_peer(&self, value: i64, from: &NodeId) -> bool {
        let fresh = self.store.append(value);
        if fresh {
            debug!(value, from = %from, "new value from peer");
            self.propagator.on_peer_value(value, from);
        }
        fresh
    }

    /// Merges a batch sent by `from`. Returns how many values were new.
    pub fn receive_batch(&self, values: &[i64], from: &NodeId) -> usize {
        let added = self.store.append_batch(values).len();
        if added > 0 {
            debug!(from = %from, added, received = values.len(), "merged batch");
        }
        added
    }

    /// Every value seen so far, in arrival order.
    #[must_use]
    pub fn read(&self) -> Vec<i64> {
        self.store.snapshot()
    }

    /// Replaces the topology.
    pub fn set_topology(&self, topology: Topology) {
        info!(nodes = topology.len(), "topology updated");
        self.topology.set(topology);
    }

    /// The deduplicating store.
    #[must_use]
    pub const fn store(&self) -> &Arc<SeenSet> {
        &self.store
    }

    /// The topology table.
    #[must_use]
    pub const fn topology(&self) -> &Arc<TopologyTable> {
        &self.topology
    }

    /// The propagator.
    #[must_use]
    pub const fn propagator(&self) -> &Arc<GossipPropagator<T>> {
        &self.propagator
    }

    /// Starts the anti-entropy loop.
    pub fn start(&self, shutdown: watch::Receiver<()>) -> JoinHandle<()> {
        Arc::clone(&self.propagator).spawn(shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, NodeIdentity};
    use murmur_proto::{Envelope, Payload};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn service() -> (
        BroadcastService<ChannelTransport>,
        mpsc::UnboundedReceiver<Envelope>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = NodeIdentity::new(
            NodeId::from("n1"),
            vec![NodeId::from("n1"), NodeId::from("n2")],
        );
        let transport = Arc::new(ChannelTransport::new(identity, tx, Duration::from_secs(1)));
        (BroadcastService::new(transport, GossipConfig::default()), rx)
    }

    fn pair_topology() -> Topology {
        let mut topology = Topology::new();
        topology.insert(NodeId::from("n1"), vec![NodeId::from("n2")]);
        topology.insert(NodeId::from("n2"), vec![NodeId::from("n1")]);
        topology
    }

    #[tokio::test]
    async fn test_duplicate_broadcast_is_not_fanned_out_again() {
        let (service, mut rx) = service();
        service.set_topology(pair_topology());

        assert!(service.broadcast(5));
        assert!(!service.broadcast(5));
        assert_eq!(service.read(), vec![5]);

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.body.payload, Payload::BroadcastPeer { message: 5 });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_before_topology_still_stores() {
        let (service, mut rx) = service();
        assert!(service.broadcast(1));
        assert_eq!(service.read(), vec![1]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_batch_merges_without_fanout() {
        let (service, mut rx) = service();
        service.set_topology(pair_topology());
        service.broadcast(1);
        let _ = rx.recv().await;

        let added = service.receive_batch(&[1, 2, 3], &NodeId::from("n2"));
        assert_eq!(added, 2);
        assert_eq!(service.read(), vec![1, 2, 3]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_peer_value_from_only_neighbor_is_not_sent_back() {
        let (service, mut rx) = service();
        service.set_topology(pair_topology());

        assert!(service.receive_peer(9, &NodeId::from("n2")));
        assert!(service.store().contains(9));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_topology_is_exposed() {
        let (service, _rx) = service();
        service.set_topology(pair_topology());
        assert_eq!(
            service.topology().neighbors_of(&NodeId::from("n1")),
            vec![NodeId::from("n2")]
        );
        assert_eq!(service.propagator().peers(), vec![NodeId::from("n2")]);
    }
}
