//! Immediate fan-out and periodic anti-entropy.

use std::sync::Arc;

use murmur_proto::{NodeId, Payload};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::{SeenSet, TopologyTable};
use crate::config::{FanoutStrategy, GossipConfig, ReconcileStrategy};
use crate::error::{NodeError, NodeResult};
use crate::transport::Transport;

/// Pushes newly seen values to peers and repairs whatever that misses.
///
/// Fan-out is best effort: failed sends are logged and left to the next
/// anti-entropy round, which is what guarantees convergence.
#[derive(Debug)]
pub struct GossipPropagator<T> {
    transport: Arc<T>,
    store: Arc<SeenSet>,
    topology: Arc<TopologyTable>,
    config: GossipConfig,
}

impl<T: Transport + 'static> GossipPropagator<T> {
    /// Creates a propagator over the given store and topology.
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        store: Arc<SeenSet>,
        topology: Arc<TopologyTable>,
        config: GossipConfig,
    ) -> Self {
        Self {
            transport,
            store,
            topology,
            config,
        }
    }

    /// Returns the gossip configuration.
    #[must_use]
    pub const fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Peers taking part in fan-out and anti-entropy. Never includes self.
    #[must_use]
    pub fn peers(&self) -> Vec<NodeId> {
        let identity = self.transport.identity();
        let self_id = identity.self_id();
        match self.config.fanout {
            FanoutStrategy::Neighbors => self
                .topology
                .neighbors_of(self_id)
                .into_iter()
                .filter(|peer| peer != self_id)
                .collect(),
            FanoutStrategy::Cluster => identity.others().cloned().collect(),
        }
    }

    /// Fans out a value a client broadcast to this node.
    pub fn on_local_value(&self, value: i64) {
        if !self.config.immediate_fanout {
            return;
        }
        self.spawn_fanout(value, self.peers());
    }

    /// Fans out a value first seen through a peer.
    ///
    /// Under [`FanoutStrategy::Cluster`] the originator already reached every
    /// node, so nothing is forwarded.
    pub fn on_peer_value(&self, value: i64, from: &NodeId) {
        if !self.config.immediate_fanout || self.config.fanout == FanoutStrategy::Cluster {
            return;
        }
        let targets = self
            .peers()
            .into_iter()
            .filter(|peer| peer != from)
            .collect();
        self.spawn_fanout(value, targets);
    }

    fn spawn_fanout(&self, value: i64, targets: Vec<NodeId>) {
        if targets.is_empty() {
            return;
        }
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            for peer in targets {
                if let Err(e) = transport.send(&peer, Payload::BroadcastPeer { message: value }) {
                    warn!(peer = %peer, value, error = %e, "fan-out send failed");
                }
            }
        });
    }

    /// Runs one reconciliation with `peer`.
    ///
    /// Returns the number of values sent to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer cannot be read or the batch not sent.
    pub async fn reconcile_with(&self, peer: &NodeId) -> NodeResult<usize> {
        let outgoing = match self.config.reconcile {
            ReconcileStrategy::PullDiff => {
                let reply = self.transport.rpc(peer, Payload::Read { key: None }).await?;
                match reply {
                    Payload::ReadOk {
                        messages: Some(theirs),
                        ..
                    } => self.store.missing_from(&theirs),
                    other => {
                        return Err(NodeError::Malformed(format!(
                            "expected read_ok with messages from {peer}, got {}",
                            other.type_name()
                        )));
                    }
                }
            }
            ReconcileStrategy::PushAll => self.store.snapshot(),
        };

        if outgoing.is_empty() {
            return Ok(0);
        }
        let sent = outgoing.len();
        self.transport
            .send(peer, Payload::BroadcastBatch { messages: outgoing })?;
        Ok(sent)
    }

    /// Starts one reconciliation task per peer and returns immediately.
    pub fn run_round(self: &Arc<Self>, round: u64) {
        let peers = self.peers();
        if peers.is_empty() {
            trace!(round, "no peers to reconcile with");
            return;
        }

        debug!(
            round,
            peers = peers.len(),
            values = self.store.len(),
            "anti-entropy round"
        );
        for peer in peers {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                match this.reconcile_with(&peer).await {
                    Ok(0) => trace!(peer = %peer, "peer up to date"),
                    Ok(sent) => debug!(peer = %peer, sent, "sent missing values"),
                    Err(e) => warn!(peer = %peer, error = %e, "reconciliation failed"),
                }
            });
        }
    }

    /// Starts the anti-entropy loop; it runs until `shutdown` fires or its
    /// sender is dropped.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<()>) {
        let period = self.config.anti_entropy_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; there is nothing to repair yet.
        ticker.tick().await;

        info!(
            node = %self.transport.identity().self_id(),
            interval_ms = period.as_millis() as u64,
            strategy = ?self.config.reconcile,
            "anti-entropy loop started"
        );

        let mut round: u64 = 0;
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(rounds = round, "anti-entropy loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    round += 1;
                    self.run_round(round);
                }
            }
        }
    }
}
