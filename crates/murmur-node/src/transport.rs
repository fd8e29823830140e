//! Peer transport.
//!
//! The [`Transport`] trait is everything the node logic needs from the
//! network: its own identity, fire-and-forget sends, request/response RPCs
//! and replies. [`ChannelTransport`] implements it on top of an outbound
//! channel; the runtime drains that channel to stdout, tests drain it into
//! an in-process router.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use murmur_proto::{Body, Envelope, MsgId, NodeId, Payload};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{NodeError, NodeResult};

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identity of this node within the cluster, fixed at `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    node_id: NodeId,
    node_ids: Vec<NodeId>,
}

impl NodeIdentity {
    /// Create an identity. `node_id` is added to `node_ids` if missing.
    #[must_use]
    pub fn new(node_id: NodeId, mut node_ids: Vec<NodeId>) -> Self {
        if !node_ids.contains(&node_id) {
            node_ids.push(node_id.clone());
        }
        Self { node_id, node_ids }
    }

    /// This node's id.
    #[must_use]
    pub const fn self_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Every node in the cluster, including this one.
    #[must_use]
    pub fn all_node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    /// Every node in the cluster except this one.
    pub fn others(&self) -> impl Iterator<Item = &NodeId> {
        self.node_ids.iter().filter(move |id| **id != self.node_id)
    }
}

/// Capabilities the node logic consumes from the network.
pub trait Transport: Send + Sync {
    /// This node's identity.
    fn identity(&self) -> &NodeIdentity;

    /// Sends a message without expecting a reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be queued.
    fn send(&self, dest: &NodeId, payload: Payload) -> NodeResult<()>;

    /// Sends a request and waits for its reply.
    ///
    /// An `error` reply is returned as [`NodeError::Remote`].
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, on an `error` reply or if the request
    /// cannot be queued.
    fn rpc<'a>(&'a self, dest: &'a NodeId, payload: Payload) -> BoxFuture<'a, NodeResult<Payload>>;

    /// Answers `request` with `payload`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply cannot be queued.
    fn reply(&self, request: &Envelope, payload: Payload) -> NodeResult<()>;
}

/// Channel-backed transport with RPC correlation.
#[derive(Debug)]
pub struct ChannelTransport {
    identity: NodeIdentity,
    outbound: mpsc::UnboundedSender<Envelope>,
    next_msg_id: AtomicU64,
    pending: Mutex<HashMap<MsgId, oneshot::Sender<Payload>>>,
    rpc_timeout: Duration,
}

impl ChannelTransport {
    /// Creates a transport that queues every outbound envelope on `outbound`.
    #[must_use]
    pub fn new(
        identity: NodeIdentity,
        outbound: mpsc::UnboundedSender<Envelope>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            outbound,
            next_msg_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            rpc_timeout,
        }
    }

    /// Hands a reply to the RPC waiting for it.
    ///
    /// Returns the envelope back if it is not a reply to a pending RPC
    /// (a late reply after timeout, or not a reply at all).
    pub fn complete(&self, envelope: Envelope) -> Option<Envelope> {
        let Some(in_reply_to) = envelope.body.in_reply_to else {
            return Some(envelope);
        };

        let waiter = self.pending.lock().remove(&in_reply_to);
        match waiter {
            Some(tx) => {
                // The waiter may have given up already; nothing to do then.
                let _ = tx.send(envelope.body.payload);
                None
            }
            None => {
                debug!(
                    in_reply_to,
                    from = %envelope.src,
                    "reply for unknown or expired rpc"
                );
                Some(envelope)
            }
        }
    }

    /// Number of RPCs waiting for a reply.
    #[must_use]
    pub fn pending_rpcs(&self) -> usize {
        self.pending.lock().len()
    }

    fn allocate_msg_id(&self) -> MsgId {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, envelope: Envelope) -> NodeResult<()> {
        self.outbound
            .send(envelope)
            .map_err(|_| NodeError::ChannelClosed)
    }
}

/// Removes an RPC's reply slot when the call finishes or is dropped.
struct PendingSlot<'a> {
    pending: &'a Mutex<HashMap<MsgId, oneshot::Sender<Payload>>>,
    msg_id: MsgId,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.msg_id);
    }
}

impl Transport for ChannelTransport {
    fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    fn send(&self, dest: &NodeId, payload: Payload) -> NodeResult<()> {
        self.emit(Envelope::new(
            self.identity.self_id().clone(),
            dest.clone(),
            Body::new(payload),
        ))
    }

    fn rpc<'a>(&'a self, dest: &'a NodeId, payload: Payload) -> BoxFuture<'a, NodeResult<Payload>> {
        Box::pin(async move {
            let msg_id = self.allocate_msg_id();
            let (tx, rx) = oneshot::channel();
            self.pending.lock().insert(msg_id, tx);
            let _slot = PendingSlot {
                pending: &self.pending,
                msg_id,
            };

            let envelope = Envelope::new(
                self.identity.self_id().clone(),
                dest.clone(),
                Body::new(payload).with_msg_id(msg_id),
            );
            self.emit(envelope)?;

            match tokio::time::timeout(self.rpc_timeout, rx).await {
                Ok(Ok(Payload::Error { code, text })) => Err(NodeError::Remote { code, text }),
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) => Err(NodeError::ChannelClosed),
                Err(_) => Err(NodeError::Timeout {
                    dest: dest.clone(),
                    msg_id,
                }),
            }
        })
    }

    fn reply(&self, request: &Envelope, payload: Payload) -> NodeResult<()> {
        self.emit(request.reply(payload))
    }
}
