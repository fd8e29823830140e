//! Request handlers.
//!
//! This module turns a decoded request into calls on the node's services
//! and produces the reply payload. Peer-to-peer propagation messages and
//! stray replies produce no reply at all.

use std::fmt;
use std::sync::Arc;

use murmur_proto::{Envelope, Payload};
use tracing::{debug, warn};

use crate::broadcast::BroadcastService;
use crate::counter::Counter;
use crate::error::{NodeError, NodeResult};
use crate::transport::Transport;
use crate::unique_id::generate_id;

/// The workload service a node runs.
pub enum NodeServices<T> {
    /// Gossip broadcast.
    Broadcast(BroadcastService<T>),
    /// Grow-only counter.
    Counter(Arc<dyn Counter>),
}

impl<T> fmt::Debug for NodeServices<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast(_) => f.write_str("NodeServices::Broadcast"),
            Self::Counter(_) => f.write_str("NodeServices::Counter"),
        }
    }
}

/// Dispatches requests to the node's services.
#[derive(Debug)]
pub struct NodeHandler<T> {
    services: NodeServices<T>,
}

impl<T: Transport + 'static> NodeHandler<T> {
    /// Creates a handler over `services`.
    #[must_use]
    pub const fn new(services: NodeServices<T>) -> Self {
        Self { services }
    }

    /// The services this handler drives.
    #[must_use]
    pub const fn services(&self) -> &NodeServices<T> {
        &self.services
    }

    /// The broadcast service, if this node runs the broadcast workload.
    #[must_use]
    pub const fn broadcast(&self) -> Option<&BroadcastService<T>> {
        match &self.services {
            NodeServices::Broadcast(service) => Some(service),
            NodeServices::Counter(_) => None,
        }
    }

    /// The counter, if this node runs the counter workload.
    #[must_use]
    pub const fn counter(&self) -> Option<&Arc<dyn Counter>> {
        match &self.services {
            NodeServices::Counter(counter) => Some(counter),
            NodeServices::Broadcast(_) => None,
        }
    }

    /// Handles one request and returns the reply payload, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is not supported by this node's
    /// workload or a service fails. The caller answers with an `error`
    /// reply carrying [`NodeError::code`].
    pub async fn handle(&self, request: &Envelope) -> NodeResult<Option<Payload>> {
        match &request.body.payload {
            Payload::Init { .. } => Err(NodeError::Malformed(
                "node is already initialized".to_string(),
            )),

            Payload::Echo { echo } => Ok(Some(Payload::EchoOk { echo: echo.clone() })),

            Payload::Generate => Ok(Some(Payload::GenerateOk { id: generate_id() })),

            Payload::Broadcast { message } => {
                self.require_broadcast(request)?.broadcast(*message);
                Ok(Some(Payload::BroadcastOk))
            }

            Payload::BroadcastPeer { message } => {
                self.require_broadcast(request)?
                    .receive_peer(*message, &request.src);
                Ok(None)
            }

            Payload::BroadcastBatch { messages } => {
                self.require_broadcast(request)?
                    .receive_batch(messages, &request.src);
                Ok(None)
            }

            Payload::Read { key: None } => match &self.services {
                NodeServices::Broadcast(service) => Ok(Some(Payload::read_messages(service.read()))),
                NodeServices::Counter(counter) => {
                    let value = counter.value().await?;
                    Ok(Some(Payload::read_value(value)))
                }
            },

            Payload::Topology { topology } => {
                match &self.services {
                    NodeServices::Broadcast(service) => service.set_topology(topology.clone()),
                    NodeServices::Counter(_) => {
                        debug!("ignoring topology on counter node");
                    }
                }
                Ok(Some(Payload::TopologyOk))
            }

            Payload::Add { delta } => match &self.services {
                NodeServices::Counter(counter) => {
                    counter.add(*delta).await?;
                    Ok(Some(Payload::AddOk))
                }
                NodeServices::Broadcast(_) => Err(unsupported(request)),
            },

            Payload::Error { code, text } => {
                warn!(src = %request.src, code = %code, text = %text, "unsolicited error");
                Ok(None)
            }

            Payload::InitOk
            | Payload::EchoOk { .. }
            | Payload::GenerateOk { .. }
            | Payload::BroadcastOk
            | Payload::ReadOk { .. }
            | Payload::TopologyOk
            | Payload::AddOk
            | Payload::WriteOk
            | Payload::CasOk => {
                debug!(
                    src = %request.src,
                    kind = request.body.payload.type_name(),
                    "dropping reply with no waiting request"
                );
                Ok(None)
            }

            Payload::Read { key: Some(_) } | Payload::Write { .. } | Payload::Cas { .. } => {
                Err(unsupported(request))
            }
        }
    }

    fn require_broadcast(&self, request: &Envelope) -> NodeResult<&BroadcastService<T>> {
        self.broadcast().ok_or_else(|| unsupported(request))
    }
}

fn unsupported(request: &Envelope) -> NodeError {
    NodeError::NotSupported(request.body.payload.type_name().to_string())
}
