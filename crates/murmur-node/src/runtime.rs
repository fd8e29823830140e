//! Node runtime.
//!
//! Reads newline-delimited JSON envelopes from an input stream, performs
//! `init`, routes replies to waiting RPCs and handles every other request on
//! its own task. Outbound envelopes are written one per line by a dedicated
//! writer task.
//!
//! ## Lifecycle
//!
//! 1. Messages before `init` are logged and dropped
//! 2. `init` fixes the node identity and starts the workload services
//! 3. End of input stops the anti-entropy loop and lets the writer drain

use std::io;
use std::sync::Arc;

use murmur_proto::{Envelope, ErrorCode, Header, Payload};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::broadcast::BroadcastService;
use crate::config::{NodeConfig, Workload};
use crate::counter::build_counter;
use crate::error::NodeResult;
use crate::handlers::{NodeHandler, NodeServices};
use crate::kv::RemoteKv;
use crate::transport::{ChannelTransport, NodeIdentity, Transport};

/// State created by `init`.
struct ActiveNode {
    transport: Arc<ChannelTransport>,
    handler: Arc<NodeHandler<ChannelTransport>>,
    anti_entropy: Option<JoinHandle<()>>,
}

/// Runs one node over a pair of byte streams.
#[derive(Debug, Clone)]
pub struct Runtime {
    config: NodeConfig,
}

impl Runtime {
    /// Creates a runtime with the given configuration.
    #[must_use]
    pub const fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// The runtime's configuration.
    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Serves messages from `input` until it ends, writing to `output`.
    ///
    /// Returns once the input is exhausted, background work is stopped and
    /// every queued outbound message has been written.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the input or writing the output fails.
    pub async fn run<R, W>(self, input: R, output: W) -> NodeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_lines(output, outbound_rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let mut node: Option<ActiveNode> = None;
        let mut lines = input.lines();
        let read_result = loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match Envelope::from_json(line) {
                Ok(envelope) => {
                    self.dispatch(envelope, &mut node, &outbound_tx, &shutdown_rx);
                }
                Err(e) => reject_line(line, &e.to_string(), &outbound_tx),
            }
        };

        info!("input closed, shutting down");
        // Receivers may all be gone already.
        let _ = shutdown_tx.send(());
        if let Some(active) = node.take() {
            if let Some(handle) = active.anti_entropy {
                if let Err(e) = handle.await {
                    warn!(error = %e, "anti-entropy task failed");
                }
            }
        }
        drop(outbound_tx);

        let write_result = writer.await.map_err(io::Error::other)?;
        read_result?;
        write_result?;
        Ok(())
    }

    fn dispatch(
        &self,
        envelope: Envelope,
        node: &mut Option<ActiveNode>,
        outbound: &mpsc::UnboundedSender<Envelope>,
        shutdown: &watch::Receiver<()>,
    ) {
        if let Some(active) = node.as_ref() {
            if envelope.body.in_reply_to.is_some() {
                if let Some(unclaimed) = active.transport.complete(envelope) {
                    trace!(src = %unclaimed.src, "dropped unclaimed reply");
                }
                return;
            }

            let transport = Arc::clone(&active.transport);
            let handler = Arc::clone(&active.handler);
            tokio::spawn(async move {
                handle_request(transport.as_ref(), handler.as_ref(), &envelope).await;
            });
            return;
        }

        if let Payload::Init { node_id, node_ids } = &envelope.body.payload {
            let identity = NodeIdentity::new(node_id.clone(), node_ids.clone());
            *node = Some(self.start_node(identity, &envelope, outbound, shutdown));
        } else {
            warn!(
                src = %envelope.src,
                kind = envelope.body.payload.type_name(),
                "dropping message received before init"
            );
        }
    }

    fn start_node(
        &self,
        identity: NodeIdentity,
        init: &Envelope,
        outbound: &mpsc::UnboundedSender<Envelope>,
        shutdown: &watch::Receiver<()>,
    ) -> ActiveNode {
        info!(
            node = %identity.self_id(),
            cluster = identity.all_node_ids().len(),
            workload = ?self.config.workload,
            "node initialized"
        );

        let transport = Arc::new(ChannelTransport::new(
            identity,
            outbound.clone(),
            self.config.rpc_timeout(),
        ));

        if let Err(e) = transport.reply(init, Payload::InitOk) {
            warn!(error = %e, "failed to acknowledge init");
        }

        let mut anti_entropy = None;
        let services = match self.config.workload {
            Workload::Broadcast => {
                let service =
                    BroadcastService::new(Arc::clone(&transport), self.config.gossip.clone());
                anti_entropy = Some(service.start(shutdown.clone()));
                NodeServices::Broadcast(service)
            }
            Workload::Counter => {
                let kv = Arc::new(RemoteKv::new(
                    Arc::clone(&transport),
                    self.config.counter.kv_service.clone(),
                ));
                let counter = build_counter(
                    self.config.counter.strategy,
                    transport.identity().clone(),
                    kv,
                );
                let background = Arc::clone(&counter);
                tokio::spawn(async move {
                    if let Err(e) = background.initialize().await {
                        warn!(error = %e, "counter initialization failed");
                    }
                });
                NodeServices::Counter(counter)
            }
        };

        ActiveNode {
            transport,
            handler: Arc::new(NodeHandler::new(services)),
            anti_entropy,
        }
    }
}

/// Runs the handler for one request and sends its reply or error.
async fn handle_request<T: Transport + 'static>(
    transport: &T,
    handler: &NodeHandler<T>,
    request: &Envelope,
) {
    debug!(
        src = %request.src,
        kind = request.body.payload.type_name(),
        msg_id = ?request.body.msg_id,
        "handling request"
    );

    let reply = match handler.handle(request).await {
        Ok(Some(payload)) => payload,
        Ok(None) => return,
        Err(e) => {
            warn!(src = %request.src, error = %e, "request failed");
            if request.body.msg_id.is_none() {
                return;
            }
            Payload::error(e.code(), e.to_string())
        }
    };

    if let Err(e) = transport.reply(request, reply) {
        warn!(dest = %request.src, error = %e, "failed to send reply");
    }
}

/// Answers a line that is not a valid envelope, if it can be addressed.
fn reject_line(line: &str, reason: &str, outbound: &mpsc::UnboundedSender<Envelope>) {
    let Some(header) = Header::parse(line) else {
        warn!(reason, "skipping unreadable line");
        return;
    };
    if header.in_reply_to.is_some() || header.msg_id.is_none() {
        warn!(src = %header.src, reason, "skipping undecodable message");
        return;
    }

    let (code, text) = if header.has_known_type() {
        (ErrorCode::MalformedRequest, reason.to_string())
    } else {
        let kind = header.kind.as_deref().unwrap_or("<missing>");
        (ErrorCode::NotSupported, format!("unsupported message type: {kind}"))
    };
    warn!(src = %header.src, code = %code, reason, "rejecting undecodable request");

    if outbound.send(header.error_reply(code, text)).is_err() {
        debug!("output closed, rejection not sent");
    }
}

/// Writes each outbound envelope as one JSON line until every sender is gone.
async fn write_lines<W: AsyncWrite + Unpin>(
    mut output: W,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
) -> io::Result<()> {
    while let Some(envelope) = outbound.recv().await {
        let mut line = match envelope.to_json() {
            Ok(line) => line,
            Err(e) => {
                warn!(dest = %envelope.dest, error = %e, "failed to encode message");
                continue;
            }
        };
        line.push('\n');
        output.write_all(line.as_bytes()).await?;
        output.flush().await?;
        trace!(dest = %envelope.dest, kind = envelope.body.payload.type_name(), "sent");
    }
    output.shutdown().await
}
