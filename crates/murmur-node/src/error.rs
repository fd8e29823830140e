//! Error types for murmur-node.

use murmur_proto::{ErrorCode, MsgId, NodeId, ProtoError};
use thiserror::Error;

use crate::kv::KvError;

/// Errors that can occur in node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Protocol encoding or decoding failed.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    /// A request body did not have the shape its type requires.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The request type is not served by this node's workload.
    #[error("unsupported request type: {0}")]
    NotSupported(String),

    /// The peer answered an RPC with an `error` body.
    #[error("remote error {code}: {text}")]
    Remote {
        /// Error code from the reply.
        code: ErrorCode,
        /// Detail from the reply.
        text: String,
    },

    /// No reply arrived within the RPC timeout.
    #[error("rpc {msg_id} to {dest} timed out")]
    Timeout {
        /// Destination of the request.
        dest: NodeId,
        /// Id of the request.
        msg_id: MsgId,
    },

    /// The counter total does not fit in an `i64`.
    #[error("counter overflow: {0}")]
    Overflow(String),

    /// The outbound channel closed, the runtime is shutting down.
    #[error("outbound channel closed")]
    ChannelClosed,

    /// Shared store operation failed.
    #[error("kv store error: {0}")]
    Kv(#[from] KvError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Error code to report to the caller when this error fails a request.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Proto(_) | Self::Malformed(_) => ErrorCode::MalformedRequest,
            Self::NotSupported(_) => ErrorCode::NotSupported,
            Self::Remote { code, .. } => *code,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Kv(kv) => kv.code(),
            Self::Overflow(_) | Self::ChannelClosed | Self::Config(_) | Self::Io(_) => {
                ErrorCode::Crash
            }
        }
    }
}

/// Result alias for node operations.
pub type NodeResult<T> = Result<T, NodeError>;
