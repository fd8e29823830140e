//! Shared key-value store.
//!
//! The counter keeps per-node state in a store shared by the whole cluster.
//! [`RemoteKv`] talks to a key-value service node (`seq-kv`, `lin-kv`) over
//! the transport; [`MemoryKv`] keeps the same semantics in process.

use std::collections::HashMap;
use std::sync::Arc;

use murmur_proto::{ErrorCode, NodeId, Payload};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use crate::error::NodeError;
use crate::transport::{BoxFuture, Transport};

/// Errors returned by a [`KvStore`].
#[derive(Debug, Clone, Error)]
pub enum KvError {
    /// The key has never been written.
    #[error("key not found: {key}")]
    KeyNotFound {
        /// The missing key.
        key: String,
    },

    /// A compare-and-swap found a different value than expected.
    #[error("precondition failed for key {key}")]
    PreconditionFailed {
        /// The contended key.
        key: String,
    },

    /// The service answered with another error.
    #[error("kv service error {code}: {text}")]
    Remote {
        /// Error code from the service.
        code: ErrorCode,
        /// Detail from the service.
        text: String,
    },

    /// The service did not answer in time. The operation may or may not
    /// have taken effect.
    #[error("kv service timed out: {0}")]
    Timeout(String),

    /// The service could not be reached.
    #[error("kv service unavailable: {0}")]
    Unavailable(String),

    /// The service answered with a body of the wrong type.
    #[error("unexpected kv reply: {0}")]
    UnexpectedReply(String),
}

impl KvError {
    /// Error code to report to a caller failed by this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::KeyNotFound { .. } => ErrorCode::KeyDoesNotExist,
            Self::PreconditionFailed { .. } => ErrorCode::PreconditionFailed,
            Self::Remote { code, .. } => *code,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Unavailable(_) => ErrorCode::TemporarilyUnavailable,
            Self::UnexpectedReply(_) => ErrorCode::Crash,
        }
    }

    fn from_node_error(key: &str, err: NodeError) -> Self {
        match err {
            NodeError::Remote {
                code: ErrorCode::KeyDoesNotExist,
                ..
            } => Self::KeyNotFound {
                key: key.to_string(),
            },
            NodeError::Remote {
                code: ErrorCode::PreconditionFailed,
                ..
            } => Self::PreconditionFailed {
                key: key.to_string(),
            },
            NodeError::Remote { code, text } => Self::Remote { code, text },
            timeout @ NodeError::Timeout { .. } => Self::Timeout(timeout.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Linearizable (or sequential) integer store keyed by string.
pub trait KvStore: Send + Sync {
    /// Reads the value of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::KeyNotFound`] if the key was never written.
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64, KvError>>;

    /// Writes `value` to `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    fn write<'a>(&'a self, key: &'a str, value: i64) -> BoxFuture<'a, Result<(), KvError>>;

    /// Replaces `from` with `to` at `key` atomically.
    ///
    /// With `create_if_missing`, a missing key is created holding `to`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::PreconditionFailed`] if the current value is not
    /// `from`, [`KvError::KeyNotFound`] if the key is missing and may not be
    /// created.
    fn compare_and_swap<'a>(
        &'a self,
        key: &'a str,
        from: i64,
        to: i64,
        create_if_missing: bool,
    ) -> BoxFuture<'a, Result<(), KvError>>;
}

/// Key-value service reached over the transport.
#[derive(Debug)]
pub struct RemoteKv<T> {
    transport: Arc<T>,
    service: NodeId,
}

impl<T: Transport> RemoteKv<T> {
    /// Creates a client for the service node named `service`.
    #[must_use]
    pub fn new(transport: Arc<T>, service: impl Into<NodeId>) -> Self {
        Self {
            transport,
            service: service.into(),
        }
    }

    /// Name of the service node.
    #[must_use]
    pub const fn service(&self) -> &NodeId {
        &self.service
    }

    async fn call(&self, key: &str, payload: Payload) -> Result<Payload, KvError> {
        trace!(service = %self.service, key, kind = payload.type_name(), "kv request");
        self.transport
            .rpc(&self.service, payload)
            .await
            .map_err(|e| KvError::from_node_error(key, e))
    }
}

impl<T: Transport> KvStore for RemoteKv<T> {
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64, KvError>> {
        Box::pin(async move {
            let reply = self
                .call(
                    key,
                    Payload::Read {
                        key: Some(key.to_string()),
                    },
                )
                .await?;
            match reply {
                Payload::ReadOk {
                    value: Some(value), ..
                } => Ok(value),
                other => Err(KvError::UnexpectedReply(other.type_name().to_string())),
            }
        })
    }

    fn write<'a>(&'a self, key: &'a str, value: i64) -> BoxFuture<'a, Result<(), KvError>> {
        Box::pin(async move {
            let reply = self
                .call(
                    key,
                    Payload::Write {
                        key: key.to_string(),
                        value,
                    },
                )
                .await?;
            match reply {
                Payload::WriteOk => Ok(()),
                other => Err(KvError::UnexpectedReply(other.type_name().to_string())),
            }
        })
    }

    fn compare_and_swap<'a>(
        &'a self,
        key: &'a str,
        from: i64,
        to: i64,
        create_if_missing: bool,
    ) -> BoxFuture<'a, Result<(), KvError>> {
        Box::pin(async move {
            let reply = self
                .call(
                    key,
                    Payload::Cas {
                        key: key.to_string(),
                        from,
                        to,
                        create_if_not_exists: create_if_missing,
                    },
                )
                .await?;
            match reply {
                Payload::CasOk => Ok(()),
                other => Err(KvError::UnexpectedReply(other.type_name().to_string())),
            }
        })
    }
}

/// In-process store with the same semantics as the key-value services.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, i64>>,
}

impl MemoryKv {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<i64> {
        self.entries.lock().get(key).copied()
    }

    /// Number of keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no key was ever written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KvStore for MemoryKv {
    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64, KvError>> {
        let result = self.get(key).ok_or_else(|| KvError::KeyNotFound {
            key: key.to_string(),
        });
        Box::pin(async move { result })
    }

    fn write<'a>(&'a self, key: &'a str, value: i64) -> BoxFuture<'a, Result<(), KvError>> {
        self.entries.lock().insert(key.to_string(), value);
        Box::pin(async { Ok(()) })
    }

    fn compare_and_swap<'a>(
        &'a self,
        key: &'a str,
        from: i64,
        to: i64,
        create_if_missing: bool,
    ) -> BoxFuture<'a, Result<(), KvError>> {
        let result = {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                Some(current) if *current == from => {
                    *current = to;
                    Ok(())
                }
                Some(_) => Err(KvError::PreconditionFailed {
                    key: key.to_string(),
                }),
                None if create_if_missing => {
                    entries.insert(key.to_string(), to);
                    Ok(())
                }
                None => Err(KvError::KeyNotFound {
                    key: key.to_string(),
                }),
            }
        };
        Box::pin(async move { result })
    }
}
