//! Compare-and-swap counter.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{Counter, sum_contributions};
use crate::error::{NodeError, NodeResult};
use crate::kv::{KvError, KvStore};
use crate::transport::{BoxFuture, NodeIdentity};

/// Counter whose contribution lives only in the shared store.
///
/// An add reads this node's key, computes the new value and swaps it in,
/// retrying from the read whenever the store reports that the key changed
/// underneath it. There is no retry limit: contention on a key only comes
/// from this node's own concurrent adds, one of which always wins.
#[derive(Debug)]
pub struct CasCounter<K> {
    identity: NodeIdentity,
    kv: Arc<K>,
}

impl<K: KvStore> CasCounter<K> {
    /// Creates a counter backed by `kv`.
    #[must_use]
    pub const fn new(identity: NodeIdentity, kv: Arc<K>) -> Self {
        Self { identity, kv }
    }

    fn key(&self) -> &str {
        self.identity.self_id().as_str()
    }

    /// Creates this node's key with value 0 unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails for any reason other than the
    /// key already existing.
    pub async fn ensure_key(&self) -> NodeResult<()> {
        match self.kv.compare_and_swap(self.key(), 0, 0, true).await {
            Ok(()) | Err(KvError::PreconditionFailed { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Adds `delta` with a read, compute, compare-and-swap loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails with anything other than a
    /// precondition failure.
    pub async fn add_delta(&self, delta: i64) -> NodeResult<()> {
        let key = self.key();
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let (current, exists) = match self.kv.read(key).await {
                Ok(value) => (value, true),
                Err(KvError::KeyNotFound { .. }) => (0, false),
                Err(e) => return Err(e.into()),
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| NodeError::Malformed(format!("counter overflow adding {delta}")))?;

            match self.kv.compare_and_swap(key, current, next, !exists).await {
                Ok(()) => {
                    debug!(delta, value = next, attempts, "counter updated");
                    return Ok(());
                }
                Err(KvError::PreconditionFailed { .. }) => {
                    trace!(attempts, "counter changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn total(&self) -> NodeResult<i64> {
        sum_contributions(self.kv.as_ref(), self.identity.all_node_ids()).await
    }
}

impl<K: KvStore + 'static> Counter for CasCounter<K> {
    fn initialize(&self) -> BoxFuture<'_, NodeResult<()>> {
        Box::pin(self.ensure_key())
    }

    fn add(&self, delta: i64) -> BoxFuture<'_, NodeResult<()>> {
        Box::pin(self.add_delta(delta))
    }

    fn value(&self) -> BoxFuture<'_, NodeResult<i64>> {
        Box::pin(self.total())
    }
}
