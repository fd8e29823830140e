//! Aggregate-on-read counter.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::{Counter, sum_contributions};
use crate::error::{NodeError, NodeResult};
use crate::kv::KvStore;
use crate::transport::{BoxFuture, NodeIdentity};

/// Counter that keeps its own contribution in memory.
///
/// Each add updates the local accumulator and publishes the new total under
/// this node's key before replying. A read adds the local accumulator to
/// the values other nodes have published; this node's own key is never
/// read back, so it cannot be counted twice.
///
/// The accumulator lock is held across the publish so that a slower
/// publish of an older total never lands after a newer one.
#[derive(Debug)]
pub struct AggregateCounter<K> {
    identity: NodeIdentity,
    kv: Arc<K>,
    local: Mutex<i64>,
}

impl<K: KvStore> AggregateCounter<K> {
    /// Creates a counter with a zero contribution.
    #[must_use]
    pub fn new(identity: NodeIdentity, kv: Arc<K>) -> Self {
        Self {
            identity,
            kv,
            local: Mutex::new(0),
        }
    }

    /// This node's contribution.
    pub async fn local(&self) -> i64 {
        *self.local.lock().await
    }

    async fn add_and_publish(&self, delta: i64) -> NodeResult<()> {
        let mut local = self.local.lock().await;
        let total = local
            .checked_add(delta)
            .ok_or_else(|| NodeError::Malformed(format!("counter overflow adding {delta}")))?;
        *local = total;
        // A failed publish keeps the delta; the next successful add
        // publishes it.
        self.kv.write(self.identity.self_id().as_str(), total).await?;
        debug!(delta, total, "published contribution");
        Ok(())
    }

    async fn total(&self) -> NodeResult<i64> {
        let local = self.local().await;
        let others = sum_contributions(self.kv.as_ref(), self.identity.others()).await?;
        local
            .checked_add(others)
            .ok_or_else(|| NodeError::Overflow(format!("{local} + {others}")))
    }
}

impl<K: KvStore + 'static> Counter for AggregateCounter<K> {
    fn add(&self, delta: i64) -> BoxFuture<'_, NodeResult<()>> {
        Box::pin(self.add_and_publish(delta))
    }

    fn value(&self) -> BoxFuture<'_, NodeResult<i64>> {
        Box::pin(self.total())
    }
}
