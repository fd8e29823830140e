//! Replicated grow-only counter.
//!
//! Every node owns one contribution, stored under its node id in a shared
//! key-value store; the global value is the sum of all contributions.
//! Two convergence strategies are available:
//!
//! - [`AggregateCounter`]: a local accumulator published on every add and
//!   summed with the other nodes' published values on read
//! - [`CasCounter`]: the stored value is the only copy, updated by an
//!   unbounded compare-and-swap retry loop

mod aggregate;
mod cas;

pub use aggregate::AggregateCounter;
pub use cas::CasCounter;

use std::sync::Arc;

use futures::future::join_all;

use crate::config::CounterStrategy;
use crate::error::{NodeError, NodeResult};
use crate::kv::{KvError, KvStore};
use crate::transport::{BoxFuture, NodeIdentity};

/// A counter whose value is shared by the whole cluster.
pub trait Counter: Send + Sync {
    /// Prepares the shared store before the first add.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be prepared.
    fn initialize(&self) -> BoxFuture<'_, NodeResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Adds `delta` to this node's contribution.
    ///
    /// # Errors
    ///
    /// Returns an error if the update cannot be stored.
    fn add(&self, delta: i64) -> BoxFuture<'_, NodeResult<()>>;

    /// Current global value.
    ///
    /// # Errors
    ///
    /// Returns an error if a contribution cannot be read.
    fn value(&self) -> BoxFuture<'_, NodeResult<i64>>;
}

/// Creates the counter for `strategy`.
#[must_use]
pub fn build_counter<K: KvStore + 'static>(
    strategy: CounterStrategy,
    identity: NodeIdentity,
    kv: Arc<K>,
) -> Arc<dyn Counter> {
    match strategy {
        CounterStrategy::Aggregate => Arc::new(AggregateCounter::new(identity, kv)),
        CounterStrategy::Cas => Arc::new(CasCounter::new(identity, kv)),
    }
}

/// Reads each node's contribution concurrently and sums them. Nodes that
/// never published count as zero.
async fn sum_contributions<'a, K, I>(kv: &K, nodes: I) -> NodeResult<i64>
where
    K: KvStore + ?Sized,
    I: IntoIterator<Item = &'a murmur_proto::NodeId>,
{
    let reads = join_all(nodes.into_iter().map(|node| kv.read(node.as_str()))).await;

    let mut total: i64 = 0;
    for read in reads {
        match read {
            Ok(value) => {
                total = total
                    .checked_add(value)
                    .ok_or_else(|| NodeError::Overflow(format!("{total} + {value}")))?;
            }
            Err(KvError::KeyNotFound { .. }) => {}
            Err(e) => return Err(NodeError::Kv(e)),
        }
    }
    Ok(total)
}
