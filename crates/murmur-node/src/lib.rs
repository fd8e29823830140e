//! murmur node
//!
//! A node for a message-passing cluster that speaks newline-delimited JSON
//! on stdin/stdout. It serves one of two workloads:
//!
//! - **Broadcast**: every value broadcast to any node reaches every node,
//!   through immediate fan-out plus periodic anti-entropy
//! - **Counter**: a grow-only counter backed by a shared key-value service
//!
//! Every node also answers `echo` and `generate` (unique ids).
//!
//! ## Architecture
//!
//! ```text
//!  stdin ──► Runtime ──► NodeHandler ──► BroadcastService / Counter
//!               │                               │
//!               ▼                               ▼
//!        ChannelTransport ◄──────────── peers, kv service
//!               │
//!  stdout ◄── writer task
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcast;
pub mod config;
pub mod counter;
pub mod error;
pub mod handlers;
pub mod kv;
pub mod runtime;
pub mod transport;
pub mod unique_id;

pub use broadcast::{BroadcastService, GossipPropagator, SeenSet, TopologyTable};
pub use config::{
    CounterConfig, CounterStrategy, FanoutStrategy, GossipConfig, NodeConfig, ReconcileStrategy,
    Workload,
};
pub use counter::{AggregateCounter, CasCounter, Counter};
pub use error::{NodeError, NodeResult};
pub use handlers::{NodeHandler, NodeServices};
pub use kv::{KvError, KvStore, MemoryKv, RemoteKv};
pub use runtime::Runtime;
pub use transport::{ChannelTransport, NodeIdentity, Transport};
