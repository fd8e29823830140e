//! # murmur-proto
//!
//! Protocol definitions for murmur nodes.
//!
//! Every message is a JSON [`Envelope`] carried on its own line. The body is
//! a [`Body`] holding the optional request/response correlation ids and a
//! [`Payload`] tagged by its `type` field.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod messages;
pub mod types;

pub use error::ProtoError;
pub use messages::{Body, Envelope, Header, Payload, KNOWN_TYPES};
pub use types::{ErrorCode, MsgId, NodeId, Topology};
