//! Core types for the murmur protocol.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of a message, unique per sending node.
pub type MsgId = u64;

/// Neighbour lists keyed by node, as delivered by a `topology` request.
pub type Topology = HashMap<NodeId, Vec<NodeId>>;

/// Name of a node or service on the network (`n1`, `c4`, `seq-kv`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Numeric error codes carried by `error` bodies.
///
/// Unknown codes survive a decode/encode cycle through [`ErrorCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ErrorCode {
    /// The request timed out.
    Timeout,
    /// The destination node does not exist.
    NodeNotFound,
    /// The request type is not supported by the receiver.
    NotSupported,
    /// The operation cannot be served right now; retrying may succeed.
    TemporarilyUnavailable,
    /// The request body could not be understood.
    MalformedRequest,
    /// The receiver failed in an indefinite way.
    Crash,
    /// The operation definitely did not happen.
    Abort,
    /// The requested key does not exist.
    KeyDoesNotExist,
    /// The key already exists and the operation required it not to.
    KeyAlreadyExists,
    /// A compare-and-swap precondition did not hold.
    PreconditionFailed,
    /// A transaction was aborted due to a conflict.
    TxnConflict,
    /// Any code this crate does not name.
    Other(u32),
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0 => Self::Timeout,
            1 => Self::NodeNotFound,
            10 => Self::NotSupported,
            11 => Self::TemporarilyUnavailable,
            12 => Self::MalformedRequest,
            13 => Self::Crash,
            14 => Self::Abort,
            20 => Self::KeyDoesNotExist,
            21 => Self::KeyAlreadyExists,
            22 => Self::PreconditionFailed,
            30 => Self::TxnConflict,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Timeout => 0,
            ErrorCode::NodeNotFound => 1,
            ErrorCode::NotSupported => 10,
            ErrorCode::TemporarilyUnavailable => 11,
            ErrorCode::MalformedRequest => 12,
            ErrorCode::Crash => 13,
            ErrorCode::Abort => 14,
            ErrorCode::KeyDoesNotExist => 20,
            ErrorCode::KeyAlreadyExists => 21,
            ErrorCode::PreconditionFailed => 22,
            ErrorCode::TxnConflict => 30,
            ErrorCode::Other(other) => other,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::NodeNotFound => "node-not-found",
            Self::NotSupported => "not-supported",
            Self::TemporarilyUnavailable => "temporarily-unavailable",
            Self::MalformedRequest => "malformed-request",
            Self::Crash => "crash",
            Self::Abort => "abort",
            Self::KeyDoesNotExist => "key-does-not-exist",
            Self::KeyAlreadyExists => "key-already-exists",
            Self::PreconditionFailed => "precondition-failed",
            Self::TxnConflict => "txn-conflict",
            Self::Other(code) => return write!(f, "error-{code}"),
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, ErrorCode::Timeout ; "timeout")]
    #[test_case(10, ErrorCode::NotSupported ; "not supported")]
    #[test_case(12, ErrorCode::MalformedRequest ; "malformed")]
    #[test_case(20, ErrorCode::KeyDoesNotExist ; "key missing")]
    #[test_case(22, ErrorCode::PreconditionFailed ; "precondition")]
    #[test_case(30, ErrorCode::TxnConflict ; "txn conflict")]
    #[test_case(1000, ErrorCode::Other(1000) ; "custom")]
    fn test_error_code_from_number(raw: u32, expected: ErrorCode) {
        assert_eq!(ErrorCode::from(raw), expected);
        assert_eq!(u32::from(expected), raw);
    }

    #[test]
    fn test_error_code_serializes_as_number() {
        let json = serde_json::to_string(&ErrorCode::PreconditionFailed).unwrap();
        assert_eq!(json, "22");
        let code: ErrorCode = serde_json::from_str("20").unwrap();
        assert_eq!(code, ErrorCode::KeyDoesNotExist);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::MalformedRequest.to_string(), "malformed-request");
        assert_eq!(ErrorCode::Other(42).to_string(), "error-42");
    }

    #[test]
    fn test_node_id_is_plain_string_on_the_wire() {
        let id = NodeId::new("n1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"n1\"");
        assert_eq!(id.to_string(), "n1");
        assert_eq!(NodeId::from("n1"), id);
    }
}
