//! Protocol message definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtoError;
use crate::types::{ErrorCode, MsgId, NodeId, Topology};

/// A single message as it travels between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender.
    pub src: NodeId,
    /// Recipient.
    pub dest: NodeId,
    /// Message body.
    pub body: Body,
}

/// Message body: correlation ids plus the typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Request id, present when the sender expects a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<MsgId>,
    /// Id of the request this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MsgId>,
    /// Typed payload, tagged by `type`.
    #[serde(flatten)]
    pub payload: Payload,
}

/// Typed message payloads, tagged by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Node initialisation.
    Init {
        /// Id assigned to the receiving node.
        node_id: NodeId,
        /// Every node in the cluster, including the receiver.
        node_ids: Vec<NodeId>,
    },
    /// Initialisation acknowledged.
    InitOk,
    /// Echo request.
    Echo {
        /// Arbitrary value to send back.
        echo: Value,
    },
    /// Echo reply.
    EchoOk {
        /// The value from the request.
        echo: Value,
    },
    /// Unique id request.
    Generate,
    /// Unique id reply.
    GenerateOk {
        /// Generated id.
        id: String,
    },
    /// Client broadcast of a single value.
    Broadcast {
        /// Value to broadcast.
        message: i64,
    },
    /// Broadcast acknowledged.
    BroadcastOk,
    /// Peer-to-peer fan-out of a single value. Never answered.
    BroadcastPeer {
        /// Value being propagated.
        message: i64,
    },
    /// Peer-to-peer batch of values. Never answered.
    BroadcastBatch {
        /// Values being propagated.
        messages: Vec<i64>,
    },
    /// Read request. `key` is only set for key-value service reads.
    Read {
        /// Key to read from a key-value service.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    /// Read reply.
    ReadOk {
        /// Every value seen by a broadcast node.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        messages: Option<Vec<i64>>,
        /// Counter total or key-value service value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<i64>,
    },
    /// Topology assignment.
    Topology {
        /// Neighbour lists for every node.
        topology: Topology,
    },
    /// Topology acknowledged.
    TopologyOk,
    /// Counter increment.
    Add {
        /// Amount to add.
        delta: i64,
    },
    /// Increment acknowledged.
    AddOk,
    /// Key-value write.
    Write {
        /// Key to write.
        key: String,
        /// Value to store.
        value: i64,
    },
    /// Write acknowledged.
    WriteOk,
    /// Key-value compare-and-swap.
    Cas {
        /// Key to update.
        key: String,
        /// Expected current value.
        from: i64,
        /// Replacement value.
        to: i64,
        /// Create the key with `to` when it does not exist.
        #[serde(default)]
        create_if_not_exists: bool,
    },
    /// Compare-and-swap acknowledged.
    CasOk,
    /// Failure reply.
    Error {
        /// Error code.
        code: ErrorCode,
        /// Human-readable detail.
        #[serde(default)]
        text: String,
    },
}

/// Wire names of every payload type this crate understands.
pub const KNOWN_TYPES: &[&str] = &[
    "init",
    "init_ok",
    "echo",
    "echo_ok",
    "generate",
    "generate_ok",
    "broadcast",
    "broadcast_ok",
    "broadcast_peer",
    "broadcast_batch",
    "read",
    "read_ok",
    "topology",
    "topology_ok",
    "add",
    "add_ok",
    "write",
    "write_ok",
    "cas",
    "cas_ok",
    "error",
];

impl Payload {
    /// Wire name of this payload's `type`.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::InitOk => "init_ok",
            Self::Echo { .. } => "echo",
            Self::EchoOk { .. } => "echo_ok",
            Self::Generate => "generate",
            Self::GenerateOk { .. } => "generate_ok",
            Self::Broadcast { .. } => "broadcast",
            Self::BroadcastOk => "broadcast_ok",
            Self::BroadcastPeer { .. } => "broadcast_peer",
            Self::BroadcastBatch { .. } => "broadcast_batch",
            Self::Read { .. } => "read",
            Self::ReadOk { .. } => "read_ok",
            Self::Topology { .. } => "topology",
            Self::TopologyOk => "topology_ok",
            Self::Add { .. } => "add",
            Self::AddOk => "add_ok",
            Self::Write { .. } => "write",
            Self::WriteOk => "write_ok",
            Self::Cas { .. } => "cas",
            Self::CasOk => "cas_ok",
            Self::Error { .. } => "error",
        }
    }

    /// Create an error payload.
    #[must_use]
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Self::Error {
            code,
            text: text.into(),
        }
    }

    /// Create a broadcast `read_ok` carrying every seen value.
    #[must_use]
    pub const fn read_messages(messages: Vec<i64>) -> Self {
        Self::ReadOk {
            messages: Some(messages),
            value: None,
        }
    }

    /// Create a counter or key-value `read_ok` carrying a single value.
    #[must_use]
    pub const fn read_value(value: i64) -> Self {
        Self::ReadOk {
            messages: None,
            value: Some(value),
        }
    }
}

impl Body {
    /// Create a body with no correlation ids.
    #[must_use]
    pub const fn new(payload: Payload) -> Self {
        Self {
            msg_id: None,
            in_reply_to: None,
            payload,
        }
    }

    /// Set the request id.
    #[must_use]
    pub const fn with_msg_id(mut self, msg_id: MsgId) -> Self {
        self.msg_id = Some(msg_id);
        self
    }

    /// Set the id of the request being answered.
    #[must_use]
    pub const fn replying_to(mut self, in_reply_to: Option<MsgId>) -> Self {
        self.in_reply_to = in_reply_to;
        self
    }
}

impl Envelope {
    /// Create an envelope.
    #[must_use]
    pub const fn new(src: NodeId, dest: NodeId, body: Body) -> Self {
        Self { src, dest, body }
    }

    /// Build the reply to this message, swapping the addresses.
    #[must_use]
    pub fn reply(&self, payload: Payload) -> Self {
        Self {
            src: self.dest.clone(),
            dest: self.src.clone(),
            body: Body::new(payload).replying_to(self.body.msg_id),
        }
    }

    /// Serialize to a single JSON line (without the trailing newline).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}

/// Addressing and correlation fields of a message whose payload did not
/// decode. Used to answer undecodable requests with an `error` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Sender.
    pub src: NodeId,
    /// Recipient.
    pub dest: NodeId,
    /// Body type, if present and a string.
    pub kind: Option<String>,
    /// Request id, if present.
    pub msg_id: Option<MsgId>,
    /// Reply correlation id, if present.
    pub in_reply_to: Option<MsgId>,
}

impl Header {
    /// Extract the header of a raw JSON line, tolerating any body shape.
    ///
    /// Returns `None` if the line is not an object with string `src`/`dest`.
    #[must_use]
    pub fn parse(json: &str) -> Option<Self> {
        let raw: Value = serde_json::from_str(json).ok()?;
        let src = raw.get("src")?.as_str()?;
        let dest = raw.get("dest")?.as_str()?;
        let body = raw.get("body");
        let field = |name: &str| body.and_then(|b| b.get(name));
        Some(Self {
            src: NodeId::from(src),
            dest: NodeId::from(dest),
            kind: field("type").and_then(Value::as_str).map(str::to_string),
            msg_id: field("msg_id").and_then(Value::as_u64),
            in_reply_to: field("in_reply_to").and_then(Value::as_u64),
        })
    }

    /// Returns true if the body's `type` is one this crate understands.
    #[must_use]
    pub fn has_known_type(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|kind| KNOWN_TYPES.contains(&kind))
    }

    /// Build an `error` reply to the message this header came from.
    #[must_use]
    pub fn error_reply(&self, code: ErrorCode, text: impl Into<String>) -> Envelope {
        Envelope {
            src: self.dest.clone(),
            dest: self.src.clone(),
            body: Body::new(Payload::error(code, text)).replying_to(self.msg_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: &Value) -> Envelope {
        Envelope::from_json(&value.to_string()).unwrap()
    }

    #[test]
    fn test_decode_broadcast_request() {
        let env = decode(&json!({
            "src": "c1",
            "dest": "n1",
            "body": {"type": "broadcast", "msg_id": 7, "message": 42}
        }));
        assert_eq!(env.src, NodeId::from("c1"));
        assert_eq!(env.body.msg_id, Some(7));
        assert_eq!(env.body.payload, Payload::Broadcast { message: 42 });
    }

    #[test]
    fn test_decode_init() {
        let env = decode(&json!({
            "src": "c0",
            "dest": "n2",
            "body": {"type": "init", "msg_id": 1, "node_id": "n2", "node_ids": ["n1", "n2", "n3"]}
        }));
        match env.body.payload {
            Payload::Init { node_id, node_ids } => {
                assert_eq!(node_id, NodeId::from("n2"));
                assert_eq!(node_ids.len(), 3);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_decode_topology() {
        let env = decode(&json!({
            "src": "c1",
            "dest": "n1",
            "body": {"type": "topology", "msg_id": 2, "topology": {"n1": ["n2"], "n2": ["n1"]}}
        }));
        let Payload::Topology { topology } = env.body.payload else {
            panic!("expected topology");
        };
        assert_eq!(topology[&NodeId::from("n1")], vec![NodeId::from("n2")]);
    }

    #[test]
    fn test_unit_payload_ignores_extra_fields() {
        let env = decode(&json!({
            "src": "c1",
            "dest": "n1",
            "body": {"type": "generate", "msg_id": 3}
        }));
        assert_eq!(env.body.payload, Payload::Generate);
        assert_eq!(env.body.msg_id, Some(3));
    }

    #[test]
    fn test_reply_swaps_addresses_and_correlates() {
        let request = decode(&json!({
            "src": "c1",
            "dest": "n1",
            "body": {"type": "read", "msg_id": 9}
        }));
        let reply = request.reply(Payload::read_messages(vec![1, 2]));
        assert_eq!(reply.src, NodeId::from("n1"));
        assert_eq!(reply.dest, NodeId::from("c1"));
        assert_eq!(reply.body.in_reply_to, Some(9));
        assert_eq!(reply.body.msg_id, None);

        let json: Value = serde_json::from_str(&reply.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({
                "src": "n1",
                "dest": "c1",
                "body": {"type": "read_ok", "in_reply_to": 9, "messages": [1, 2]}
            })
        );
    }

    #[test]
    fn test_counter_read_ok_omits_messages() {
        let body = Body::new(Payload::read_value(5)).replying_to(Some(4));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, json!({"type": "read_ok", "in_reply_to": 4, "value": 5}));
    }

    #[test]
    fn test_kv_read_carries_key() {
        let body = Body::new(Payload::Read {
            key: Some("n1".to_string()),
        })
        .with_msg_id(11);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, json!({"type": "read", "msg_id": 11, "key": "n1"}));
    }

    #[test]
    fn test_cas_defaults_create_flag() {
        let env = decode(&json!({
            "src": "n1",
            "dest": "seq-kv",
            "body": {"type": "cas", "msg_id": 1, "key": "n1", "from": 0, "to": 3}
        }));
        assert_eq!(
            env.body.payload,
            Payload::Cas {
                key: "n1".to_string(),
                from: 0,
                to: 3,
                create_if_not_exists: false,
            }
        );
    }

    #[test]
    fn test_decode_error_reply() {
        let env = decode(&json!({
            "src": "seq-kv",
            "dest": "n1",
            "body": {"type": "error", "in_reply_to": 5, "code": 20, "text": "key does not exist"}
        }));
        assert_eq!(env.body.in_reply_to, Some(5));
        assert_eq!(
            env.body.payload,
            Payload::error(ErrorCode::KeyDoesNotExist, "key does not exist")
        );
    }

    #[test]
    fn test_unknown_type_fails_to_decode() {
        let line = json!({
            "src": "c1",
            "dest": "n1",
            "body": {"type": "txn", "msg_id": 1}
        })
        .to_string();
        assert!(matches!(
            Envelope::from_json(&line),
            Err(ProtoError::Decoding(_))
        ));
    }

    #[test]
    fn test_header_of_undecodable_message() {
        let line = json!({
            "src": "c1",
            "dest": "n1",
            "body": {"type": "broadcast", "msg_id": 8, "message": "not a number"}
        })
        .to_string();
        assert!(Envelope::from_json(&line).is_err());

        let header = Header::parse(&line).unwrap();
        assert_eq!(header.kind.as_deref(), Some("broadcast"));
        assert!(header.has_known_type());
        let reply = header.error_reply(ErrorCode::MalformedRequest, "bad message");
        assert_eq!(reply.dest, NodeId::from("c1"));
        assert_eq!(reply.body.in_reply_to, Some(8));
    }

    #[test]
    fn test_header_rejects_non_envelopes() {
        assert!(Header::parse("not json").is_none());
        assert!(Header::parse("{\"src\": 1}").is_none());
    }

    #[test]
    fn test_type_name_matches_wire_tag() {
        let payloads = [
            Payload::InitOk,
            Payload::Broadcast { message: 1 },
            Payload::BroadcastBatch { messages: vec![] },
            Payload::Add { delta: 1 },
            Payload::CasOk,
        ];
        for payload in payloads {
            let json = serde_json::to_value(&payload).unwrap();
            assert_eq!(json["type"], payload.type_name());
            assert!(KNOWN_TYPES.contains(&payload.type_name()));
        }
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn batch_values_survive_the_wire(messages in proptest::collection::vec(any::<i64>(), 0..64)) {
                let env = Envelope::new(
                    NodeId::from("n1"),
                    NodeId::from("n2"),
                    Body::new(Payload::BroadcastBatch { messages: messages.clone() }),
                );
                let decoded = Envelope::from_json(&env.to_json().unwrap()).unwrap();
                prop_assert_eq!(decoded.body.payload, Payload::BroadcastBatch { messages });
            }
        }
    }
}
