//! Replication Protocol
//!
//! Defines the topology messages an agent streams to its master.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::{Edge, Elements, Node};

/// Topology messages. Each one is self-contained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "obj")]
pub enum Message {
    // ========== Resync ==========
    /// Full state of the sender's graph, replaces everything previously
    /// received from that sender
    Sync(Elements),

    // ========== Incremental ==========
    NodeAdded(Node),
    NodeUpdated(Node),
    NodeDeleted(Node),
    EdgeAdded(Edge),
    EdgeUpdated(Edge),
    EdgeDeleted(Edge),
}

impl Message {
    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Sync(_) => "Sync",
            Message::NodeAdded(_) => "NodeAdded",
            Message::NodeUpdated(_) => "NodeUpdated",
            Message::NodeDeleted(_) => "NodeDeleted",
            Message::EdgeAdded(_) => "EdgeAdded",
            Message::EdgeUpdated(_) => "EdgeUpdated",
            Message::EdgeDeleted(_) => "EdgeDeleted",
        }
    }

    /// Whether the message describes a single mutation
    pub fn is_incremental(&self) -> bool {
        !matches!(self, Message::Sync(_))
    }
}

/// A message as it travels on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    /// Name of the sending forwarder
    pub origin: String,
    /// Mastership term the message was sent in
    pub term: u64,
    pub sent_at: DateTime<Utc>,
    pub message: Message,
}

impl Envelope {
    /// Wrap a message for sending
    pub fn new(origin: impl Into<String>, term: u64, message: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin: origin.into(),
            term,
            sent_at: Utc::now(),
            message,
        }
    }

    /// Serialize envelope to bytes
    pub fn serialize(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserialize envelope from bytes
    pub fn deserialize(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn type_name(&self) -> &'static str {
        self.message.type_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, Metadata};

    #[test]
    fn test_envelope_serialization() {
        let graph = Graph::new("agent-1");
        let mut metadata = Metadata::new();
        metadata.insert("Type".into(), "host".into());
        metadata.insert("MTU".into(), 1500.into());
        let node = graph.add_node("host".into(), metadata).unwrap();

        let envelope = Envelope::new("agent-1", 7, Message::NodeAdded(node.clone()));
        let bytes = envelope.serialize().unwrap();
        let restored = Envelope::deserialize(&bytes).unwrap();

        assert_eq!(restored, envelope);
        match restored.message {
            Message::NodeAdded(n) => {
                assert_eq!(n.id, node.id);
                assert_eq!(n.metadata["MTU"], 1500);
            }
            other => panic!("Wrong message type: {}", other.type_name()),
        }
    }

    #[test]
    fn test_wire_tagging() {
        let envelope = Envelope::new("agent-1", 1, Message::Sync(Elements::default()));
        let value: serde_json::Value = serde_json::from_slice(&envelope.serialize().unwrap()).unwrap();

        assert_eq!(value["message"]["type"], "Sync");
        assert_eq!(value["message"]["obj"]["nodes"], serde_json::json!([]));
        assert_eq!(value["origin"], "agent-1");
        assert_eq!(value["term"], 1);
    }

    #[test]
    fn test_incremental_classification() {
        assert!(!Message::Sync(Elements::default()).is_incremental());

        let graph = Graph::new("agent-1");
        let node = graph.add_node("n".into(), Metadata::new()).unwrap();
        assert!(Message::NodeDeleted(node).is_incremental());
    }
}
