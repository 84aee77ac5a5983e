//! Graph Elements
//!
//! Nodes, edges and the point-in-time element snapshot exported by the graph.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Arbitrary element attributes
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Unique identifier of a node or an edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A graph vertex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Identifier,
    /// Host that owns the element
    pub host: String,
    pub metadata: Metadata,
    /// Incremented on every update
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub(crate) fn new(id: Identifier, host: String, metadata: Metadata) -> Self {
        let now = Utc::now();
        Self {
            id,
            host,
            metadata,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now();
    }
}

/// A directed connection between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: Identifier,
    pub parent: Identifier,
    pub child: Identifier,
    pub host: String,
    pub metadata: Metadata,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    pub(crate) fn new(
        id: Identifier,
        parent: Identifier,
        child: Identifier,
        host: String,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            parent,
            child,
            host,
            metadata,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now();
    }

    /// Whether the edge connects the given node on either side
    pub fn touches(&self, node: &Identifier) -> bool {
        &self.parent == node || &self.child == node
    }
}

/// All nodes and edges of a graph at one instant, sorted by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Elements {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Elements {
    /// Build a snapshot, sorting both collections by id
    pub fn new(mut nodes: Vec<Node>, mut edges: Vec<Edge>) -> Self {
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        Self { nodes, edges }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }
}
