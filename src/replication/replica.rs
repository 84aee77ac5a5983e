//! Replica Graph
//!
//! Receiving side of the topology stream. A master keeps one element set per
//! origin agent. `Sync` replaces that set; incrementals are applied only in
//! the term of the last `Sync`. Applying a message twice leaves the replica
//! unchanged, which covers mutations that are both part of a snapshot and
//! re-sent afterwards.

use std::collections::HashMap;

use crate::graph::{Edge, Elements, Identifier, Node};

use super::protocol::{Envelope, Message};

/// Why an envelope was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No `Sync` received from the origin yet
    NotSynced,
    /// Sent in another term than the last `Sync`
    TermMismatch { term: u64, synced_term: u64 },
    /// The replica already holds a newer revision
    Outdated,
}

/// Result of applying an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Synced { nodes: usize, edges: usize },
    Applied,
    Ignored(IgnoreReason),
}

#[derive(Default)]
struct OriginState {
    term: u64,
    nodes: HashMap<Identifier, Node>,
    edges: HashMap<Identifier, Edge>,
}

impl OriginState {
    fn apply(&mut self, envelope: &Envelope) -> ApplyOutcome {
        match &envelope.message {
            Message::Sync(elements) => {
                self.term = envelope.term;
                self.nodes = elements.nodes.iter().map(|n| (n.id.clone(), n.clone())).collect();
                self.edges = elements.edges.iter().map(|e| (e.id.clone(), e.clone())).collect();
                tracing::info!(
                    "Sync from {} (term {}): {} nodes, {} edges",
                    envelope.origin,
                    envelope.term,
                    self.nodes.len(),
                    self.edges.len()
                );
                ApplyOutcome::Synced {
                    nodes: self.nodes.len(),
                    edges: self.edges.len(),
                }
            }
            Message::NodeAdded(node) | Message::NodeUpdated(node) => self.upsert_node(node),
            Message::EdgeAdded(edge) | Message::EdgeUpdated(edge) => self.upsert_edge(edge),
            Message::NodeDeleted(node) => {
                self.remove_node(&node.id);
                ApplyOutcome::Applied
            }
            Message::EdgeDeleted(edge) => {
                self.edges.remove(&edge.id);
                ApplyOutcome::Applied
            }
        }
    }

    fn upsert_node(&mut self, node: &Node) -> ApplyOutcome {
        match self.nodes.get(&node.id) {
            Some(existing) if existing.revision > node.revision => {
                ApplyOutcome::Ignored(IgnoreReason::Outdated)
            }
            _ => {
                self.nodes.insert(node.id.clone(), node.clone());
                ApplyOutcome::Applied
            }
        }
    }

    fn upsert_edge(&mut self, edge: &Edge) -> ApplyOutcome {
        match self.edges.get(&edge.id) {
            Some(existing) if existing.revision > edge.revision => {
                ApplyOutcome::Ignored(IgnoreReason::Outdated)
            }
            _ => {
                self.edges.insert(edge.id.clone(), edge.clone());
                ApplyOutcome::Applied
            }
        }
    }

    fn remove_node(&mut self, id: &Identifier) {
        self.edges.retain(|_, edge| !edge.touches(id));
        self.nodes.remove(id);
    }
}

/// Per-origin mirror of agent graphs
#[derive(Default)]
pub struct ReplicaGraph {
    origins: HashMap<String, OriginState>,
}

impl ReplicaGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one received envelope
    pub fn apply(&mut self, envelope: &Envelope) -> ApplyOutcome {
        if envelope.message.is_incremental() {
            let Some(synced_term) = self.term(&envelope.origin) else {
                tracing::debug!("Ignoring {} from unsynced {}", envelope.type_name(), envelope.origin);
                return ApplyOutcome::Ignored(IgnoreReason::NotSynced);
            };
            if synced_term != envelope.term {
                tracing::debug!(
                    "Ignoring {} from {}: term {} but synced in {}",
                    envelope.type_name(),
                    envelope.origin,
                    envelope.term,
                    synced_term
                );
                return ApplyOutcome::Ignored(IgnoreReason::TermMismatch {
                    term: envelope.term,
                    synced_term,
                });
            }
        }

        self.origins
            .entry(envelope.origin.clone())
            .or_default()
            .apply(envelope)
    }

    /// Current elements mirrored for `origin`
    pub fn elements(&self, origin: &str) -> Option<Elements> {
        self.origins.get(origin).map(|state| {
            Elements::new(
                state.nodes.values().cloned().collect(),
                state.edges.values().cloned().collect(),
            )
        })
    }

    /// Term of the last `Sync` from `origin`
    pub fn term(&self, origin: &str) -> Option<u64> {
        self.origins.get(origin).map(|state| state.term)
    }

    /// Known origins, sorted
    pub fn origins(&self) -> Vec<String> {
        let mut origins: Vec<String> = self.origins.keys().cloned().collect();
        origins.sort();
        origins
    }

    pub fn node_count(&self) -> usize {
        self.origins.values().map(|s| s.nodes.len()).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.origins.values().map(|s| s.edges.len()).sum()
    }
}
