//! Topology Forwarder
//!
//! Streams every graph mutation to the elected master. When the master
//! changes, the whole graph is sent again as a single `Sync` message since
//! the previous master may have missed messages.
//!
//! Ordering: all sends go through one mutex (the send path). Locks are always
//! taken in the order graph -> send path -> election, on both the mutation
//! path (the graph holds its write lock while notifying) and the resync path.
//! A resync exports the snapshot and queues the `Sync` while holding the
//! graph read lock and the send path, so no mutation can slip in between.
//! Incrementals are only sent in the term that was last synced, so none can
//! reach a new master ahead of its `Sync`.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::protocol::{Envelope, Message};
use crate::election::{ElectionStrategy, MasterChange, MasterElection, MasterListener, MasterRef};
use crate::error::Error;
use crate::graph::{Edge, Graph, GraphListener, Node};
use crate::speaker::SpeakerPool;

/// Replication state as seen by the forwarder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// No master elected
    NoMaster,
    /// A master was elected but its `Sync` could not be queued yet
    Resyncing { term: u64 },
    /// The master of `term` received a `Sync`, incrementals flow
    Synced { term: u64, master: String },
}

/// Forwarding counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    /// Full resyncs queued
    pub resyncs: u64,
    /// Incremental messages queued
    pub forwarded: u64,
    /// Incremental messages not sent (no synced master, or send failure)
    pub skipped: u64,
}

struct SendPath {
    /// Highest term handled so far
    term: u64,
    status: SyncStatus,
    stats: ForwarderStats,
}

/// Forwards a graph to exactly one master at a time
pub struct TopologyForwarder {
    host: String,
    /// Scopes every log line to this forwarder
    span: tracing::Span,
    graph: Arc<Graph>,
    election: Arc<MasterElection>,
    send_path: Mutex<SendPath>,
}

impl TopologyForwarder {
    /// Create a forwarder electing its master among the pool's speakers
    pub fn new(host: impl Into<String>, graph: Arc<Graph>, pool: Arc<SpeakerPool>) -> Arc<Self> {
        let election = MasterElection::new(pool, ElectionStrategy::default());
        Self::with_election(host, graph, election)
    }

    /// Create a forwarder on top of an existing election
    pub fn with_election(
        host: impl Into<String>,
        graph: Arc<Graph>,
        election: Arc<MasterElection>,
    ) -> Arc<Self> {
        let host = host.into();
        let forwarder = Arc::new(Self {
            span: tracing::info_span!("forwarder", host = %host),
            host,
            graph,
            election,
            send_path: Mutex::new(SendPath {
                term: 0,
                status: SyncStatus::NoMaster,
                stats: ForwarderStats::default(),
            }),
        });

        let graph_listener = Arc::downgrade(&forwarder) as Weak<dyn GraphListener>;
        forwarder.graph.add_listener(graph_listener);
        let master_listener = Arc::downgrade(&forwarder) as Weak<dyn MasterListener>;
        forwarder.election.add_listener(master_listener);

        // A master elected before we subscribed gets its resync now
        let current = forwarder.election.current();
        if current.master.is_some() {
            forwarder.on_new_master(&current);
        }

        forwarder
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The master events are currently sent to
    pub fn master(&self) -> Option<MasterRef> {
        self.election.master()
    }

    pub fn election(&self) -> &Arc<MasterElection> {
        &self.election
    }

    pub fn status(&self) -> SyncStatus {
        self.send_path.lock().status.clone()
    }

    pub fn stats(&self) -> ForwarderStats {
        self.send_path.lock().stats
    }

    /// Send the whole graph to the master of `master.term()`
    fn resync(&self, master: &MasterRef) {
        let _enter = self.span.enter();
        let graph = self.graph.read();
        let mut path = self.send_path.lock();
        if master.term() <= path.term {
            tracing::debug!(term = master.term(), "Ignoring stale master change");
            return;
        }
        tracing::info!("Using {} as master of topology forwarder", master.address());
        tracing::info!("Start a re-sync for {}", self.host);
        path.term = master.term();
        path.status = SyncStatus::Resyncing { term: master.term() };

        let elements = graph.elements();
        let (nodes, edges) = (elements.nodes.len(), elements.edges.len());
        let envelope = Envelope::new(self.host.clone(), master.term(), Message::Sync(elements));

        match self.election.send_in_term(master.term(), envelope) {
            Ok(()) => {
                path.status = SyncStatus::Synced {
                    term: master.term(),
                    master: master.id().to_string(),
                };
                path.stats.resyncs += 1;
                tracing::info!(
                    term = master.term(),
                    nodes,
                    edges,
                    "Re-sync queued for {}",
                    master.address()
                );
            }
            Err(e @ Error::FrameTooLarge { .. }) => {
                // Stays in Resyncing: incrementals would build on a Sync the
                // master never got
                tracing::error!(
                    nodes,
                    edges,
                    "Graph cannot be synced to {}: {}",
                    master.address(),
                    e
                );
            }
            Err(e) => {
                // The election will announce the next master; resync then
                tracing::warn!("Re-sync to {} failed: {}", master.address(), e);
            }
        }
    }

    /// Send one incremental message in the synced term
    fn forward(&self, message: Message) {
        let _enter = self.span.enter();
        let mut path = self.send_path.lock();
        let term = match path.status {
            SyncStatus::Synced { term, .. } => term,
            _ => {
                tracing::trace!("No synced master, skipping {}", message.type_name());
                path.stats.skipped += 1;
                return;
            }
        };

        let type_name = message.type_name();
        let envelope = Envelope::new(self.host.clone(), term, message);
        match self.election.send_in_term(term, envelope) {
            Ok(()) => path.stats.forwarded += 1,
            Err(e) => {
                path.stats.skipped += 1;
                if e.is_master_change() {
                    tracing::debug!("Master changed, {} left to the coming re-sync", type_name);
                } else {
                    tracing::debug!("Failed to forward {}: {}", type_name, e);
                }
            }
        }
    }
}

impl MasterListener for TopologyForwarder {
    fn on_new_master(&self, change: &MasterChange) {
        match &change.master {
            Some(master) => self.resync(master),
            None => {
                let _enter = self.span.enter();
                let mut path = self.send_path.lock();
                if change.term <= path.term {
                    return;
                }
                path.term = change.term;
                path.status = SyncStatus::NoMaster;
                tracing::warn!("Lost connection to master");
            }
        }
    }
}

impl GraphListener for TopologyForwarder {
    fn on_node_added(&self, node: &Node) {
        self.forward(Message::NodeAdded(node.clone()));
    }

    fn on_node_updated(&self, node: &Node) {
        self.forward(Message::NodeUpdated(node.clone()));
    }

    fn on_node_deleted(&self, node: &Node) {
        self.forward(Message::NodeDeleted(node.clone()));
    }

    fn on_edge_added(&self, edge: &Edge) {
        self.forward(Message::EdgeAdded(edge.clone()));
    }

    fn on_edge_updated(&self, edge: &Edge) {
        self.forward(Message::EdgeUpdated(edge.clone()));
    }

    fn on_edge_deleted(&self, edge: &Edge) {
        self.forward(Message::EdgeDeleted(edge.clone()));
    }
}
