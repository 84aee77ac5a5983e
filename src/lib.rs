//! WolfTopo - Topology Forwarder
//!
//! Keeps a master's copy of an agent's topology graph up to date. Every
//! agent holds an in-memory graph of nodes and edges, elects exactly one
//! master among a pool of configured endpoints and streams every graph
//! mutation to it.
//!
//! # Architecture
//!
//! When the master changes the agent sends its whole graph again as a
//! single `Sync` message, then resumes incremental forwarding. Messages are
//! tagged with the election term so a master can never receive an
//! incremental ahead of the `Sync` it builds on.
//!
//! # Features
//!
//! - In-memory topology graph with ordered change notifications
//! - Sticky master election with automatic failover
//! - Full resync on every master change
//! - Length-prefixed, checksummed wire framing over TCP
//! - Idempotent replica on the master side
//! - Host probe populating the graph from the local machine

pub mod config;
pub mod error;
pub mod graph;
pub mod speaker;
pub mod election;
pub mod replication;
pub mod network;
pub mod probe;

pub use config::WolfTopoConfig;
pub use error::{Error, Result};
