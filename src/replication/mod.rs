//! Replication Module
//!
//! Handles topology replication from an agent graph to the elected master.

pub mod protocol;
pub mod forwarder;
pub mod replica;

pub use protocol::{Envelope, Message};
pub use forwarder::{ForwarderStats, SyncStatus, TopologyForwarder};
pub use replica::{ApplyOutcome, IgnoreReason, ReplicaGraph};
