//! WolfTopo Error Types

use thiserror::Error;

use crate::graph::Identifier;

/// Result type alias for WolfTopo operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfTopo error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    // Graph errors
    #[error("Node not found: {0}")]
    NodeNotFound(Identifier),

    #[error("Edge not found: {0}")]
    EdgeNotFound(Identifier),

    #[error("Element already exists: {0}")]
    DuplicateElement(Identifier),

    // Protocol errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // Election errors
    #[error("No master elected")]
    NoMaster,

    #[error("Stale term {term}: current term is {current}")]
    StaleTerm { term: u64, current: u64 },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Speaker {0} is not connected")]
    NotConnected(String),

    #[error("Outgoing queue full for {0}")]
    QueueFull(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
                | Error::NotConnected(_)
        )
    }

    /// Check if this error means the target mastership is gone and a
    /// resync will follow
    pub fn is_master_change(&self) -> bool {
        matches!(self, Error::StaleTerm { .. } | Error::NoMaster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::ConnectionTimeout("10.0.0.1:8082".into()).is_retryable());
        assert!(Error::NotConnected("a".into()).is_retryable());
        assert!(!Error::NoMaster.is_retryable());

        assert!(Error::StaleTerm { term: 1, current: 2 }.is_master_change());
        assert!(Error::NoMaster.is_master_change());
        assert!(!Error::QueueFull("a".into()).is_master_change());
    }

    #[test]
    fn test_error_display() {
        let err = Error::StaleTerm { term: 3, current: 5 };
        assert_eq!(err.to_string(), "Stale term 3: current term is 5");

        let err = Error::NodeNotFound(Identifier::from("host-1"));
        assert_eq!(err.to_string(), "Node not found: host-1");
    }
}
