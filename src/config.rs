//! WolfTopo Configuration
//!
//! This module provides configuration structures for the topology agent
//! and master.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::election::ElectionStrategy;
use crate::speaker::SpeakerConfig;

/// Main WolfTopo configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfTopoConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Master endpoints the agent forwards to
    #[serde(default)]
    pub pool: PoolConfig,

    /// Host probe configuration
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Master-side listener configuration
    #[serde(default)]
    pub master: MasterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier, used as the graph host name
    pub id: String,
}

/// Speaker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Master addresses (host:port), in election order
    #[serde(default)]
    pub speakers: Vec<String>,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Delay between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Outgoing queue capacity per speaker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Master election strategy (ordered, random)
    #[serde(default)]
    pub election: ElectionStrategy,
}

/// Host probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Populate the graph from the local host
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Poll interval in milliseconds
    #[serde(default = "default_probe_interval_ms")]
    pub interval_ms: u64,
}

/// Master listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Address to accept agent connections on
    #[serde(default = "default_master_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_reconnect_interval_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    10000
}

fn default_probe_interval_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_master_address() -> String {
    "0.0.0.0:8082".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            speakers: Vec::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            queue_capacity: default_queue_capacity(),
            election: ElectionStrategy::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_probe_interval_ms(),
        }
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_address: default_master_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfTopoConfig {
    /// Minimal configuration for a node with default sections
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node: NodeConfig { id: node_id.into() },
            pool: PoolConfig::default(),
            probe: ProbeConfig::default(),
            master: MasterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfTopoConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if let Some(bad) = self.pool.speakers.iter().find(|s| !s.contains(':')) {
            return Err(crate::Error::Config(format!(
                "pool.speakers entry '{}' must be host:port",
                bad
            )));
        }

        if self.pool.connect_timeout_ms == 0 {
            return Err(crate::Error::Config("pool.connect_timeout_ms must be > 0".into()));
        }

        if self.pool.reconnect_interval_ms == 0 {
            return Err(crate::Error::Config("pool.reconnect_interval_ms must be > 0".into()));
        }

        if self.pool.queue_capacity == 0 {
            return Err(crate::Error::Config("pool.queue_capacity must be > 0".into()));
        }

        if self.probe.interval_ms == 0 {
            return Err(crate::Error::Config("probe.interval_ms must be > 0".into()));
        }

        if self.master.bind_address.is_empty() {
            return Err(crate::Error::Config("master.bind_address cannot be empty".into()));
        }

        Ok(())
    }

    /// Connection settings shared by all speakers
    pub fn speaker_config(&self) -> SpeakerConfig {
        SpeakerConfig {
            connect_timeout: Duration::from_millis(self.pool.connect_timeout_ms),
            reconnect_interval: Duration::from_millis(self.pool.reconnect_interval_ms),
            queue_capacity: self.pool.queue_capacity,
        }
    }

    /// Get probe interval as Duration
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe.interval_ms)
    }
}
