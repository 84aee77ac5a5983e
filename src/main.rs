//! WolfTopo - Topology Forwarder
//!
//! Runs either an agent, which forwards its host topology to one elected
//! master, or a master, which keeps a replica of every agent's graph.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolftopo::config::WolfTopoConfig;
use wolftopo::election::MasterElection;
use wolftopo::graph::Graph;
use wolftopo::network::NetworkServer;
use wolftopo::probe::HostProbe;
use wolftopo::replication::{ApplyOutcome, ReplicaGraph, TopologyForwarder};
use wolftopo::speaker::{SpeakerPool, TcpSpeaker};

/// How often the running process logs a status line
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// WolfTopo - Topology Forwarder
#[derive(Parser)]
#[command(name = "wolftopo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolftopo.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent: probe the host and forward its topology
    Agent,

    /// Run a master: accept agent streams and keep their replicas
    Master {
        /// Address to listen on (defaults to master.bind_address)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolftopo.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "agent-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Agent => {
            let config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref(), &config);
            run_agent(config).await
        }
        Commands::Master { bind } => {
            let config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref(), &config);
            run_master(config, bind).await
        }
        Commands::Init { output, node_id } => run_init(&output, node_id),
        Commands::Validate => run_validate(&cli.config),
    }
}

fn load_config(path: &Path) -> anyhow::Result<WolfTopoConfig> {
    WolfTopoConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {:?}", path))
}

/// Initialize logging. RUST_LOG wins over the CLI, which wins over the file.
fn init_logging(cli_level: Option<&str>, config: &WolfTopoConfig) {
    let level = cli_level.unwrap_or(config.logging.level.as_str());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Run the topology agent
async fn run_agent(config: WolfTopoConfig) -> anyhow::Result<()> {
    tracing::info!("Starting topology agent {}", config.node.id);

    let graph = Arc::new(Graph::new(config.node.id.clone()));
    let pool = SpeakerPool::new();
    let speakers: Vec<Arc<TcpSpeaker>> = config
        .pool
        .speakers
        .iter()
        .map(|address| TcpSpeaker::spawn(address.clone(), config.speaker_config(), &pool))
        .collect();
    if speakers.is_empty() {
        tracing::warn!("No master endpoints configured, the graph stays local");
    } else {
        tracing::info!(
            "Forwarding to one of {} masters ({:?} election)",
            speakers.len(),
            config.pool.election
        );
    }

    let election = MasterElection::new(Arc::clone(&pool), config.pool.election);
    let forwarder =
        TopologyForwarder::with_election(config.node.id.clone(), Arc::clone(&graph), election);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let probe_handle = if config.probe.enabled {
        let probe = HostProbe::new(Arc::clone(&graph));
        let interval = config.probe_interval();
        Some(tokio::spawn(async move { probe.run(interval, shutdown_rx).await }))
    } else {
        tracing::info!("Host probe disabled");
        None
    };

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = status.tick() => {
                let stats = forwarder.stats();
                let (nodes, edges) = {
                    let guard = graph.read();
                    (guard.node_count(), guard.edge_count())
                };
                tracing::info!(
                    "Status {:?}: {}/{} masters reachable, {} nodes, {} edges, {} resyncs, {} forwarded, {} skipped",
                    forwarder.status(),
                    forwarder.election().pool().connected().len(),
                    speakers.len(),
                    nodes,
                    edges,
                    stats.resyncs,
                    stats.forwarded,
                    stats.skipped
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    for speaker in &speakers {
        speaker.stop();
    }
    if let Some(handle) = probe_handle {
        handle.await.context("host probe task panicked")??;
    }

    tracing::info!("Agent shutdown complete");
    Ok(())
}

/// Run a master replica
async fn run_master(config: WolfTopoConfig, bind: Option<String>) -> anyhow::Result<()> {
    let address = bind.unwrap_or_else(|| config.master.bind_address.clone());
    let server = Arc::new(
        NetworkServer::bind(&address)
            .await
            .with_context(|| format!("Failed to bind {}", address))?,
    );

    let (incoming_tx, mut incoming_rx) = mpsc::channel(10000);
    let server_handle = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run(incoming_tx).await })
    };

    let mut replica = ReplicaGraph::new();
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            received = incoming_rx.recv() => {
                let Some((peer, envelope)) = received else { break };
                if let ApplyOutcome::Ignored(reason) = replica.apply(&envelope) {
                    tracing::debug!("Ignored {} from {} ({}): {:?}", envelope.type_name(), envelope.origin, peer, reason);
                }
            }
            _ = status.tick() => {
                tracing::info!(
                    "Replica: {} agents, {} nodes, {} edges",
                    replica.origins().len(),
                    replica.node_count(),
                    replica.edge_count()
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    server.stop();
    server_handle.await.context("network server task panicked")??;

    tracing::info!("Master shutdown complete");
    Ok(())
}

/// Initialize configuration file
fn run_init(output: &Path, node_id: String) -> anyhow::Result<()> {
    let config_content = format!(r#"# WolfTopo Configuration
# Generated configuration file

[node]
id = "{node_id}"

[pool]
speakers = []
# speakers = ["master-1.example.com:8082", "master-2.example.com:8082"]
connect_timeout_ms = 5000
reconnect_interval_ms = 1000
queue_capacity = 10000
election = "ordered"

[probe]
enabled = true
interval_ms = 5000

[master]
bind_address = "0.0.0.0:8082"

[logging]
level = "info"
format = "pretty"
"#);

    // Refuse to write something we could not load back
    WolfTopoConfig::from_str(&config_content).context("Generated configuration is invalid")?;

    std::fs::write(output, config_content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to list your master endpoints.");
    println!("Then start with: wolftopo --config {} agent", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: &Path) -> anyhow::Result<()> {
    match WolfTopoConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Masters: {}", config.pool.speakers.len());
            println!("  Election: {:?}", config.pool.election);
            println!(
                "  Probe: {}",
                if config.probe.enabled {
                    format!("every {} ms", config.probe.interval_ms)
                } else {
                    "disabled".to_string()
                }
            );
            println!("  Master Bind Address: {}", config.master.bind_address);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e.into())
        }
    }
}
