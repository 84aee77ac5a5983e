//! Host probe
//!
//! Populates the graph with the local host and its network interfaces.
//! Each poll is diffed against the graph so only real changes produce
//! graph events (and therefore forwarded messages).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sysinfo::{Networks, System};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::graph::{Graph, Identifier, Metadata};

/// Traffic counters of one interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Point-in-time view of the host
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSnapshot {
    pub host_name: String,
    pub os: String,
    pub kernel: String,
    pub cpus: usize,
    /// Total memory in bytes
    pub total_memory: u64,
    /// Used memory in bytes
    pub used_memory: u64,
    pub interfaces: BTreeMap<String, InterfaceStats>,
}

impl HostSnapshot {
    /// Read the current host state. Blocking.
    pub fn collect() -> Self {
        let sys = System::new_all();
        let networks = Networks::new_with_refreshed_list();

        let interfaces = networks
            .iter()
            .map(|(name, data)| {
                (
                    name.clone(),
                    InterfaceStats {
                        rx_bytes: data.total_received(),
                        tx_bytes: data.total_transmitted(),
                    },
                )
            })
            .collect();

        Self {
            host_name: System::host_name().unwrap_or_default(),
            os: System::name().unwrap_or_default(),
            kernel: System::kernel_version().unwrap_or_default(),
            cpus: sys.cpus().len().max(1),
            total_memory: sys.total_memory(),
            used_memory: sys.used_memory(),
            interfaces,
        }
    }
}

/// Changes made by one probe pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ProbeReport {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Maps host snapshots onto graph elements
pub struct HostProbe {
    graph: Arc<Graph>,
}

impl HostProbe {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    fn host_id(&self) -> Identifier {
        format!("{}/host", self.graph.host()).into()
    }

    fn interface_prefix(&self) -> String {
        format!("{}/if/", self.graph.host())
    }

    fn interface_id(&self, name: &str) -> Identifier {
        format!("{}{}", self.interface_prefix(), name).into()
    }

    fn ownership_id(&self, name: &str) -> Identifier {
        format!("{}{}/ownership", self.interface_prefix(), name).into()
    }

    /// Bring the graph in line with `snapshot`
    pub fn apply(&self, snapshot: &HostSnapshot) -> Result<ProbeReport> {
        let mut report = ProbeReport::default();

        let host_id = self.host_id();
        self.upsert_node(&host_id, host_metadata(snapshot), &mut report)?;

        for (name, stats) in &snapshot.interfaces {
            let if_id = self.interface_id(name);
            self.upsert_node(&if_id, interface_metadata(name, stats), &mut report)?;

            let edge_id = self.ownership_id(name);
            if self.graph.get_edge(&edge_id).is_none() {
                let mut metadata = Metadata::new();
                metadata.insert("RelationType".into(), json!("ownership"));
                self.graph.add_edge(edge_id, &host_id, &if_id, metadata)?;
                report.added += 1;
            }
        }

        // Interfaces that went away
        let prefix = self.interface_prefix();
        let vanished: Vec<Identifier> = self
            .graph
            .read()
            .elements()
            .nodes
            .into_iter()
            .filter_map(|node| {
                let name = node.id.as_str().strip_prefix(&prefix)?;
                (!snapshot.interfaces.contains_key(name)).then(|| node.id.clone())
            })
            .collect();
        for id in vanished {
            tracing::debug!("Interface {} disappeared", id);
            match self.graph.delete_node(&id) {
                Ok(_) => report.deleted += 1,
                Err(Error::NodeNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    fn upsert_node(
        &self,
        id: &Identifier,
        metadata: Metadata,
        report: &mut ProbeReport,
    ) -> Result<()> {
        match self.graph.get_node(id) {
            None => {
                self.graph.add_node(id.clone(), metadata)?;
                report.added += 1;
            }
            Some(node) if node.metadata != metadata => {
                self.graph.update_node(id, |m| *m = metadata)?;
                report.updated += 1;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Poll the host every `interval` until `shutdown` flips to true
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(interval);
        tracing::info!("Host probe started (interval {:?})", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = tokio::task::spawn_blocking(HostSnapshot::collect)
                        .await
                        .map_err(|e| Error::Internal(format!("host probe task failed: {}", e)))?;
                    match self.apply(&snapshot) {
                        Ok(report) if !report.is_empty() => tracing::debug!(
                            "Probe pass: {} added, {} updated, {} deleted",
                            report.added,
                            report.updated,
                            report.deleted
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Host probe pass failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Host probe stopped");
        Ok(())
    }
}

fn host_metadata(snapshot: &HostSnapshot) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("Type".into(), json!("host"));
    metadata.insert("Name".into(), json!(snapshot.host_name));
    metadata.insert("OS".into(), json!(snapshot.os));
    metadata.insert("KernelVersion".into(), json!(snapshot.kernel));
    metadata.insert("CPUs".into(), json!(snapshot.cpus));
    metadata.insert(
        "Memory".into(),
        json!({ "Total": snapshot.total_memory, "Used": snapshot.used_memory }),
    );
    metadata
}

fn interface_metadata(name: &str, stats: &InterfaceStats) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("Type".into(), json!("interface"));
    metadata.insert("Name".into(), json!(name));
    metadata.insert(
        "Statistics".into(),
        json!({ "RxBytes": stats.rx_bytes, "TxBytes": stats.tx_bytes }),
    );
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(interfaces: &[(&str, u64)]) -> HostSnapshot {
        HostSnapshot {
            host_name: "agent-1".into(),
            os: "Linux".into(),
            kernel: "6.1.0".into(),
            cpus: 4,
            total_memory: 8 << 30,
            used_memory: 2 << 30,
            interfaces: interfaces
                .iter()
                .map(|(name, rx)| {
                    (
                        name.to_string(),
                        InterfaceStats {
                            rx_bytes: *rx,
                            tx_bytes: 0,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_first_pass_builds_host_tree() {
        let graph = Arc::new(Graph::new("agent-1"));
        let probe = HostProbe::new(Arc::clone(&graph));

        let report = probe.apply(&snapshot(&[("eth0", 10), ("lo", 0)])).unwrap();
        assert_eq!(report, ProbeReport { added: 5, updated: 0, deleted: 0 });

        let host = graph.get_node(&"agent-1/host".into()).unwrap();
        assert_eq!(host.metadata["Type"], "host");
        assert_eq!(host.metadata["CPUs"], 4);

        let edge = graph.get_edge(&"agent-1/if/eth0/ownership".into()).unwrap();
        assert_eq!(edge.parent.as_str(), "agent-1/host");
        assert_eq!(edge.child.as_str(), "agent-1/if/eth0");
        assert_eq!(edge.metadata["RelationType"], "ownership");
    }

    #[test]
    fn test_unchanged_snapshot_is_a_noop() {
        let graph = Arc::new(Graph::new("agent-1"));
        let probe = HostProbe::new(Arc::clone(&graph));
        let snap = snapshot(&[("eth0", 10)]);

        probe.apply(&snap).unwrap();
        let before = graph.elements();
        assert!(probe.apply(&snap).unwrap().is_empty());
        assert_eq!(graph.elements(), before);
    }

    #[test]
    fn test_counters_update_and_interfaces_vanish() {
        let graph = Arc::new(Graph::new("agent-1"));
        let probe = HostProbe::new(Arc::clone(&graph));
        probe.apply(&snapshot(&[("eth0", 10), ("eth1", 0)])).unwrap();

        let report = probe.apply(&snapshot(&[("eth0", 99)])).unwrap();
        assert_eq!(report, ProbeReport { added: 0, updated: 1, deleted: 1 });

        let eth0 = graph.get_node(&"agent-1/if/eth0".into()).unwrap();
        assert_eq!(eth0.metadata["Statistics"]["RxBytes"], 99);
        assert_eq!(eth0.revision, 1);
        assert!(graph.get_node(&"agent-1/if/eth1".into()).is_none());
        assert!(graph.get_edge(&"agent-1/if/eth1/ownership".into()).is_none());
        assert_eq!(graph.read().edge_count(), 1);
    }

    #[test]
    fn test_collect_reads_local_host() {
        let snap = HostSnapshot::collect();
        assert!(snap.cpus >= 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let graph = Arc::new(Graph::new("agent-1"));
        let probe = HostProbe::new(Arc::clone(&graph));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { probe.run(Duration::from_millis(10), rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert!(graph.get_node(&"agent-1/host".into()).is_some());
    }
}
