//! Three masters and one hub in a single process.
//!
//! Walks through a causally ordered update followed by a pair of concurrent
//! updates made while the hub is cut off from both writers, then reports
//! what every master converged to.

use crate::config::{NodeConfig, NodeSection};
use crate::node::{Node, NodeError};
use mmr_core::VectorTime;
use mmr_db::{Document, Namespace, UpdateArgs, WriteError};
use mmr_sync::{HostAndPort, MemoryNetwork, ProducerError, ReplicationConfig};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("write rejected: {0}")]
    Write(#[from] WriteError),

    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("configuration has no replicated collection")]
    NoCollection,
}

#[derive(Debug, Serialize)]
pub struct NodeReport {
    pub address: String,
    pub clock: VectorTime,
    pub document: Option<Document>,
    pub conflicts: Vec<Document>,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub namespace: String,
    pub nodes: Vec<NodeReport>,
}

/// Configurations for three masters on consecutive ports and a hub after
/// them. Everything except the `node` and `replication` roles comes from
/// `base`.
pub fn topology(base: &NodeConfig, base_port: u16) -> Vec<NodeConfig> {
    let host = base.node.host.clone();
    let hub = HostAndPort::new(host.clone(), base_port + 3);
    let masters: Vec<HostAndPort> = (0..3)
        .map(|i| HostAndPort::new(host.clone(), base_port + i))
        .collect();

    let mut configs: Vec<NodeConfig> = masters
        .iter()
        .enumerate()
        .map(|(i, address)| NodeConfig {
            node: NodeSection {
                id: i as u32,
                node_count: 3,
                host: host.clone(),
                port: address.port(),
            },
            replication: ReplicationConfig {
                apply_tier: true,
                hub: false,
                upstream: Some(hub.clone()),
                peers: Vec::new(),
                ..base.replication.clone()
            },
            ..base.clone()
        })
        .collect();

    configs.push(NodeConfig {
        node: NodeSection {
            id: 0,
            node_count: 3,
            host,
            port: hub.port(),
        },
        replication: ReplicationConfig {
            apply_tier: false,
            hub: true,
            upstream: None,
            peers: masters,
            ..base.replication.clone()
        },
        ..base.clone()
    });
    configs
}

async fn wait_for(what: &'static str, deadline: Instant, mut done: impl FnMut() -> bool) -> Result<(), SimulationError> {
    while !done() {
        if Instant::now() >= deadline {
            return Err(SimulationError::Timeout(what));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

fn field(node: &Node, ns: &Namespace, id: &Value, name: &str) -> Option<Value> {
    node.find(ns, id).and_then(|d| d.get(name).cloned())
}

pub async fn run(base: &NodeConfig, base_port: u16, timeout: Duration) -> Result<Report, SimulationError> {
    let ns = base
        .collections
        .replicated
        .first()
        .cloned()
        .ok_or(SimulationError::NoCollection)?;
    let network = Arc::new(MemoryNetwork::new().with_poll_interval(Duration::from_millis(20)));
    let nodes = topology(base, base_port)
        .iter()
        .map(|config| Node::build(config, &network))
        .collect::<Result<Vec<_>, _>>()?;
    for node in &nodes {
        node.startup();
    }
    let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);
    let masters = &nodes[..3];
    let deadline = Instant::now() + timeout;
    let id = json!(1);

    info!(%ns, "A inserts the document");
    a.insert(&ns, json!({"_id": 1, "X": 1}).as_object().cloned().unwrap_or_default())?;
    wait_for("the insert to reach every master", deadline, || {
        masters.iter().all(|n| field(n, &ns, &id, "X") == Some(json!(1)))
    })
    .await?;

    info!("B updates after observing the insert");
    b.update(&ns, &id, &set_x(10))?;
    wait_for("the causal update to reach every master", deadline, || {
        masters.iter().all(|n| field(n, &ns, &id, "X") == Some(json!(10)))
    })
    .await?;

    info!("hub cut off from A and C, both update concurrently");
    network.disconnect(a.address());
    network.disconnect(c.address());
    // let in-flight reads observe the partition
    tokio::time::sleep(Duration::from_millis(100)).await;
    a.update(&ns, &id, &set_x(2))?;
    c.update(&ns, &id, &set_x(3))?;
    network.reconnect(a.address());
    network.reconnect(c.address());

    wait_for("the masters to converge", deadline, || {
        let first = field(a, &ns, &id, "X");
        first.is_some() && masters.iter().all(|n| field(n, &ns, &id, "X") == first)
    })
    .await?;
    wait_for("conflict records on every master", deadline, || {
        masters.iter().all(|n| !n.documents(&ns.conflicts()).is_empty())
    })
    .await?;

    let report = Report {
        namespace: ns.to_string(),
        nodes: masters
            .iter()
            .map(|n| NodeReport {
                address: n.address().to_string(),
                clock: n.clock().global_time(),
                document: n.find(&ns, &id),
                conflicts: n.documents(&ns.conflicts()),
            })
            .collect(),
    };

    for node in &nodes {
        node.shutdown();
    }
    for node in &nodes {
        node.join().await?;
    }
    Ok(report)
}

fn set_x(x: i64) -> UpdateArgs {
    let mut fields = Document::new();
    fields.insert("X".to_string(), json!(x));
    UpdateArgs::set(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_roles() {
        let configs = topology(&NodeConfig::default(), 30000);
        assert_eq!(configs.len(), 4);
        for (i, config) in configs[..3].iter().enumerate() {
            assert_eq!(config.node.id, i as u32);
            assert!(config.replication.apply_tier);
            assert_eq!(
                config.replication.upstream,
                Some(HostAndPort::new("localhost", 30003))
            );
            config.validate().unwrap();
        }
        let hub = &configs[3];
        assert!(hub.replication.hub && !hub.replication.apply_tier);
        assert_eq!(hub.replication.peers.len(), 3);
        hub.validate().unwrap();
    }

    #[tokio::test]
    async fn test_simulation_converges_on_node_zero() {
        let mut base = NodeConfig::default();
        base.replication.reselect_delay_ms = 10;
        base.replication.stopped_poll_ms = 10;
        base.replication.retry_backoff_ms = 10;
        base.replication.max_backoff_ms = 50;

        let report = run(&base, 31000, Duration::from_secs(10)).await.unwrap();
        let values: Vec<_> = report
            .nodes
            .iter()
            .map(|n| n.document.as_ref().unwrap()["X"].clone())
            .collect();
        assert_eq!(values, vec![json!(2), json!(2), json!(2)]);
        // B receives both concurrent versions and records the pair as well
        for node in &report.nodes {
            assert_eq!(node.conflicts.len(), 2, "{}", node.address);
        }
    }
}
