//! Two masters and a hub wired through `ProducerGroup`s.

use mmr_core::{LogicalClock, ManualClock, NodeId, VectorClock};
use mmr_db::{
    BatchApplier, ConflictStatus, Document, LocalOplog, MemoryDatabase, Namespace, UpdateArgs,
    WriteInterceptor,
};
use mmr_sync::{
    AggregationLog, GroupContext, GroupError, HostAndPort, MemoryNetwork, ProducerGroup,
    ReplicationConfig, Role,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn ns() -> Namespace {
    Namespace::new("mm_replication", "MultiMasterCollection")
}

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn fast(config: ReplicationConfig) -> ReplicationConfig {
    ReplicationConfig {
        batching_delay_ms: 1,
        retry_backoff_ms: 5,
        max_backoff_ms: 20,
        reselect_delay_ms: 5,
        stopped_poll_ms: 5,
        ..config
    }
}

struct Master {
    address: HostAndPort,
    db: Arc<MemoryDatabase>,
    applier: BatchApplier<MemoryDatabase>,
    group: ProducerGroup,
}

impl Master {
    fn new(id: u32, port: u16, hub: &HostAndPort, network: &Arc<MemoryNetwork>) -> Self {
        let address = HostAndPort::new("localhost", port);
        let db = Arc::new(MemoryDatabase::new());
        let logical: Arc<dyn LogicalClock> = Arc::new(ManualClock::new());
        let clock = Arc::new(VectorClock::new(NodeId(id), 3, logical.clone()).unwrap());
        let oplog = Arc::new(LocalOplog::new(db.clone(), logical));
        let interceptor = WriteInterceptor::new(db.clone(), clock, db.clone())
            .with_observer(oplog)
            .replicate(ns());
        let applier = BatchApplier::new(Arc::new(interceptor));
        network.register(address.clone(), db.clone());

        let config = fast(ReplicationConfig {
            apply_tier: true,
            upstream: Some(hub.clone()),
            ..Default::default()
        });
        let ctx = GroupContext::new(network.clone())
            .with_applier(Arc::new(applier.clone()))
            .with_local_origin(address.to_string());
        let group = ProducerGroup::from_config(&config, &ctx).unwrap();

        Master {
            address,
            db,
            applier,
            group,
        }
    }

    fn x(&self, id: i64) -> Option<Value> {
        self.db.find_by_id(&ns(), &json!(id)).map(|d| d["X"].clone())
    }

    fn conflict_statuses(&self) -> Vec<ConflictStatus> {
        self.db
            .documents(&ns().conflicts())
            .iter()
            .map(|d| serde_json::from_value(d["_status"].clone()).unwrap())
            .collect()
    }
}

fn hub(address: &HostAndPort, peers: Vec<HostAndPort>, network: &Arc<MemoryNetwork>) -> ProducerGroup {
    let db = Arc::new(MemoryDatabase::new());
    db.create_capped(Namespace::global_oplog(), 1_000);
    network.register(address.clone(), db.clone());
    let log = Arc::new(AggregationLog::new(db, Arc::new(ManualClock::new())));

    let config = fast(ReplicationConfig {
        hub: true,
        peers,
        ..Default::default()
    });
    let ctx = GroupContext::new(network.clone()).with_aggregation_log(log);
    ProducerGroup::from_config(&config, &ctx).unwrap()
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[test]
fn test_group_from_config_roles() {
    let network = Arc::new(MemoryNetwork::new());
    let hub_addr = HostAndPort::new("localhost", 27019);
    let peers = vec![
        HostAndPort::new("localhost", 27017),
        HostAndPort::new("localhost", 27018),
    ];
    let group = hub(&hub_addr, peers, &network);
    assert_eq!(group.producers().len(), 2);
    assert!(group.producers().iter().all(|p| p.role() == Role::Hub));
    assert_eq!(group.producers()[1].instance_id(), "localhost:27018");

    let missing = ReplicationConfig {
        apply_tier: true,
        ..Default::default()
    };
    let err = ProducerGroup::from_config(&missing, &GroupContext::new(network)).unwrap_err();
    assert_eq!(err, GroupError::MissingUpstream);
}

#[tokio::test]
async fn test_concurrent_updates_converge_through_hub() {
    let network = Arc::new(MemoryNetwork::new().with_poll_interval(Duration::from_millis(10)));
    let hub_addr = HostAndPort::new("localhost", 27019);
    let a = Master::new(0, 27017, &hub_addr, &network);
    let c = Master::new(2, 27018, &hub_addr, &network);
    let hub = hub(&hub_addr, vec![a.address.clone(), c.address.clone()], &network);

    for group in [&a.group, &c.group, &hub] {
        group.startup();
    }

    a.applier
        .insert_one(&ns(), doc(json!({"_id": 1, "X": 1})))
        .unwrap();
    eventually("insert reaches c", || c.x(1) == Some(json!(1))).await;

    // cut the hub off from both masters so the next updates are concurrent
    network.disconnect(&a.address);
    network.disconnect(&c.address);
    let set = |x: i64| UpdateArgs::set(doc(json!({ "X": x })));
    a.applier.update_one(&ns(), &json!(1), &set(2)).unwrap();
    c.applier.update_one(&ns(), &json!(1), &set(3)).unwrap();
    network.reconnect(&a.address);
    network.reconnect(&c.address);

    eventually("both masters converge", || {
        a.x(1) == Some(json!(2)) && c.x(1) == Some(json!(2))
    })
    .await;
    eventually("conflicts recorded", || {
        a.conflict_statuses().len() == 2 && c.conflict_statuses().len() == 2
    })
    .await;
    assert_eq!(
        a.conflict_statuses(),
        vec![ConflictStatus::Old, ConflictStatus::NewIgnored]
    );
    assert_eq!(
        c.conflict_statuses(),
        vec![ConflictStatus::OldReplaced, ConflictStatus::New]
    );

    for group in [&a.group, &c.group, &hub] {
        group.shutdown();
    }
    for group in [&a.group, &c.group, &hub] {
        group.join().await.unwrap();
    }
}
