//! Wiring of one in-process node from its configuration.

use crate::config::{ConfigError, NodeConfig};
use mmr_core::{CausalityError, HybridClock, LogicalClock, NodeId, VectorClock};
use mmr_db::{
    BatchApplier, Document, LocalOplog, MemoryDatabase, Namespace, RequiredFields, UpdateArgs,
    UpdateOutcome, Validators, WriteError, WriteInterceptor,
};
use mmr_sync::{
    AggregationLog, GroupContext, GroupError, HostAndPort, MemoryNetwork, ProducerError,
    ProducerGroup,
};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Causality(#[from] CausalityError),

    #[error(transparent)]
    Group(#[from] GroupError),
}

pub struct Node {
    address: HostAndPort,
    db: Arc<MemoryDatabase>,
    clock: Arc<VectorClock>,
    applier: BatchApplier<MemoryDatabase>,
    group: ProducerGroup,
}

impl Node {
    /// Build the node and register it on `network`. Producers are created
    /// but not started.
    pub fn build(config: &NodeConfig, network: &Arc<MemoryNetwork>) -> Result<Self, NodeError> {
        config.validate()?;
        let address = config.node.address();
        let db = Arc::new(MemoryDatabase::new());
        let logical: Arc<dyn LogicalClock> = Arc::new(HybridClock::new());
        let clock = Arc::new(VectorClock::new(
            NodeId(config.node.id),
            config.node.node_count,
            logical.clone(),
        )?);

        let mut validators = Validators::new();
        for (ns, fields) in &config.collections.required_fields {
            validators.register(
                ns.clone(),
                Arc::new(RequiredFields::new(fields.iter().cloned())),
                config.collections.validation_action,
            );
        }

        let oplog = Arc::new(LocalOplog::new(db.clone(), logical.clone()));
        let mut interceptor = WriteInterceptor::new(db.clone(), clock.clone(), db.clone())
            .with_observer(oplog)
            .with_validators(validators);
        for ns in &config.collections.replicated {
            interceptor = interceptor.replicate(ns.clone());
        }
        let applier = BatchApplier::new(Arc::new(interceptor));

        let mut ctx = GroupContext::new(network.clone()).with_local_origin(address.to_string());
        if config.replication.apply_tier {
            ctx = ctx.with_applier(Arc::new(applier.clone()));
        }
        if config.replication.hub {
            db.create_capped(
                Namespace::global_oplog(),
                config.replication.aggregation_log_max_docs,
            );
            ctx = ctx.with_aggregation_log(Arc::new(AggregationLog::new(db.clone(), logical)));
        }
        let group = ProducerGroup::from_config(&config.replication, &ctx)?;

        network.register(address.clone(), db.clone());
        info!(
            node = config.node.id,
            %address,
            apply_tier = config.replication.apply_tier,
            hub = config.replication.hub,
            producers = group.producers().len(),
            "node ready"
        );

        Ok(Node {
            address,
            db,
            clock,
            applier,
            group,
        })
    }

    pub fn address(&self) -> &HostAndPort {
        &self.address
    }

    pub fn clock(&self) -> &Arc<VectorClock> {
        &self.clock
    }

    pub fn startup(&self) {
        self.group.startup();
    }

    pub fn shutdown(&self) {
        self.group.shutdown();
    }

    pub async fn join(&self) -> Result<(), ProducerError> {
        self.group.join().await
    }

    pub fn insert(&self, ns: &Namespace, doc: Document) -> Result<(), WriteError> {
        self.applier.insert_one(ns, doc).map(|_| ())
    }

    pub fn update(&self, ns: &Namespace, id: &Value, args: &UpdateArgs) -> Result<UpdateOutcome, WriteError> {
        self.applier.update_one(ns, id, args)
    }

    pub fn find(&self, ns: &Namespace, id: &Value) -> Option<Document> {
        self.db.find_by_id(ns, id)
    }

    pub fn documents(&self, ns: &Namespace) -> Vec<Document> {
        self.db.documents(ns)
    }
}
