//! Lifecycle aggregation over a node's producers.

use crate::config::{ProducerOptions, ReplicationConfig};
use crate::error::{GroupError, ProducerError};
use crate::fetcher::OplogFetcher;
use crate::hub::AggregationLog;
use crate::producer::{BatchSink, ReplicationProducer};
use crate::rollback::{Rollback, SkipRollback};
use crate::source::{HostAndPort, StaticSource};
use mmr_db::CommandDispatcher;
use std::sync::Arc;
use tracing::{error, info};

/// Collaborators the producers of a node share.
#[derive(Clone)]
pub struct GroupContext {
    pub fetcher: Arc<dyn OplogFetcher>,
    /// Required on an apply tier.
    pub applier: Option<Arc<dyn CommandDispatcher>>,
    /// Required on a hub.
    pub aggregation_log: Option<Arc<AggregationLog>>,
    pub rollback: Arc<dyn Rollback>,
    /// This node's own address. Apply producers skip entries relayed from it.
    pub local_origin: Option<String>,
}

impl GroupContext {
    pub fn new(fetcher: Arc<dyn OplogFetcher>) -> Self {
        GroupContext {
            fetcher,
            applier: None,
            aggregation_log: None,
            rollback: Arc::new(SkipRollback),
            local_origin: None,
        }
    }

    pub fn with_applier(mut self, applier: Arc<dyn CommandDispatcher>) -> Self {
        self.applier = Some(applier);
        self
    }

    pub fn with_aggregation_log(mut self, log: Arc<AggregationLog>) -> Self {
        self.aggregation_log = Some(log);
        self
    }

    pub fn with_rollback(mut self, rollback: Arc<dyn Rollback>) -> Self {
        self.rollback = rollback;
        self
    }

    pub fn with_local_origin(mut self, origin: impl Into<String>) -> Self {
        self.local_origin = Some(origin.into());
        self
    }
}

/// Owns one producer per remote source. Holds no causal state of its own.
#[derive(Debug, Default)]
pub struct ProducerGroup {
    producers: Vec<Arc<ReplicationProducer>>,
}

impl ProducerGroup {
    pub fn new(producers: Vec<Arc<ReplicationProducer>>) -> Self {
        ProducerGroup { producers }
    }

    /// An apply tier gets one producer for its upstream hub, a hub one
    /// producer per peer.
    pub fn from_config(config: &ReplicationConfig, ctx: &GroupContext) -> Result<Self, GroupError> {
        let options = config.producer_options();
        let mut producers = Vec::new();

        if config.apply_tier {
            let upstream = config.upstream.clone().ok_or(GroupError::MissingUpstream)?;
            let applier = ctx.applier.clone().ok_or(GroupError::MissingApplier)?;
            let mut producer = Self::producer(upstream, BatchSink::Apply(applier), &options, ctx);
            if let Some(origin) = &ctx.local_origin {
                producer = producer.skip_origin(origin.clone());
            }
            producers.push(Arc::new(producer));
        }

        if config.hub {
            if config.peers.is_empty() {
                return Err(GroupError::MissingPeers);
            }
            let log = ctx
                .aggregation_log
                .clone()
                .ok_or(GroupError::MissingAggregationLog)?;
            for peer in &config.peers {
                let producer = Self::producer(peer.clone(), BatchSink::Hub(log.clone()), &options, ctx);
                producers.push(Arc::new(producer));
            }
        }

        Ok(ProducerGroup::new(producers))
    }

    fn producer(
        source: HostAndPort,
        sink: BatchSink,
        options: &ProducerOptions,
        ctx: &GroupContext,
    ) -> ReplicationProducer {
        ReplicationProducer::new(
            source.to_string(),
            Arc::new(StaticSource::new(source)),
            ctx.fetcher.clone(),
            sink,
            options.clone(),
        )
        .with_rollback(ctx.rollback.clone())
    }

    pub fn producers(&self) -> &[Arc<ReplicationProducer>] {
        &self.producers
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// Start every producer. Does not wait for them to reach `Running`.
    pub fn startup(&self) {
        for producer in &self.producers {
            producer.startup();
        }
        info!(producers = self.producers.len(), "replication producers started");
    }

    pub fn shutdown(&self) {
        for producer in &self.producers {
            producer.shutdown();
        }
    }

    /// Wait for every producer to exit. Returns the first error any of them
    /// ended with.
    pub async fn join(&self) -> Result<(), ProducerError> {
        let mut first_error = None;
        for producer in &self.producers {
            if let Err(err) = producer.join().await {
                error!(instance = %producer.instance_id(), error = %err, "producer failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
