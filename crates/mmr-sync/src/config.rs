//! Replication settings.

use crate::source::HostAndPort;
use mmr_db::Namespace;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The `[replication]` section of a node's configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Replay remote entries through conflict resolution.
    pub apply_tier: bool,
    /// Relay peer entries into the aggregation log.
    pub hub: bool,
    /// Hub an apply tier pulls from.
    pub upstream: Option<HostAndPort>,
    /// Peers a hub pulls from.
    pub peers: Vec<HostAndPort>,
    pub small_batch_limit_bytes: usize,
    pub batching_delay_ms: u64,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub reselect_delay_ms: u64,
    pub stopped_poll_ms: u64,
    pub batch_limit: usize,
    pub atomic_apply: bool,
    pub aggregation_log_max_docs: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            apply_tier: false,
            hub: false,
            upstream: None,
            peers: Vec::new(),
            small_batch_limit_bytes: 40_000,
            batching_delay_ms: 2,
            retry_backoff_ms: 100,
            max_backoff_ms: 5_000,
            reselect_delay_ms: 1_000,
            stopped_poll_ms: 1_000,
            batch_limit: 1_000,
            atomic_apply: true,
            aggregation_log_max_docs: 100_000,
        }
    }
}

impl ReplicationConfig {
    pub fn producer_options(&self) -> ProducerOptions {
        ProducerOptionsBuilder::new()
            .small_batch_limit_bytes(self.small_batch_limit_bytes)
            .batching_delay(self.batching_delay_ms)
            .retry_backoff(self.retry_backoff_ms)
            .max_backoff(self.max_backoff_ms)
            .reselect_delay(self.reselect_delay_ms)
            .stopped_poll(self.stopped_poll_ms)
            .batch_limit(self.batch_limit)
            .atomic_apply(self.atomic_apply)
            .build()
    }
}

/// Tuning knobs of a single producer.
#[derive(Clone, Debug, PartialEq)]
pub struct ProducerOptions {
    /// Batches smaller than this are followed by `batching_delay`.
    pub small_batch_limit_bytes: usize,
    pub batching_delay: Duration,
    /// First retry delay after a transient error. Doubles per failure.
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    /// Pause after re-selecting the source used last time.
    pub reselect_delay: Duration,
    /// Poll interval while stopped.
    pub stopped_poll: Duration,
    pub batch_limit: usize,
    pub atomic_apply: bool,
    /// Log collection read on the source. Only used by apply producers; hub
    /// producers always read the source's own change-log.
    pub source_log: Namespace,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        ReplicationConfig::default().producer_options()
    }
}

/// Builder for producer options.
pub struct ProducerOptionsBuilder {
    options: ProducerOptions,
}

impl ProducerOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: ProducerOptions {
                small_batch_limit_bytes: 40_000,
                batching_delay: Duration::from_millis(2),
                retry_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_millis(5_000),
                reselect_delay: Duration::from_millis(1_000),
                stopped_poll: Duration::from_millis(1_000),
                batch_limit: 1_000,
                atomic_apply: true,
                source_log: Namespace::global_oplog(),
            },
        }
    }

    pub fn small_batch_limit_bytes(mut self, bytes: usize) -> Self {
        self.options.small_batch_limit_bytes = bytes;
        self
    }

    pub fn batching_delay(mut self, ms: u64) -> Self {
        self.options.batching_delay = Duration::from_millis(ms);
        self
    }

    pub fn retry_backoff(mut self, ms: u64) -> Self {
        self.options.retry_backoff = Duration::from_millis(ms);
        self
    }

    pub fn max_backoff(mut self, ms: u64) -> Self {
        self.options.max_backoff = Duration::from_millis(ms);
        self
    }

    pub fn reselect_delay(mut self, ms: u64) -> Self {
        self.options.reselect_delay = Duration::from_millis(ms);
        self
    }

    pub fn stopped_poll(mut self, ms: u64) -> Self {
        self.options.stopped_poll = Duration::from_millis(ms);
        self
    }

    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.options.batch_limit = limit;
        self
    }

    pub fn atomic_apply(mut self, enabled: bool) -> Self {
        self.options.atomic_apply = enabled;
        self
    }

    pub fn source_log(mut self, ns: Namespace) -> Self {
        self.options.source_log = ns;
        self
    }

    pub fn build(self) -> ProducerOptions {
        self.options
    }
}

impl Default for ProducerOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
