//! # mmr-sync
//!
//! Replication producers for multi-master nodes.
//!
//! A node runs a [`ProducerGroup`]: an apply tier pulls the aggregation log
//! of its upstream hub and replays every batch through the conflict-aware
//! write path; a hub pulls each peer's change-log and relays the entries,
//! origin-tagged, into its own aggregation log.
//!
//! Transport is behind [`OplogFetcher`]; [`MemoryNetwork`] wires nodes
//! together in-process.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod group;
pub mod hub;
pub mod memory;
pub mod producer;
pub mod rollback;
pub mod source;

pub use config::{ProducerOptions, ProducerOptionsBuilder, ReplicationConfig};
pub use error::{GroupError, ProducerError, Result};
pub use fetcher::{BatchStream, FetchError, FetchRequest, FetchedBatch, OplogFetcher, StartingPoint};
pub use group::{GroupContext, ProducerGroup};
pub use hub::AggregationLog;
pub use memory::MemoryNetwork;
pub use producer::{BatchSink, ProducerState, ReplicationProducer, Role};
pub use rollback::{Rollback, RollbackError, SkipRollback};
pub use source::{HostAndPort, ResolveError, StaticSource, SyncSourceResolver};
