//! Error types for replication producers.

use crate::fetcher::FetchError;
use crate::rollback::RollbackError;
use crate::source::ResolveError;
use mmr_db::CommandError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProducerError {
    #[error("sync source resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("batch apply failed: {0}")]
    Apply(CommandError),

    #[error("relay into aggregation log failed: {0}")]
    Relay(CommandError),

    #[error(transparent)]
    Rollback(#[from] RollbackError),

    #[error("producer task panicked: {0}")]
    Panicked(String),
}

impl ProducerError {
    /// Local state can no longer be trusted. The node must stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            ProducerError::Apply(err) => err.is_invariant_violation(),
            ProducerError::Rollback(RollbackError::Unrecoverable(_)) => true,
            ProducerError::Panicked(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProducerError>;

/// A replication config that cannot be turned into producers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("apply tier requires an upstream source")]
    MissingUpstream,

    #[error("hub requires at least one peer")]
    MissingPeers,

    #[error("apply tier requires a batch applier")]
    MissingApplier,

    #[error("hub requires an aggregation log")]
    MissingAggregationLog,
}
