//! Recovery after the local and remote histories diverge.

use crate::source::HostAndPort;
use async_trait::async_trait;
use mmr_db::OpTime;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RollbackError {
    /// Try again after re-selecting a sync source.
    #[error("rollback failed, will retry: {0}")]
    Retryable(String),

    /// Local state cannot be reconciled with the source.
    #[error("unrecoverable rollback failure: {0}")]
    Unrecoverable(String),
}

#[async_trait]
pub trait Rollback: Send + Sync {
    async fn run(
        &self,
        source: &HostAndPort,
        last_fetched: Option<OpTime>,
        cancel: &CancellationToken,
    ) -> Result<(), RollbackError>;
}

/// Undoes nothing. The producer resets its position and replays the source
/// log from the start; redelivered entries resolve as no-ops and record no
/// new conflicts.
#[derive(Clone, Copy, Debug, Default)]
pub struct SkipRollback;

#[async_trait]
impl Rollback for SkipRollback {
    async fn run(
        &self,
        source: &HostAndPort,
        last_fetched: Option<OpTime>,
        _cancel: &CancellationToken,
    ) -> Result<(), RollbackError> {
        warn!(
            %source,
            last_fetched = ?last_fetched,
            "skipping rollback, local changes past the common point are kept"
        );
        Ok(())
    }
}
