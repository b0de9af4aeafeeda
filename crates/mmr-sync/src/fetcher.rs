//! Remote change-log fetching.

use crate::source::HostAndPort;
use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use mmr_db::{Namespace, OpTime, OplogEntry};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    /// The source no longer holds the position we would resume from.
    #[error("remote history diverged: expected first entry at {expected}, found {found:?}")]
    HistoryDiverged {
        expected: OpTime,
        found: Option<OpTime>,
    },

    #[error("remote log out of order: {next} does not follow {previous}")]
    OutOfOrder { previous: OpTime, next: OpTime },

    #[error("invalid log entry: {0}")]
    InvalidEntry(String),
}

/// Whether the entry at the resume position is handed to the consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartingPoint {
    /// It was already applied. Check it, then drop it.
    SkipFirstDoc,
    /// Nothing applied yet. Keep it.
    EnqueueFirstDoc,
}

#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// Resume position. `None` reads the log from its first entry.
    pub from: Option<OpTime>,
    /// Log collection on the source.
    pub namespace: Namespace,
    pub batch_limit: usize,
}

#[derive(Clone, Debug, Default)]
pub struct FetchedBatch {
    pub entries: Vec<OplogEntry>,
    /// Size of the batch as received.
    pub network_bytes: usize,
}

impl FetchedBatch {
    pub fn last_position(&self) -> Option<OpTime> {
        self.entries.last().map(OplogEntry::position)
    }
}

pub type BatchStream = BoxStream<'static, Result<FetchedBatch, FetchError>>;

/// Opens a tailing read of a remote log.
#[async_trait]
pub trait OplogFetcher: Send + Sync {
    /// Batches of entries positioned at or after `request.from`, in log
    /// order. When `from` is set and the source has nothing at or after it,
    /// the first batch is empty. The stream ends once `cancel` fires.
    async fn fetch(
        &self,
        source: &HostAndPort,
        request: &FetchRequest,
        cancel: CancellationToken,
    ) -> Result<BatchStream, FetchError>;
}

/// Enforce the resume contract on a raw fetch stream.
///
/// With a known position the first entry must sit exactly at `from`,
/// otherwise the stream yields [`FetchError::HistoryDiverged`] and ends.
/// Positions must strictly increase after that.
pub fn with_starting_point(
    inner: BatchStream,
    from: Option<OpTime>,
    starting_point: StartingPoint,
) -> BatchStream {
    Box::pin(stream! {
        let mut inner = inner;
        let mut first = true;
        let mut previous = from;

        while let Some(item) = inner.next().await {
            let mut batch = match item {
                Ok(batch) => batch,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            if first {
                first = false;
                if let Some(expected) = from {
                    let found = batch.entries.first().map(OplogEntry::position);
                    if found != Some(expected) {
                        yield Err(FetchError::HistoryDiverged { expected, found });
                        return;
                    }
                    match starting_point {
                        StartingPoint::SkipFirstDoc => {
                            batch.entries.remove(0);
                        }
                        StartingPoint::EnqueueFirstDoc => previous = None,
                    }
                }
            }

            for entry in &batch.entries {
                let next = entry.position();
                if let Some(previous) = previous.filter(|p| next <= *p) {
                    yield Err(FetchError::OutOfOrder { previous, next });
                    return;
                }
                previous = Some(next);
            }

            yield Ok(batch);
        }
    })
}
