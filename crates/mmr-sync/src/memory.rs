//! In-process transport: nodes are [`MemoryDatabase`]s registered under an
//! address, and fetching tails a log collection of the target database.

use crate::fetcher::{BatchStream, FetchError, FetchRequest, FetchedBatch, OplogFetcher};
use crate::source::HostAndPort;
use async_stream::stream;
use async_trait::async_trait;
use mmr_db::{MemoryDatabase, OplogEntry, RecordId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct MemoryNetwork {
    nodes: RwLock<HashMap<HostAndPort, Arc<MemoryDatabase>>>,
    down: Arc<RwLock<HashSet<HostAndPort>>>,
    poll_interval: Duration,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        MemoryNetwork {
            nodes: RwLock::new(HashMap::new()),
            down: Arc::new(RwLock::new(HashSet::new())),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Upper bound on how long a tailing read waits before rescanning.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn register(&self, address: HostAndPort, db: Arc<MemoryDatabase>) {
        self.nodes.write().insert(address, db);
    }

    /// Fail open and future reads from `address`.
    pub fn disconnect(&self, address: &HostAndPort) {
        self.down.write().insert(address.clone());
    }

    pub fn reconnect(&self, address: &HostAndPort) {
        self.down.write().remove(address);
    }

    fn database(&self, address: &HostAndPort) -> Option<Arc<MemoryDatabase>> {
        if self.down.read().contains(address) {
            return None;
        }
        self.nodes.read().get(address).cloned()
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OplogFetcher for MemoryNetwork {
    async fn fetch(
        &self,
        source: &HostAndPort,
        request: &FetchRequest,
        cancel: CancellationToken,
    ) -> Result<BatchStream, FetchError> {
        let db = self
            .database(source)
            .ok_or_else(|| FetchError::Network(format!("{} is unreachable", source)))?;
        let down = self.down.clone();
        let poll_interval = self.poll_interval;
        let source = source.clone();
        let ns = request.namespace.clone();
        let from = request.from;
        let limit = request.batch_limit.max(1);

        Ok(Box::pin(stream! {
            let mut after: Option<RecordId> = None;
            let mut at_start = true;

            while !cancel.is_cancelled() {
                let lost = down.read().contains(&source);
                if lost {
                    yield Err(FetchError::Network(format!("connection to {} lost", source)));
                    break;
                }

                let changed = db.changed().notified();
                tokio::pin!(changed);
                changed.as_mut().enable();

                let records = db.scan_after(&ns, after, limit);
                let scanned = records.len();
                if let Some((rid, _)) = records.last() {
                    after = Some(*rid);
                }

                let mut batch = FetchedBatch::default();
                for (_, doc) in records {
                    let entry = match OplogEntry::from_document(&doc) {
                        Ok(entry) => entry,
                        Err(err) => {
                            yield Err(FetchError::InvalidEntry(err.to_string()));
                            return;
                        }
                    };
                    if from.map_or(true, |from| entry.position() >= from) {
                        batch.network_bytes += serde_json::to_vec(&doc).map_or(0, |v| v.len());
                        batch.entries.push(entry);
                    }
                }

                if !batch.entries.is_empty() {
                    at_start = false;
                    debug!(%source, %ns, entries = batch.entries.len(), "fetched batch");
                    yield Ok(batch);
                    continue;
                }
                if scanned > 0 {
                    continue;
                }

                // reached the end of the log without finding the resume point
                if at_start && from.is_some() {
                    yield Ok(FetchedBatch::default());
                }
                at_start = false;

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = changed.as_mut() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }))
    }
}
