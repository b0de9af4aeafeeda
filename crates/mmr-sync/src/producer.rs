//! Replication producer: pulls one remote change-log and feeds it either
//! through the local write path or into the aggregation log.
//!
//! # State machine
//!
//! ```text
//!  Starting --start()--> Running --stop()/shutdown()--> Stopped
//!      ^                                                    |
//!      +-------------- start_producer_if_stopped() ---------+
//! ```
//!
//! The loop runs as one tokio task per producer. Every blocking point
//! (source resolution, fetch, sleeps) races against a cancellation token so
//! that [`ReplicationProducer::shutdown`] takes effect without waiting for
//! in-flight network I/O.

use crate::config::ProducerOptions;
use crate::error::{ProducerError, Result};
use crate::fetcher::{with_starting_point, FetchError, FetchRequest, FetchedBatch, OplogFetcher, StartingPoint};
use crate::hub::AggregationLog;
use crate::rollback::{Rollback, RollbackError, SkipRollback};
use crate::source::{HostAndPort, ResolveError, SyncSourceResolver};
use futures::StreamExt;
use mmr_db::{Command, CommandDispatcher, Namespace, OpTime};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerState {
    Starting,
    Running,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Replays batches through conflict resolution.
    Apply,
    /// Relays batches into the aggregation log.
    Hub,
}

/// Where fetched batches go.
#[derive(Clone)]
pub enum BatchSink {
    Apply(Arc<dyn CommandDispatcher>),
    Hub(Arc<AggregationLog>),
}

impl BatchSink {
    pub fn role(&self) -> Role {
        match self {
            BatchSink::Apply(_) => Role::Apply,
            BatchSink::Hub(_) => Role::Hub,
        }
    }
}

struct Shared {
    state: ProducerState,
    last_fetched: Option<OpTime>,
    sync_source: Option<HostAndPort>,
    in_shutdown: bool,
    /// Cancels the current resolution and fetch only.
    fetch_cancel: CancellationToken,
}

struct Inner {
    instance_id: String,
    options: ProducerOptions,
    resolver: Arc<dyn SyncSourceResolver>,
    fetcher: Arc<dyn OplogFetcher>,
    sink: BatchSink,
    rollback: Arc<dyn Rollback>,
    /// Relayed entries tagged with this origin are this node's own writes.
    skip_origin: Option<String>,
    shutdown: CancellationToken,
    shared: Mutex<Shared>,
}

pub struct ReplicationProducer {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl ReplicationProducer {
    /// `instance_id` tags relayed entries and log lines, conventionally the
    /// source's `host:port`.
    pub fn new(
        instance_id: impl Into<String>,
        resolver: Arc<dyn SyncSourceResolver>,
        fetcher: Arc<dyn OplogFetcher>,
        sink: BatchSink,
        options: ProducerOptions,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let shared = Shared {
            state: ProducerState::Starting,
            last_fetched: None,
            sync_source: None,
            in_shutdown: false,
            fetch_cancel: shutdown.child_token(),
        };
        ReplicationProducer {
            inner: Arc::new(Inner {
                instance_id: instance_id.into(),
                options,
                resolver,
                fetcher,
                sink,
                rollback: Arc::new(SkipRollback),
                skip_origin: None,
                shutdown,
                shared: Mutex::new(shared),
            }),
            task: Mutex::new(None),
        }
    }

    /// Resume after `position`, which has already been applied.
    pub fn resume_from(self, position: OpTime) -> Self {
        self.inner.shared.lock().last_fetched = Some(position);
        self
    }

    /// Must be called before [`startup`](Self::startup).
    pub fn with_rollback(mut self, rollback: Arc<dyn Rollback>) -> Self {
        self.configure(|inner| inner.rollback = rollback);
        self
    }

    /// Do not replay relayed entries whose origin is `origin`. Their
    /// position still counts as fetched. Must be called before
    /// [`startup`](Self::startup).
    pub fn skip_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        self.configure(|inner| inner.skip_origin = Some(origin));
        self
    }

    fn configure(&mut self, apply: impl FnOnce(&mut Inner)) {
        let instance = self.inner.instance_id.clone();
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => apply(inner),
            None => {
                warn!(%instance, "producer already started, ignoring configuration change");
                debug_assert!(false, "producer configured after startup");
            }
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn role(&self) -> Role {
        self.inner.sink.role()
    }

    /// Spawn the producer loop. Calling it again is a no-op.
    pub fn startup(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!(instance = %self.inner.instance_id, "producer already started");
            return;
        }
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(inner.run()));
    }

    /// `Starting -> Running`. No-op in any other state.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Enter `Stopped` and abandon the current fetch. With `reset` the
    /// next start reads the source log from the beginning.
    pub fn stop(&self, reset: bool) {
        self.inner.stop(reset);
    }

    /// `Stopped -> Starting`. No-op in any other state.
    pub fn start_producer_if_stopped(&self) {
        self.inner.start_producer_if_stopped();
    }

    /// Stop for good. Safe to call from any thread, any number of times.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Wait for the loop to exit. Returns the fatal error that ended it, if
    /// any.
    pub async fn join(&self) -> Result<()> {
        let task = self.task.lock().take();
        match task {
            Some(task) => task
                .await
                .map_err(|e| ProducerError::Panicked(e.to_string()))?,
            None => Ok(()),
        }
    }

    pub fn state(&self) -> ProducerState {
        self.inner.state()
    }

    pub fn last_fetched(&self) -> Option<OpTime> {
        self.inner.shared.lock().last_fetched
    }

    pub fn sync_source(&self) -> Option<HostAndPort> {
        self.inner.shared.lock().sync_source.clone()
    }

    pub fn should_stop_fetching(&self) -> bool {
        self.inner.should_stop_fetching()
    }
}

impl std::fmt::Debug for ReplicationProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("ReplicationProducer")
            .field("instance_id", &self.inner.instance_id)
            .field("role", &self.inner.sink.role())
            .field("state", &shared.state)
            .field("last_fetched", &shared.last_fetched)
            .finish()
    }
}

impl Inner {
    fn state(&self) -> ProducerState {
        self.shared.lock().state
    }

    fn in_shutdown(&self) -> bool {
        self.shared.lock().in_shutdown
    }

    fn start(&self) {
        let mut shared = self.shared.lock();
        if shared.state != ProducerState::Starting {
            return;
        }
        shared.state = ProducerState::Running;
        info!(
            instance = %self.instance_id,
            last_fetched = ?shared.last_fetched,
            "starting replication producer"
        );
    }

    fn stop(&self, reset: bool) {
        let mut shared = self.shared.lock();
        shared.state = ProducerState::Stopped;
        shared.sync_source = None;
        if reset {
            shared.last_fetched = None;
            info!(instance = %self.instance_id, "resetting last fetched position");
        }
        shared.fetch_cancel.cancel();
        debug!(instance = %self.instance_id, "stopped replication producer");
    }

    fn start_producer_if_stopped(&self) {
        let mut shared = self.shared.lock();
        if shared.state == ProducerState::Stopped && !shared.in_shutdown {
            shared.state = ProducerState::Starting;
        }
    }

    fn shutdown(&self) {
        let mut shared = self.shared.lock();
        shared.state = ProducerState::Stopped;
        shared.in_shutdown = true;
        self.shutdown.cancel();
    }

    fn should_stop_fetching(&self) -> bool {
        let shared = self.shared.lock();
        if shared.state != ProducerState::Running {
            trace!(instance = %self.instance_id, "stopping fetcher due to stop request");
            return true;
        }
        if shared.sync_source.is_none() {
            trace!(instance = %self.instance_id, "stopping fetcher, no sync source");
            return true;
        }
        false
    }

    /// Sleep unless shut down first.
    async fn pause(&self, delay: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.options.retry_backoff.as_millis() as u64;
        let max_ms = self.options.max_backoff.as_millis() as u64;
        let shift = attempt.clamp(1, 20) - 1;
        let capped = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        // +-25% jitter
        let jitter = capped / 4;
        let ms = if jitter > 0 {
            rand::thread_rng().gen_range(capped - jitter..=capped + jitter)
        } else {
            capped
        };
        Duration::from_millis(ms.max(1))
    }

    async fn run(self: Arc<Self>) -> Result<()> {
        let mut consecutive_failures: u32 = 0;
        while !self.in_shutdown() {
            match self.run_producer().await {
                Ok(()) => consecutive_failures = 0,
                Err(err) if err.is_fatal() => {
                    error!(
                        instance = %self.instance_id,
                        error = %err,
                        "unrecoverable replication error, stopping producer"
                    );
                    self.stop(false);
                    return Err(err);
                }
                Err(err) => {
                    consecutive_failures += 1;
                    let delay = self.backoff_delay(consecutive_failures);
                    warn!(
                        instance = %self.instance_id,
                        error = %err,
                        attempt = consecutive_failures,
                        delay_ms = delay.as_millis() as u64,
                        "sync producer problem"
                    );
                    self.pause(delay).await;
                }
            }
        }
        self.stop(false);
        info!(instance = %self.instance_id, "replication producer exited");
        Ok(())
    }

    async fn run_producer(&self) -> Result<()> {
        match self.state() {
            ProducerState::Stopped => {
                self.pause(self.options.stopped_poll).await;
                return Ok(());
            }
            ProducerState::Starting => self.start(),
            ProducerState::Running => {}
        }
        self.produce().await
    }

    fn source_log(&self) -> Namespace {
        match self.sink {
            BatchSink::Apply(_) => self.options.source_log.clone(),
            BatchSink::Hub(_) => Namespace::oplog(),
        }
    }

    async fn produce(&self) -> Result<()> {
        let (old_source, last_fetched, cancel) = {
            let mut shared = self.shared.lock();
            if shared.state != ProducerState::Running {
                return Ok(());
            }
            shared.fetch_cancel = self.shutdown.child_token();
            (
                shared.sync_source.take(),
                shared.last_fetched,
                shared.fetch_cancel.clone(),
            )
        };

        let source = match self.resolver.resolve(last_fetched, &cancel).await {
            Ok(source) => source,
            Err(ResolveError::Cancelled) => return Ok(()),
            Err(err) => {
                info!(instance = %self.instance_id, error = %err, "failed to find sync source");
                self.pause(self.options.reselect_delay).await;
                return Ok(());
            }
        };

        let last_fetched = {
            let mut shared = self.shared.lock();
            if shared.state != ProducerState::Running {
                return Ok(());
            }
            shared.sync_source = Some(source.clone());
            shared.last_fetched
        };

        if old_source.as_ref() == Some(&source) {
            info!(
                instance = %self.instance_id,
                %source,
                "chose same sync source candidate as last time, pausing before fetching"
            );
            self.pause(self.options.reselect_delay).await;
        } else {
            let from = old_source.map_or_else(|| "empty".to_string(), |s| s.to_string());
            info!(
                instance = %self.instance_id,
                %from,
                to = %source,
                "changed sync source"
            );
        }

        let starting_point = match last_fetched {
            Some(_) => StartingPoint::SkipFirstDoc,
            None => StartingPoint::EnqueueFirstDoc,
        };
        let request = FetchRequest {
            from: last_fetched,
            namespace: self.source_log(),
            batch_limit: self.options.batch_limit,
        };
        debug!(
            instance = %self.instance_id,
            %source,
            ns = %request.namespace,
            from = ?last_fetched,
            ?starting_point,
            "starting fetcher"
        );

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            stream = self.fetcher.fetch(&source, &request, cancel.clone()) => stream?,
        };
        let mut batches = with_starting_point(stream, last_fetched, starting_point);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = batches.next() => next,
            };
            let Some(next) = next else {
                break;
            };
            if self.should_stop_fetching() {
                info!(
                    instance = %self.instance_id,
                    "producer stopped while fetching, abandoning batch and re-evaluating sync source"
                );
                break;
            }
            match next {
                Ok(batch) => self.enqueue(batch).await?,
                Err(err @ FetchError::HistoryDiverged { .. }) => {
                    return self.run_rollback(&source, err).await;
                }
                Err(err) => return Err(err.into()),
            }
        }

        info!(instance = %self.instance_id, %source, "fetcher stopped reading remote log");
        Ok(())
    }

    async fn enqueue(&self, batch: FetchedBatch) -> Result<()> {
        let Some(last) = batch.last_position() else {
            trace!(instance = %self.instance_id, "no documents to apply");
            return Ok(());
        };
        let network_bytes = batch.network_bytes;
        let mut entries = batch.entries;
        if let Some(own) = &self.skip_origin {
            entries.retain(|e| e.origin.as_ref() != Some(own));
        }
        let count = entries.len();

        match &self.sink {
            _ if entries.is_empty() => {}
            BatchSink::Hub(log) => {
                log.append(&self.instance_id, entries)
                    .map_err(ProducerError::Relay)?;
            }
            BatchSink::Apply(dispatcher) => {
                let command = Command::apply_ops(entries, self.options.atomic_apply);
                dispatcher
                    .run_command("admin", &command)
                    .map_err(ProducerError::Apply)?;
            }
        }

        {
            let mut shared = self.shared.lock();
            if shared.state != ProducerState::Running {
                return Ok(());
            }
            if shared.last_fetched.map_or(true, |prev| last > prev) {
                shared.last_fetched = Some(last);
            }
        }
        debug!(instance = %self.instance_id, count, last_fetched = %last, "batch done");

        if network_bytes > 0 && network_bytes < self.options.small_batch_limit_bytes {
            tokio::time::sleep(self.options.batching_delay).await;
        }
        Ok(())
    }

    async fn run_rollback(&self, source: &HostAndPort, cause: FetchError) -> Result<()> {
        let last_fetched = {
            let shared = self.shared.lock();
            if shared.state != ProducerState::Running {
                return Ok(());
            }
            shared.last_fetched
        };
        info!(instance = %self.instance_id, %source, cause = %cause, "starting rollback");

        match self.rollback.run(source, last_fetched, &self.shutdown).await {
            Ok(()) => {
                info!(instance = %self.instance_id, "rollback finished");
                self.stop(true);
            }
            Err(err @ RollbackError::Unrecoverable(_)) => return Err(err.into()),
            Err(err) => {
                warn!(instance = %self.instance_id, error = %err, "rollback failed with retryable error");
                self.stop(false);
            }
        }
        self.start_producer_if_stopped();
        Ok(())
    }
}
