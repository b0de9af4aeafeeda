//! Causality stamping and conflict resolution on the write path.
//!
//! Every insert and update into a replicated collection passes through
//! [`WriteInterceptor`], which attaches or reads the `(_globalTs, _nodeId)`
//! stamp, advances the vector clock and decides which version survives a
//! concurrent write.

use crate::command::{Command, CommandDispatcher};
use crate::conflict::conflict_pair;
use crate::document::{document_id, read_event, write_event, Document, Namespace, RecordId, UpdateArgs};
use crate::error::{Result, WriteError};
use crate::mode::ApplyMode;
use crate::oplog::{NoopObserver, OpObserver};
use crate::store::RecordStore;
use crate::validation::Validators;
use mmr_core::{policy, Resolution, VectorClock};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of an update that went through conflict resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The new version was stored.
    Applied(RecordId),
    /// The stored version won and was kept.
    Ignored(RecordId),
}

impl UpdateOutcome {
    pub fn record_id(&self) -> RecordId {
        match self {
            UpdateOutcome::Applied(rid) | UpdateOutcome::Ignored(rid) => *rid,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }
}

pub struct WriteInterceptor<S> {
    store: Arc<S>,
    clock: Arc<VectorClock>,
    conflicts: Arc<dyn CommandDispatcher>,
    observer: Arc<dyn OpObserver>,
    validators: Validators,
    replicated: HashSet<Namespace>,
}

impl<S: RecordStore> WriteInterceptor<S> {
    /// `conflicts` receives the raw inserts into `<ns>.conflicts`.
    pub fn new(store: Arc<S>, clock: Arc<VectorClock>, conflicts: Arc<dyn CommandDispatcher>) -> Self {
        WriteInterceptor {
            store,
            clock,
            conflicts,
            observer: Arc::new(NoopObserver),
            validators: Validators::default(),
            replicated: HashSet::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn OpObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_validators(mut self, validators: Validators) -> Self {
        self.validators = validators;
        self
    }

    /// Put `ns` under multi-master replication.
    pub fn replicate(mut self, ns: Namespace) -> Self {
        self.replicated.insert(ns);
        self
    }

    pub fn is_replicated(&self, ns: &Namespace) -> bool {
        self.replicated.contains(ns)
    }

    pub fn clock(&self) -> &Arc<VectorClock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn insert(&self, ns: &Namespace, mut doc: Document, mode: ApplyMode) -> Result<RecordId> {
        self.validators.validate(ns, &doc)?;

        if self.is_replicated(ns) {
            let event = match mode {
                ApplyMode::Local => self.clock.local_event(),
                ApplyMode::Remote => {
                    let event = read_event(&doc, self.clock.node_count())?;
                    self.clock.advance_global_time(event.time())?;
                    event
                }
            };
            write_event(&mut doc, &event);
            debug!(%ns, ?mode, %event, "stamped insert");
        }

        let rid = self.store.insert(ns, doc.clone())?;
        if mode.is_local() {
            if let Err(err) = self.observer.on_insert(ns, &doc) {
                // an unlogged write would never replicate
                if let Err(undo) = self.store.remove(ns, rid) {
                    warn!(%ns, error = %undo, "failed to undo unlogged insert");
                }
                return Err(err.into());
            }
        }
        Ok(rid)
    }

    /// Store `new` over `old` unless the stored version wins.
    ///
    /// A concurrent pair is logged to `<ns>.conflicts` either way, once: a
    /// remote event the clock already covers was delivered before and its
    /// pair is not written again. The clock absorbs the incoming event even
    /// when it loses.
    ///
    /// Local updates to a replicated namespace are logged as a replacement
    /// by the stamped post-image.
    pub fn update(
        &self,
        ns: &Namespace,
        rid: RecordId,
        old: &Document,
        mut new: Document,
        args: &UpdateArgs,
        mode: ApplyMode,
    ) -> Result<UpdateOutcome> {
        self.validators.validate(ns, &new)?;

        let id = document_id(old).cloned().ok_or(WriteError::MissingId)?;
        if document_id(&new) != Some(&id) {
            return Err(WriteError::BadUpdate("_id is immutable".to_string()));
        }

        if !self.is_replicated(ns) {
            let rid = self.store.update(ns, rid, old, new.clone(), args)?;
            if mode.is_local() {
                self.observe_update(ns, rid, &id, old, new, args)?;
            }
            return Ok(UpdateOutcome::Applied(rid));
        }

        let node_count = self.clock.node_count();
        let old_event = read_event(old, node_count)?;
        let new_event = match mode {
            ApplyMode::Local => self.clock.local_event_after(old_event.time())?,
            ApplyMode::Remote => read_event(&new, node_count)?,
        };

        let Resolution { conflict, replace } = policy::resolve(&old_event, &new_event);
        debug_assert!(!mode.is_local() || replace, "local update must dominate the stored version");
        let redelivered =
            !mode.is_local() && new_event.time().happened_before(&self.clock.global_time());

        if conflict && redelivered {
            debug!(%ns, new = %new_event, "concurrent update already observed");
        } else if conflict {
            info!(
                %ns,
                old = %old_event,
                new = %new_event,
                replace,
                "concurrent update detected"
            );
            self.record_conflict(ns, replace, old, &new);
        }

        self.clock.advance_global_time(new_event.time())?;

        if !replace {
            debug!(%ns, new = %new_event, "stored version wins, ignoring update");
            return Ok(UpdateOutcome::Ignored(rid));
        }

        write_event(&mut new, &new_event);
        let stamped = args.with_stamp(&new_event);
        let rid = self.store.update(ns, rid, old, new.clone(), &stamped)?;
        if mode.is_local() {
            let image = UpdateArgs::replacement(new.clone());
            self.observe_update(ns, rid, &id, old, new, &image)?;
        }
        Ok(UpdateOutcome::Applied(rid))
    }

    /// Log a stored local update, restoring `old` if the log rejects it.
    fn observe_update(
        &self,
        ns: &Namespace,
        rid: RecordId,
        id: &serde_json::Value,
        old: &Document,
        new: Document,
        logged: &UpdateArgs,
    ) -> Result<()> {
        if let Err(err) = self.observer.on_update(ns, id, logged) {
            let restore = UpdateArgs::replacement(old.clone());
            if let Err(undo) = self.store.update(ns, rid, &new, old.clone(), &restore) {
                warn!(%ns, error = %undo, "failed to undo unlogged update");
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn record_conflict(&self, ns: &Namespace, replace: bool, old: &Document, new: &Document) {
        let target = ns.conflicts();
        let documents: std::result::Result<Vec<_>, _> = conflict_pair(replace, old, new)
            .iter()
            .map(|record| record.to_document())
            .collect();
        let documents = match documents {
            Ok(documents) => documents,
            Err(err) => {
                warn!(ns = %target, error = %err, "failed to encode conflict records");
                return;
            }
        };

        if let Err(err) = self
            .conflicts
            .run_command(target.db(), &Command::insert(&target, documents))
        {
            warn!(ns = %target, error = %err, "failed to record conflict");
        }
    }
}
