//! Applies client writes and replicated change-log entries through the
//! interceptor.

use crate::command::{Command, CommandDispatcher, CommandReply};
use crate::document::{document_id, Document, Namespace, RecordId, UpdateArgs, ID_FIELD};
use crate::error::{CommandError, Result, StoreError, WriteError};
use crate::interceptor::{UpdateOutcome, WriteInterceptor};
use crate::mode::ApplyMode;
use crate::oplog::{OpType, OplogEntry};
use crate::store::{RecordStore, Transactional};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct BatchApplier<S> {
    interceptor: Arc<WriteInterceptor<S>>,
}

impl<S> Clone for BatchApplier<S> {
    fn clone(&self) -> Self {
        BatchApplier {
            interceptor: self.interceptor.clone(),
        }
    }
}

impl<S: RecordStore + Transactional> BatchApplier<S> {
    pub fn new(interceptor: Arc<WriteInterceptor<S>>) -> Self {
        BatchApplier { interceptor }
    }

    pub fn interceptor(&self) -> &Arc<WriteInterceptor<S>> {
        &self.interceptor
    }

    /// Client insert.
    pub fn insert_one(&self, ns: &Namespace, doc: Document) -> Result<RecordId> {
        self.interceptor.insert(ns, doc, ApplyMode::Local)
    }

    /// Client update of the document with `_id == id`.
    pub fn update_one(&self, ns: &Namespace, id: &Value, args: &UpdateArgs) -> Result<UpdateOutcome> {
        let (rid, old) = self.find_existing(ns, id)?;
        let new = args.apply(&old)?;
        self.interceptor
            .update(ns, rid, &old, new, args, ApplyMode::Local)
    }

    /// Replay one entry from another node's change-log.
    pub fn apply_entry(&self, entry: &OplogEntry) -> Result<()> {
        let ns = &entry.ns;
        match entry.op {
            OpType::Insert => {
                let id = document_id(&entry.o).ok_or(WriteError::MissingId)?;
                // a replayed insert of a document we already hold is an update
                match self.interceptor.store().find(ns, id)? {
                    Some((rid, old)) => {
                        let args = UpdateArgs::replacement(entry.o.clone());
                        self.interceptor
                            .update(ns, rid, &old, entry.o.clone(), &args, ApplyMode::Remote)?;
                    }
                    None => {
                        self.interceptor
                            .insert(ns, entry.o.clone(), ApplyMode::Remote)?;
                    }
                }
            }
            OpType::Update => {
                let id = entry
                    .o2
                    .as_ref()
                    .and_then(|q| q.get(ID_FIELD))
                    .ok_or(WriteError::MissingId)?;
                let (rid, old) = self.find_existing(ns, id)?;
                let args = UpdateArgs::new(entry.o.clone());
                let new = args.apply(&old)?;
                self.interceptor
                    .update(ns, rid, &old, new, &args, ApplyMode::Remote)?;
            }
            OpType::Noop => trace!(ts = %entry.ts, "skipping no-op entry"),
        }
        Ok(())
    }

    /// Apply `ops` in order. With `atomic`, a failure restores every touched
    /// collection, conflict side collections included.
    pub fn apply_ops(&self, ops: &[OplogEntry], atomic: bool) -> std::result::Result<usize, CommandError> {
        let savepoint = atomic.then(|| {
            let namespaces: BTreeSet<Namespace> = ops
                .iter()
                .flat_map(|op| [op.ns.clone(), op.ns.conflicts()])
                .collect();
            let namespaces: Vec<_> = namespaces.into_iter().collect();
            self.interceptor.store().savepoint(&namespaces)
        });

        for (index, op) in ops.iter().enumerate() {
            if let Err(source) = self.apply_entry(op) {
                if let Some(savepoint) = savepoint {
                    debug!(index, error = %source, "rolling back batch");
                    self.interceptor.store().rollback_to(savepoint);
                }
                return Err(CommandError::Apply { index, source });
            }
        }
        Ok(ops.len())
    }

    fn find_existing(&self, ns: &Namespace, id: &Value) -> Result<(RecordId, Document)> {
        self.interceptor.store().find(ns, id)?.ok_or_else(|| {
            WriteError::Store(StoreError::DocumentNotFound {
                ns: ns.clone(),
                id: id.to_string(),
            })
        })
    }
}

impl<S: RecordStore + Transactional + 'static> CommandDispatcher for BatchApplier<S> {
    fn run_command(&self, db: &str, command: &Command) -> std::result::Result<CommandReply, CommandError> {
        match command {
            Command::ApplyOps { ops, allow_atomic } => {
                let n = self.apply_ops(ops, *allow_atomic)?;
                Ok(CommandReply { n })
            }
            Command::Insert { collection, documents } => {
                let ns = Namespace::new(db, collection.clone());
                for doc in documents {
                    self.insert_one(&ns, doc.clone())
                        .map_err(|source| CommandError::Insert { ns: ns.clone(), source })?;
                }
                Ok(CommandReply { n: documents.len() })
            }
        }
    }
}
