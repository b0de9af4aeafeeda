//! In-memory database: record storage, capped collections, a change-log
//! observer and change notification for tailing readers.

use crate::command::{Command, CommandDispatcher, CommandReply};
use crate::document::{document_id, Document, Namespace, RecordId, UpdateArgs, ID_FIELD};
use crate::error::{CommandError, StoreError, WriteError};
use crate::oplog::{OpObserver, OpTime, OplogEntry};
use crate::store::{RecordStore, Transactional};
use mmr_core::LogicalClock;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Notify;
use ulid::Ulid;

#[derive(Clone, Debug, Default)]
struct Collection {
    records: BTreeMap<RecordId, Document>,
    by_id: HashMap<String, RecordId>,
    next_rid: u64,
    max_docs: Option<usize>,
}

impl Collection {
    fn capped(max_docs: usize) -> Self {
        Collection {
            max_docs: Some(max_docs),
            ..Default::default()
        }
    }

    fn id_key(id: &Value) -> String {
        id.to_string()
    }

    fn insert(&mut self, ns: &Namespace, mut doc: Document) -> Result<RecordId, StoreError> {
        let id = match document_id(&doc) {
            Some(id) => id.clone(),
            None => {
                let id = Value::String(Ulid::new().to_string());
                doc.insert(ID_FIELD.to_string(), id.clone());
                id
            }
        };
        let key = Self::id_key(&id);
        if self.by_id.contains_key(&key) {
            return Err(StoreError::DuplicateKey {
                ns: ns.clone(),
                id: key,
            });
        }

        self.next_rid += 1;
        let rid = RecordId(self.next_rid);
        self.records.insert(rid, doc);
        self.by_id.insert(key, rid);

        if let Some(max) = self.max_docs {
            while self.records.len() > max {
                let Some((_, evicted)) = self.records.pop_first() else {
                    break;
                };
                if let Some(id) = document_id(&evicted) {
                    self.by_id.remove(&Self::id_key(id));
                }
            }
        }
        Ok(rid)
    }

    fn remove(&mut self, rid: RecordId) -> Option<Document> {
        let doc = self.records.remove(&rid)?;
        if let Some(id) = document_id(&doc) {
            self.by_id.remove(&Self::id_key(id));
        }
        Some(doc)
    }
}

/// Collections keyed by namespace behind one lock.
///
/// Every successful write wakes tasks waiting on [`MemoryDatabase::changed`].
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    collections: RwLock<HashMap<Namespace, Collection>>,
    changed: Notify,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collection that keeps only its newest `max_docs` records.
    pub fn create_capped(&self, ns: Namespace, max_docs: usize) {
        self.collections
            .write()
            .entry(ns)
            .or_insert_with(|| Collection::capped(max_docs));
    }

    pub fn count(&self, ns: &Namespace) -> usize {
        self.collections
            .read()
            .get(ns)
            .map_or(0, |c| c.records.len())
    }

    /// All documents in record order.
    pub fn documents(&self, ns: &Namespace) -> Vec<Document> {
        self.collections
            .read()
            .get(ns)
            .map(|c| c.records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Up to `limit` records strictly after `after`, in record order.
    pub fn scan_after(&self, ns: &Namespace, after: Option<RecordId>, limit: usize) -> Vec<(RecordId, Document)> {
        let collections = self.collections.read();
        let Some(coll) = collections.get(ns) else {
            return Vec::new();
        };
        let start = after.map_or(RecordId(0), |rid| RecordId(rid.0 + 1));
        coll.records
            .range(start..)
            .take(limit)
            .map(|(rid, doc)| (*rid, doc.clone()))
            .collect()
    }

    pub fn find_by_id(&self, ns: &Namespace, id: &Value) -> Option<Document> {
        let collections = self.collections.read();
        let coll = collections.get(ns)?;
        let rid = coll.by_id.get(&Collection::id_key(id))?;
        coll.records.get(rid).cloned()
    }

    /// Notified after every write.
    pub fn changed(&self) -> &Notify {
        &self.changed
    }
}

impl RecordStore for MemoryDatabase {
    fn find(&self, ns: &Namespace, id: &Value) -> Result<Option<(RecordId, Document)>, StoreError> {
        let collections = self.collections.read();
        Ok(collections.get(ns).and_then(|coll| {
            let rid = coll.by_id.get(&Collection::id_key(id))?;
            coll.records.get(rid).map(|doc| (*rid, doc.clone()))
        }))
    }

    fn insert(&self, ns: &Namespace, doc: Document) -> Result<RecordId, StoreError> {
        let rid = self
            .collections
            .write()
            .entry(ns.clone())
            .or_default()
            .insert(ns, doc)?;
        self.changed.notify_waiters();
        Ok(rid)
    }

    fn remove(&self, ns: &Namespace, rid: RecordId) -> Result<Document, StoreError> {
        self.collections
            .write()
            .get_mut(ns)
            .and_then(|coll| coll.remove(rid))
            .ok_or_else(|| StoreError::RecordNotFound { ns: ns.clone(), rid })
    }

    fn update(
        &self,
        ns: &Namespace,
        rid: RecordId,
        old: &Document,
        new: Document,
        _args: &UpdateArgs,
    ) -> Result<RecordId, StoreError> {
        if document_id(old) != document_id(&new) {
            return Err(StoreError::ImmutableId(ns.clone()));
        }
        {
            let mut collections = self.collections.write();
            let record = collections
                .get_mut(ns)
                .and_then(|coll| coll.records.get_mut(&rid))
                .ok_or_else(|| StoreError::RecordNotFound { ns: ns.clone(), rid })?;
            *record = new;
        }
        self.changed.notify_waiters();
        Ok(rid)
    }
}

/// Copies of the collections captured by [`Transactional::savepoint`].
#[derive(Debug)]
pub struct MemorySavepoint {
    saved: Vec<(Namespace, Option<Collection>)>,
}

impl Transactional for MemoryDatabase {
    type Savepoint = MemorySavepoint;

    fn savepoint(&self, namespaces: &[Namespace]) -> MemorySavepoint {
        let collections = self.collections.read();
        MemorySavepoint {
            saved: namespaces
                .iter()
                .map(|ns| (ns.clone(), collections.get(ns).cloned()))
                .collect(),
        }
    }

    fn rollback_to(&self, savepoint: MemorySavepoint) {
        let mut collections = self.collections.write();
        for (ns, saved) in savepoint.saved {
            match saved {
                Some(coll) => {
                    collections.insert(ns, coll);
                }
                None => {
                    collections.remove(&ns);
                }
            }
        }
    }
}

/// Raw inserts only. Replicated batches go through a
/// [`BatchApplier`](crate::applier::BatchApplier).
impl CommandDispatcher for MemoryDatabase {
    fn run_command(&self, db: &str, command: &Command) -> Result<CommandReply, CommandError> {
        match command {
            Command::Insert { collection, documents } => {
                let ns = Namespace::new(db, collection.clone());
                for doc in documents {
                    RecordStore::insert(self, &ns, doc.clone()).map_err(|e| CommandError::Insert {
                        ns: ns.clone(),
                        source: WriteError::Store(e),
                    })?;
                }
                Ok(CommandReply { n: documents.len() })
            }
            Command::ApplyOps { .. } => Err(CommandError::Unsupported("applyOps on a raw store")),
        }
    }
}

/// Appends every local write to `local.oplog.rs`.
pub struct LocalOplog {
    db: Arc<MemoryDatabase>,
    clock: Arc<dyn LogicalClock>,
    term: u64,
    last: Mutex<OpTime>,
}

impl LocalOplog {
    pub fn new(db: Arc<MemoryDatabase>, clock: Arc<dyn LogicalClock>) -> Self {
        LocalOplog {
            db,
            clock,
            term: 1,
            last: Mutex::new(OpTime::default()),
        }
    }

    pub fn namespace() -> Namespace {
        Namespace::oplog()
    }

    /// Position of the newest entry written so far.
    pub fn last_op_time(&self) -> OpTime {
        *self.last.lock()
    }

    fn append(&self, build: impl FnOnce(OpTime) -> OplogEntry) -> Result<(), StoreError> {
        // held across the insert so entries land in timestamp order
        let mut last = self.last.lock();
        let reading = self.clock.reserve_ticks(1);
        let ts = reading.max(last.ts.with_ticks(1));
        let op_time = OpTime::new(ts, self.term);
        let entry = build(op_time);
        RecordStore::insert(self.db.as_ref(), &Namespace::oplog(), entry.to_document()?)?;
        *last = op_time;
        Ok(())
    }
}

impl OpObserver for LocalOplog {
    fn on_insert(&self, ns: &Namespace, doc: &Document) -> Result<(), StoreError> {
        self.append(|op_time| OplogEntry::insert(op_time, ns.clone(), doc.clone()))
    }

    fn on_update(&self, ns: &Namespace, id: &Value, update: &UpdateArgs) -> Result<(), StoreError> {
        self.append(|op_time| OplogEntry::update(op_time, ns.clone(), id.clone(), update.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmr_core::{LogicalTime, ManualClock};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn ns() -> Namespace {
        Namespace::new("mm", "c")
    }

    #[test]
    fn test_insert_find_and_duplicate_key() {
        let db = MemoryDatabase::new();
        let rid = RecordStore::insert(&db, &ns(), doc(json!({"_id": 1, "X": 1}))).unwrap();
        let (found, d) = db.find(&ns(), &json!(1)).unwrap().unwrap();
        assert_eq!(found, rid);
        assert_eq!(d["X"], json!(1));

        let err = RecordStore::insert(&db, &ns(), doc(json!({"_id": 1}))).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[test]
    fn test_remove_frees_the_id() {
        let db = MemoryDatabase::new();
        let rid = RecordStore::insert(&db, &ns(), doc(json!({"_id": 1}))).unwrap();
        let removed = db.remove(&ns(), rid).unwrap();
        assert_eq!(removed["_id"], json!(1));
        assert!(db.find(&ns(), &json!(1)).unwrap().is_none());
        assert!(matches!(
            db.remove(&ns(), rid),
            Err(StoreError::RecordNotFound { .. })
        ));
        RecordStore::insert(&db, &ns(), doc(json!({"_id": 1}))).unwrap();
    }

    #[test]
    fn test_insert_generates_missing_id() {
        let db = MemoryDatabase::new();
        RecordStore::insert(&db, &ns(), doc(json!({"X": 1}))).unwrap();
        assert!(db.documents(&ns())[0]["_id"].is_string());
    }

    #[test]
    fn test_capped_collection_evicts_oldest() {
        let db = MemoryDatabase::new();
        db.create_capped(ns(), 2);
        for i in 0..3 {
            RecordStore::insert(&db, &ns(), doc(json!({"_id": i}))).unwrap();
        }
        let ids: Vec<_> = db.documents(&ns()).iter().map(|d| d["_id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2)]);
        assert!(db.find(&ns(), &json!(0)).unwrap().is_none());
    }

    #[test]
    fn test_scan_after() {
        let db = MemoryDatabase::new();
        for i in 0..5 {
            RecordStore::insert(&db, &ns(), doc(json!({"_id": i}))).unwrap();
        }
        let first = db.scan_after(&ns(), None, 2);
        assert_eq!(first.len(), 2);
        let rest = db.scan_after(&ns(), Some(first[1].0), 10);
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].1["_id"], json!(2));
    }

    #[test]
    fn test_savepoint_rollback() {
        let db = MemoryDatabase::new();
        RecordStore::insert(&db, &ns(), doc(json!({"_id": 1}))).unwrap();
        let sp = db.savepoint(&[ns(), ns().conflicts()]);
        RecordStore::insert(&db, &ns(), doc(json!({"_id": 2}))).unwrap();
        RecordStore::insert(&db, &ns().conflicts(), doc(json!({"_id": 3}))).unwrap();

        db.rollback_to(sp);
        assert_eq!(db.count(&ns()), 1);
        assert_eq!(db.count(&ns().conflicts()), 0);
    }

    #[test]
    fn test_local_oplog_timestamps_increase() {
        let db = Arc::new(MemoryDatabase::new());
        let clock = Arc::new(ManualClock::starting_at(LogicalTime::new(5, 0)));
        let oplog = LocalOplog::new(db.clone(), clock);

        oplog.on_insert(&ns(), &doc(json!({"_id": 1}))).unwrap();
        oplog
            .on_update(&ns(), &json!(1), &UpdateArgs::set(doc(json!({"X": 1}))))
            .unwrap();

        let entries: Vec<_> = db
            .documents(&Namespace::oplog())
            .iter()
            .map(|d| OplogEntry::from_document(d).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].op_time() < entries[1].op_time());
        assert_eq!(entries[1].op_time(), oplog.last_op_time());
        assert_eq!(entries[1].o2.as_ref().unwrap()["_id"], json!(1));
    }
}
