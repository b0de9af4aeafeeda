//! Hub-tier relay into the aggregation log.

use mmr_core::LogicalClock;
use mmr_db::{Command, CommandDispatcher, CommandError, Namespace, OplogEntry, WriteError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Capped, append-only log of entries relayed from every peer.
///
/// Shared by all hub producers of a node. Entries are tagged with an
/// ingest time that strictly increases in log order, so consumers resume by
/// it.
pub struct AggregationLog {
    dispatcher: Arc<dyn CommandDispatcher>,
    clock: Arc<dyn LogicalClock>,
    namespace: Namespace,
    append: Mutex<()>,
}

impl AggregationLog {
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>, clock: Arc<dyn LogicalClock>) -> Self {
        AggregationLog {
            dispatcher,
            clock,
            namespace: Namespace::global_oplog(),
            append: Mutex::new(()),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Tag `entries` with `origin` and append them. Returns how many were
    /// written.
    pub fn append(&self, origin: &str, entries: Vec<OplogEntry>) -> Result<usize, CommandError> {
        let _guard = self.append.lock();

        let mut documents = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.is_relayed() {
                info!(
                    origin,
                    relayed_by = entry.origin.as_deref().unwrap_or_default(),
                    ts = %entry.ts,
                    "entry already carries an origin tag, skipping"
                );
                continue;
            }
            let tagged = entry.relayed(origin, self.clock.reserve_ticks(1));
            let document = tagged.to_document().map_err(|e| CommandError::Insert {
                ns: self.namespace.clone(),
                source: WriteError::Store(e),
            })?;
            documents.push(document);
        }
        if documents.is_empty() {
            return Ok(0);
        }

        let n = documents.len();
        debug!(origin, n, ns = %self.namespace, "relaying batch");
        self.dispatcher
            .run_command(self.namespace.db(), &Command::insert(&self.namespace, documents))?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmr_core::{LogicalTime, ManualClock};
    use mmr_db::{MemoryDatabase, OpTime};
    use serde_json::json;

    fn entry(i: u32) -> OplogEntry {
        let doc = json!({"_id": i}).as_object().cloned().unwrap();
        OplogEntry::insert(
            OpTime::new(LogicalTime::new(1, i), 1),
            Namespace::new("mm", "c"),
            doc,
        )
    }

    #[test]
    fn test_append_tags_and_skips_relayed() {
        let db = Arc::new(MemoryDatabase::new());
        let log = AggregationLog::new(db.clone(), Arc::new(ManualClock::new()));

        let already = entry(3).relayed("elsewhere:1", LogicalTime::new(0, 9));
        let n = log.append("a:1", vec![entry(1), entry(2), already]).unwrap();
        assert_eq!(n, 2);

        let relayed: Vec<_> = db
            .documents(&Namespace::global_oplog())
            .iter()
            .map(|d| OplogEntry::from_document(d).unwrap())
            .collect();
        assert_eq!(relayed.len(), 2);
        assert!(relayed.iter().all(|e| e.origin.as_deref() == Some("a:1")));
        assert!(relayed[0].position() < relayed[1].position());
        // content is untouched
        assert_eq!(relayed[1].o, entry(2).o);
        assert_eq!(relayed[1].ts, entry(2).ts);
    }
}
