//! Change-log entries and the observer that records local writes.

use crate::document::{to_document, Document, Namespace, UpdateArgs, ID_FIELD};
use crate::error::StoreError;
use mmr_core::LogicalTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Position in a change-log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpTime {
    pub ts: LogicalTime,
    #[serde(rename = "t")]
    pub term: u64,
}

impl OpTime {
    pub fn new(ts: LogicalTime, term: u64) -> Self {
        OpTime { ts, term }
    }

    pub fn is_null(&self) -> bool {
        self.ts.is_zero()
    }
}

impl fmt::Display for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ts: {}, t: {} }}", self.ts, self.term)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpType {
    #[serde(rename = "i")]
    Insert,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "n")]
    Noop,
}

/// One change-log entry.
///
/// `origin` and `ingested_at` are only set on entries relayed through the
/// aggregation log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OplogEntry {
    pub ts: LogicalTime,
    #[serde(rename = "t")]
    pub term: u64,
    pub op: OpType,
    pub ns: Namespace,
    pub o: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub o2: Option<Document>,
    #[serde(rename = "_gid", default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(rename = "_lastMod", default, skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<LogicalTime>,
}

impl OplogEntry {
    pub fn insert(op_time: OpTime, ns: Namespace, doc: Document) -> Self {
        OplogEntry {
            ts: op_time.ts,
            term: op_time.term,
            op: OpType::Insert,
            ns,
            o: doc,
            o2: None,
            origin: None,
            ingested_at: None,
        }
    }

    pub fn update(op_time: OpTime, ns: Namespace, id: Value, update: UpdateArgs) -> Self {
        let mut query = Document::new();
        query.insert(ID_FIELD.to_string(), id);
        OplogEntry {
            ts: op_time.ts,
            term: op_time.term,
            op: OpType::Update,
            ns,
            o: update.into_document(),
            o2: Some(query),
            origin: None,
            ingested_at: None,
        }
    }

    pub fn noop(op_time: OpTime, msg: &str) -> Self {
        let mut o = Document::new();
        o.insert("msg".to_string(), Value::String(msg.to_string()));
        OplogEntry {
            ts: op_time.ts,
            term: op_time.term,
            op: OpType::Noop,
            ns: Namespace::new("admin", "$cmd"),
            o,
            o2: None,
            origin: None,
            ingested_at: None,
        }
    }

    pub fn op_time(&self) -> OpTime {
        OpTime::new(self.ts, self.term)
    }

    /// Resume position in the log this entry was read from. Relayed entries
    /// are positioned by their ingest time, which increases along the
    /// aggregation log even when origin timestamps interleave.
    pub fn position(&self) -> OpTime {
        OpTime::new(self.ingested_at.unwrap_or(self.ts), self.term)
    }

    /// Has already passed through a hub.
    pub fn is_relayed(&self) -> bool {
        self.origin.is_some()
    }

    /// Tag the entry with the node it was fetched from and when.
    pub fn relayed(mut self, origin: impl Into<String>, ingested_at: LogicalTime) -> Self {
        self.origin = Some(origin.into());
        self.ingested_at = Some(ingested_at);
        self
    }

    pub fn to_document(&self) -> Result<Document, StoreError> {
        Ok(to_document(self)?)
    }

    pub fn from_document(doc: &Document) -> Result<Self, StoreError> {
        Ok(serde_json::from_value(Value::Object(doc.clone()))?)
    }

    /// Serialized size, used for batch accounting.
    pub fn approx_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// Notified of every local write so it can be recorded in the change-log.
pub trait OpObserver: Send + Sync {
    fn on_insert(&self, ns: &Namespace, doc: &Document) -> Result<(), StoreError>;

    fn on_update(&self, ns: &Namespace, id: &Value, update: &UpdateArgs) -> Result<(), StoreError>;
}

/// Drops every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl OpObserver for NoopObserver {
    fn on_insert(&self, _ns: &Namespace, _doc: &Document) -> Result<(), StoreError> {
        Ok(())
    }

    fn on_update(&self, _ns: &Namespace, _id: &Value, _update: &UpdateArgs) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_wire_format() {
        let doc = json!({"_id": 1, "X": 1}).as_object().cloned().unwrap();
        let entry = OplogEntry::insert(
            OpTime::new(LogicalTime::new(10, 1), 1),
            Namespace::new("mm", "c"),
            doc,
        );
        let wire = entry.to_document().unwrap();
        assert_eq!(wire["op"], json!("i"));
        assert_eq!(wire["ns"], json!("mm.c"));
        assert_eq!(wire["ts"], json!({"t": 10, "i": 1}));
        assert!(!wire.contains_key("_gid"));

        let relayed = entry.relayed("localhost:27018", LogicalTime::new(11, 0));
        let wire = relayed.to_document().unwrap();
        assert_eq!(wire["_gid"], json!("localhost:27018"));
        assert_eq!(relayed.position(), OpTime::new(LogicalTime::new(11, 0), 1));
        assert_eq!(OplogEntry::from_document(&wire).unwrap(), relayed);
    }

    #[test]
    fn test_op_time_order() {
        let a = OpTime::new(LogicalTime::new(1, 5), 1);
        let b = OpTime::new(LogicalTime::new(2, 0), 1);
        assert!(a < b);
        assert!(OpTime::default().is_null());
    }
}
