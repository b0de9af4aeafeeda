//! Records written to `<ns>.conflicts` when concurrent writes are resolved.

use crate::document::{to_document, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Role of a document version in a resolved conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// Stored version that lost to the incoming one.
    OldReplaced,
    /// Incoming version that won.
    New,
    /// Stored version that was kept.
    Old,
    /// Incoming version that lost.
    NewIgnored,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    #[serde(rename = "_id")]
    pub id: Ulid,
    /// Shared by both records of one conflict.
    #[serde(rename = "_gid")]
    pub group_id: Ulid,
    #[serde(rename = "_status")]
    pub status: ConflictStatus,
    #[serde(rename = "_conflictTs")]
    pub detected_at: DateTime<Utc>,
    pub document: Document,
}

impl ConflictRecord {
    pub fn to_document(&self) -> Result<Document, serde_json::Error> {
        to_document(self)
    }
}

/// The two records describing one conflict, stored version first.
pub fn conflict_pair(replace: bool, old: &Document, new: &Document) -> [ConflictRecord; 2] {
    let group_id = Ulid::new();
    let detected_at = Utc::now();
    let (old_status, new_status) = if replace {
        (ConflictStatus::OldReplaced, ConflictStatus::New)
    } else {
        (ConflictStatus::Old, ConflictStatus::NewIgnored)
    };
    let record = |status, document: &Document| ConflictRecord {
        id: Ulid::new(),
        group_id,
        status,
        detected_at,
        document: document.clone(),
    };
    [record(old_status, old), record(new_status, new)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pair_statuses() {
        let old = json!({"_id": 1, "X": 1}).as_object().cloned().unwrap();
        let new = json!({"_id": 1, "X": 2}).as_object().cloned().unwrap();

        let [a, b] = conflict_pair(true, &old, &new);
        assert_eq!((a.status, b.status), (ConflictStatus::OldReplaced, ConflictStatus::New));
        assert_eq!(a.group_id, b.group_id);
        assert_ne!(a.id, b.id);
        assert_eq!(a.document, old);

        let [a, b] = conflict_pair(false, &old, &new);
        assert_eq!((a.status, b.status), (ConflictStatus::Old, ConflictStatus::NewIgnored));
        assert_eq!(b.document, new);
    }

    #[test]
    fn test_record_wire_format() {
        let doc = json!({"_id": 1}).as_object().cloned().unwrap();
        let [record, _] = conflict_pair(false, &doc, &doc);
        let wire = record.to_document().unwrap();
        assert_eq!(wire["_status"], json!("old"));
        assert!(wire["_id"].is_string());
        assert!(wire["_gid"].is_string());
        assert!(wire["_conflictTs"].is_string());
        assert_eq!(wire["document"], json!({"_id": 1}));
    }
}
