//! Documents, namespaces and the causality stamp fields.

use crate::error::{StampError, WriteError};
use mmr_core::{CausalityError, GlobalEvent, NodeId, VectorTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// A stored document.
pub type Document = serde_json::Map<String, Value>;

pub const ID_FIELD: &str = "_id";
/// Vector of logical timestamps of the write that produced this version.
pub const GLOBAL_TS_FIELD: &str = "_globalTs";
/// Node the write that produced this version originated on.
pub const NODE_ID_FIELD: &str = "_nodeId";

/// A `db.collection` pair.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace {
    db: String,
    coll: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Namespace {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// The node's own change-log.
    pub fn oplog() -> Self {
        Namespace::new("local", "oplog.rs")
    }

    /// Aggregation log written by a hub.
    pub fn global_oplog() -> Self {
        Namespace::new("local", "oplog_global")
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn coll(&self) -> &str {
        &self.coll
    }

    /// Side collection receiving conflict records: `<db>.<coll>.conflicts`.
    pub fn conflicts(&self) -> Namespace {
        Namespace::new(self.db.clone(), format!("{}.conflicts", self.coll))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Namespace::new(db, coll)),
            _ => Err(format!("invalid namespace '{}'", s)),
        }
    }
}

impl TryFrom<String> for Namespace {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.to_string()
    }
}

/// Location of a record inside a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

/// Serialize any value that maps to a JSON object into a [`Document`].
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// The `_id` of a document.
pub fn document_id(doc: &Document) -> Option<&Value> {
    doc.get(ID_FIELD)
}

/// Decode the causality stamp carried by a document.
pub fn read_event(doc: &Document, node_count: usize) -> Result<GlobalEvent, StampError> {
    let raw_time = doc
        .get(GLOBAL_TS_FIELD)
        .ok_or(StampError::Missing(GLOBAL_TS_FIELD))?;
    let time: VectorTime =
        serde_json::from_value(raw_time.clone()).map_err(|e| StampError::Malformed {
            field: GLOBAL_TS_FIELD,
            reason: e.to_string(),
        })?;
    time.validate(node_count)?;

    let raw_node = doc
        .get(NODE_ID_FIELD)
        .ok_or(StampError::Missing(NODE_ID_FIELD))?;
    let node = raw_node
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .map(NodeId)
        .ok_or_else(|| StampError::Malformed {
            field: NODE_ID_FIELD,
            reason: format!("expected a small non-negative integer, got {}", raw_node),
        })?;
    if node.index() >= node_count {
        return Err(CausalityError::NodeOutOfRange {
            node,
            len: node_count,
        }
        .into());
    }

    Ok(GlobalEvent::new(time, node))
}

fn stamp_values(event: &GlobalEvent) -> (Value, Value) {
    let slots = event
        .time()
        .slots()
        .iter()
        .map(|t| json!({"t": t.secs(), "i": t.increment()}))
        .collect();
    (Value::Array(slots), json!(event.node_id().0))
}

/// Attach `event` to a document, replacing any previous stamp.
pub fn write_event(doc: &mut Document, event: &GlobalEvent) {
    let (time, node) = stamp_values(event);
    doc.insert(GLOBAL_TS_FIELD.to_string(), time);
    doc.insert(NODE_ID_FIELD.to_string(), node);
}

/// A field-update expression: either operators (`$set`, `$unset`) or a full
/// replacement document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateArgs {
    update: Document,
}

impl UpdateArgs {
    pub fn new(update: Document) -> Self {
        UpdateArgs { update }
    }

    /// `{ $set: fields }`
    pub fn set(fields: Document) -> Self {
        let mut update = Document::new();
        update.insert("$set".to_string(), Value::Object(fields));
        UpdateArgs { update }
    }

    pub fn replacement(doc: Document) -> Self {
        UpdateArgs { update: doc }
    }

    pub fn as_document(&self) -> &Document {
        &self.update
    }

    pub fn into_document(self) -> Document {
        self.update
    }

    pub fn is_replacement(&self) -> bool {
        !self.update.keys().any(|k| k.starts_with('$'))
    }

    /// Compute the new version of `old` under this expression.
    pub fn apply(&self, old: &Document) -> Result<Document, WriteError> {
        let new = if self.is_replacement() {
            let mut new = self.update.clone();
            if let Some(id) = document_id(old) {
                new.entry(ID_FIELD.to_string()).or_insert_with(|| id.clone());
            }
            new
        } else {
            let mut new = old.clone();
            for (op, arg) in &self.update {
                match op.as_str() {
                    "$set" => {
                        for (path, value) in operator_fields(op, arg)? {
                            set_path(&mut new, path, value.clone())?;
                        }
                    }
                    "$unset" => {
                        for (path, _) in operator_fields(op, arg)? {
                            unset_path(&mut new, path);
                        }
                    }
                    "$v" => {}
                    other => {
                        return Err(WriteError::BadUpdate(format!(
                            "unsupported operator {}",
                            other
                        )))
                    }
                }
            }
            new
        };

        if document_id(&new) != document_id(old) {
            return Err(WriteError::BadUpdate("_id is immutable".to_string()));
        }
        Ok(new)
    }

    /// The same expression, rewritten so the persisted version carries `event`.
    pub fn with_stamp(&self, event: &GlobalEvent) -> UpdateArgs {
        let mut update = self.update.clone();
        if self.is_replacement() {
            write_event(&mut update, event);
            return UpdateArgs { update };
        }

        if let Some(Value::Object(unset)) = update.get_mut("$unset") {
            unset.remove(GLOBAL_TS_FIELD);
            unset.remove(NODE_ID_FIELD);
        }
        let set = update
            .entry("$set".to_string())
            .or_insert_with(|| Value::Object(Document::new()));
        if let Value::Object(set) = set {
            write_event(set, event);
        }
        UpdateArgs { update }
    }
}

fn operator_fields<'a>(op: &str, arg: &'a Value) -> Result<&'a Document, WriteError> {
    arg.as_object()
        .ok_or_else(|| WriteError::BadUpdate(format!("{} expects an object", op)))
}

fn set_path(doc: &mut Document, path: &str, value: Value) -> Result<(), WriteError> {
    let mut parts = path.split('.').peekable();
    let mut current = doc;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return Ok(());
        }
        let child = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Document::new()));
        current = child.as_object_mut().ok_or_else(|| {
            WriteError::BadUpdate(format!("cannot traverse non-object at {}", part))
        })?;
    }
    Ok(())
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(child)) = doc.get_mut(head) {
                unset_path(child, rest);
            }
        }
    }
}
