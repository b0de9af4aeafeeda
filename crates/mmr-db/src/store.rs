//! Storage seams the write path is generic over.

use crate::document::{Document, Namespace, RecordId, UpdateArgs};
use crate::error::StoreError;
use serde_json::Value;

/// Record storage for a set of collections.
pub trait RecordStore: Send + Sync {
    /// Look up a document by `_id`.
    fn find(&self, ns: &Namespace, id: &Value) -> Result<Option<(RecordId, Document)>, StoreError>;

    fn insert(&self, ns: &Namespace, doc: Document) -> Result<RecordId, StoreError>;

    /// Delete the record at `rid` and return it.
    fn remove(&self, ns: &Namespace, rid: RecordId) -> Result<Document, StoreError>;

    /// Replace the record at `rid`. `args` is the expression that produced
    /// `new` from `old`.
    fn update(
        &self,
        ns: &Namespace,
        rid: RecordId,
        old: &Document,
        new: Document,
        args: &UpdateArgs,
    ) -> Result<RecordId, StoreError>;
}

/// Snapshot and restore of selected collections, used to apply a batch of
/// operations all-or-nothing.
pub trait Transactional {
    type Savepoint: Send;

    fn savepoint(&self, namespaces: &[Namespace]) -> Self::Savepoint;

    fn rollback_to(&self, savepoint: Self::Savepoint);
}
