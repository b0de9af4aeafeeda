//! Error types for the write path.

use crate::document::{Namespace, RecordId};
use crate::validation::ValidationError;
use mmr_core::CausalityError;
use thiserror::Error;

/// A causality stamp on a document could not be decoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StampError {
    #[error("document has no {0} field")]
    Missing(&'static str),

    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },

    #[error(transparent)]
    Causality(#[from] CausalityError),
}

/// Errors reported by a record store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("duplicate key {id} in {ns}")]
    DuplicateKey { ns: Namespace, id: String },

    #[error("record {rid} not found in {ns}")]
    RecordNotFound { ns: Namespace, rid: RecordId },

    #[error("no document with _id {id} in {ns}")]
    DocumentNotFound { ns: Namespace, id: String },

    #[error("cannot change _id of a document in {0}")]
    ImmutableId(Namespace),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Errors surfaced synchronously to the caller of insert or update.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid causality stamp: {0}")]
    Stamp(#[from] StampError),

    #[error("document has no _id")]
    MissingId,

    #[error("invalid update expression: {0}")]
    BadUpdate(String),
}

impl WriteError {
    /// Broken causal metadata. Replication must not continue past it.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, WriteError::Stamp(_))
    }
}

impl From<CausalityError> for WriteError {
    fn from(err: CausalityError) -> Self {
        WriteError::Stamp(StampError::Causality(err))
    }
}

/// Errors returned by command dispatch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("operation {index} failed to apply: {source}")]
    Apply { index: usize, source: WriteError },

    #[error("insert into {ns} failed: {source}")]
    Insert { ns: Namespace, source: WriteError },

    #[error("command not supported here: {0}")]
    Unsupported(&'static str),

    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),
}

impl CommandError {
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            CommandError::Apply { source, .. } | CommandError::Insert { source, .. } => {
                source.is_invariant_violation()
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WriteError>;
