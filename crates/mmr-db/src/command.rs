//! Commands understood by the database.

use crate::document::{Document, Namespace};
use crate::error::CommandError;
use crate::oplog::OplogEntry;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    /// Raw insert into `<db>.<collection>`.
    Insert {
        collection: String,
        documents: Vec<Document>,
    },
    /// Apply change-log entries in order. With `allow_atomic` the whole batch
    /// commits or none of it does.
    #[serde(rename_all = "camelCase")]
    ApplyOps {
        ops: Vec<OplogEntry>,
        allow_atomic: bool,
    },
}

impl Command {
    pub fn insert(ns: &Namespace, documents: Vec<Document>) -> Self {
        Command::Insert {
            collection: ns.coll().to_string(),
            documents,
        }
    }

    pub fn apply_ops(ops: Vec<OplogEntry>, allow_atomic: bool) -> Self {
        Command::ApplyOps { ops, allow_atomic }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Insert { .. } => "insert",
            Command::ApplyOps { .. } => "applyOps",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    /// Documents or operations affected.
    pub n: usize,
}

/// Runs commands against a database.
pub trait CommandDispatcher: Send + Sync {
    fn run_command(&self, db: &str, command: &Command) -> Result<CommandReply, CommandError>;
}
