//! # mmr-db
//!
//! The conflict-aware write path of a multi-master document store.
//!
//! - [`WriteInterceptor`] stamps every write to a replicated collection with
//!   a [`GlobalEvent`](mmr_core::GlobalEvent) and resolves concurrent updates
//!   with [`mmr_core::policy`]
//! - [`BatchApplier`] replays change-log entries from other nodes, optionally
//!   as one atomic batch
//! - [`MemoryDatabase`] and [`LocalOplog`] are the in-process storage and
//!   change-log used by nodes and tests

pub mod applier;
pub mod command;
pub mod conflict;
pub mod document;
pub mod error;
pub mod interceptor;
pub mod memory;
pub mod mode;
pub mod oplog;
pub mod store;
pub mod validation;

pub use applier::BatchApplier;
pub use command::{Command, CommandDispatcher, CommandReply};
pub use conflict::{ConflictRecord, ConflictStatus};
pub use document::{Document, Namespace, RecordId, UpdateArgs, GLOBAL_TS_FIELD, NODE_ID_FIELD};
pub use error::{CommandError, StampError, StoreError, WriteError};
pub use interceptor::{UpdateOutcome, WriteInterceptor};
pub use memory::{LocalOplog, MemoryDatabase};
pub use mode::ApplyMode;
pub use oplog::{NoopObserver, OpObserver, OpTime, OpType, OplogEntry};
pub use store::{RecordStore, Transactional};
pub use validation::{DocumentValidator, RequiredFields, ValidationAction, ValidationError, Validators};
