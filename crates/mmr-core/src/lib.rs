//! # mmr-core
//!
//! Causality tracking for multi-master document replication.
//!
//! This crate provides:
//! - Logical time: totally ordered timestamps and the node's clock authority
//! - Vector time: one logical timestamp per node, merged component-wise
//! - Global events: a vector time snapshot plus the node a write came from
//! - Policy: conflict detection and the canonical tie-break
//! - Vector clock: the lock-guarded, process-wide current vector time
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mmr_core::{policy, ManualClock, NodeId, VectorClock};
//!
//! let a = VectorClock::new(NodeId(0), 3, Arc::new(ManualClock::new())).unwrap();
//! let c = VectorClock::new(NodeId(2), 3, Arc::new(ManualClock::new())).unwrap();
//!
//! let from_a = a.local_event();
//! let from_c = c.local_event();
//!
//! assert!(policy::is_conflict(&from_a, &from_c));
//! // node 0 has priority, whichever version is stored first
//! assert!(!policy::should_replace(&from_a, &from_c));
//! assert!(policy::should_replace(&from_c, &from_a));
//! ```

pub mod error;
pub mod logical_time;
pub mod policy;
pub mod vector_clock;
pub mod vector_time;

pub use error::{CausalityError, Result};
pub use logical_time::{HybridClock, LogicalClock, LogicalTime, ManualClock};
pub use policy::Resolution;
pub use vector_clock::VectorClock;
pub use vector_time::{GlobalEvent, NodeId, VectorTime, DEFAULT_NODE_COUNT};
