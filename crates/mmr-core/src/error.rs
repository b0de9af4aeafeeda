//! Error types for causality tracking.

use crate::vector_time::NodeId;
use thiserror::Error;

/// Errors raised when a causal stamp violates the vector clock invariants.
///
/// Every variant is an invariant violation: callers on the replication path
/// treat them as fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CausalityError {
    #[error("node {node} is out of range for a vector of {len} slots")]
    NodeOutOfRange { node: NodeId, len: usize },

    #[error("vector time has {found} slots, expected {expected}")]
    LengthMismatch { expected: usize, found: usize },
}

pub type Result<T> = std::result::Result<T, CausalityError>;
