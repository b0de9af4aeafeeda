//! Vector time and global events.
//!
//! A vector time holds one logical timestamp per node. It summarizes the
//! causal knowledge a node had when a write happened. Comparison is
//! component-wise, which gives the happened-before partial order.

use crate::error::{CausalityError, Result};
use crate::logical_time::LogicalTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of node slots used when nothing else is configured.
pub const DEFAULT_NODE_COUNT: usize = 3;

/// Identifier of a node participating in replication, in `[0, N)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        NodeId(id)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position-based vector time: slot `i` belongs to node `i`.
///
/// Slots only ever move forward. A slot beyond the end of the vector reads as
/// zero, which keeps [`merge`](VectorTime::merge) total.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorTime {
    time: Vec<LogicalTime>,
}

impl VectorTime {
    /// Create an all-zero vector with `node_count` slots.
    pub fn new(node_count: usize) -> Self {
        VectorTime {
            time: vec![LogicalTime::ZERO; node_count],
        }
    }

    /// Create a vector from explicit slots.
    pub fn from_slots(slots: impl IntoIterator<Item = LogicalTime>) -> Self {
        VectorTime {
            time: slots.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn slots(&self) -> &[LogicalTime] {
        &self.time
    }

    /// Timestamp recorded for `node`; zero when the slot does not exist.
    pub fn time_at(&self, node: NodeId) -> LogicalTime {
        self.time.get(node.index()).copied().unwrap_or(LogicalTime::ZERO)
    }

    fn slot_mut(&mut self, node: NodeId) -> Result<&mut LogicalTime> {
        let len = self.time.len();
        self.time
            .get_mut(node.index())
            .ok_or(CausalityError::NodeOutOfRange { node, len })
    }

    /// Add `n` ticks to a single node's slot.
    pub fn add_ticks(&mut self, node: NodeId, n: u64) -> Result<()> {
        self.slot_mut(node)?.add_ticks(n);
        Ok(())
    }

    /// Raise a node's slot to `time`. Lower readings are ignored.
    pub fn advance_node(&mut self, node: NodeId, time: LogicalTime) -> Result<()> {
        let slot = self.slot_mut(node)?;
        if *slot < time {
            *slot = time;
        }
        Ok(())
    }

    /// Component-wise maximum, in place.
    pub fn merge(&mut self, other: &VectorTime) {
        if other.time.len() > self.time.len() {
            self.time.resize(other.time.len(), LogicalTime::ZERO);
        }
        for (mine, theirs) in self.time.iter_mut().zip(&other.time) {
            if *mine < *theirs {
                *mine = *theirs;
            }
        }
    }

    pub fn merged_with(&self, other: &VectorTime) -> VectorTime {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// True when every slot of `self` is at most the matching slot of `other`.
    pub fn happened_before(&self, other: &VectorTime) -> bool {
        let len = self.time.len().max(other.time.len());
        (0..len).all(|i| {
            let node = NodeId(i as u32);
            self.time_at(node) <= other.time_at(node)
        })
    }

    /// Check the vector has exactly `node_count` slots.
    pub fn validate(&self, node_count: usize) -> Result<()> {
        if self.time.len() != node_count {
            return Err(CausalityError::LengthMismatch {
                expected: node_count,
                found: self.time.len(),
            });
        }
        Ok(())
    }
}

impl Default for VectorTime {
    fn default() -> Self {
        VectorTime::new(DEFAULT_NODE_COUNT)
    }
}

impl fmt::Display for VectorTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, t) in self.time.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", t)?;
        }
        write!(f, "]")
    }
}

/// A vector time snapshot together with the node the write happened on.
///
/// Built once per write and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalEvent {
    time: VectorTime,
    node_id: NodeId,
}

impl GlobalEvent {
    pub fn new(time: VectorTime, node_id: NodeId) -> Self {
        GlobalEvent { time, node_id }
    }

    pub fn time(&self) -> &VectorTime {
        &self.time
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// `self` happened before `after` when its knowledge is dominated by it.
    pub fn happened_before(&self, after: &GlobalEvent) -> bool {
        self.time.happened_before(&after.time)
    }

    /// Neither event happened before the other.
    pub fn is_concurrent_with(&self, other: &GlobalEvent) -> bool {
        !self.happened_before(other) && !other.happened_before(self)
    }

    pub fn into_parts(self) -> (VectorTime, NodeId) {
        (self.time, self.node_id)
    }
}

impl fmt::Display for GlobalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node: {} Event Time: {}", self.node_id, self.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vt(slots: &[u32]) -> VectorTime {
        VectorTime::from_slots(slots.iter().map(|&i| LogicalTime::new(0, i)))
    }

    #[test]
    fn test_vector_time_basic() {
        let mut v = VectorTime::new(3);
        assert_eq!(v.len(), 3);
        assert_eq!(v.time_at(NodeId(1)), LogicalTime::ZERO);

        v.add_ticks(NodeId(1), 2).unwrap();
        assert_eq!(v.time_at(NodeId(1)), LogicalTime::new(0, 2));
        assert_eq!(v, vt(&[0, 2, 0]));
    }

    #[test]
    fn test_tick_out_of_range() {
        let mut v = VectorTime::new(3);
        assert_eq!(
            v.add_ticks(NodeId(3), 1),
            Err(CausalityError::NodeOutOfRange { node: NodeId(3), len: 3 })
        );
        assert!(v.advance_node(NodeId(7), LogicalTime::new(1, 0)).is_err());
    }

    #[test]
    fn test_advance_node_never_decreases() {
        let mut v = vt(&[5, 0, 0]);
        v.advance_node(NodeId(0), LogicalTime::new(0, 3)).unwrap();
        assert_eq!(v, vt(&[5, 0, 0]));
        v.advance_node(NodeId(0), LogicalTime::new(0, 9)).unwrap();
        assert_eq!(v, vt(&[9, 0, 0]));
    }

    #[test]
    fn test_merge_is_componentwise_max() {
        let mut a = vt(&[1, 5, 0]);
        a.merge(&vt(&[3, 2, 4]));
        assert_eq!(a, vt(&[3, 5, 4]));
    }

    #[test]
    fn test_merge_extends_shorter_vector() {
        let mut a = vt(&[1]);
        a.merge(&vt(&[0, 0, 2]));
        assert_eq!(a, vt(&[1, 0, 2]));
    }

    #[test]
    fn test_happened_before() {
        assert!(vt(&[1, 0, 0]).happened_before(&vt(&[1, 1, 0])));
        assert!(!vt(&[1, 1, 0]).happened_before(&vt(&[1, 0, 0])));
        assert!(!vt(&[1, 0, 0]).happened_before(&vt(&[0, 0, 1])));
        assert!(vt(&[2, 2, 2]).happened_before(&vt(&[2, 2, 2])));
    }

    #[test]
    fn test_global_event_concurrency() {
        let a = GlobalEvent::new(vt(&[1, 0, 0]), NodeId(0));
        let c = GlobalEvent::new(vt(&[0, 0, 1]), NodeId(2));
        assert!(a.is_concurrent_with(&c));
        assert!(!a.is_concurrent_with(&a));
    }

    #[test]
    fn test_validate_length() {
        assert!(vt(&[0, 0, 0]).validate(3).is_ok());
        assert_eq!(
            vt(&[0, 0]).validate(3),
            Err(CausalityError::LengthMismatch { expected: 3, found: 2 })
        );
    }

    #[test]
    fn test_serialization() {
        let v = vt(&[1, 0, 2]);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"t": 0, "i": 1}, {"t": 0, "i": 0}, {"t": 0, "i": 2}])
        );
        let back: VectorTime = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_display() {
        let e = GlobalEvent::new(vt(&[1, 0]), NodeId(1));
        assert_eq!(
            e.to_string(),
            "Node: 1 Event Time: [Timestamp(0, 1) Timestamp(0, 0)]"
        );
    }
}
