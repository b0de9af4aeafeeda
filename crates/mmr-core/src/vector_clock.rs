//! Process-wide vector clock.
//!
//! One [`VectorClock`] is created at node startup and shared as
//! `Arc<VectorClock>` with every writer and replication producer. All access
//! goes through its mutex; readers only ever receive snapshots.

use crate::error::{CausalityError, Result};
use crate::logical_time::LogicalClock;
use crate::vector_time::{GlobalEvent, NodeId, VectorTime};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct VectorClock {
    node_id: NodeId,
    node_count: usize,
    logical: Arc<dyn LogicalClock>,
    global_time: Mutex<VectorTime>,
}

impl VectorClock {
    /// Create the clock for `node_id` in a cluster of `node_count` nodes.
    pub fn new(node_id: NodeId, node_count: usize, logical: Arc<dyn LogicalClock>) -> Result<Self> {
        if node_id.index() >= node_count {
            return Err(CausalityError::NodeOutOfRange {
                node: node_id,
                len: node_count,
            });
        }
        Ok(VectorClock {
            node_id,
            node_count,
            logical,
            global_time: Mutex::new(VectorTime::new(node_count)),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn logical_clock(&self) -> &Arc<dyn LogicalClock> {
        &self.logical
    }

    /// Advance this node's slot by `n` and return the new snapshot.
    pub fn reserve_ticks(&self, n: u64) -> VectorTime {
        let mut time = self.global_time.lock();
        let advanced = time.add_ticks(self.node_id, n);
        debug_assert!(advanced.is_ok(), "node id is range-checked in new()");
        time.clone()
    }

    pub fn global_time(&self) -> VectorTime {
        self.global_time.lock().clone()
    }

    /// Unconditional overwrite. Initialization and tests only.
    pub fn set_global_time(&self, time: VectorTime) -> Result<()> {
        time.validate(self.node_count)?;
        *self.global_time.lock() = time;
        Ok(())
    }

    /// Merge a received vector time into this node's time.
    pub fn advance_global_time(&self, time: &VectorTime) -> Result<()> {
        time.validate(self.node_count)?;
        self.global_time.lock().merge(time);
        Ok(())
    }

    /// Raise this node's slot to the current logical clock reading.
    pub fn sync_cluster_time(&self) {
        let reading = self.logical.cluster_time();
        let advanced = self.global_time.lock().advance_node(self.node_id, reading);
        debug_assert!(advanced.is_ok(), "node id is range-checked in new()");
    }

    /// Stamp for a locally originated write.
    ///
    /// Reserves one logical tick and guarantees this node's slot strictly
    /// increases, so successive local writes are causally ordered.
    pub fn local_event(&self) -> GlobalEvent {
        let reading = self.logical.reserve_ticks(1);
        let mut time = self.global_time.lock();
        let next = time.time_at(self.node_id).with_ticks(1).max(reading);
        let advanced = time.advance_node(self.node_id, next);
        debug_assert!(advanced.is_ok(), "node id is range-checked in new()");
        GlobalEvent::new(time.clone(), self.node_id)
    }

    /// Stamp for a local write that overwrites a version stamped `observed`.
    /// The result always happens after `observed`.
    pub fn local_event_after(&self, observed: &VectorTime) -> Result<GlobalEvent> {
        self.advance_global_time(observed)?;
        Ok(self.local_event())
    }
}

impl std::fmt::Debug for VectorClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorClock")
            .field("node_id", &self.node_id)
            .field("node_count", &self.node_count)
            .field("global_time", &*self.global_time.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical_time::{LogicalTime, ManualClock};

    fn clock(node: u32) -> (Arc<ManualClock>, VectorClock) {
        let logical = Arc::new(ManualClock::new());
        let vc = VectorClock::new(NodeId(node), 3, logical.clone()).unwrap();
        (logical, vc)
    }

    fn ticks(slots: &[u32]) -> VectorTime {
        VectorTime::from_slots(slots.iter().map(|&i| LogicalTime::new(0, i)))
    }

    #[test]
    fn test_rejects_node_out_of_range() {
        let logical = Arc::new(ManualClock::new());
        assert!(VectorClock::new(NodeId(3), 3, logical).is_err());
    }

    #[test]
    fn test_reserve_ticks() {
        let (_, vc) = clock(1);
        assert_eq!(vc.reserve_ticks(2), ticks(&[0, 2, 0]));
        assert_eq!(vc.global_time(), ticks(&[0, 2, 0]));
    }

    #[test]
    fn test_advance_global_time_merges() {
        let (_, vc) = clock(0);
        vc.reserve_ticks(1);
        vc.advance_global_time(&ticks(&[0, 4, 2])).unwrap();
        assert_eq!(vc.global_time(), ticks(&[1, 4, 2]));
        assert!(vc.advance_global_time(&ticks(&[1, 1])).is_err());
    }

    #[test]
    fn test_sync_cluster_time() {
        let (logical, vc) = clock(2);
        logical.set(LogicalTime::new(10, 3));
        vc.sync_cluster_time();
        assert_eq!(vc.global_time().time_at(NodeId(2)), LogicalTime::new(10, 3));

        // never moves backwards
        logical.set(LogicalTime::new(1, 0));
        vc.sync_cluster_time();
        assert_eq!(vc.global_time().time_at(NodeId(2)), LogicalTime::new(10, 3));
    }

    #[test]
    fn test_local_event_first_write() {
        let (_, vc) = clock(0);
        let e = vc.local_event();
        assert_eq!(e.node_id(), NodeId(0));
        assert_eq!(e.time(), &ticks(&[1, 0, 0]));
    }

    #[test]
    fn test_local_events_are_ordered() {
        let (_, vc) = clock(1);
        let a = vc.local_event();
        let b = vc.local_event();
        assert!(a.happened_before(&b));
        assert!(!b.happened_before(&a));
    }

    #[test]
    fn test_local_event_after_dominates_observed() {
        let (_, vc) = clock(1);
        let observed = ticks(&[1, 0, 0]);
        let e = vc.local_event_after(&observed).unwrap();
        assert_eq!(e.time(), &ticks(&[1, 1, 0]));
        assert!(GlobalEvent::new(observed, NodeId(0)).happened_before(&e));
    }

    #[test]
    fn test_shared_across_threads() {
        let (_, vc) = clock(0);
        let vc = Arc::new(vc);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let vc = vc.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        vc.reserve_ticks(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(vc.global_time().time_at(NodeId(0)), LogicalTime::new(0, 400));
    }
}
