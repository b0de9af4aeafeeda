//! Conflict detection and the canonical tie-break rule.
//!
//! Every node evaluates the same pure functions over the same pair of events,
//! so every node keeps the same version of a document.

use crate::vector_time::{GlobalEvent, NodeId};
use std::cmp::Ordering;

/// Outcome of comparing the stored event with an incoming one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// The events are concurrent.
    pub conflict: bool,
    /// The incoming version should replace the stored one.
    pub replace: bool,
}

/// Neither event happened before the other.
pub fn is_conflict(before: &GlobalEvent, after: &GlobalEvent) -> bool {
    !before.happened_before(after) && !after.happened_before(before)
}

/// Node priority: a lower node id wins a concurrent write.
pub fn has_priority(node: NodeId, other: NodeId) -> bool {
    node < other
}

/// Decide whether `new_event` replaces `old_event`.
///
/// Causally ordered events keep the later one. Concurrent events fall back to
/// node priority, and for concurrent events from the same node the
/// lexicographically larger vector wins.
pub fn should_replace(old_event: &GlobalEvent, new_event: &GlobalEvent) -> bool {
    if old_event.happened_before(new_event) {
        return true;
    }
    if new_event.happened_before(old_event) {
        return false;
    }

    let (old_node, new_node) = (old_event.node_id(), new_event.node_id());
    if old_node != new_node {
        return has_priority(new_node, old_node);
    }
    new_event.time().slots().cmp(old_event.time().slots()) == Ordering::Greater
}

pub fn resolve(old_event: &GlobalEvent, new_event: &GlobalEvent) -> Resolution {
    Resolution {
        conflict: is_conflict(old_event, new_event),
        replace: should_replace(old_event, new_event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical_time::LogicalTime;
    use crate::vector_time::VectorTime;

    fn event(slots: &[u32], node: u32) -> GlobalEvent {
        GlobalEvent::new(
            VectorTime::from_slots(slots.iter().map(|&i| LogicalTime::new(0, i))),
            NodeId(node),
        )
    }

    #[test]
    fn test_dominating_new_event_replaces() {
        let old = event(&[1, 0, 0], 0);
        let new = event(&[1, 1, 0], 1);
        assert_eq!(resolve(&old, &new), Resolution { conflict: false, replace: true });
    }

    #[test]
    fn test_dominated_new_event_is_rejected() {
        let old = event(&[2, 1, 0], 1);
        let new = event(&[1, 0, 0], 0);
        assert_eq!(resolve(&old, &new), Resolution { conflict: false, replace: false });
    }

    #[test]
    fn test_equal_events_replace_without_conflict() {
        let e = event(&[3, 1, 2], 2);
        assert_eq!(resolve(&e, &e.clone()), Resolution { conflict: false, replace: true });
    }

    #[test]
    fn test_concurrent_lower_node_wins() {
        let a = event(&[1, 0, 0], 0);
        let c = event(&[0, 0, 1], 2);

        // Same decision whichever side is stored first.
        assert!(!should_replace(&a, &c));
        assert!(should_replace(&c, &a));
        assert!(is_conflict(&a, &c));
    }

    #[test]
    fn test_concurrent_same_node_is_deterministic() {
        let x = event(&[2, 0, 0], 1);
        let y = event(&[1, 0, 3], 1);
        assert!(is_conflict(&x, &y));
        assert_ne!(should_replace(&x, &y), should_replace(&y, &x));
    }

    #[test]
    fn test_has_priority() {
        assert!(has_priority(NodeId(0), NodeId(1)));
        assert!(has_priority(NodeId(1), NodeId(2)));
        assert!(!has_priority(NodeId(2), NodeId(0)));
        assert!(!has_priority(NodeId(1), NodeId(1)));
    }
}
