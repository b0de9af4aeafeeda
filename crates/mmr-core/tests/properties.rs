//! Property-based tests for the happened-before order and the tie-break
//!
//! These laws are what make conflict resolution converge:
//!  - merge is commutative, associative and idempotent
//!  - happened-before is reflexive and transitive
//!  - every pair of events is ordered one way, the other way, or concurrent
//!  - the tie-break agrees with happened-before and picks exactly one winner

use mmr_core::policy::{is_conflict, should_replace};
use mmr_core::{GlobalEvent, LogicalTime, NodeId, VectorTime};
use proptest::prelude::*;

const N: usize = 3;

fn vector_time_strategy() -> impl Strategy<Value = VectorTime> {
    prop::collection::vec((0u32..4, 0u32..6), N).prop_map(|slots| {
        VectorTime::from_slots(slots.into_iter().map(|(t, i)| LogicalTime::new(t, i)))
    })
}

fn event_strategy() -> impl Strategy<Value = GlobalEvent> {
    (vector_time_strategy(), 0u32..N as u32).prop_map(|(time, node)| GlobalEvent::new(time, NodeId(node)))
}

// ============================================================================
// Merge laws
// ============================================================================

proptest! {
    #[test]
    fn merge_is_commutative(a in vector_time_strategy(), b in vector_time_strategy()) {
        prop_assert_eq!(a.merged_with(&b), b.merged_with(&a));
    }

    #[test]
    fn merge_is_associative(
        a in vector_time_strategy(),
        b in vector_time_strategy(),
        c in vector_time_strategy()
    ) {
        prop_assert_eq!(a.merged_with(&b).merged_with(&c), a.merged_with(&b.merged_with(&c)));
    }

    #[test]
    fn merge_is_idempotent(a in vector_time_strategy()) {
        prop_assert_eq!(a.merged_with(&a), a);
    }

    #[test]
    fn merge_is_an_upper_bound(a in vector_time_strategy(), b in vector_time_strategy()) {
        let m = a.merged_with(&b);
        prop_assert!(a.happened_before(&m));
        prop_assert!(b.happened_before(&m));
        prop_assert_eq!(m.len(), N);
    }
}

// ============================================================================
// Happened-before laws
// ============================================================================

proptest! {
    #[test]
    fn happened_before_is_reflexive(a in event_strategy()) {
        prop_assert!(a.happened_before(&a));
    }

    #[test]
    fn happened_before_is_transitive(
        a in event_strategy(),
        b in event_strategy(),
        c in event_strategy()
    ) {
        if a.happened_before(&b) && b.happened_before(&c) {
            prop_assert!(a.happened_before(&c));
        }
    }

    #[test]
    fn trichotomy(a in event_strategy(), b in event_strategy()) {
        let ab = a.happened_before(&b);
        let ba = b.happened_before(&a);
        let conflict = is_conflict(&a, &b);
        // equal vectors are ordered both ways, never concurrent
        prop_assert!(conflict != (ab || ba));
        if ab && ba {
            prop_assert_eq!(a.time(), b.time());
        }
    }
}

// ============================================================================
// Tie-break
// ============================================================================

proptest! {
    #[test]
    fn should_replace_agrees_with_happened_before(old in event_strategy(), new in event_strategy()) {
        if old.happened_before(&new) {
            prop_assert!(should_replace(&old, &new));
        } else if new.happened_before(&old) {
            prop_assert!(!should_replace(&old, &new));
        }
    }

    #[test]
    fn concurrent_writes_have_one_winner(a in event_strategy(), b in event_strategy()) {
        if is_conflict(&a, &b) {
            // replacing b with a and keeping a over b are the same decision
            prop_assert_ne!(should_replace(&a, &b), should_replace(&b, &a));
        }
    }
}
