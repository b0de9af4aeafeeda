//! Logical timestamps and the node-local timestamp authority.
//!
//! A [`LogicalTime`] is a `(seconds, increment)` pair ordered
//! lexicographically, the same shape as an oplog timestamp. The
//! [`LogicalClock`] trait is the node's source of such readings; the vector
//! clock folds them into this node's slot.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A totally ordered logical timestamp.
///
/// Internally packed as `secs << 32 | inc`, so adding ticks carries from the
/// increment into the seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "TimestampRepr", into = "TimestampRepr")]
pub struct LogicalTime(u64);

#[derive(Serialize, Deserialize)]
struct TimestampRepr {
    t: u32,
    i: u32,
}

impl From<TimestampRepr> for LogicalTime {
    fn from(repr: TimestampRepr) -> Self {
        LogicalTime::new(repr.t, repr.i)
    }
}

impl From<LogicalTime> for TimestampRepr {
    fn from(time: LogicalTime) -> Self {
        TimestampRepr {
            t: time.secs(),
            i: time.increment(),
        }
    }
}

impl LogicalTime {
    pub const ZERO: LogicalTime = LogicalTime(0);

    pub fn new(secs: u32, inc: u32) -> Self {
        LogicalTime(((secs as u64) << 32) | inc as u64)
    }

    pub fn secs(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn increment(&self) -> u32 {
        self.0 as u32
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Advance by `n` ticks in place.
    pub fn add_ticks(&mut self, n: u64) {
        self.0 = self.0.saturating_add(n);
    }

    /// Return a copy advanced by `n` ticks.
    pub fn with_ticks(mut self, n: u64) -> Self {
        self.add_ticks(n);
        self
    }
}

impl fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.secs(), self.increment())
    }
}

/// The node's local timestamp authority.
pub trait LogicalClock: Send + Sync {
    /// Current reading without reserving anything.
    fn cluster_time(&self) -> LogicalTime;

    /// Reserve `n` ticks and return the last reserved time.
    fn reserve_ticks(&self, n: u32) -> LogicalTime;

    /// Move the clock forward to at least `time`.
    fn advance(&self, time: LogicalTime);
}

/// Hybrid clock: wall-clock seconds plus a per-second increment.
///
/// Readings never go backwards even when the wall clock does.
pub struct HybridClock {
    current: Mutex<LogicalTime>,
}

impl HybridClock {
    pub fn new() -> Self {
        HybridClock {
            current: Mutex::new(LogicalTime::ZERO),
        }
    }

    fn wall_secs() -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LogicalClock for HybridClock {
    fn cluster_time(&self) -> LogicalTime {
        *self.current.lock()
    }

    fn reserve_ticks(&self, n: u32) -> LogicalTime {
        let mut current = self.current.lock();
        let wall = Self::wall_secs();
        if wall > current.secs() {
            *current = LogicalTime::new(wall, 0);
        }
        current.add_ticks(n as u64);
        *current
    }

    fn advance(&self, time: LogicalTime) {
        let mut current = self.current.lock();
        if time > *current {
            *current = time;
        }
    }
}

/// Deterministic clock for tests and simulations. Only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    current: Mutex<LogicalTime>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(time: LogicalTime) -> Self {
        ManualClock {
            current: Mutex::new(time),
        }
    }

    pub fn set(&self, time: LogicalTime) {
        *self.current.lock() = time;
    }
}

impl LogicalClock for ManualClock {
    fn cluster_time(&self) -> LogicalTime {
        *self.current.lock()
    }

    fn reserve_ticks(&self, n: u32) -> LogicalTime {
        let mut current = self.current.lock();
        current.add_ticks(n as u64);
        *current
    }

    fn advance(&self, time: LogicalTime) {
        let mut current = self.current.lock();
        if time > *current {
            *current = time;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_lexicographic() {
        assert!(LogicalTime::new(1, 9) < LogicalTime::new(2, 0));
        assert!(LogicalTime::new(2, 0) < LogicalTime::new(2, 1));
        assert_eq!(LogicalTime::default(), LogicalTime::ZERO);
    }

    #[test]
    fn test_add_ticks_carries_into_seconds() {
        let t = LogicalTime::new(3, u32::MAX).with_ticks(1);
        assert_eq!(t.secs(), 4);
        assert_eq!(t.increment(), 0);
    }

    #[test]
    fn test_serialization_shape() {
        let t = LogicalTime::new(7, 2);
        let json = serde_json::to_value(t).unwrap();
        assert_eq!(json, serde_json::json!({"t": 7, "i": 2}));
        let back: LogicalTime = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_hybrid_clock_is_monotonic() {
        let clock = HybridClock::new();
        let a = clock.reserve_ticks(1);
        let b = clock.reserve_ticks(1);
        assert!(b > a);

        let future = LogicalTime::new(u32::MAX - 1, 0);
        clock.advance(future);
        assert!(clock.reserve_ticks(1) > future);
        clock.advance(LogicalTime::new(1, 0));
        assert!(clock.cluster_time() > future);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.reserve_ticks(2), LogicalTime::new(0, 2));
        clock.set(LogicalTime::new(5, 0));
        assert_eq!(clock.cluster_time(), LogicalTime::new(5, 0));
    }
}
