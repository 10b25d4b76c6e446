//! Hybrid-logical clock.
//!
//! Timestamps order lexicographically on `(wall, logical)`. A single clock
//! instance is shared per process and handed to shards at construction; it
//! never moves backwards, and observing a remote timestamp pulls the local
//! clock forward past it.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize,
)]
pub struct Hlc {
    /// Wall-clock component in microseconds since the Unix epoch.
    pub wall: u64,
    /// Logical counter disambiguating timestamps within one wall tick.
    pub logical: u64,
}

impl Hlc {
    pub const ZERO: Hlc = Hlc { wall: 0, logical: 0 };

    pub fn new(wall: u64, logical: u64) -> Self {
        Hlc { wall, logical }
    }
}

impl std::fmt::Display for Hlc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.wall, self.logical)
    }
}

/// Monotonic HLC source. Advanced under a latch.
#[derive(Debug, Default)]
pub struct HlcClock {
    last: Mutex<Hlc>,
}

impl HlcClock {
    pub fn new() -> Self {
        HlcClock::default()
    }

    /// Starts the clock at `initial`; the first `now()` is strictly greater.
    pub fn starting_at(initial: Hlc) -> Self {
        HlcClock {
            last: Mutex::new(initial),
        }
    }

    /// Returns a timestamp strictly greater than every timestamp previously
    /// returned or observed by this clock.
    ///
    /// The logical counter never resets, so it doubles as a process-unique
    /// sequence number; transaction ids are derived from it.
    pub fn now(&self) -> Hlc {
        let mut last = self.last.lock();
        let next = Hlc {
            wall: wall_micros().max(last.wall),
            logical: last.logical + 1,
        };
        *last = next;
        next
    }

    /// Folds a remote timestamp into the clock and returns a timestamp
    /// strictly greater than both it and everything issued locally so far.
    pub fn observe(&self, remote: Hlc) -> Hlc {
        let mut last = self.last.lock();
        let next = Hlc {
            wall: wall_micros().max(last.wall).max(remote.wall),
            logical: last.logical.max(remote.logical) + 1,
        };
        *last = next;
        next
    }

    /// The most recent timestamp issued or observed.
    pub fn peek(&self) -> Hlc {
        *self.last.lock()
    }
}

fn wall_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn order_is_lexicographic() {
        assert!(Hlc::new(1, 5) < Hlc::new(2, 0));
        assert!(Hlc::new(2, 0) < Hlc::new(2, 1));
    }

    #[test]
    fn now_is_strictly_monotonic() {
        let clock = HlcClock::new();
        let mut prev = clock.now();
        for _ in 0..10_000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn observe_moves_past_remote() {
        let clock = HlcClock::new();
        let far_future = Hlc::new(u64::MAX - 1, 3);
        let next = clock.observe(far_future);
        assert!(next > far_future);
        assert!(clock.now() > next);
    }

    #[test]
    fn concurrent_readers_never_collide() {
        let clock = Arc::new(HlcClock::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let clock = Arc::clone(&clock);
            handles.push(thread::spawn(move || {
                (0..1_000).map(|_| clock.now()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<Hlc> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let len = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), len);
    }
}
