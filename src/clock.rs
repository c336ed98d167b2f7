//! `VersionClock`: issues the monotonically increasing microsecond
//! version stamps every `Revision` and `Write` carries.
//!
//! Seeded from wall-clock time and only ever bumped forward by a
//! compare-and-swap loop, so two calls in the same microsecond (or a
//! backward system-clock step) still yield strictly increasing versions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Issue the next version: microseconds since the epoch, or
    /// `previous + 1` if wall-clock time has not advanced past it.
    pub fn next(&self) -> u64 {
        let now = now_micros();
        loop {
            let prev = self.last.load(Ordering::Acquire);
            let candidate = if now > prev { now } else { prev + 1 };
            if self
                .last
                .compare_exchange(prev, candidate, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return candidate;
            }
        }
    }
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn successive_calls_strictly_increase() {
        let clock = VersionClock::new();
        let a = clock.next();
        let b = clock.next();
        assert!(b > a);
    }

    #[test]
    fn concurrent_calls_never_collide() {
        let clock = Arc::new(VersionClock::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let clock = clock.clone();
                thread::spawn(move || (0..200).map(|_| clock.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let before = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), before);
    }
}
