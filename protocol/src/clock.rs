//! # Clocks
//!
//! Every timelock and fee accrual reads time through [`Clock`]. Production
//! code uses [`SystemClock`]; tests drive a [`ManualClock`] forward by hand.
//! Both guarantee time never runs backwards as seen by the protocol.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::types::Timestamp;

/// A monotonic source of unix seconds.
pub trait Clock: Send + Sync {
    /// Current time. Never smaller than any value returned before.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time via `chrono`, clamped so a system clock step backwards
/// is observed as time standing still.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicU64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = Utc::now().timestamp().max(0) as u64;
        let previous = self.last.fetch_max(wall, Ordering::SeqCst);
        previous.max(wall)
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Starts the clock at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Moves the clock forward by `seconds` and returns the new time.
    pub fn advance(&self, seconds: u64) -> Timestamp {
        self.now.fetch_add(seconds, Ordering::SeqCst) + seconds
    }

    /// Jumps to `at`. Earlier values are ignored.
    pub fn set(&self, at: Timestamp) -> Timestamp {
        let previous = self.now.fetch_max(at, Ordering::SeqCst);
        previous.max(at)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
