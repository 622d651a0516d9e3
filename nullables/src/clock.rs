//! Monotonic clock that tests can stop and advance by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of `Instant`s for election timing.
///
/// The real clock reads `Instant::now()`. The nulled clock starts at a fixed
/// instant and only moves when [`SteadyClock::advance`] is called; clones
/// share the same offset.
#[derive(Clone)]
pub struct SteadyClock {
    inner: ClockInner,
}

#[derive(Clone)]
enum ClockInner {
    Real,
    Null { base: Instant, offset_ms: Arc<AtomicU64> },
}

impl SteadyClock {
    pub fn new() -> Self {
        Self {
            inner: ClockInner::Real,
        }
    }

    pub fn new_null() -> Self {
        Self {
            inner: ClockInner::Null {
                base: Instant::now(),
                offset_ms: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    pub fn now(&self) -> Instant {
        match &self.inner {
            ClockInner::Real => Instant::now(),
            ClockInner::Null { base, offset_ms } => {
                *base + Duration::from_millis(offset_ms.load(Ordering::SeqCst))
            }
        }
    }

    /// Move a nulled clock forward. No effect on the real clock.
    pub fn advance(&self, by: Duration) {
        if let ClockInner::Null { offset_ms, .. } = &self.inner {
            offset_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.inner, ClockInner::Null { .. })
    }
}

impl Default for SteadyClock {
    fn default() -> Self {
        Self::new()
    }
}
