//! Injectable source of "now", so timing-sensitive components are deterministic in tests.
//!
//! Every component that reasons about wall-clock deadlines (`ProviderKey::reset_at`,
//! circuit breaker timeouts, the stuck-bug detector's failure window) takes an
//! `Arc<dyn Clock>` at construction instead of calling `Utc::now()`/`Instant::now()`
//! directly. Production code wires `SystemClock`; tests wire `FakeClock` and advance
//! it explicitly.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// A source of wall-clock and monotonic time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time, used for persisted timestamps (`first_seen`, `last_seen`, ...).
    fn now_utc(&self) -> DateTime<Utc>;

    /// Current monotonic instant, used for interval arithmetic (`reset_at`, `opened_at`, ...).
    fn now_monotonic(&self) -> Instant;
}

/// The real clock: `Utc::now()` and `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// A controllable clock for tests. Starts at construction time and only moves
/// forward when `advance` is called, so invariants about ordering and deadlines
/// can be asserted without real sleeps.
#[derive(Debug)]
pub struct FakeClock {
    epoch: Instant,
    utc_epoch: DateTime<Utc>,
    offset_ms: AtomicI64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            utc_epoch: Utc::now(),
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Construct a clock pinned to a specific wall-clock instant, for reproducible fixtures.
    pub fn at(utc: DateTime<Utc>) -> Self {
        Self {
            epoch: Instant::now(),
            utc_epoch: utc,
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Move the clock forward. Monotonic and wall-clock readings advance together.
    pub fn advance(&self, duration: Duration) {
        self.offset_ms
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_ms.load(Ordering::SeqCst) as u64)
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.utc_epoch + chrono::Duration::from_std(self.offset()).unwrap_or_default()
    }

    fn now_monotonic(&self) -> Instant {
        self.epoch + self.offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_only_moves_on_advance() {
        let clock = FakeClock::new();
        let t0 = clock.now_monotonic();
        let t1 = clock.now_monotonic();
        assert_eq!(t0, t1);

        clock.advance(Duration::from_millis(500));
        assert!(clock.now_monotonic() > t0);
    }

    #[test]
    fn fake_clock_wall_and_monotonic_advance_together() {
        let clock = FakeClock::new();
        let utc0 = clock.now_utc();
        clock.advance(Duration::from_secs(10));
        let utc1 = clock.now_utc();
        assert_eq!((utc1 - utc0).num_seconds(), 10);
    }
}
