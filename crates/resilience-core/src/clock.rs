//! Clock abstraction separating monotonic time (latencies, EWMA, sliding
//! windows) from epoch time (event timestamps, trace correlation).
//!
//! Durations must never be computed from epoch time; callers that need a
//! duration always go through [`Clock::monotonic_now`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A source of monotonic and epoch time.
///
/// Injected everywhere the job control plane needs "now" so tests can
/// swap in a [`TestClock`] and advance time deterministically instead of
/// sleeping in wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// A monotonically non-decreasing instant, suitable for measuring
    /// elapsed durations.
    fn monotonic_now(&self) -> Instant;

    /// Wall-clock time, suitable for tracing and persisted timestamps.
    fn epoch_now(&self) -> SystemTime;

    /// Milliseconds since the Unix epoch, a convenience used by metric
    /// events which serialize to plain numbers.
    fn epoch_millis(&self) -> u64 {
        self.epoch_now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }
}

/// Production clock backed by [`Instant::now`] and [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A manually-advanced clock for deterministic tests.
///
/// Unlike `tokio::time::pause`, this lets a test move the monotonic and
/// epoch clocks independently, which is useful when asserting that
/// duration math never accidentally reads from the epoch source.
#[derive(Clone)]
pub struct TestClock {
    inner: Arc<Mutex<TestClockState>>,
}

struct TestClockState {
    monotonic: Instant,
    epoch: SystemTime,
}

impl TestClock {
    /// Creates a test clock anchored at the real current time.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TestClockState {
                monotonic: Instant::now(),
                epoch: SystemTime::now(),
            })),
        }
    }

    /// Advances both the monotonic and epoch clocks by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.inner.lock().unwrap();
        state.monotonic += duration;
        state.epoch += duration;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn monotonic_now(&self) -> Instant {
        self.inner.lock().unwrap().monotonic
    }

    fn epoch_now(&self) -> SystemTime {
        self.inner.lock().unwrap().epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_both_sources_together() {
        let clock = TestClock::new();
        let start_monotonic = clock.monotonic_now();
        let start_epoch = clock.epoch_now();

        clock.advance(Duration::from_secs(5));

        assert_eq!(
            clock.monotonic_now().duration_since(start_monotonic),
            Duration::from_secs(5)
        );
        assert_eq!(
            clock
                .epoch_now()
                .duration_since(start_epoch)
                .unwrap(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn system_clock_monotonic_never_goes_backwards() {
        let clock = SystemClock;
        let a = clock.monotonic_now();
        let b = clock.monotonic_now();
        assert!(b >= a);
    }
}
