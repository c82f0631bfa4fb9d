//! C3 (backpressure half): the waiting-room cap that bounds
//! `queue_size + active_jobs`, sized from an EWMA of processing time,
//! per spec.md §4.3.
//!
//! Grounded on the teacher's bulkhead semaphore gate
//! (`tower-resilience-bulkhead/src/service.rs`) for the "admit or
//! reject, never block" admission idiom, generalized here to a
//! dynamically computed cap instead of a fixed `max_concurrent_calls`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const QUEUE_MULTIPLIER: usize = 20;
const MAX_QUEUE_TIME_MS: f64 = 10.0 * 60.0 * 1000.0;
const EWMA_ALPHA: f64 = 0.1;

/// Tracks the exponentially weighted moving average of task processing
/// time and derives the dynamic admission cap from it.
pub(crate) struct Backpressure {
    ewma_ms: Mutex<Option<f64>>,
    completion_count: AtomicU64,
}

impl Backpressure {
    pub(crate) fn new() -> Self {
        Self {
            ewma_ms: Mutex::new(None),
            completion_count: AtomicU64::new(0),
        }
    }

    /// Records one processing-time sample. Callers include successful
    /// completions and timeouts; user-cancellations are never sampled
    /// (spec.md §4.3).
    pub(crate) fn sample(&self, duration: Duration) {
        let sample_ms = duration.as_secs_f64() * 1000.0;
        let mut ewma = self.ewma_ms.lock().unwrap();
        *ewma = Some(match *ewma {
            Some(avg) => EWMA_ALPHA * sample_ms + (1.0 - EWMA_ALPHA) * avg,
            None => sample_ms,
        });
        self.completion_count.fetch_add(1, Ordering::AcqRel);
    }

    fn completions(&self) -> u64 {
        self.completion_count.load(Ordering::Acquire)
    }

    /// The current EWMA of processing time, or `None` before the first
    /// sample — exposed for `get_overview`'s `avg_processing_ms`.
    pub(crate) fn avg_processing_ms(&self) -> Option<f64> {
        *self.ewma_ms.lock().unwrap()
    }

    /// `min(time_based_cap, concurrency * queue_multiplier)`, falling
    /// back to the heuristic cap until the EWMA is primed and past the
    /// cold-start threshold (`2 * concurrency` completions).
    pub(crate) fn effective_cap(&self, concurrency: usize) -> usize {
        let heuristic_cap = concurrency.saturating_mul(QUEUE_MULTIPLIER);
        let cold_start_threshold = 2 * concurrency as u64;

        if self.completions() < cold_start_threshold {
            return heuristic_cap.max(1);
        }

        let ewma = match *self.ewma_ms.lock().unwrap() {
            Some(avg) if avg > 0.0 => avg,
            _ => return heuristic_cap.max(1),
        };

        let time_based_cap = (MAX_QUEUE_TIME_MS / ewma).floor().max(0.0) as usize;
        time_based_cap.min(heuristic_cap).max(1)
    }

    /// `max(effective_cap - active_jobs, 1)`.
    pub(crate) fn waiting_room(&self, concurrency: usize, active_jobs: usize) -> usize {
        let cap = self.effective_cap(concurrency);
        cap.saturating_sub(active_jobs).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_uses_the_heuristic_cap() {
        let bp = Backpressure::new();
        assert_eq!(bp.effective_cap(2), 40);
    }

    #[test]
    fn primed_ewma_can_shrink_the_cap_below_the_heuristic() {
        let bp = Backpressure::new();
        let concurrency = 2;
        // Cross the cold-start threshold (2 * concurrency = 4 samples).
        for _ in 0..4 {
            bp.sample(Duration::from_secs(60));
        }
        // time_based_cap = floor(600_000 / 60_000) = 10, below the
        // heuristic cap of 40.
        assert_eq!(bp.effective_cap(concurrency), 10);
    }

    #[test]
    fn waiting_room_never_drops_below_one() {
        let bp = Backpressure::new();
        assert_eq!(bp.waiting_room(2, 1_000_000), 1);
    }
}
