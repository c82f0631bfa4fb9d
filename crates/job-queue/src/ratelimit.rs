//! C3 (rate-limit half): per-user sliding window admission control,
//! spec.md §4.3.
//!
//! Grounded on the teacher's `SlidingLogState`
//! (`tower-resilience-ratelimiter/src/limiter.rs`): a `VecDeque<Instant>`
//! of admission timestamps per key, pruned from the front on each
//! check. Unlike the teacher's single shared window, this keys one
//! window per `user_id` behind one lock, since each user's admission
//! rate must be independent.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);
const LIMIT_PER_WINDOW: usize = 10;
const GC_IDLE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

struct UserBucket {
    window: VecDeque<Instant>,
    /// Last time this bucket was touched by an admission check; used
    /// by `gc` to evict buckets idle for more than 5 minutes.
    last_cleanup: Instant,
}

/// Per-user sliding window limiting admissions to 10 per 60s.
pub(crate) struct RateLimiter {
    buckets: Mutex<HashMap<String, UserBucket>>,
}

impl RateLimiter {
    pub(crate) fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Prunes this user's window, then admits if it has room, appending
    /// `now`. Returns `false` (rate limited) without mutating the
    /// window if it is already full.
    pub(crate) fn try_admit(&self, user_id: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(user_id.to_string()).or_insert_with(|| UserBucket {
            window: VecDeque::new(),
            last_cleanup: now,
        });

        prune(&mut bucket.window, now);

        if bucket.window.len() >= LIMIT_PER_WINDOW {
            return false;
        }
        bucket.window.push_back(now);
        bucket.last_cleanup = now;
        true
    }

    /// Every 5 minutes, deletes buckets whose window is empty or whose
    /// `last_cleanup` is stale, per spec.md §4.3's documented sweep.
    pub(crate) fn gc(&self, now: Instant) {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.retain(|_, bucket| {
            prune(&mut bucket.window, now);
            let idle = now.duration_since(bucket.last_cleanup);
            !bucket.window.is_empty() && idle <= GC_IDLE_THRESHOLD
        });
    }

    #[cfg(test)]
    pub(crate) fn bucket_len(&self, user_id: &str) -> usize {
        self.buckets
            .lock()
            .unwrap()
            .get(user_id)
            .map(|b| b.window.len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&front) = window.front() {
        if now.duration_since(front) >= WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}
