//! Error taxonomy for the job control plane, per spec.md §7.
//!
//! Every variant here is one the queue manager itself can return.
//! Provider/transient failures surfaced by a work function are not
//! represented here; they travel as [`crate::task::WorkError`] and are
//! only translated to [`QueueError::Timeout`] or surfaced verbatim to
//! the caller after retries are exhausted.

use resilience_core::CancelReason;
use thiserror::Error;

/// Errors the queue manager can return from admission or a completed
/// task.
#[derive(Debug, Error, Clone)]
pub enum QueueError {
    /// The manager is not accepting new submissions.
    #[error("queue is shutting down or not accepting tasks")]
    Shutdown,

    /// The waiting room is full; retry after the given number of
    /// seconds.
    #[error("backpressure: queue is at capacity")]
    Backpressure { retry_after_secs: u64 },

    /// The submitting user has exceeded the per-user admission rate.
    #[error("rate limit exceeded for user")]
    RateLimit { retry_after_secs: u64 },

    /// A submission-time validation failure: bad options, or a
    /// duplicate `request_id` under `reject_new` policy.
    #[error("validation error: {message}")]
    Validation { message: String, phase: &'static str },

    /// The caller's own cancel signal was already tripped at
    /// submission time; the task was never enqueued.
    #[error("cancelled before enqueue")]
    CancelledBeforeEnqueue,

    /// Every attempt expired its per-attempt deadline.
    #[error("task timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// The task was cancelled (user, shutdown, or duplicate-policy)
    /// before reaching a terminal success/failure.
    #[error("task cancelled: {reason:?}")]
    Cancelled { reason: CancelReason },

    /// The work function returned a non-retriable application error.
    #[error("task failed: {message}")]
    Failed { message: String, attempts: u32 },
}

impl QueueError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, QueueError::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueueError::Cancelled { .. })
    }

    pub fn is_backpressure(&self) -> bool {
        matches!(self, QueueError::Backpressure { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, QueueError::RateLimit { .. })
    }

    /// `Retry-After` seconds per §6's error-to-HTTP mapping table, for
    /// the variants that carry one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            QueueError::Backpressure { retry_after_secs } => Some(*retry_after_secs),
            QueueError::RateLimit { retry_after_secs } => Some(*retry_after_secs),
            QueueError::Shutdown => Some(30),
            _ => None,
        }
    }
}
