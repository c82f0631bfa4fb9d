//! Task shape: the work a caller submits, and the handles returned to
//! observe and cancel it.

use crate::error::QueueError;
use resilience_core::{CancelReason, CancellationContext, CancellationToken};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::oneshot;

/// A boxed, owned future, matching the teacher's `BoxFuture` idiom for
/// type-erased async work.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An error a work function itself can produce. Cancellation is never
/// reported this way; it is observed by racing the future against the
/// attempt's [`CancellationContext`] (spec.md §4.4 step 5).
#[derive(Debug, Clone)]
pub enum WorkError {
    /// A transient failure (network, 5xx, connection reset): retriable
    /// up to the task's `max_retries`.
    Transient(String),
    /// A non-retriable failure: bad input, content policy, or any
    /// error the caller has already classified as permanent.
    Validation(String),
}

impl WorkError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, WorkError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            WorkError::Transient(m) | WorkError::Validation(m) => m,
        }
    }
}

/// Context handed to a work function for one attempt.
pub struct AttemptContext {
    /// 0-based attempt index.
    pub attempt: usize,
    /// Cancellation combining the caller signal, shutdown, the
    /// per-attempt deadline, and any registry-issued cancel. A work
    /// function that polls cooperatively (e.g. between HTTP chunks)
    /// should race its own suspension points against this.
    pub cancel: CancellationContext,
}

/// A unit of work submitted to the queue. Callable once per attempt;
/// the executor invokes it again (with a fresh [`AttemptContext`]) on
/// each retry.
pub type WorkFn<T> = std::sync::Arc<dyn Fn(AttemptContext) -> BoxFuture<Result<T, WorkError>> + Send + Sync>;

/// Options accepted by [`crate::QueueManager::submit`], per spec.md
/// §6's Admission API.
#[derive(Default)]
pub struct SubmitOptions {
    pub request_id: Option<String>,
    pub user_id: Option<String>,
    pub priority: crate::priority::Priority,
    /// Milliseconds; clamped to `[1000, 3_600_000]`.
    pub timeout_ms: Option<i64>,
    /// Clamped to `[0, 9]`; default 3.
    pub max_retries: Option<i64>,
    /// A caller-supplied cancellation source, combined with the
    /// internal sources as another parent.
    pub cancel_signal: Option<CancellationToken>,
    /// If true and `cancel_signal` was not supplied, `submit` returns
    /// an internally created [`CancelHandle`].
    pub return_cancel_handle: bool,
}

/// A non-owning handle a caller can use to request cancellation of a
/// submitted task. Dropping it has no effect on the task.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Requests cancellation with reason [`CancelReason::User`].
    pub fn cancel(&self) {
        self.token.cancel(CancelReason::User);
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// The future returned to a caller by `submit`, resolving once the
/// task reaches a terminal state.
#[derive(Debug)]
pub struct JobHandle<T> {
    pub(crate) rx: oneshot::Receiver<Result<T, QueueError>>,
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The manager dropped the sender without completing the
            // task; this only happens if the process is torn down
            // mid-flight, which we surface as a shutdown cancellation.
            Poll::Ready(Err(_)) => Poll::Ready(Err(QueueError::Cancelled {
                reason: CancelReason::Shutdown,
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Normalized, registered task state owned by the queue store and
/// registry. Does not include the caller-facing future half (that
/// lives in the [`oneshot::Sender`] captured by `complete`).
pub(crate) struct QueuedTask<T> {
    pub(crate) request_id: Option<String>,
    pub(crate) user_id: Option<String>,
    pub(crate) priority: i32,
    pub(crate) timeout: Duration,
    pub(crate) max_retries: u32,
    pub(crate) enqueued_at_monotonic: Instant,
    pub(crate) enqueued_at_epoch: SystemTime,
    pub(crate) work: WorkFn<T>,
    pub(crate) cancel: CancellationToken,
    pub(crate) complete: oneshot::Sender<Result<T, QueueError>>,
}

/// Clamps a caller-supplied timeout (milliseconds) to `[1000,
/// 3_600_000]`, per spec.md §3. Returns the clamped value and whether
/// clamping actually changed it (for the `timeout_clamped` event).
pub fn clamp_timeout_ms(requested: Option<i64>) -> (u64, bool) {
    const MIN: i64 = 1_000;
    const MAX: i64 = 3_600_000;
    const DEFAULT: i64 = 300_000;
    let requested = requested.unwrap_or(DEFAULT);
    let clamped = requested.clamp(MIN, MAX);
    (clamped as u64, clamped != requested)
}

/// Clamps `max_retries` to `[0, 9]`, per spec.md §3. Default is 3.
pub fn clamp_max_retries(requested: Option<i64>) -> (u32, bool) {
    const MIN: i64 = 0;
    const MAX: i64 = 9;
    const DEFAULT: i64 = 3;
    let requested = requested.unwrap_or(DEFAULT);
    let clamped = requested.clamp(MIN, MAX);
    (clamped as u32, clamped != requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_clamps_to_the_documented_bounds() {
        assert_eq!(clamp_timeout_ms(Some(0)), (1_000, true));
        assert_eq!(clamp_timeout_ms(Some(-500)), (1_000, true));
        assert_eq!(clamp_timeout_ms(Some(10_000_000)), (3_600_000, true));
        assert_eq!(clamp_timeout_ms(Some(5_000)), (5_000, false));
        assert_eq!(clamp_timeout_ms(None), (300_000, false));
    }

    #[test]
    fn max_retries_clamps_to_the_documented_bounds() {
        assert_eq!(clamp_max_retries(Some(-5)), (0, true));
        assert_eq!(clamp_max_retries(Some(99)), (9, true));
        assert_eq!(clamp_max_retries(Some(4)), (4, false));
        assert_eq!(clamp_max_retries(None), (3, false));
    }
}
