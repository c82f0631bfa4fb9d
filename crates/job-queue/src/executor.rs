//! C4: runs a single task through however many attempts it takes,
//! enforcing a per-attempt deadline and racing every suspension point
//! against cancellation, per spec.md §4.4.
//!
//! The per-attempt deadline is realized the way SPEC_FULL.md §9
//! describes for a preemptively-scheduled target: a timer task that
//! trips a [`CancellationToken`] after `timeout` elapses, combined with
//! the task's own cancel source and the shutdown signal into one
//! [`CancellationContext`] per attempt (first parent to trip wins).

use crate::backpressure::Backpressure;
use crate::error::QueueError;
use crate::metrics::{MetricEvent, MetricsRing};
use crate::task::{QueuedTask, WorkError};
use rand::Rng;
use resilience_core::{CancelReason, CancellationContext, CancellationToken, Clock};
use std::sync::Arc;
use std::time::Duration;

/// Shared dependencies the executor needs that outlive any one task.
pub(crate) struct ExecutorDeps {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: Arc<MetricsRing>,
    pub(crate) backpressure: Arc<Backpressure>,
}

const MAX_BACKOFF_MS: u64 = 10_000;

fn backoff_delay(attempt_k: u32) -> Duration {
    let base = 1000u64.saturating_mul(1u64 << attempt_k.min(10));
    let base = base.min(MAX_BACKOFF_MS);
    let jitter_ceiling = (base as f64 * 0.1) as u64;
    let jitter = if jitter_ceiling == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_ceiling)
    };
    Duration::from_millis(base + jitter)
}

/// Runs `task` to a terminal outcome and sends the result down its
/// completion channel. Never panics on a work-function error; any
/// failure ends up as an `Err(QueueError)` delivered to the caller.
pub(crate) async fn run_task<T: Send + 'static>(
    task: QueuedTask<T>,
    shutdown_signal: CancellationToken,
    deps: Arc<ExecutorDeps>,
    snapshot: impl Fn() -> (usize, usize, usize),
) {
    let QueuedTask {
        request_id,
        user_id,
        priority,
        timeout,
        max_retries,
        enqueued_at_monotonic,
        work,
        cancel,
        complete,
        ..
    } = task;

    let now_ms = || deps.clock.epoch_millis();
    let (queue_size, active_jobs, concurrency) = snapshot();

    // Step 1: already cancelled before the executor ever ran it.
    if cancel.is_cancelled() || shutdown_signal.is_cancelled() {
        let reason = cancel
            .reason()
            .or_else(|| shutdown_signal.reason())
            .unwrap_or(CancelReason::Shutdown);
        deps.metrics.record(terminal_event(
            "cancelled_before_start",
            now_ms(),
            &request_id,
            &user_id,
            reason,
            queue_size,
            active_jobs,
            concurrency,
        ));
        deps.metrics.record(finally_event(now_ms(), &request_id, false, 0));
        let _ = complete.send(Err(QueueError::Cancelled { reason }));
        return;
    }

    let queue_wait_ms = (deps.clock.monotonic_now() - enqueued_at_monotonic).as_millis() as u64;
    {
        let mut event = MetricEvent::new("task_start", now_ms());
        event.request_id = request_id.clone();
        event.user_id = user_id.clone();
        event.queue_wait_ms = Some(queue_wait_ms);
        event.priority_normalized = Some(priority);
        deps.metrics.record(event);
    }

    let mut attempt: u32 = 0;
    let attempts_used;

    let outcome: Result<T, QueueError> = loop {
        let attempt_start_monotonic = deps.clock.monotonic_now();
        let deadline_token = CancellationToken::new();
        let timer = {
            let deadline_token = deadline_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                deadline_token.cancel(CancelReason::Timeout);
            })
        };

        let attempt_ctx = CancellationContext::with_parents(vec![
            cancel.clone(),
            shutdown_signal.clone(),
            deadline_token.clone(),
        ]);

        let attempt_result = attempt_ctx
            .run_with((work)(crate::task::AttemptContext {
                attempt: attempt as usize,
                cancel: attempt_ctx.clone(),
            }))
            .await;
        timer.abort();

        let attempt_duration = deps.clock.monotonic_now() - attempt_start_monotonic;

        match attempt_result {
            Ok(Ok(output)) => {
                attempts_used = attempt + 1;
                deps.backpressure.sample(attempt_duration);
                let mut event = MetricEvent::new("task_complete", now_ms());
                event.request_id = request_id.clone();
                event.user_id = user_id.clone();
                event.duration_ms = Some(attempt_duration.as_millis() as u64);
                event.attempts = Some(attempts_used);
                deps.metrics.record(event);
                break Ok(output);
            }
            Ok(Err(WorkError::Validation(message))) => {
                attempts_used = attempt + 1;
                deps.metrics.record(error_event(now_ms(), &request_id, &user_id, "validation"));
                break Err(QueueError::Failed { message, attempts: attempts_used });
            }
            Ok(Err(WorkError::Transient(message))) => {
                if attempt < max_retries {
                    deps.metrics.record(error_event(now_ms(), &request_id, &user_id, "transient"));
                    if sleep_under_cancellation(backoff_delay(attempt), &cancel, &shutdown_signal)
                        .await
                        .is_err()
                    {
                        attempts_used = attempt + 1;
                        let reason = cancel.reason().or_else(|| shutdown_signal.reason()).unwrap_or(CancelReason::Shutdown);
                        deps.metrics.record(terminal_event(
                            "cancelled_after_start",
                            now_ms(),
                            &request_id,
                            &user_id,
                            reason,
                            queue_size,
                            active_jobs,
                            concurrency,
                        ));
                        break Err(QueueError::Cancelled { reason });
                    }
                    attempt += 1;
                    continue;
                }
                attempts_used = attempt + 1;
                deps.metrics.record(error_event(now_ms(), &request_id, &user_id, "transient"));
                break Err(QueueError::Failed { message, attempts: attempts_used });
            }
            Err(CancelReason::Timeout) => {
                deps.backpressure.sample(timeout);
                if attempt < max_retries {
                    deps.metrics.record(error_event(now_ms(), &request_id, &user_id, "timeout"));
                    if sleep_under_cancellation(backoff_delay(attempt), &cancel, &shutdown_signal)
                        .await
                        .is_err()
                    {
                        attempts_used = attempt + 1;
                        let reason = cancel.reason().or_else(|| shutdown_signal.reason()).unwrap_or(CancelReason::Shutdown);
                        deps.metrics.record(terminal_event(
                            "cancelled_after_start",
                            now_ms(),
                            &request_id,
                            &user_id,
                            reason,
                            queue_size,
                            active_jobs,
                            concurrency,
                        ));
                        break Err(QueueError::Cancelled { reason });
                    }
                    attempt += 1;
                    continue;
                }
                attempts_used = attempt + 1;
                deps.metrics.record(error_event(now_ms(), &request_id, &user_id, "timeout"));
                break Err(QueueError::Timeout { attempts: attempts_used });
            }
            Err(reason) => {
                // user / shutdown / duplicate-policy / signal-already-aborted:
                // non-retriable.
                attempts_used = attempt + 1;
                deps.metrics.record(terminal_event(
                    "cancelled_after_start",
                    now_ms(),
                    &request_id,
                    &user_id,
                    reason,
                    queue_size,
                    active_jobs,
                    concurrency,
                ));
                break Err(QueueError::Cancelled { reason });
            }
        }
    };

    let success = outcome.is_ok();
    deps.metrics
        .record(finally_event(now_ms(), &request_id, success, attempts_used));
    let _ = complete.send(outcome);
}

/// Races a backoff sleep against cancellation, so a retry delay is
/// interrupted the moment the user, shutdown, or the duplicate policy
/// cancels the task (spec.md §4.4 step 5).
async fn sleep_under_cancellation(
    delay: Duration,
    cancel: &CancellationToken,
    shutdown_signal: &CancellationToken,
) -> Result<(), CancelReason> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancel.reason().expect("cancelled token has a reason")),
        _ = shutdown_signal.cancelled() => Err(shutdown_signal.reason().expect("cancelled token has a reason")),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[allow(clippy::too_many_arguments)]
fn terminal_event(
    action: &'static str,
    now_ms: u64,
    request_id: &Option<String>,
    user_id: &Option<String>,
    reason: CancelReason,
    queue_size: usize,
    active_jobs: usize,
    concurrency: usize,
) -> MetricEvent {
    let mut event = MetricEvent::new(action, now_ms);
    event.request_id = request_id.clone();
    event.user_id = user_id.clone();
    event.reason = Some(reason.as_tag());
    event.queue_size = Some(queue_size);
    event.active_jobs = Some(active_jobs);
    event.concurrency = Some(concurrency);
    event
}

fn error_event(
    now_ms: u64,
    request_id: &Option<String>,
    user_id: &Option<String>,
    error_type: &'static str,
) -> MetricEvent {
    let mut event = MetricEvent::new("task_error", now_ms);
    event.request_id = request_id.clone();
    event.user_id = user_id.clone();
    event.error_type = Some(error_type.to_string());
    event.reason = Some(error_type);
    event
}

fn finally_event(now_ms: u64, request_id: &Option<String>, success: bool, attempts: u32) -> MetricEvent {
    let mut event = MetricEvent::new("task_finally", now_ms);
    event.request_id = request_id.clone();
    event.success = Some(success);
    event.attempts = Some(attempts);
    event
}
