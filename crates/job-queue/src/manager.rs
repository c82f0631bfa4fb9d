//! C5: the Queue Manager facade. Composes C1 (priority store), C2
//! (task registry), C3 (rate limit + backpressure), C4 (executor), C8
//! (metrics ring), and C9 (shutdown) behind the admission/dispatch API
//! described in spec.md §4.5.
//!
//! Mirrors the teacher's single-struct-plus-`Arc<Inner>` shape used
//! wherever a manager owns a background task (none of
//! `tower-resilience-*`'s managers need one, so this crate's closest
//! grounding is the executor crate's worker-pool ownership pattern:
//! one `Arc`-shared state struct, cloned into a spawned loop).

use crate::backpressure::Backpressure;
use crate::config::{validate_concurrency_update, DuplicatePolicy, QueueManagerConfig};
use crate::error::QueueError;
use crate::executor::{self, ExecutorDeps};
use crate::metrics::{Aggregates, EventSink, HealthStatus, MetricEvent, MetricsRing, NullEventSink};
use crate::priority::Priority;
use crate::ratelimit::RateLimiter;
use crate::registry::{TaskRecord, TaskRegistry};
use crate::shutdown::RunOnce;
use crate::store::PriorityJobStore;
use crate::task::{
    clamp_max_retries, clamp_timeout_ms, CancelHandle, JobHandle, QueuedTask, SubmitOptions, WorkFn,
};
use resilience_core::{CancelReason, CancellationToken, Clock, SystemClock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

const RATE_LIMITER_GC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Snapshot returned by [`QueueManager::get_overview`], per spec.md
/// §4.5.
#[derive(Debug, Clone)]
pub struct Overview {
    pub status: &'static str,
    pub warnings: Vec<&'static str>,
    pub is_paused: bool,
    pub is_accepting_tasks: bool,
    pub queue_size: usize,
    pub active_jobs: usize,
    pub concurrency: usize,
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_processing_ms: Option<f64>,
    pub needs_attention: bool,
    pub recommended_actions: Vec<&'static str>,
    pub is_initialized: bool,
    pub last_error: Option<String>,
}

struct State<T> {
    store: Mutex<PriorityJobStore<T>>,
    registry: TaskRegistry,
    rate_limiter: RateLimiter,
    backpressure: Arc<Backpressure>,
    metrics: Arc<MetricsRing>,
    clock: Arc<dyn Clock>,
    config: Mutex<QueueManagerConfig>,
    active_jobs: AtomicUsize,
    accepting: AtomicBool,
    paused: AtomicBool,
    initialized: AtomicBool,
    dispatch_notify: Notify,
    admission_lock: AsyncMutex<()>,
    shutdown_once: RunOnce,
    shutdown_signal: Mutex<CancellationToken>,
    gc_handle: Mutex<Option<JoinHandle<()>>>,
    exec_deps: Arc<ExecutorDeps>,
    last_error: Mutex<Option<String>>,
}

/// A priority job queue with bounded concurrency, backpressure, per-user
/// rate limiting, retries, and graceful shutdown, parameterized over the
/// work function's output type `T`.
///
/// Cheap to clone; clones share the same underlying queue.
pub struct QueueManager<T: Send + 'static> {
    state: Arc<State<T>>,
}

impl<T: Send + 'static> Clone for QueueManager<T> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone() }
    }
}

impl<T: Send + 'static> QueueManager<T> {
    /// Builds a manager with [`QueueManagerConfig::default`] and no
    /// durable event mirror.
    pub fn new() -> Self {
        Self::with_config(QueueManagerConfig::default(), Arc::new(NullEventSink))
    }

    /// Builds a manager with an explicit configuration and durable
    /// event sink.
    pub fn with_config(config: QueueManagerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::with_config_and_clock(config, sink, Arc::new(SystemClock))
    }

    /// Builds a manager with an injected [`Clock`], for deterministic
    /// tests (spec.md §5's dual clock sources).
    pub fn with_config_and_clock(
        config: QueueManagerConfig,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::new(MetricsRing::new(sink));
        let backpressure = Arc::new(Backpressure::new());
        let exec_deps = Arc::new(ExecutorDeps {
            clock: clock.clone(),
            metrics: metrics.clone(),
            backpressure: backpressure.clone(),
        });

        let state = Arc::new(State {
            store: Mutex::new(PriorityJobStore::new()),
            registry: TaskRegistry::new(),
            rate_limiter: RateLimiter::new(),
            backpressure,
            metrics,
            clock,
            config: Mutex::new(config),
            active_jobs: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            initialized: AtomicBool::new(true),
            dispatch_notify: Notify::new(),
            admission_lock: AsyncMutex::new(()),
            shutdown_once: RunOnce::new(),
            shutdown_signal: Mutex::new(CancellationToken::new()),
            gc_handle: Mutex::new(None),
            exec_deps,
            last_error: Mutex::new(None),
        });

        spawn_gc_ticker(&state);
        tokio::spawn(dispatch_loop(state.clone()));

        Self { state }
    }

    fn now_ms(&self) -> u64 {
        self.state.clock.epoch_millis()
    }

    fn shutdown_signal(&self) -> CancellationToken {
        self.state.shutdown_signal.lock().unwrap().clone()
    }

    /// Admits `work` per spec.md §4.5's gate sequence: shutdown check,
    /// validation/clamping, pre-aborted signal, backpressure, per-user
    /// rate limit, duplicate-`request_id` policy — all under one
    /// admission-serializing lock so the duplicate check is atomic with
    /// enqueue (spec.md §9's closing design note).
    pub async fn submit(
        &self,
        work: WorkFn<T>,
        options: SubmitOptions,
    ) -> Result<(JobHandle<T>, Option<CancelHandle>), QueueError> {
        let _guard = self.state.admission_lock.lock().await;

        if !self.state.accepting.load(Ordering::Acquire) || self.shutdown_signal().is_cancelled() {
            return Err(QueueError::Shutdown);
        }

        let (timeout_ms, timeout_clamped) = clamp_timeout_ms(options.timeout_ms);
        let (max_retries, retries_clamped) = clamp_max_retries(options.max_retries);
        let priority_original = match options.priority {
            Priority::Raw(v) => Some(v),
            _ => None,
        };
        let priority = options.priority.normalize();
        if timeout_clamped {
            self.record(MetricEvent::new("timeout_clamped", self.now_ms()));
        }
        if retries_clamped {
            self.record(MetricEvent::new("max_retries_clamped", self.now_ms()));
        }

        if let Some(signal) = &options.cancel_signal {
            if signal.is_cancelled() {
                let mut event = MetricEvent::new("cancelled_before_enqueue", self.now_ms());
                event.request_id = options.request_id.clone();
                self.record(event);
                return Err(QueueError::CancelledBeforeEnqueue);
            }
        }

        if let Some(request_id) = &options.request_id {
            if self.state.registry.has(request_id) {
                match self.state.config.lock().unwrap().duplicate_policy {
                    DuplicatePolicy::RejectNew => {
                        return Err(QueueError::Validation {
                            message: format!("duplicate request_id: {request_id}"),
                            phase: "admission",
                        });
                    }
                    DuplicatePolicy::CancelPrevious => {
                        self.state.registry.cancel(request_id, CancelReason::DuplicatePolicy);
                    }
                    DuplicatePolicy::Allow => {}
                }
            }
        }

        let concurrency = self.state.config.lock().unwrap().concurrency;
        let active_jobs = self.state.active_jobs.load(Ordering::Acquire);
        let queue_size = self.state.store.lock().unwrap().size();
        let waiting_room = self.state.backpressure.waiting_room(concurrency, active_jobs);
        if queue_size >= waiting_room {
            self.record(MetricEvent::new("backpressure_blocked", self.now_ms()));
            return Err(QueueError::Backpressure { retry_after_secs: 60 });
        }

        if let Some(user_id) = &options.user_id {
            let now = self.state.clock.monotonic_now();
            if !self.state.rate_limiter.try_admit(user_id, now) {
                self.record(MetricEvent::new("rate_limit_blocked", self.now_ms()));
                return Err(QueueError::RateLimit { retry_after_secs: 60 });
            }
        }

        let cancel = options.cancel_signal.clone().unwrap_or_default();
        let cancel_handle = (options.return_cancel_handle && options.cancel_signal.is_none())
            .then(|| CancelHandle::new(cancel.clone()));

        let (tx, rx) = tokio::sync::oneshot::channel();
        let task = QueuedTask {
            request_id: options.request_id.clone(),
            user_id: options.user_id.clone(),
            priority,
            timeout: Duration::from_millis(timeout_ms),
            max_retries,
            enqueued_at_monotonic: self.state.clock.monotonic_now(),
            enqueued_at_epoch: self.state.clock.epoch_now(),
            work,
            cancel: cancel.clone(),
            complete: tx,
        };

        if let Some(request_id) = &options.request_id {
            self.state.registry.register(
                request_id.clone(),
                TaskRecord {
                    cancel: cancel.clone(),
                    user_id: options.user_id.clone(),
                    priority_normalized: priority,
                    enqueued_at_monotonic: task.enqueued_at_monotonic,
                    enqueued_at_epoch: task.enqueued_at_epoch,
                },
            );
        }

        self.state.store.lock().unwrap().push(task);

        let mut event = MetricEvent::new("queue_add", self.now_ms());
        event.request_id = options.request_id;
        event.user_id = options.user_id;
        event.priority_original = priority_original;
        event.priority_normalized = Some(priority);
        event.queue_size = Some(self.state.store.lock().unwrap().size());
        event.active_jobs = Some(active_jobs);
        event.concurrency = Some(concurrency);
        self.record(event);

        self.state.dispatch_notify.notify_one();

        Ok((JobHandle { rx }, cancel_handle))
    }

    /// Trips the registered task's cancel signal with `reason = user`.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.state.registry.cancel(request_id, CancelReason::User)
    }

    /// Halts slot dispatch; in-flight tasks are unaffected.
    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::Release);
        self.record(MetricEvent::new("queue_paused", self.now_ms()));
    }

    /// Restarts slot dispatch.
    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::Release);
        self.record(MetricEvent::new("queue_resumed", self.now_ms()));
        self.state.dispatch_notify.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::Acquire)
    }

    /// Admission gate for maintenance mode.
    pub fn set_accepting(&self, accepting: bool) {
        self.state.accepting.store(accepting, Ordering::Release);
    }

    pub fn is_accepting(&self) -> bool {
        self.state.accepting.load(Ordering::Acquire)
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.state.config.lock().unwrap().duplicate_policy
    }

    pub fn set_duplicate_policy(&self, policy: DuplicatePolicy) {
        self.state.config.lock().unwrap().duplicate_policy = policy;
        self.record(MetricEvent::new("duplicate_requestid_policy_changed", self.now_ms()));
    }

    /// Validates and applies a new concurrency limit. A no-op (no event,
    /// no state change) if `n` already equals the current value, per
    /// spec.md §8's idempotence law.
    pub fn update_concurrency(&self, n: i64) -> Result<(), QueueError> {
        let n = validate_concurrency_update(n).map_err(|_| QueueError::Validation {
            message: format!("concurrency must be an integer in [1, 10], got {n}"),
            phase: "config",
        })?;

        let mut config = self.state.config.lock().unwrap();
        if config.concurrency == n {
            return Ok(());
        }
        config.concurrency = n;
        drop(config);
        self.record(MetricEvent::new("concurrency_updated", self.now_ms()));
        self.state.dispatch_notify.notify_one();
        Ok(())
    }

    pub fn concurrency(&self) -> usize {
        self.state.config.lock().unwrap().concurrency
    }

    pub fn queue_size(&self) -> usize {
        self.state.store.lock().unwrap().size()
    }

    pub fn active_jobs(&self) -> usize {
        self.state.active_jobs.load(Ordering::Acquire)
    }

    /// The raw ring buffer contents, for a `/api/queue/metrics`
    /// admin-style endpoint.
    pub fn get_metrics_snapshot(&self) -> Vec<MetricEvent> {
        self.state.metrics.snapshot()
    }

    /// Derived health and throughput aggregates, per spec.md §4.5 /
    /// §4.8.
    pub fn get_overview(&self) -> Overview {
        let queue_size = self.queue_size();
        let active_jobs = self.active_jobs();
        let concurrency = self.concurrency();
        let Aggregates {
            success_rate,
            error_rate,
            health,
            ..
        } = self.state.metrics.aggregates(self.now_ms(), queue_size);

        let needs_attention = !matches!(health, HealthStatus::Healthy);
        let mut recommended_actions = Vec::new();
        let mut warnings = Vec::new();
        let status = match health {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => {
                warnings.push("elevated error rate or queue depth");
                recommended_actions.push("monitor closely");
                "warning"
            }
            HealthStatus::Critical => {
                warnings.push("queue depth at critical threshold");
                recommended_actions.push("scale concurrency or shed load");
                "critical"
            }
        };

        Overview {
            status,
            warnings,
            is_paused: self.is_paused(),
            is_accepting_tasks: self.is_accepting(),
            queue_size,
            active_jobs,
            concurrency,
            success_rate,
            error_rate,
            avg_processing_ms: self.state.backpressure.avg_processing_ms(),
            needs_attention,
            recommended_actions,
            is_initialized: self.state.initialized.load(Ordering::Acquire),
            last_error: self.state.last_error.lock().unwrap().clone(),
        }
    }

    /// Runs the nine-step graceful shutdown sequence of spec.md §4.9.
    /// Concurrent callers share one in-flight run and all return once it
    /// completes.
    pub async fn graceful_shutdown(&self, timeout_ms: u64) {
        let state = self.state.clone();
        let sequence_state = state.clone();
        state
            .shutdown_once
            .run(move || async move { run_shutdown_sequence(sequence_state, timeout_ms).await })
            .await;
    }

    /// Recreates the shutdown signal and restarts the rate-limiter GC
    /// ticker, then reopens admission. Only meaningful after a completed
    /// [`QueueManager::graceful_shutdown`] (spec.md §4.9's closing note).
    pub fn resume_accepting(&self) {
        *self.state.shutdown_signal.lock().unwrap() = CancellationToken::new();
        self.state.shutdown_once.reset();
        spawn_gc_ticker(&self.state);
        self.state.accepting.store(true, Ordering::Release);
    }

    fn record(&self, event: MetricEvent) {
        self.state.metrics.record(event);
    }

    /// Records an unclassified failure for `get_overview().last_error`,
    /// for callers (e.g. the `imagegen` umbrella) surfacing an
    /// Internal/Unknown error (spec.md §7).
    pub fn set_last_error(&self, message: impl Into<String>) {
        *self.state.last_error.lock().unwrap() = Some(message.into());
    }
}

impl<T: Send + 'static> Default for QueueManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_shutdown_sequence<T: Send + 'static>(state: Arc<State<T>>, timeout_ms: u64) {
    let now_ms = state.clock.epoch_millis();

    // Step 2: stop accepting new tasks; stop the rate-limiter cleanup
    // ticker.
    state.accepting.store(false, Ordering::Release);
    if let Some(handle) = state.gc_handle.lock().unwrap().take() {
        handle.abort();
    }

    // Step 3.
    let mut event = MetricEvent::new("shutdown_started", now_ms);
    event.duration_ms = Some(timeout_ms);
    state.metrics.record(event);

    // Step 4.
    let active = state.active_jobs.load(Ordering::Acquire);
    let queued = state.store.lock().unwrap().size();
    if active > 0 {
        let mut event = MetricEvent::new("shutdown_aborted_inflight", now_ms);
        event.active_jobs = Some(active);
        state.metrics.record(event);
    }
    if queued > 0 {
        let mut event = MetricEvent::new("shutdown_dropped_queued", now_ms);
        event.queue_size = Some(queued);
        state.metrics.record(event);
    }

    // Step 5: trip the global shutdown signal (aborting every in-flight
    // controller, since each was dispatched with this signal as a
    // cancellation parent), then drop the queued set.
    state.shutdown_signal.lock().unwrap().cancel(CancelReason::Shutdown);
    let dropped = state.store.lock().unwrap().drop_all();
    let shutdown_token = state.shutdown_signal.lock().unwrap().clone();
    for task in dropped {
        let request_id = task.request_id.clone();
        let snapshot_state = state.clone();
        executor::run_task(task, shutdown_token.clone(), state.exec_deps.clone(), move || {
            let queue_size = snapshot_state.store.lock().unwrap().size();
            let active_jobs = snapshot_state.active_jobs.load(Ordering::Acquire);
            let concurrency = snapshot_state.config.lock().unwrap().concurrency;
            (queue_size, active_jobs, concurrency)
        })
        .await;
        if let Some(id) = request_id {
            state.registry.release(&id);
        }
    }

    // Step 6: wait for the dispatcher to become idle, or the timeout.
    let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
    tokio::pin!(deadline);
    loop {
        if state.active_jobs.load(Ordering::Acquire) == 0 {
            break;
        }
        tokio::select! {
            _ = &mut deadline => {
                state.metrics.record(MetricEvent::new("shutdown_timeout", state.clock.epoch_millis()));
                for record in state.registry.clear_all() {
                    record.cancel.cancel(CancelReason::Shutdown);
                }
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
    }

    // Step 7.
    let action = if active == 0 && queued == 0 {
        "shutdown_completed_clean"
    } else {
        "shutdown_completed_unclean"
    };
    state.metrics.record(MetricEvent::new(action, state.clock.epoch_millis()));

    // Step 8: the shared promise slot and GC handle are already cleared
    // by this point; `resume_accepting` recreates both.
}

fn spawn_gc_ticker<T: Send + 'static>(state: &Arc<State<T>>) {
    let ticker_state = state.clone();
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(RATE_LIMITER_GC_INTERVAL).await;
            ticker_state.rate_limiter.gc(ticker_state.clock.monotonic_now());
        }
    });
    *state.gc_handle.lock().unwrap() = Some(handle);
}

async fn dispatch_loop<T: Send + 'static>(state: Arc<State<T>>) {
    loop {
        state.dispatch_notify.notified().await;
        loop {
            if state.shutdown_signal.lock().unwrap().is_cancelled() {
                break;
            }
            if state.paused.load(Ordering::Acquire) {
                break;
            }
            let concurrency = state.config.lock().unwrap().concurrency;
            if state.active_jobs.load(Ordering::Acquire) >= concurrency {
                break;
            }
            let task = state.store.lock().unwrap().pop_highest();
            let task = match task {
                Some(task) => task,
                None => break,
            };

            state.active_jobs.fetch_add(1, Ordering::AcqRel);
            let request_id = task.request_id.clone();
            let shutdown_signal = state.shutdown_signal.lock().unwrap().clone();
            let deps = state.exec_deps.clone();
            let state_for_task = state.clone();
            tokio::spawn(async move {
                let state_for_snapshot = state_for_task.clone();
                executor::run_task(task, shutdown_signal, deps, move || {
                    let queue_size = state_for_snapshot.store.lock().unwrap().size();
                    let active_jobs = state_for_snapshot.active_jobs.load(Ordering::Acquire);
                    let concurrency = state_for_snapshot.config.lock().unwrap().concurrency;
                    (queue_size, active_jobs, concurrency)
                })
                .await;

                if let Some(id) = &request_id {
                    state_for_task.registry.release(id);
                }
                state_for_task.active_jobs.fetch_sub(1, Ordering::AcqRel);
                state_for_task.dispatch_notify.notify_one();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{AttemptContext, WorkError};
    use std::sync::atomic::AtomicU32;

    fn noop_work() -> WorkFn<u32> {
        Arc::new(|_ctx: AttemptContext| Box::pin(async { Ok(42u32) }))
    }

    #[tokio::test]
    async fn submit_and_await_a_successful_task() {
        let manager: QueueManager<u32> = QueueManager::new();
        let (handle, _cancel) = manager.submit(noop_work(), SubmitOptions::default()).await.unwrap();
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn concurrency_is_never_exceeded() {
        let config = QueueManagerConfig::builder().concurrency(2).build();
        let manager: QueueManager<()> = QueueManager::with_config(config, Arc::new(NullEventSink));
        let running = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let running = running.clone();
            let max_seen = max_seen.clone();
            let work: WorkFn<()> = Arc::new(move |_ctx| {
                let running = running.clone();
                let max_seen = max_seen.clone();
                Box::pin(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), WorkError>(())
                })
            });
            let (handle, _) = manager.submit(work, SubmitOptions::default()).await.unwrap();
            handles.push(handle);
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancel_before_dispatch_is_observed() {
        let config = QueueManagerConfig::builder().concurrency(1).build();
        let manager: QueueManager<()> = QueueManager::with_config(config, Arc::new(NullEventSink));

        // Occupy the only slot with a long-running task.
        let work: WorkFn<()> = Arc::new(|_ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<(), WorkError>(())
            })
        });
        let (_occupier, _) = manager.submit(work, SubmitOptions::default()).await.unwrap();

        let (handle, _) = manager
            .submit(
                noop_work_unit(),
                SubmitOptions {
                    request_id: Some("r1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(manager.cancel("r1"));
        let result = handle.await;
        assert!(result.is_err());
        assert!(result.unwrap_err().is_cancelled());
    }

    fn noop_work_unit() -> WorkFn<()> {
        Arc::new(|_ctx: AttemptContext| Box::pin(async { Ok(()) }))
    }

    #[tokio::test]
    async fn shutdown_cancels_queued_and_is_idempotent() {
        let config = QueueManagerConfig::builder().concurrency(1).build();
        let manager: QueueManager<()> = QueueManager::with_config(config, Arc::new(NullEventSink));

        let work: WorkFn<()> = Arc::new(|_ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<(), WorkError>(())
            })
        });
        let (_running, _) = manager.submit(work, SubmitOptions::default()).await.unwrap();
        let (queued, _) = manager.submit(noop_work_unit(), SubmitOptions::default()).await.unwrap();

        let a = manager.graceful_shutdown(1_000);
        let b = manager.graceful_shutdown(1_000);
        tokio::join!(a, b);

        let result = queued.await;
        assert!(result.is_err());

        let rejected = manager.submit(noop_work_unit(), SubmitOptions::default()).await;
        assert!(matches!(rejected, Err(QueueError::Shutdown)));

        manager.resume_accepting();
        let accepted = manager.submit(noop_work_unit(), SubmitOptions::default()).await;
        assert!(accepted.is_ok());
    }
}
