//! End-to-end seed scenarios from spec.md §8: backpressure, priority
//! ordering, per-user rate limiting, and retry-then-timeout.

use job_queue::{
    AttemptContext, BoxFuture, DuplicatePolicy, Priority, QueueManager, QueueManagerConfig, QueueError, SubmitOptions,
    WorkError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn sleepy_work(millis: u64) -> Arc<dyn Fn(AttemptContext) -> BoxFuture<Result<u32, WorkError>> + Send + Sync> {
    Arc::new(move |_ctx: AttemptContext| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(42)
        })
    })
}

fn noop_work() -> Arc<dyn Fn(AttemptContext) -> BoxFuture<Result<u32, WorkError>> + Send + Sync> {
    Arc::new(|_ctx: AttemptContext| Box::pin(async { Ok(0) }))
}

#[tokio::test]
async fn backpressure_rejects_once_the_waiting_room_is_full() {
    // concurrency = 2 -> cold-start heuristic cap is 2 * 20 = 40.
    let manager: QueueManager<u32> = QueueManager::with_config(
        QueueManagerConfig::builder().concurrency(2).build(),
        Arc::new(job_queue::NullEventSink),
    );
    manager.pause();

    for i in 0..40 {
        let result = manager
            .submit(sleepy_work(5_000), SubmitOptions::default())
            .await;
        assert!(result.is_ok(), "submission {i} should be admitted under the cap");
    }

    let rejected = manager
        .submit(sleepy_work(5_000), SubmitOptions::default())
        .await;
    match rejected {
        Err(QueueError::Backpressure { retry_after_secs }) => assert_eq!(retry_after_secs, 60),
        other => panic!("expected Backpressure, got {other:?}"),
    }
}

#[tokio::test]
async fn priority_order_wins_over_submission_order() {
    let manager: QueueManager<&'static str> = QueueManager::with_config(
        QueueManagerConfig::builder().concurrency(1).build(),
        Arc::new(job_queue::NullEventSink),
    );
    manager.pause();

    let dispatched = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));

    let mut options_a = SubmitOptions::default();
    options_a.priority = Priority::Raw(5);
    let handle_a = labeled_submit(&manager, &dispatched, "A", options_a).await;

    let mut options_b = SubmitOptions::default();
    options_b.priority = Priority::Raw(1);
    let handle_b = labeled_submit(&manager, &dispatched, "B", options_b).await;

    let mut options_c = SubmitOptions::default();
    options_c.priority = Priority::Raw(5);
    let handle_c = labeled_submit(&manager, &dispatched, "C", options_c).await;

    let mut options_d = SubmitOptions::default();
    options_d.priority = Priority::Raw(10);
    let handle_d = labeled_submit(&manager, &dispatched, "D", options_d).await;

    // Free one slot at a time; with concurrency = 1, `resume` lets the
    // dispatcher pop exactly the next highest-priority task. Re-pause
    // before that task's (deliberately slow) work function finishes, so
    // no second task is ever popped in the same cycle.
    for _ in 0..4 {
        manager.resume();
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.pause();
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    handle_a.await.unwrap();
    handle_b.await.unwrap();
    handle_c.await.unwrap();
    handle_d.await.unwrap();

    let order = dispatched.lock().unwrap().clone();
    assert_eq!(order, vec!["B", "A", "C", "D"]);
}

async fn labeled_submit(
    manager: &QueueManager<&'static str>,
    dispatched: &Arc<std::sync::Mutex<Vec<&'static str>>>,
    label: &'static str,
    options: SubmitOptions,
) -> job_queue::JobHandle<&'static str> {
    let dispatched = dispatched.clone();
    let work: Arc<dyn Fn(AttemptContext) -> BoxFuture<Result<&'static str, WorkError>> + Send + Sync> =
        Arc::new(move |_ctx: AttemptContext| {
            let dispatched = dispatched.clone();
            Box::pin(async move {
                dispatched.lock().unwrap().push(label);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(label)
            })
        });
    let (handle, _cancel) = manager.submit(work, options).await.unwrap();
    handle
}

#[tokio::test]
async fn per_user_rate_limit_admits_ten_then_blocks_then_resets_after_the_window() {
    let clock = Arc::new(resilience_core::TestClock::new());
    let manager: QueueManager<u32> = QueueManager::with_config_and_clock(
        QueueManagerConfig::default(),
        Arc::new(job_queue::NullEventSink),
        clock.clone(),
    );

    for i in 0..10 {
        let mut options = SubmitOptions::default();
        options.user_id = Some("user-1".to_string());
        let result = manager.submit(noop_work(), options).await;
        assert!(result.is_ok(), "submission {i} within the window should be admitted");
    }

    let mut options = SubmitOptions::default();
    options.user_id = Some("user-1".to_string());
    let eleventh = manager.submit(noop_work(), options).await;
    match eleventh {
        Err(QueueError::RateLimit { retry_after_secs }) => assert_eq!(retry_after_secs, 60),
        other => panic!("expected RateLimit, got {other:?}"),
    }

    clock.advance(Duration::from_secs(61));

    let mut options = SubmitOptions::default();
    options.user_id = Some("user-1".to_string());
    let after_window = manager.submit(noop_work(), options).await;
    assert!(after_window.is_ok(), "a slot should free up once the window has elapsed");
}

#[tokio::test]
async fn every_attempt_timing_out_exhausts_retries_with_the_documented_trace() {
    tokio::time::pause();
    let invocations = Arc::new(AtomicUsize::new(0));
    let manager: QueueManager<u32> = QueueManager::with_config(
        QueueManagerConfig::builder().concurrency(1).build(),
        Arc::new(job_queue::NullEventSink),
    );

    let invocations_for_work = invocations.clone();
    let work: Arc<dyn Fn(AttemptContext) -> BoxFuture<Result<u32, WorkError>> + Send + Sync> =
        Arc::new(move |_ctx: AttemptContext| {
            let invocations = invocations_for_work.clone();
            Box::pin(async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(0)
            })
        });

    // timeout_ms clamps to a floor of 1000; the work function always
    // sleeps far longer than that, so every attempt times out.
    let mut options = SubmitOptions::default();
    options.timeout_ms = Some(1_000);
    options.max_retries = Some(2);
    let (handle, _cancel) = manager.submit(work, options).await.unwrap();

    let result = handle.await;
    match result {
        Err(QueueError::Timeout { attempts }) => assert_eq!(attempts, 3),
        other => panic!("expected Timeout after exhausting retries, got {other:?}"),
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 3, "work fn must run once per attempt");
}

#[tokio::test]
async fn duplicate_request_id_cancels_the_previous_submission_by_default() {
    let manager: QueueManager<u32> = QueueManager::with_config(
        QueueManagerConfig::builder().concurrency(1).duplicate_policy(DuplicatePolicy::CancelPrevious).build(),
        Arc::new(job_queue::NullEventSink),
    );
    manager.pause();

    let mut first = SubmitOptions::default();
    first.request_id = Some("job-1".to_string());
    let (handle_first, _) = manager.submit(sleepy_work(5_000), first).await.unwrap();

    let mut second = SubmitOptions::default();
    second.request_id = Some("job-1".to_string());
    let (handle_second, _) = manager.submit(sleepy_work(10), second).await.unwrap();

    manager.resume();

    let first_result = handle_first.await;
    assert!(first_result.unwrap_err().is_cancelled());
    let second_result = handle_second.await;
    assert!(second_result.is_ok());
}
