//! End-to-end scenario 5: a service with threshold 3 and a 100ms open
//! timeout, five failing calls, then recovery.

use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerManager, CircuitState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn five_failing_calls_then_recovery() {
    let manager = CircuitBreakerManager::new();
    manager.register("X", CircuitBreakerConfig::new(3, Duration::from_millis(100)));

    let attempted = Arc::new(AtomicUsize::new(0));

    // First 3 calls attempt the work and fail, tripping the breaker open.
    for _ in 0..3 {
        let attempted = Arc::clone(&attempted);
        let result: Result<(), CircuitBreakerError<&str>> = manager
            .execute("X", || async move {
                attempted.fetch_add(1, Ordering::SeqCst);
                Err("work failed")
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
    }
    assert_eq!(attempted.load(Ordering::SeqCst), 3);
    assert_eq!(manager.status("X").unwrap().state, CircuitState::Open);

    // The 4th and 5th calls fail fast without running the work function.
    for _ in 0..2 {
        let attempted = Arc::clone(&attempted);
        let result: Result<(), CircuitBreakerError<&str>> = manager
            .execute("X", || async move {
                attempted.fetch_add(1, Ordering::SeqCst);
                Err("work failed")
            })
            .await;
        assert!(result.unwrap_err().is_circuit_open());
    }
    assert_eq!(attempted.load(Ordering::SeqCst), 3, "fast-failed calls must not run the work fn");

    tokio::time::sleep(Duration::from_millis(110)).await;

    // A trial call is now allowed (HALF_OPEN). On success, breaker closes.
    let result: Result<&str, CircuitBreakerError<&str>> =
        manager.execute("X", || async { Ok("recovered") }).await;
    assert_eq!(result.unwrap(), "recovered");
    assert_eq!(manager.status("X").unwrap().state, CircuitState::Closed);
}

#[tokio::test]
async fn trial_call_failure_reopens_the_circuit() {
    let manager = CircuitBreakerManager::new();
    manager.register("X", CircuitBreakerConfig::new(3, Duration::from_millis(50)));

    for _ in 0..3 {
        let _: Result<(), CircuitBreakerError<&str>> =
            manager.execute("X", || async { Err("work failed") }).await;
    }
    assert_eq!(manager.status("X").unwrap().state, CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(60)).await;

    let result: Result<(), CircuitBreakerError<&str>> =
        manager.execute("X", || async { Err("still failing") }).await;
    assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
    assert_eq!(manager.status("X").unwrap().state, CircuitState::Open);
}
