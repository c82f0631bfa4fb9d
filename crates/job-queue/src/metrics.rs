//! C8: the metrics and event log — a bounded ring buffer of structured
//! events plus the derived health aggregates `get_overview` exposes,
//! per spec.md §4.8.
//!
//! The ring is the authoritative, synchronous source for every
//! aggregate computation (SPEC_FULL.md §9's design note); an optional
//! [`EventSink`] is a fire-and-forget mirror to durable storage
//! (`queue_log`) that must never block or fail the control plane.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const RING_CAPACITY: usize = 1_000;
const ONE_HOUR_MS: u64 = 60 * 60 * 1000;
const ONE_MINUTE_MS: u64 = 60 * 1000;

/// One structured event, per spec.md §3's Metric event field list.
/// Every field besides `action` and `timestamp_epoch_ms` is optional
/// because different event kinds populate different subsets.
#[derive(Debug, Clone, Default)]
pub struct MetricEvent {
    pub action: &'static str,
    pub timestamp_epoch_ms: u64,
    pub request_id: Option<String>,
    pub user_id: Option<String>,
    pub duration_ms: Option<u64>,
    pub queue_wait_ms: Option<u64>,
    pub phase: Option<&'static str>,
    pub error_type: Option<String>,
    pub priority_original: Option<i32>,
    pub priority_normalized: Option<i32>,
    pub queue_size: Option<usize>,
    pub active_jobs: Option<usize>,
    pub concurrency: Option<usize>,
    pub attempts: Option<u32>,
    pub reason: Option<&'static str>,
    pub success: Option<bool>,
}

impl MetricEvent {
    pub fn new(action: &'static str, timestamp_epoch_ms: u64) -> Self {
        Self {
            action,
            timestamp_epoch_ms,
            ..Default::default()
        }
    }

    fn is_terminal(&self) -> bool {
        self.action == "task_finally"
    }

    fn is_error(&self) -> bool {
        matches!(
            self.action,
            "task_error" | "cancelled_before_start" | "cancelled_after_start"
        )
    }
}

/// External collaborator mirroring events to durable storage
/// (`queue_log`). Never allowed to block or error-propagate into the
/// control plane; `record` returns nothing and the manager does not
/// await it synchronously with task completion.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &MetricEvent);
}

/// An `EventSink` that discards everything, used when no durable
/// mirror is configured.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&self, _event: &MetricEvent) {}
}

/// Health classification driving `needs_attention` and
/// `recommended_actions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Direction of the error rate over the most recent 10 events vs the
/// rest of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTrend {
    Increasing,
    Stable,
    Decreasing,
}

/// Derived aggregates for `get_overview`, per spec.md §4.8.
#[derive(Debug, Clone)]
pub struct Aggregates {
    pub success_rate: f64,
    pub error_rate: f64,
    pub error_trend: ErrorTrend,
    pub tasks_per_minute: u64,
    pub growth_rate: f64,
    pub health: HealthStatus,
}

/// Bounded ring buffer of metric events plus the optional durable
/// mirror.
pub(crate) struct MetricsRing {
    events: Mutex<VecDeque<MetricEvent>>,
    sink: Arc<dyn EventSink>,
}

impl MetricsRing {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            sink,
        }
    }

    /// Appends an event, dropping the oldest on overflow, then mirrors
    /// it to the durable sink best-effort.
    pub(crate) fn record(&self, event: MetricEvent) {
        {
            let mut events = self.events.lock().unwrap();
            if events.len() >= RING_CAPACITY {
                events.pop_front();
            }
            events.push_back(event.clone());
        }
        self.sink.record(&event);
    }

    pub(crate) fn snapshot(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().iter().cloned().collect()
    }

    /// Computes `get_overview`'s health aggregates as of `now_epoch_ms`.
    pub(crate) fn aggregates(&self, now_epoch_ms: u64, queue_size: usize) -> Aggregates {
        let events = self.events.lock().unwrap();
        let window: Vec<&MetricEvent> = events
            .iter()
            .filter(|e| now_epoch_ms.saturating_sub(e.timestamp_epoch_ms) <= ONE_HOUR_MS)
            .collect();

        let terminal: Vec<&&MetricEvent> = window.iter().filter(|e| e.is_terminal()).collect();
        let successes = terminal.iter().filter(|e| e.success == Some(true)).count() as f64;
        let errors = window.iter().filter(|e| e.is_error()).count() as f64;
        let total = terminal.len() as f64;

        let success_rate = if successes + errors == 0.0 {
            1.0
        } else {
            successes / (successes + errors)
        };
        let error_rate = if total == 0.0 { 0.0 } else { errors / total };

        let error_trend = compute_error_trend(&window);

        let tasks_per_minute = terminal
            .iter()
            .filter(|e| now_epoch_ms.saturating_sub(e.timestamp_epoch_ms) <= ONE_MINUTE_MS)
            .count() as u64;

        let growth_rate = compute_growth_rate(&window);

        let health = classify_health(queue_size, error_rate, success_rate);

        Aggregates {
            success_rate,
            error_rate,
            error_trend,
            tasks_per_minute,
            growth_rate,
            health,
        }
    }
}

fn compute_error_trend(window: &[&MetricEvent]) -> ErrorTrend {
    if window.len() < 2 {
        return ErrorTrend::Stable;
    }
    let split = window.len().saturating_sub(10).max(0);
    let (rest, recent) = window.split_at(split);
    if recent.is_empty() || rest.is_empty() {
        return ErrorTrend::Stable;
    }

    let recent_rate = recent.iter().filter(|e| e.is_error()).count() as f64 / recent.len() as f64;
    let rest_rate = rest.iter().filter(|e| e.is_error()).count() as f64 / rest.len() as f64;

    if recent_rate > rest_rate + 0.01 {
        ErrorTrend::Increasing
    } else if recent_rate < rest_rate - 0.01 {
        ErrorTrend::Decreasing
    } else {
        ErrorTrend::Stable
    }
}

fn compute_growth_rate(window: &[&MetricEvent]) -> f64 {
    let with_queue_size: Vec<&&MetricEvent> =
        window.iter().filter(|e| e.queue_size.is_some()).collect();
    let (Some(first), Some(last)) = (with_queue_size.first(), with_queue_size.last()) else {
        return 0.0;
    };
    let minutes = (last.timestamp_epoch_ms.saturating_sub(first.timestamp_epoch_ms)) as f64
        / ONE_MINUTE_MS as f64;
    if minutes <= 0.0 {
        return 0.0;
    }
    let delta = last.queue_size.unwrap() as f64 - first.queue_size.unwrap() as f64;
    delta / minutes
}

fn classify_health(queue_size: usize, error_rate: f64, success_rate: f64) -> HealthStatus {
    if queue_size >= 50 {
        return HealthStatus::Critical;
    }
    if queue_size >= 20 || error_rate > 0.10 || success_rate < 0.90 {
        return HealthStatus::Warning;
    }
    HealthStatus::Healthy
}
