//! Priority job queue with bounded concurrency, backpressure, per-user
//! rate limiting, retries with exponential backoff, structured
//! cancellation, and graceful shutdown, for image-generation tasks
//! (spec.md §4.1-§4.5, §4.8, §4.9).
//!
//! [`QueueManager`] is the facade; everything else in this crate is a
//! focused sub-mechanism it composes.

mod backpressure;
mod config;
mod error;
mod executor;
mod manager;
mod metrics;
mod priority;
mod ratelimit;
mod registry;
mod shutdown;
mod store;
mod task;

pub use config::{validate_concurrency_update, DuplicatePolicy, QueueManagerConfig, QueueManagerConfigBuilder};
pub use error::QueueError;
pub use manager::{Overview, QueueManager};
pub use metrics::{Aggregates, ErrorTrend, EventSink, HealthStatus, MetricEvent, NullEventSink};
pub use priority::{Priority, PRIORITY_HIGH, PRIORITY_LOW, PRIORITY_NORMAL};
pub use task::{
    clamp_max_retries, clamp_timeout_ms, AttemptContext, BoxFuture, CancelHandle, JobHandle, SubmitOptions, WorkError,
    WorkFn,
};
