//! `ApiError` unifies every layer's error into the single taxonomy
//! spec.md §6 maps to HTTP, the way the teacher's `ResilienceError<E>`
//! unifies layer errors without per-layer `From` boilerplate.

use circuit_breaker::CircuitBreakerError;
use credit_guard::CreditGuardError;
use job_queue::QueueError;
use resilience_core::CancelReason;
use thiserror::Error;

/// Every error kind the core can return, carrying enough structured
/// data to answer the error-to-HTTP mapping table in spec.md §6
/// without a second lookup.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("insufficient credits: requires {required}, has {current} (short {shortfall})")]
    InsufficientCredits { required: u64, current: u64, shortfall: u64 },

    #[error("admin access required")]
    AdminOnly,

    #[error("not found")]
    NotFound,

    #[error("request timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("rate limit exceeded")]
    RateLimit { retry_after_secs: u64 },

    #[error("service is at capacity")]
    Backpressure { retry_after_secs: u64 },

    #[error("request cancelled: {reason:?}")]
    Cancelled { reason: CancelReason },

    #[error("internal server error: {0}")]
    ServerError(String),

    #[error("service has not finished initializing")]
    Initialization,

    #[error("service is shutting down")]
    Shutdown { retry_after_secs: u64 },
}

impl ApiError {
    /// The status this error maps to, per spec.md §6's authoritative
    /// error-to-HTTP mapping table.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Validation(_) => 400,
            ApiError::Unauthorized => 401,
            ApiError::InsufficientCredits { .. } => 402,
            ApiError::AdminOnly => 403,
            ApiError::NotFound => 404,
            ApiError::Timeout { .. } => 408,
            ApiError::RateLimit { .. } => 429,
            ApiError::Backpressure { .. } => 429,
            ApiError::Cancelled { .. } => 499,
            ApiError::ServerError(_) => 500,
            ApiError::Initialization => 503,
            ApiError::Shutdown { .. } => 503,
        }
    }

    /// The `Retry-After` header value, for the variants the table gives
    /// one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ApiError::RateLimit { retry_after_secs }
            | ApiError::Backpressure { retry_after_secs }
            | ApiError::Shutdown { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    pub fn is_retriable_by_caller(&self) -> bool {
        self.retry_after_secs().is_some()
    }
}

impl From<QueueError> for ApiError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::Shutdown => ApiError::Shutdown { retry_after_secs: 30 },
            QueueError::Backpressure { retry_after_secs } => ApiError::Backpressure { retry_after_secs },
            QueueError::RateLimit { retry_after_secs } => ApiError::RateLimit { retry_after_secs },
            QueueError::Validation { message, .. } => ApiError::Validation(message),
            QueueError::CancelledBeforeEnqueue => ApiError::Cancelled { reason: CancelReason::User },
            QueueError::Timeout { attempts } => ApiError::Timeout { attempts },
            QueueError::Cancelled { reason } => ApiError::Cancelled { reason },
            QueueError::Failed { message, .. } => ApiError::ServerError(message),
        }
    }
}

impl From<CreditGuardError> for ApiError {
    fn from(error: CreditGuardError) -> Self {
        match error {
            CreditGuardError::InsufficientCredits { required, current, shortfall } => {
                ApiError::InsufficientCredits { required, current, shortfall }
            }
            CreditGuardError::UnknownProvider { provider } => {
                ApiError::Validation(format!("unknown provider: {provider}"))
            }
            CreditGuardError::Store(store_error) => ApiError::ServerError(store_error.to_string()),
        }
    }
}

impl<E: std::fmt::Display> From<CircuitBreakerError<E>> for ApiError {
    // `CircuitOpen` has no dedicated row in §6's table; it behaves like
    // backpressure from the caller's point of view (retry later), so it
    // maps there rather than inventing a new status code.
    fn from(error: CircuitBreakerError<E>) -> Self {
        match error {
            CircuitBreakerError::CircuitOpen { .. } => ApiError::Backpressure { retry_after_secs: 60 },
            CircuitBreakerError::Inner(inner) => ApiError::ServerError(inner.to_string()),
        }
    }
}
