use thiserror::Error;

/// Errors returned by [`crate::CircuitBreakerManager::execute`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The named circuit is open; the call was rejected without running.
    #[error("circuit '{service}' is open; call rejected")]
    CircuitOpen {
        /// The service name the caller asked to execute against.
        service: String,
    },

    /// The guarded call ran and returned an application error.
    #[error("inner call failed: {0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// True if the call was rejected due to an open circuit rather than
    /// having run and failed.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. })
    }

    /// The inner application error, if the call ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(e) => Some(e),
            CircuitBreakerError::CircuitOpen { .. } => None,
        }
    }
}
