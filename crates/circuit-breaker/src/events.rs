use crate::circuit::CircuitState;
use resilience_core::ResilienceEvent;
use std::time::Instant;

/// Events emitted by a named circuit breaker.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// A call was let through.
    CallPermitted {
        service: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// A call was rejected because the circuit is open.
    CallRejected { service: String, timestamp: Instant },
    /// A guarded call completed successfully.
    SuccessRecorded {
        service: String,
        timestamp: Instant,
        response_time: std::time::Duration,
    },
    /// A guarded call failed.
    FailureRecorded {
        service: String,
        timestamp: Instant,
        response_time: std::time::Duration,
    },
    /// The circuit changed state.
    StateTransition {
        service: String,
        timestamp: Instant,
        from_state: CircuitState,
        to_state: CircuitState,
    },
}

impl ResilienceEvent for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::CallPermitted { .. } => "call_permitted",
            CircuitBreakerEvent::CallRejected { .. } => "call_rejected",
            CircuitBreakerEvent::SuccessRecorded { .. } => "success_recorded",
            CircuitBreakerEvent::FailureRecorded { .. } => "failure_recorded",
            CircuitBreakerEvent::StateTransition { .. } => "state_transition",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::CallPermitted { timestamp, .. }
            | CircuitBreakerEvent::CallRejected { timestamp, .. }
            | CircuitBreakerEvent::SuccessRecorded { timestamp, .. }
            | CircuitBreakerEvent::FailureRecorded { timestamp, .. }
            | CircuitBreakerEvent::StateTransition { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            CircuitBreakerEvent::CallPermitted { service, .. }
            | CircuitBreakerEvent::CallRejected { service, .. }
            | CircuitBreakerEvent::SuccessRecorded { service, .. }
            | CircuitBreakerEvent::FailureRecorded { service, .. }
            | CircuitBreakerEvent::StateTransition { service, .. } => service,
        }
    }
}
