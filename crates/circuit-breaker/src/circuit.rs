use crate::config::CircuitBreakerConfig;
use crate::events::CircuitBreakerEvent;
use resilience_core::EventListeners;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// The state of a named circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures accumulate toward the threshold.
    Closed,
    /// Calls are rejected without running until `open_timeout` elapses.
    Open,
    /// One trial call is permitted to decide whether to close or reopen.
    HalfOpen,
}

/// A point-in-time snapshot of a circuit's counters, per spec.md §3's
/// Circuit Breaker Record.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub total_requests: u64,
    pub last_failure_time: Option<Instant>,
    pub last_response_time: Option<Duration>,
    pub avg_response_time: Duration,
}

pub(crate) struct Circuit {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    total_requests: u64,
    last_failure_time: Option<Instant>,
    last_response_time: Option<Duration>,
    avg_response_time_nanos: f64,
    last_state_change: Instant,
    half_open_in_flight: bool,
}

impl Circuit {
    pub(crate) fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            last_failure_time: None,
            last_response_time: None,
            avg_response_time_nanos: 0.0,
            last_state_change: Instant::now(),
            half_open_in_flight: false,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn metrics(&self) -> CircuitMetrics {
        CircuitMetrics {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            total_requests: self.total_requests,
            last_failure_time: self.last_failure_time,
            last_response_time: self.last_response_time,
            avg_response_time: Duration::from_nanos(self.avg_response_time_nanos.max(0.0) as u64),
        }
    }

    /// Decides whether a call may proceed right now, transitioning
    /// Open -> HalfOpen if the timeout has elapsed. Mirrors spec.md
    /// §4.6's per-state admission rules.
    pub(crate) fn try_acquire(
        &mut self,
        name: &str,
        config: &CircuitBreakerConfig,
        listeners: &EventListeners<CircuitBreakerEvent>,
    ) -> bool {
        match self.state {
            CircuitState::Closed => {
                listeners.emit(&CircuitBreakerEvent::CallPermitted {
                    service: name.to_string(),
                    timestamp: Instant::now(),
                    state: self.state,
                });
                true
            }
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= config.open_timeout {
                    self.transition_to(CircuitState::HalfOpen, name, listeners);
                    self.half_open_in_flight = true;
                    listeners.emit(&CircuitBreakerEvent::CallPermitted {
                        service: name.to_string(),
                        timestamp: Instant::now(),
                        state: self.state,
                    });
                    true
                } else {
                    listeners.emit(&CircuitBreakerEvent::CallRejected {
                        service: name.to_string(),
                        timestamp: Instant::now(),
                    });
                    false
                }
            }
            CircuitState::HalfOpen => {
                // Exactly one trial call is permitted at a time.
                if self.half_open_in_flight {
                    listeners.emit(&CircuitBreakerEvent::CallRejected {
                        service: name.to_string(),
                        timestamp: Instant::now(),
                    });
                    false
                } else {
                    self.half_open_in_flight = true;
                    listeners.emit(&CircuitBreakerEvent::CallPermitted {
                        service: name.to_string(),
                        timestamp: Instant::now(),
                        state: self.state,
                    });
                    true
                }
            }
        }
    }

    pub(crate) fn record_success(
        &mut self,
        name: &str,
        _config: &CircuitBreakerConfig,
        duration: Duration,
        listeners: &EventListeners<CircuitBreakerEvent>,
    ) {
        self.success_count += 1;
        self.total_requests += 1;
        self.record_response_time(duration);
        self.last_response_time = Some(duration);

        listeners.emit(&CircuitBreakerEvent::SuccessRecorded {
            service: name.to_string(),
            timestamp: Instant::now(),
            response_time: duration,
        });

        #[cfg(feature = "metrics")]
        {
            counter!("circuit_breaker_calls_total", "service" => name.to_string(), "outcome" => "success").increment(1);
        }

        match self.state {
            CircuitState::HalfOpen => {
                self.half_open_in_flight = false;
                self.transition_to(CircuitState::Closed, name, listeners);
            }
            _ => {}
        }
    }

    pub(crate) fn record_failure(
        &mut self,
        name: &str,
        config: &CircuitBreakerConfig,
        duration: Duration,
        listeners: &EventListeners<CircuitBreakerEvent>,
    ) {
        self.failure_count += 1;
        self.total_requests += 1;
        self.last_failure_time = Some(Instant::now());
        self.record_response_time(duration);
        self.last_response_time = Some(duration);

        listeners.emit(&CircuitBreakerEvent::FailureRecorded {
            service: name.to_string(),
            timestamp: Instant::now(),
            response_time: duration,
        });

        #[cfg(feature = "metrics")]
        {
            counter!("circuit_breaker_calls_total", "service" => name.to_string(), "outcome" => "failure").increment(1);
        }

        match self.state {
            CircuitState::HalfOpen => {
                self.half_open_in_flight = false;
                self.transition_to(CircuitState::Open, name, listeners);
            }
            CircuitState::Closed => {
                if self.failure_count >= config.failure_threshold {
                    self.transition_to(CircuitState::Open, name, listeners);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub(crate) fn force_open(&mut self, name: &str, listeners: &EventListeners<CircuitBreakerEvent>) {
        self.transition_to(CircuitState::Open, name, listeners);
    }

    pub(crate) fn reset(&mut self, name: &str, listeners: &EventListeners<CircuitBreakerEvent>) {
        self.failure_count = 0;
        self.success_count = 0;
        self.total_requests = 0;
        self.last_failure_time = None;
        self.last_response_time = None;
        self.avg_response_time_nanos = 0.0;
        self.half_open_in_flight = false;
        self.transition_to(CircuitState::Closed, name, listeners);
    }

    fn record_response_time(&mut self, duration: Duration) {
        // Simple running average over total_requests observed so far.
        let n = self.total_requests.max(1) as f64;
        let sample = duration.as_nanos() as f64;
        self.avg_response_time_nanos += (sample - self.avg_response_time_nanos) / n;
    }

    fn transition_to(
        &mut self,
        state: CircuitState,
        name: &str,
        listeners: &EventListeners<CircuitBreakerEvent>,
    ) {
        if self.state == state {
            return;
        }
        let from_state = self.state;

        listeners.emit(&CircuitBreakerEvent::StateTransition {
            service: name.to_string(),
            timestamp: Instant::now(),
            from_state,
            to_state: state,
        });

        #[cfg(feature = "tracing")]
        tracing::info!(service = name, from = ?from_state, to = ?state, "circuit breaker state transition");

        #[cfg(feature = "metrics")]
        {
            gauge!("circuit_breaker_state", "service" => name.to_string()).set(match state {
                CircuitState::Closed => 0.0,
                CircuitState::Open => 1.0,
                CircuitState::HalfOpen => 2.0,
            });
        }

        self.state = state;
        self.last_state_change = Instant::now();
        if state == CircuitState::Closed {
            self.failure_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listeners() -> EventListeners<CircuitBreakerEvent> {
        EventListeners::new()
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let mut circuit = Circuit::new();
        let config = CircuitBreakerConfig::new(3, Duration::from_millis(100));
        let l = listeners();

        assert!(circuit.try_acquire("x", &config, &l));
        circuit.record_failure("x", &config, Duration::from_millis(1), &l);
        assert_eq!(circuit.state(), CircuitState::Closed);

        assert!(circuit.try_acquire("x", &config, &l));
        circuit.record_failure("x", &config, Duration::from_millis(1), &l);
        assert_eq!(circuit.state(), CircuitState::Closed);

        assert!(circuit.try_acquire("x", &config, &l));
        circuit.record_failure("x", &config, Duration::from_millis(1), &l);
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[test]
    fn rejects_fast_while_open_then_half_opens_after_timeout() {
        let mut circuit = Circuit::new();
        let config = CircuitBreakerConfig::new(1, Duration::from_millis(20));
        let l = listeners();

        circuit.try_acquire("x", &config, &l);
        circuit.record_failure("x", &config, Duration::from_millis(1), &l);
        assert_eq!(circuit.state(), CircuitState::Open);

        assert!(!circuit.try_acquire("x", &config, &l));

        std::thread::sleep(Duration::from_millis(25));
        assert!(circuit.try_acquire("x", &config, &l));
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes_and_failure_reopens() {
        let config = CircuitBreakerConfig::new(1, Duration::from_millis(1));
        let l = listeners();

        let mut closing = Circuit::new();
        closing.try_acquire("x", &config, &l);
        closing.record_failure("x", &config, Duration::from_millis(1), &l);
        std::thread::sleep(Duration::from_millis(5));
        closing.try_acquire("x", &config, &l);
        closing.record_success("x", &config, Duration::from_millis(1), &l);
        assert_eq!(closing.state(), CircuitState::Closed);

        let mut reopening = Circuit::new();
        reopening.try_acquire("x", &config, &l);
        reopening.record_failure("x", &config, Duration::from_millis(1), &l);
        std::thread::sleep(Duration::from_millis(5));
        reopening.try_acquire("x", &config, &l);
        reopening.record_failure("x", &config, Duration::from_millis(1), &l);
        assert_eq!(reopening.state(), CircuitState::Open);
    }

    #[test]
    fn reset_clears_counters_and_closes() {
        let mut circuit = Circuit::new();
        let config = CircuitBreakerConfig::new(1, Duration::from_millis(100));
        let l = listeners();

        circuit.try_acquire("x", &config, &l);
        circuit.record_failure("x", &config, Duration::from_millis(1), &l);
        assert_eq!(circuit.state(), CircuitState::Open);

        circuit.reset("x", &l);
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.metrics().failure_count, 0);
    }
}
