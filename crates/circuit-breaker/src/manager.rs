use crate::circuit::{Circuit, CircuitMetrics, CircuitState};
use crate::config::{CircuitBreakerConfig, NamedServiceDefaults};
use crate::error::CircuitBreakerError;
use crate::events::CircuitBreakerEvent;
use resilience_core::{EventListener, EventListeners};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

struct ServiceEntry {
    circuit: Mutex<Circuit>,
    config: CircuitBreakerConfig,
}

/// Guards outbound calls to named downstream services with an
/// independent CLOSED/OPEN/HALF_OPEN breaker per service (spec.md §4.6).
///
/// `ai_service`, `provider_image_generation`, `database`, and
/// `file_system` are pre-registered at construction with the thresholds
/// spec.md documents; callers may `register` additional services with
/// custom configuration.
pub struct CircuitBreakerManager {
    services: Mutex<HashMap<String, Arc<ServiceEntry>>>,
    default_config: CircuitBreakerConfig,
    listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreakerManager {
    /// Creates a manager with the four named services from spec.md §4.6
    /// pre-registered at their documented thresholds.
    pub fn new() -> Self {
        let manager = Self {
            services: Mutex::new(HashMap::new()),
            default_config: CircuitBreakerConfig::default(),
            listeners: EventListeners::new(),
        };
        for (name, config) in NamedServiceDefaults::all() {
            manager.register(name, config);
        }
        manager
    }

    /// Registers a listener for every circuit breaker event across all
    /// services managed by this instance.
    pub fn add_listener<L>(&mut self, listener: L)
    where
        L: EventListener<CircuitBreakerEvent> + 'static,
    {
        self.listeners.add(listener);
    }

    /// Registers (or reconfigures) a named service's breaker. Does not
    /// reset an already-open circuit's state.
    pub fn register(&self, name: impl Into<String>, config: CircuitBreakerConfig) {
        let name = name.into();
        let mut services = self.services.lock().unwrap();
        match services.get(&name) {
            Some(existing) => {
                let updated = Arc::new(ServiceEntry {
                    circuit: Mutex::new(std::mem::replace(
                        &mut *existing.circuit.lock().unwrap(),
                        Circuit::new(),
                    )),
                    config,
                });
                services.insert(name, updated);
            }
            None => {
                services.insert(
                    name,
                    Arc::new(ServiceEntry {
                        circuit: Mutex::new(Circuit::new()),
                        config,
                    }),
                );
            }
        }
    }

    fn entry_or_default(&self, name: &str) -> Arc<ServiceEntry> {
        let mut services = self.services.lock().unwrap();
        if let Some(entry) = services.get(name) {
            return Arc::clone(entry);
        }
        let entry = Arc::new(ServiceEntry {
            circuit: Mutex::new(Circuit::new()),
            config: self.default_config,
        });
        services.insert(name.to_string(), Arc::clone(&entry));
        entry
    }

    /// Runs `call` under the named service's breaker.
    ///
    /// Fails fast with [`CircuitBreakerError::CircuitOpen`] without
    /// running `call` if the circuit is open (or half-open with a trial
    /// already in flight); otherwise runs it and records success or
    /// failure based on `Result::is_ok`.
    pub async fn execute<F, Fut, T, E>(
        &self,
        service: &str,
        call: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let entry = self.entry_or_default(service);

        let permitted = {
            let mut circuit = entry.circuit.lock().unwrap();
            circuit.try_acquire(service, &entry.config, &self.listeners)
        };

        if !permitted {
            return Err(CircuitBreakerError::CircuitOpen {
                service: service.to_string(),
            });
        }

        let start = Instant::now();
        let result = call().await;
        let duration = start.elapsed();

        {
            let mut circuit = entry.circuit.lock().unwrap();
            match &result {
                Ok(_) => circuit.record_success(service, &entry.config, duration, &self.listeners),
                Err(_) => circuit.record_failure(service, &entry.config, duration, &self.listeners),
            }
        }

        result.map_err(CircuitBreakerError::Inner)
    }

    /// Resets a single named service's breaker to CLOSED with zeroed
    /// counters.
    pub fn reset(&self, service: &str) {
        if let Some(entry) = self.services.lock().unwrap().get(service) {
            entry
                .circuit
                .lock()
                .unwrap()
                .reset(service, &self.listeners);
        }
    }

    /// Resets every registered service's breaker.
    pub fn reset_all(&self) {
        let names: Vec<String> = self.services.lock().unwrap().keys().cloned().collect();
        for name in names {
            self.reset(&name);
        }
    }

    /// Forces a named service's breaker open, e.g. from a health check
    /// integration deciding a dependency is unhealthy.
    pub fn force_open(&self, service: &str) {
        let entry = self.entry_or_default(service);
        entry
            .circuit
            .lock()
            .unwrap()
            .force_open(service, &self.listeners);
    }

    /// A snapshot of one named service's breaker, if registered.
    pub fn status(&self, service: &str) -> Option<CircuitMetrics> {
        self.services
            .lock()
            .unwrap()
            .get(service)
            .map(|entry| entry.circuit.lock().unwrap().metrics())
    }

    /// Snapshots of every registered service's breaker, for the
    /// `GET /api/circuit-breakers/status` admin surface.
    pub fn status_all(&self) -> HashMap<String, CircuitMetrics> {
        self.services
            .lock()
            .unwrap()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.circuit.lock().unwrap().metrics()))
            .collect()
    }

    /// True if every registered service is CLOSED.
    pub fn all_healthy(&self) -> bool {
        self.status_all()
            .values()
            .all(|m| m.state == CircuitState::Closed)
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn pre_registered_services_have_documented_defaults() {
        let manager = CircuitBreakerManager::new();
        for name in [
            NamedServiceDefaults::AI_SERVICE,
            NamedServiceDefaults::PROVIDER_IMAGE_GENERATION,
            NamedServiceDefaults::DATABASE,
            NamedServiceDefaults::FILE_SYSTEM,
        ] {
            assert!(manager.status(name).is_some(), "{name} should be pre-registered");
        }
    }

    #[tokio::test]
    async fn opens_after_threshold_then_fails_fast() {
        let manager = CircuitBreakerManager::new();
        manager.register("x", CircuitBreakerConfig::new(3, Duration::from_millis(100)));

        let attempts = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let attempts = Arc::clone(&attempts);
            let result: Result<(), CircuitBreakerError<&str>> = manager
                .execute("x", || async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("boom")
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(manager.status("x").unwrap().state, CircuitState::Open);

        let attempts_clone = Arc::clone(&attempts);
        let result: Result<(), CircuitBreakerError<&str>> = manager
            .execute("x", || async move {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
        // The fast-failed 4th call never ran the closure.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn half_opens_after_timeout_and_closes_on_success() {
        let manager = CircuitBreakerManager::new();
        manager.register("x", CircuitBreakerConfig::new(3, Duration::from_millis(50)));

        for _ in 0..3 {
            let _: Result<(), CircuitBreakerError<&str>> =
                manager.execute("x", || async { Err("boom") }).await;
        }
        assert_eq!(manager.status("x").unwrap().state, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;

        let result: Result<&str, CircuitBreakerError<&str>> =
            manager.execute("x", || async { Ok("ok") }).await;
        assert!(result.is_ok());
        assert_eq!(manager.status("x").unwrap().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn reset_all_closes_every_service() {
        let manager = CircuitBreakerManager::new();
        manager.register("x", CircuitBreakerConfig::new(1, Duration::from_secs(60)));
        let _: Result<(), CircuitBreakerError<&str>> =
            manager.execute("x", || async { Err("boom") }).await;
        assert_eq!(manager.status("x").unwrap().state, CircuitState::Open);

        manager.reset_all();
        assert_eq!(manager.status("x").unwrap().state, CircuitState::Closed);
        assert!(manager.all_healthy());
    }
}
