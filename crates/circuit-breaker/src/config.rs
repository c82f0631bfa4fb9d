use std::time::Duration;

/// Per-service circuit breaker configuration.
///
/// Unlike the sliding-window breaker this workspace's teacher crate
/// implements for generic Tower services, spec.md's breaker counts
/// consecutive failures: it opens once `failure_count` reaches
/// `failure_threshold`, and a single trial call in `HalfOpen` decides
/// whether it closes again.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Number of failures (since the last reset/close) that opens the
    /// circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call.
    pub open_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Creates a config with the given threshold and timeout.
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            open_timeout,
        }
    }
}

impl Default for CircuitBreakerConfig {
    /// `failure_threshold = 5`, `open_timeout = 60s`, spec.md §3's
    /// documented defaults.
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
        }
    }
}

/// The four named services spec.md §4.6 requires pre-registered at
/// construction, with their documented thresholds and timeouts.
pub struct NamedServiceDefaults;

impl NamedServiceDefaults {
    /// `ai_service`: threshold 2, timeout 30s.
    pub const AI_SERVICE: &'static str = "ai_service";
    /// `provider_image_generation`: threshold 3, timeout 120s.
    pub const PROVIDER_IMAGE_GENERATION: &'static str = "provider_image_generation";
    /// `database`: threshold 2, timeout 10s.
    pub const DATABASE: &'static str = "database";
    /// `file_system`: threshold 1, timeout 15s.
    pub const FILE_SYSTEM: &'static str = "file_system";

    /// Returns the `(name, config)` pairs to register at construction.
    pub fn all() -> Vec<(&'static str, CircuitBreakerConfig)> {
        vec![
            (
                Self::AI_SERVICE,
                CircuitBreakerConfig::new(2, Duration::from_secs(30)),
            ),
            (
                Self::PROVIDER_IMAGE_GENERATION,
                CircuitBreakerConfig::new(3, Duration::from_secs(120)),
            ),
            (
                Self::DATABASE,
                CircuitBreakerConfig::new(2, Duration::from_secs(10)),
            ),
            (
                Self::FILE_SYSTEM,
                CircuitBreakerConfig::new(1, Duration::from_secs(15)),
            ),
        ]
    }
}
