//! Queue manager configuration, per spec.md §6's environment
//! configuration paragraph. A typed builder with `Default` baking in
//! the documented defaults, matching the teacher's
//! `*ConfigBuilder` pattern (e.g. `tower-resilience-circuitbreaker`'s
//! `CircuitBreakerConfigBuilder`) rather than a config-file crate.

/// What happens when a second `submit` arrives with a `request_id`
/// already registered to a live task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Fail the new submission with `Validation`.
    RejectNew,
    /// Cancel the live task (`reason = duplicate-policy`), admit the
    /// new one. Default.
    CancelPrevious,
    /// No duplicate check at all.
    Allow,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        DuplicatePolicy::CancelPrevious
    }
}

/// Queue-manager-wide configuration. Construct with [`QueueManagerConfig::builder`]
/// or use [`Default`] for spec.md's documented defaults.
#[derive(Debug, Clone)]
pub struct QueueManagerConfig {
    /// `[1, 10]`; default 2.
    pub concurrency: usize,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for QueueManagerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl QueueManagerConfig {
    pub fn builder() -> QueueManagerConfigBuilder {
        QueueManagerConfigBuilder::default()
    }
}

/// Builder for [`QueueManagerConfig`].
#[derive(Default)]
pub struct QueueManagerConfigBuilder {
    concurrency: Option<usize>,
    duplicate_policy: Option<DuplicatePolicy>,
}

impl QueueManagerConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = Some(n);
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = Some(policy);
        self
    }

    pub fn build(self) -> QueueManagerConfig {
        let defaults = QueueManagerConfig::default();
        QueueManagerConfig {
            concurrency: self.concurrency.unwrap_or(defaults.concurrency).clamp(1, 10),
            duplicate_policy: self.duplicate_policy.unwrap_or(defaults.duplicate_policy),
        }
    }
}

/// Validates a runtime `update_concurrency(n)` request. `n` must be an
/// integer already in `[1, 10]`; this function does not clamp, because
/// spec.md's boundary behaviors require out-of-range values to fail
/// with `Validation` rather than silently clamp.
pub fn validate_concurrency_update(n: i64) -> Result<usize, ()> {
    if (1..=10).contains(&n) {
        Ok(n as usize)
    } else {
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = QueueManagerConfig::default();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::CancelPrevious);
    }

    #[test]
    fn builder_clamps_concurrency_into_range() {
        assert_eq!(QueueManagerConfig::builder().concurrency(99).build().concurrency, 10);
        assert_eq!(QueueManagerConfig::builder().concurrency(0).build().concurrency, 1);
    }

    #[test]
    fn update_concurrency_rejects_out_of_range_or_non_integer_intent() {
        assert!(validate_concurrency_update(0).is_err());
        assert!(validate_concurrency_update(11).is_err());
        assert!(validate_concurrency_update(5).is_ok());
    }
}
