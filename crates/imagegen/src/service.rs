//! `ImageGenService`: wires the Queue Manager (C5), Circuit Breaker
//! Manager (C6), and Credit Guard (C7) together per spec.md §2's
//! control-flow diagram — Credit Guard admits, Queue Manager enqueues
//! and dispatches, the executor runs the work function under the
//! named provider circuit breaker, and Credit Guard settles on the
//! task's terminal outcome.

use std::collections::HashMap;
use std::sync::Arc;

use circuit_breaker::{CircuitBreakerManager, CircuitState, NamedServiceDefaults};
use credit_guard::{BalanceStore, CostMatrix, CreditGuard};
use job_queue::{AttemptContext, EventSink, QueueManager, SubmitOptions, WorkError, WorkFn};
use resilience_core::Clock;

use crate::collaborators::{ContentFilter, GenerationOutput, GenerationRequest, ProviderClient, ProviderError};
use crate::config::ImageGenConfig;
use crate::error::ApiError;

/// The image-generation job control plane, parameterized over the
/// durable balance store a deployment supplies.
///
/// Cheap to clone; clones share the same queue, breakers, and credit
/// guard.
pub struct ImageGenService<B: BalanceStore> {
    queue: QueueManager<GenerationOutput>,
    breakers: Arc<CircuitBreakerManager>,
    credits: Arc<CreditGuard<B>>,
    providers: Arc<HashMap<String, Arc<dyn ProviderClient>>>,
    content_filter: Arc<dyn ContentFilter>,
    default_timeout_ms: i64,
}

impl<B: BalanceStore> Clone for ImageGenService<B> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            breakers: self.breakers.clone(),
            credits: self.credits.clone(),
            providers: self.providers.clone(),
            content_filter: self.content_filter.clone(),
            default_timeout_ms: self.default_timeout_ms,
        }
    }
}

impl<B: BalanceStore + 'static> ImageGenService<B> {
    /// Builds a service from its configuration and collaborators.
    /// `providers` maps a provider name (as it would appear in
    /// [`GenerationRequest::providers`]) to the client that serves it.
    pub fn new(
        config: ImageGenConfig,
        balance_store: Arc<B>,
        cost_matrix: CostMatrix,
        providers: HashMap<String, Arc<dyn ProviderClient>>,
        content_filter: Arc<dyn ContentFilter>,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let breakers = Arc::new(CircuitBreakerManager::new());
        breakers.register(NamedServiceDefaults::PROVIDER_IMAGE_GENERATION, config.provider_breaker_config());

        let credits = Arc::new(CreditGuard::new(balance_store, cost_matrix, clock.clone()));
        let queue = QueueManager::with_config_and_clock(config.queue_config(), event_sink, clock);

        Self {
            queue,
            breakers,
            credits,
            providers: Arc::new(providers),
            content_filter,
            default_timeout_ms: config.default_timeout_ms,
        }
    }

    /// Runs one generation request through Credit Guard admission,
    /// queue submission, circuit-breaker-guarded execution, and
    /// settlement, per spec.md §2's control-flow diagram.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, ApiError> {
        self.content_filter
            .check(&request.prompt)
            .await
            .map_err(|violation| ApiError::Validation(violation.reason))?;

        let provider = request
            .primary_provider()
            .ok_or_else(|| ApiError::Validation("providers must not be empty".to_string()))?
            .to_string();

        if !self.providers.contains_key(&provider) {
            return Err(ApiError::Validation(format!("unknown provider: {provider}")));
        }

        // Fail fast on an open circuit (spec §7) rather than paying for a
        // queue round trip the breaker will reject anyway. The executor
        // retries a `Transient` work error, which would turn this into a
        // 500 once retries are exhausted instead of surfacing the open
        // circuit as backpressure.
        if let Some(status) = self.breakers.status(NamedServiceDefaults::PROVIDER_IMAGE_GENERATION) {
            if status.state == CircuitState::Open {
                return Err(ApiError::Backpressure { retry_after_secs: 60 });
            }
        }

        let authorized = self
            .credits
            .authorize(&request.user_id, &provider, request.multiplier, request.mixup, request.mashup)
            .await?;

        let work = self.build_work_fn(provider.clone(), request.clone());

        let options = SubmitOptions {
            request_id: request.request_id.clone(),
            user_id: Some(request.user_id.clone()),
            priority: request.priority,
            timeout_ms: Some(self.default_timeout_ms),
            ..Default::default()
        };

        let (handle, _cancel) = self.queue.submit(work, options).await?;

        let outcome = handle.await;
        let succeeded = outcome.is_ok();

        if let Err(settle_error) = self.credits.settle(&request.user_id, &provider, authorized, succeeded).await {
            #[cfg(feature = "tracing")]
            tracing::error!(
                user_id = %request.user_id,
                provider = %provider,
                error = %settle_error,
                "credit settlement failed after task completion"
            );
            if succeeded {
                return Err(ApiError::ServerError(format!(
                    "generation succeeded but settlement failed: {settle_error}"
                )));
            }
        }

        Ok(outcome?)
    }

    fn build_work_fn(&self, provider: String, request: GenerationRequest) -> WorkFn<GenerationOutput> {
        let providers = self.providers.clone();
        let breakers = self.breakers.clone();

        Arc::new(move |_ctx: AttemptContext| {
            let providers = providers.clone();
            let breakers = breakers.clone();
            let provider = provider.clone();
            let request = request.clone();
            Box::pin(async move {
                let client = providers
                    .get(&provider)
                    .cloned()
                    .ok_or_else(|| WorkError::Validation(format!("unknown provider: {provider}")))?;

                let result = breakers
                    .execute(NamedServiceDefaults::PROVIDER_IMAGE_GENERATION, || async {
                        client.generate(&request).await
                    })
                    .await;

                match result {
                    Ok(output) => Ok(output),
                    // The pre-check in `generate` catches an already-open
                    // circuit; reaching this arm means it flipped open in
                    // the race window between that check and here. Treated
                    // as non-retriable so a single attempt fails fast
                    // instead of retrying into a circuit that just opened.
                    Err(circuit_breaker::CircuitBreakerError::CircuitOpen { service }) => {
                        Err(WorkError::Validation(format!("circuit open: {service}")))
                    }
                    Err(circuit_breaker::CircuitBreakerError::Inner(ProviderError::Transient(message))) => {
                        Err(WorkError::Transient(message))
                    }
                    Err(circuit_breaker::CircuitBreakerError::Inner(ProviderError::Validation(message))) => {
                        Err(WorkError::Validation(message))
                    }
                }
            })
        })
    }

    /// Cancels a live request by `request_id`.
    pub fn cancel(&self, request_id: &str) -> bool {
        self.queue.cancel(request_id)
    }

    /// Snapshot for the `GET /api/circuit-breakers/status` admin route
    /// (§6).
    pub fn circuit_breaker_status(&self, service: &str) -> Option<circuit_breaker::CircuitMetrics> {
        self.breakers.status(service)
    }

    pub fn circuit_breaker_status_all(&self) -> HashMap<String, circuit_breaker::CircuitMetrics> {
        self.breakers.status_all()
    }

    /// Resets a named service's breaker, for the
    /// `POST /api/circuit-breakers/reset` admin route (§6).
    pub fn reset_circuit_breaker(&self, service: Option<&str>) {
        match service {
            Some(service) => self.breakers.reset(service),
            None => self.breakers.reset_all(),
        }
    }

    /// Live queue health, for any `/api/queue/overview` style admin
    /// route.
    pub fn queue_overview(&self) -> job_queue::Overview {
        self.queue.get_overview()
    }

    pub fn queue_metrics_snapshot(&self) -> Vec<job_queue::MetricEvent> {
        self.queue.get_metrics_snapshot()
    }

    /// Drains in-flight work and stops accepting new submissions, per
    /// spec.md §4.9.
    pub async fn graceful_shutdown(&self, timeout_ms: u64) {
        self.queue.graceful_shutdown(timeout_ms).await
    }

    pub fn resume_accepting(&self) {
        self.queue.resume_accepting()
    }
}
