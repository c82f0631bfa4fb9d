//! Trait-at-the-seam boundaries for the collaborators spec.md lists as
//! out of scope (provider HTTP clients, the content-filter word list)
//! and the request/output shapes that cross them.
//!
//! Nothing here talks to a network or a word list; a real deployment
//! supplies its own implementation of each trait.

use thiserror::Error;

use crate::Priority;

/// One image-generation request, already past auth/routing (§1's
/// Non-goals: those live outside this crate).
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Caller-ranked providers to try; this crate always uses the
    /// first entry (spec.md's Non-goals exclude "rich routing/load
    /// balancing between providers" — provider selection is
    /// caller-supplied).
    pub providers: Vec<String>,
    pub user_id: String,
    pub request_id: Option<String>,
    pub priority: Priority,
    pub guidance: Option<f64>,
    /// Cost modifiers, passed straight through to
    /// `credit_guard::CostMatrix::credit_cost`.
    pub multiplier: Option<f64>,
    pub mixup: bool,
    pub mashup: bool,
}

impl GenerationRequest {
    /// The provider this request will actually run against.
    pub fn primary_provider(&self) -> Option<&str> {
        self.providers.first().map(String::as_str)
    }
}

/// What a successful generation produced.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub provider: String,
    pub image_url: String,
}

/// An error a [`ProviderClient`] can return. Maps onto
/// [`job_queue::WorkError`] inside the work function the service
/// builds: `Transient` is retried, `Validation` is not.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("provider rejected the request: {0}")]
    Validation(String),
}

/// One instance per remote image provider (OpenAI, Dezgo, Google, ...).
/// The HTTP client itself is an external collaborator; this crate only
/// needs the seam to run the control plane (queueing, retries,
/// circuit-breaking, credit accounting) standalone and testably.
#[async_trait::async_trait]
pub trait ProviderClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, ProviderError>;
}

/// A content-policy rejection, surfaced to the caller as `Validation`
/// per spec.md §7's `ContentPolicy` error kind.
#[derive(Debug, Clone, Error)]
#[error("content policy violation: {reason}")]
pub struct ContentViolation {
    pub reason: String,
}

/// External moderation/word-list collaborator. Word lists themselves
/// are out of scope (spec.md §1's Non-goals); this is the seam a real
/// deployment plugs one into.
#[async_trait::async_trait]
pub trait ContentFilter: Send + Sync {
    async fn check(&self, prompt: &str) -> Result<(), ContentViolation>;
}

/// A `ContentFilter` that accepts every prompt, for tests and for
/// deployments that enforce content policy upstream of this crate.
pub struct AllowAllContentFilter;

#[async_trait::async_trait]
impl ContentFilter for AllowAllContentFilter {
    async fn check(&self, _prompt: &str) -> Result<(), ContentViolation> {
        Ok(())
    }
}
