//! Umbrella crate: collaborator traits, the unified [`ApiError`]
//! taxonomy and its HTTP mapping, environment-driven configuration, and
//! [`ImageGenService`], which wires the queue manager, circuit
//! breakers, and credit guard into the control plane described in
//! spec.md §2.

mod collaborators;
mod config;
mod error;
mod service;

pub use collaborators::{
    AllowAllContentFilter, ContentFilter, ContentViolation, GenerationOutput, GenerationRequest, ProviderClient,
    ProviderError,
};
pub use config::ImageGenConfig;
pub use error::ApiError;
pub use job_queue::Priority;
pub use service::ImageGenService;

pub use credit_guard::{BalanceStore, CostMatrix, CreditGuardError, StoreError, Transaction};
