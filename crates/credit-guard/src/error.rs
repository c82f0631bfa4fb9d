use crate::store::StoreError;
use thiserror::Error;

/// Errors returned by [`crate::CreditGuard`].
#[derive(Debug, Error)]
pub enum CreditGuardError {
    /// The user's balance is below the computed cost. Carried verbatim
    /// to the caller as the `insufficient_credits` response body.
    #[error("insufficient credits: requires {required}, has {current} (short {shortfall})")]
    InsufficientCredits {
        required: u64,
        current: u64,
        shortfall: u64,
    },

    /// The provider named is not in the cost matrix.
    #[error("unknown provider: {provider}")]
    UnknownProvider { provider: String },

    /// The balance store failed during a pre-flight check or debit.
    #[error("balance store error: {0}")]
    Store(#[from] StoreError),
}

impl CreditGuardError {
    pub fn is_insufficient_credits(&self) -> bool {
        matches!(self, CreditGuardError::InsufficientCredits { .. })
    }
}
