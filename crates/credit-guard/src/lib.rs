//! Pre-flight balance admission and post-execution debit for image
//! generation jobs (spec.md §4.7).
//!
//! [`CreditGuard::authorize`] is the admission-time check: it computes
//! the provider's effective cost via [`CostMatrix::credit_cost`] and
//! rejects with [`CreditGuardError::InsufficientCredits`] when the
//! user's balance is too low, without touching the balance store's
//! write path. [`CreditGuard::settle`] is called exactly once per task
//! at its terminal transition and debits only when the task succeeded;
//! every other outcome is a no-op since no debit ever occurred.

mod cost;
mod error;
mod guard;
mod store;

pub use cost::CostMatrix;
pub use error::CreditGuardError;
pub use guard::{AuthorizedCost, CreditGuard};
pub use store::{BalanceStore, StoreError, Transaction};
