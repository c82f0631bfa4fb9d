use std::time::SystemTime;
use thiserror::Error;

/// A single debit, appended atomically alongside the balance write that
/// caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub user_id: String,
    pub provider: String,
    pub count: u32,
    pub cost: u64,
    pub timestamp: SystemTime,
}

/// Errors surfaced by a [`BalanceStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user '{user_id}' not found")]
    UserNotFound { user_id: String },
    #[error("balance store unavailable: {0}")]
    Unavailable(String),
}

/// External collaborator owning the durable balance and transaction
/// log. The core only requires that `debit` be atomic with respect to
/// concurrent `balance` reads — no refund path exists because debit
/// only ever happens after a generation has already succeeded.
#[async_trait::async_trait]
pub trait BalanceStore: Send + Sync {
    /// The user's current credit balance.
    async fn balance(&self, user_id: &str) -> Result<u64, StoreError>;

    /// Atomically subtracts `amount` from the user's balance and
    /// appends `txn` to the transaction log as one logical write.
    async fn debit(&self, user_id: &str, amount: u64, txn: Transaction) -> Result<(), StoreError>;
}
