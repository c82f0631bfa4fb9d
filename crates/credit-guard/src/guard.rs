use crate::cost::CostMatrix;
use crate::error::CreditGuardError;
use crate::store::{BalanceStore, Transaction};
use resilience_core::Clock;
use std::sync::Arc;

#[cfg(feature = "metrics")]
use metrics::counter;

/// A cost stashed on a request context by [`CreditGuard::authorize`],
/// carried through admission and execution to
/// [`CreditGuard::settle`] without a second cost computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizedCost {
    pub required: u64,
}

/// The pre-flight admission check and post-execution debit described in
/// spec.md §4.7.
///
/// `authorize` never debits; it only validates that the user can afford
/// the request. `settle` performs the single atomic debit on success,
/// and is a deliberate no-op on failure/cancellation/timeout, since no
/// debit ever occurred to refund.
pub struct CreditGuard<S: BalanceStore> {
    store: Arc<S>,
    cost_matrix: CostMatrix,
    clock: Arc<dyn Clock>,
}

impl<S: BalanceStore> CreditGuard<S> {
    pub fn new(store: Arc<S>, cost_matrix: CostMatrix, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cost_matrix,
            clock,
        }
    }

    /// Computes the required cost and checks it against the user's
    /// current balance. Does not touch the balance store's write path.
    pub async fn authorize(
        &self,
        user_id: &str,
        provider: &str,
        multiplier: Option<f64>,
        mixup: bool,
        mashup: bool,
    ) -> Result<AuthorizedCost, CreditGuardError> {
        let required = self
            .cost_matrix
            .credit_cost(provider, multiplier, mixup, mashup)
            .ok_or_else(|| CreditGuardError::UnknownProvider {
                provider: provider.to_string(),
            })?;

        let current = self.store.balance(user_id).await?;

        if current < required {
            #[cfg(feature = "metrics")]
            counter!("credit_guard_admissions_total", "outcome" => "insufficient_credits")
                .increment(1);

            return Err(CreditGuardError::InsufficientCredits {
                required,
                current,
                shortfall: required - current,
            });
        }

        #[cfg(feature = "metrics")]
        counter!("credit_guard_admissions_total", "outcome" => "authorized").increment(1);

        Ok(AuthorizedCost { required })
    }

    /// Called exactly once per task at its terminal transition. Debits
    /// only when `succeeded` is true; any other terminal outcome is a
    /// no-op because the pre-flight check never touched the balance.
    pub async fn settle(
        &self,
        user_id: &str,
        provider: &str,
        authorized: AuthorizedCost,
        succeeded: bool,
    ) -> Result<(), CreditGuardError> {
        if !succeeded {
            #[cfg(feature = "tracing")]
            tracing::debug!(user_id, provider, "task did not succeed; no debit");
            return Ok(());
        }

        let txn = Transaction {
            user_id: user_id.to_string(),
            provider: provider.to_string(),
            count: 1,
            cost: authorized.required,
            timestamp: self.clock.epoch_now(),
        };

        self.store
            .debit(user_id, authorized.required, txn)
            .await?;

        #[cfg(feature = "metrics")]
        counter!("credit_guard_debits_total").increment(1);
        #[cfg(feature = "tracing")]
        tracing::info!(user_id, provider, cost = authorized.required, "credits debited");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use resilience_core::TestClock;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeStore {
        balances: Mutex<std::collections::HashMap<String, u64>>,
        transactions: Mutex<Vec<Transaction>>,
    }

    impl FakeStore {
        fn with_balance(user_id: &str, balance: u64) -> Self {
            let mut balances = std::collections::HashMap::new();
            balances.insert(user_id.to_string(), balance);
            Self {
                balances: Mutex::new(balances),
                transactions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl BalanceStore for FakeStore {
        async fn balance(&self, user_id: &str) -> Result<u64, StoreError> {
            self.balances
                .lock()
                .unwrap()
                .get(user_id)
                .copied()
                .ok_or_else(|| StoreError::UserNotFound {
                    user_id: user_id.to_string(),
                })
        }

        async fn debit(
            &self,
            user_id: &str,
            amount: u64,
            txn: Transaction,
        ) -> Result<(), StoreError> {
            let mut balances = self.balances.lock().unwrap();
            let balance = balances
                .get_mut(user_id)
                .ok_or_else(|| StoreError::UserNotFound {
                    user_id: user_id.to_string(),
                })?;
            *balance -= amount;
            self.transactions.lock().unwrap().push(txn);
            Ok(())
        }
    }

    fn matrix() -> CostMatrix {
        let mut m = CostMatrix::default();
        m.set_base_credits("openai", 10);
        m
    }

    #[tokio::test]
    async fn authorize_succeeds_when_balance_covers_cost() {
        let store = Arc::new(FakeStore::with_balance("u1", 100));
        let clock = Arc::new(TestClock::new());
        let guard = CreditGuard::new(store, matrix(), clock);

        let authorized = guard.authorize("u1", "openai", None, false, false).await.unwrap();
        assert_eq!(authorized.required, 10);
    }

    #[tokio::test]
    async fn authorize_fails_with_shortfall_when_balance_is_too_low() {
        let store = Arc::new(FakeStore::with_balance("u1", 3));
        let clock = Arc::new(TestClock::new());
        let guard = CreditGuard::new(store, matrix(), clock);

        let err = guard
            .authorize("u1", "openai", None, false, false)
            .await
            .unwrap_err();
        match err {
            CreditGuardError::InsufficientCredits {
                required,
                current,
                shortfall,
            } => {
                assert_eq!(required, 10);
                assert_eq!(current, 3);
                assert_eq!(shortfall, 7);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn settle_debits_only_on_success() {
        let store = Arc::new(FakeStore::with_balance("u1", 100));
        let clock = Arc::new(TestClock::new());
        let guard = CreditGuard::new(Arc::clone(&store), matrix(), clock);

        let authorized = guard.authorize("u1", "openai", None, false, false).await.unwrap();

        guard.settle("u1", "openai", authorized, false).await.unwrap();
        assert_eq!(store.balance("u1").await.unwrap(), 100, "failed task must not debit");

        guard.settle("u1", "openai", authorized, true).await.unwrap();
        assert_eq!(store.balance("u1").await.unwrap(), 90, "succeeded task debits exactly once");
        assert_eq!(store.transactions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clock_advance_is_reflected_in_transaction_timestamp() {
        let store = Arc::new(FakeStore::with_balance("u1", 100));
        let clock = Arc::new(TestClock::new());
        let before = clock.epoch_now();
        clock.advance(Duration::from_secs(30));
        let guard = CreditGuard::new(Arc::clone(&store), matrix(), clock);

        let authorized = guard.authorize("u1", "openai", None, false, false).await.unwrap();
        guard.settle("u1", "openai", authorized, true).await.unwrap();

        let txn = store.transactions.lock().unwrap()[0].clone();
        assert!(txn.timestamp >= before);
    }
}
