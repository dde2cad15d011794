//! Wallet manager: per-user serialized ledger writes with idempotency keys.

use super::{
    errors::{WalletError, WalletResult},
    models::{LedgerOutcome, NewTransaction, RelatedEntity, TransactionKind, WalletTransaction},
};
use crate::db::LedgerRepository;
use crate::profile::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Wallet manager
///
/// Every balance mutation for a user runs while holding that user's lock, so
/// `balance_after` snapshots in the ledger form a gap-free chain even when a
/// tournament settlement and a daily session finish credit the same user at
/// the same time.
#[derive(Clone)]
pub struct WalletManager {
    ledger: Arc<dyn LedgerRepository>,
    user_locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl WalletManager {
    /// Create a new wallet manager
    pub fn new(ledger: Arc<dyn LedgerRepository>) -> Self {
        Self {
            ledger,
            user_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current balance
    pub async fn balance(&self, user_id: UserId) -> WalletResult<i64> {
        self.ledger
            .balance(user_id)
            .await?
            .ok_or(WalletError::WalletNotFound(user_id))
    }

    /// Most recent transactions first
    pub async fn history(&self, user_id: UserId, limit: i64) -> WalletResult<Vec<WalletTransaction>> {
        Ok(self.ledger.history(user_id, limit.clamp(1, 500)).await?)
    }

    /// Look up a transaction by idempotency key
    pub async fn find_transaction(&self, key: &str) -> WalletResult<Option<WalletTransaction>> {
        Ok(self.ledger.find_by_key(key).await?)
    }

    /// Add tokens to a user's balance
    ///
    /// # Errors
    ///
    /// * `WalletError::InvalidAmount` - `amount` is not positive
    /// * `WalletError::DuplicateTransaction` - Idempotency key already used
    /// * `WalletError::WalletNotFound` - Unknown user
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: i64,
        kind: TransactionKind,
        description: impl Into<String>,
        related: Option<RelatedEntity>,
        idempotency_key: impl Into<String>,
    ) -> WalletResult<i64> {
        if amount <= 0 {
            return Err(WalletError::InvalidAmount(amount));
        }

        let tx = self
            .apply(NewTransaction {
                user_id,
                amount,
                kind,
                description: description.into(),
                related,
                idempotency_key: idempotency_key.into(),
            })
            .await?;

        Ok(tx.balance_after)
    }

    /// Remove tokens from a user's balance
    ///
    /// # Errors
    ///
    /// * `WalletError::InsufficientBalance` - Not enough tokens
    /// * `WalletError::InvalidAmount` - `amount` is not positive
    /// * `WalletError::DuplicateTransaction` - Idempotency key already used
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: i64,
        kind: TransactionKind,
        description: impl Into<String>,
        related: Option<RelatedEntity>,
        idempotency_key: impl Into<String>,
    ) -> WalletResult<i64> {
        if amount <= 0 {
            return Err(WalletError::InvalidAmount(amount));
        }

        let tx = self
            .apply(NewTransaction {
                user_id,
                amount: -amount,
                kind,
                description: description.into(),
                related,
                idempotency_key: idempotency_key.into(),
            })
            .await?;

        Ok(tx.balance_after)
    }

    async fn apply(&self, tx: NewTransaction) -> WalletResult<WalletTransaction> {
        let user_id = tx.user_id;
        let amount = tx.amount;
        let _guard = self.lock_user(user_id).await;

        match self.ledger.apply(&tx).await? {
            LedgerOutcome::Applied(record) => {
                log::debug!(
                    "Wallet {}: {} {} ({}), balance {}",
                    user_id,
                    record.kind,
                    record.amount,
                    record.idempotency_key,
                    record.balance_after
                );
                Ok(record)
            }
            LedgerOutcome::Duplicate(existing) => {
                Err(WalletError::DuplicateTransaction(existing.idempotency_key))
            }
            LedgerOutcome::InsufficientBalance { available } => {
                Err(WalletError::InsufficientBalance {
                    user_id,
                    available,
                    required: -amount,
                })
            }
            LedgerOutcome::Overflow => Err(WalletError::BalanceOverflow),
            LedgerOutcome::UserNotFound => Err(WalletError::WalletNotFound(user_id)),
        }
    }

    async fn lock_user(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.user_locks.lock().await;
            // Forget locks nobody else holds a handle to
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
