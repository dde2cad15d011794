//! Streak freeze purchases.

use super::errors::{StreakError, StreakResult};
use crate::db::StreakFreezeRepository;
use crate::profile::UserId;
use crate::wallet::{TransactionKind, WalletError, WalletManager};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default freeze price in tokens
pub const DEFAULT_FREEZE_PRICE: i64 = 50;

/// Default validity of a purchased freeze
pub const DEFAULT_FREEZE_VALIDITY_DAYS: i64 = 365;

/// A purchased streak freeze. Forgives one multi-day gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakFreeze {
    pub id: i64,
    pub user_id: UserId,
    pub used: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl StreakFreeze {
    /// Unused and not yet expired
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at > now
    }
}

/// Sells streak freezes for tokens
#[derive(Clone)]
pub struct FreezeShop {
    wallet: WalletManager,
    freezes: Arc<dyn StreakFreezeRepository>,
    price: i64,
    validity: Duration,
}

impl FreezeShop {
    pub fn new(
        wallet: WalletManager,
        freezes: Arc<dyn StreakFreezeRepository>,
        price: i64,
        validity: Duration,
    ) -> Self {
        Self {
            wallet,
            freezes,
            price,
            validity,
        }
    }

    pub fn price(&self) -> i64 {
        self.price
    }

    /// Whether the user holds a usable freeze
    pub async fn has_freeze(&self, user_id: UserId, now: DateTime<Utc>) -> StreakResult<bool> {
        Ok(self.freezes.find_unused_freeze(user_id, now).await?.is_some())
    }

    /// Buy a freeze for `price` tokens.
    ///
    /// # Errors
    ///
    /// * `StreakError::AlreadyHasFreeze` - An unused freeze is already held
    /// * `StreakError::Wallet` - Insufficient balance or unknown user
    pub async fn purchase(&self, user_id: UserId, now: DateTime<Utc>) -> StreakResult<StreakFreeze> {
        if self.has_freeze(user_id, now).await? {
            return Err(StreakError::AlreadyHasFreeze);
        }

        let key = format!("freeze:{}:{}", user_id, uuid::Uuid::new_v4());
        self.wallet
            .debit(
                user_id,
                self.price,
                TransactionKind::Spend,
                "Streak freeze purchase",
                None,
                key.clone(),
            )
            .await?;

        match self
            .freezes
            .insert_freeze(user_id, now + self.validity, now)
            .await
        {
            Ok(Some(freeze)) => {
                log::info!("User {} bought streak freeze {}", user_id, freeze.id);
                Ok(freeze)
            }
            // A concurrent purchase won the single-unused-freeze slot
            Ok(None) => {
                self.refund(user_id, &key).await;
                Err(StreakError::AlreadyHasFreeze)
            }
            Err(e) => {
                self.refund(user_id, &key).await;
                Err(e.into())
            }
        }
    }

    async fn refund(&self, user_id: UserId, purchase_key: &str) {
        let result = self
            .wallet
            .credit(
                user_id,
                self.price,
                TransactionKind::Refund,
                "Streak freeze refund",
                None,
                format!("{purchase_key}:refund"),
            )
            .await;
        match result {
            Ok(_) | Err(WalletError::DuplicateTransaction(_)) => {}
            Err(e) => log::error!(
                "User {}: failed to refund freeze purchase {}: {}",
                user_id,
                purchase_key,
                e
            ),
        }
    }
}
