//! Wallet data models.

use crate::profile::UserId;
use crate::tournament::models::TournamentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Tokens earned from play
    Earn,
    /// Entry fees and purchases
    Spend,
    /// Tournament prizes
    Reward,
    /// Returned entry fees
    Refund,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Earn => "earn",
            TransactionKind::Spend => "spend",
            TransactionKind::Reward => "reward",
            TransactionKind::Refund => "refund",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "earn" => Some(TransactionKind::Earn),
            "spend" => Some(TransactionKind::Spend),
            "reward" => Some(TransactionKind::Reward),
            "refund" => Some(TransactionKind::Refund),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity a transaction originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RelatedEntity {
    Tournament(TournamentId),
    DailySession(i64),
    StreakFreeze(i64),
}

impl RelatedEntity {
    /// Storage form: (kind, id)
    pub fn to_parts(self) -> (&'static str, i64) {
        match self {
            RelatedEntity::Tournament(id) => ("tournament", id),
            RelatedEntity::DailySession(id) => ("daily_session", id),
            RelatedEntity::StreakFreeze(id) => ("streak_freeze", id),
        }
    }

    pub fn from_parts(kind: Option<&str>, id: Option<i64>) -> Option<Self> {
        match (kind?, id?) {
            ("tournament", id) => Some(RelatedEntity::Tournament(id)),
            ("daily_session", id) => Some(RelatedEntity::DailySession(id)),
            ("streak_freeze", id) => Some(RelatedEntity::StreakFreeze(id)),
            _ => None,
        }
    }
}

/// Immutable ledger record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: i64,
    pub user_id: UserId,
    /// Signed: credits positive, debits negative
    pub amount: i64,
    pub kind: TransactionKind,
    pub description: String,
    pub related: Option<RelatedEntity>,
    pub idempotency_key: String,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

/// Ledger append request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub amount: i64,
    pub kind: TransactionKind,
    pub description: String,
    pub related: Option<RelatedEntity>,
    pub idempotency_key: String,
}

/// Result of an atomic balance update plus append
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    Applied(WalletTransaction),
    /// The idempotency key already exists; nothing changed
    Duplicate(WalletTransaction),
    InsufficientBalance { available: i64 },
    Overflow,
    UserNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_related_entity_storage_parts() {
        let related = RelatedEntity::Tournament(12);
        let (kind, id) = related.to_parts();
        assert_eq!(RelatedEntity::from_parts(Some(kind), Some(id)), Some(related));
        assert_eq!(RelatedEntity::from_parts(None, Some(3)), None);
        assert_eq!(RelatedEntity::from_parts(Some("battle"), Some(3)), None);
    }

    #[test]
    fn test_kind_parse() {
        for kind in [
            TransactionKind::Earn,
            TransactionKind::Spend,
            TransactionKind::Reward,
            TransactionKind::Refund,
        ] {
            assert_eq!(TransactionKind::parse(kind.as_str()), Some(kind));
        }
    }
}
