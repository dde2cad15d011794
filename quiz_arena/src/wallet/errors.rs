//! Wallet error types.

use crate::db::RepositoryError;
use crate::profile::UserId;
use thiserror::Error;

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    /// Storage error
    #[error("Storage error: {0}")]
    Repository(#[from] RepositoryError),

    /// Insufficient balance
    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        user_id: UserId,
        available: i64,
        required: i64,
    },

    /// No profile holds a balance for this user
    #[error("Wallet not found for user {0}")]
    WalletNotFound(UserId),

    /// Duplicate transaction (idempotency key already used)
    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    /// Invalid amount (must be positive)
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Balance would overflow
    #[error("Balance overflow")]
    BalanceOverflow,
}

impl WalletError {
    /// Get a client-safe error message that doesn't leak storage details or user IDs
    pub fn client_message(&self) -> String {
        match self {
            WalletError::Repository(_) => "Internal server error".to_string(),
            WalletError::WalletNotFound(_) => "Wallet not found".to_string(),
            _ => self.to_string(),
        }
    }

    /// Transient failures worth retrying under the same idempotency key
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Repository(_))
    }
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;
