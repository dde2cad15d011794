//! Streak error types.

use crate::db::RepositoryError;
use crate::profile::UserId;
use crate::wallet::WalletError;
use thiserror::Error;

/// Streak errors
#[derive(Debug, Error)]
pub enum StreakError {
    /// Storage error
    #[error("Storage error: {0}")]
    Repository(#[from] RepositoryError),

    /// Wallet error while buying a freeze
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    /// User not found
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Only one unused freeze may be held at a time
    #[error("User already holds an unused streak freeze")]
    AlreadyHasFreeze,
}

impl StreakError {
    /// Get a client-safe error message
    pub fn client_message(&self) -> String {
        match self {
            StreakError::Repository(_) => "Internal server error".to_string(),
            StreakError::Wallet(e) => e.client_message(),
            StreakError::UserNotFound(_) => "User not found".to_string(),
            StreakError::AlreadyHasFreeze => self.to_string(),
        }
    }
}

/// Result type for streak operations
pub type StreakResult<T> = Result<T, StreakError>;
