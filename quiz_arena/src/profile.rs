//! User profile fields owned or touched by the arena core.

use crate::streak::StreakState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User ID type
pub type UserId = i64;

/// Profile subset read and written by the core. Identity data lives elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    /// Token balance; mutated only through the wallet ledger
    pub tokens: i64,
    pub streak: StreakState,
    pub total_games: i64,
    pub total_wins: i64,
    pub tournaments_joined: i64,
    pub tournaments_won: i64,
    pub daily_sessions_played: i64,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(id: UserId, display_name: impl Into<String>, tokens: i64) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            tokens,
            streak: StreakState::default(),
            total_games: 0,
            total_wins: 0,
            tournaments_joined: 0,
            tournaments_won: 0,
            daily_sessions_played: 0,
            created_at: Utc::now(),
        }
    }
}
