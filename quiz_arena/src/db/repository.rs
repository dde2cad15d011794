//! Repository trait definitions for testability and dependency injection.
//!
//! Every collaborator the arena core persists through is a trait here, with a
//! PostgreSQL implementation in [`super::postgres`] and an in-memory one in
//! [`super::memory`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use super::timeouts::TimeoutError;
use crate::leaderboard::{LeaderboardEntry, LeaderboardKey, Period, ScoreContribution};
use crate::profile::{UserId, UserProfile};
use crate::questions::{Question, QuestionId};
use crate::session::{DailySession, NewDailySession};
use crate::streak::{StreakFreeze, StreakOutcome, StreakState};
use crate::tournament::models::{
    AppendOutcome, NewTournament, Tournament, TournamentId, TournamentStatus, Transition,
};
use crate::wallet::{LedgerOutcome, NewTransaction, WalletTransaction};

/// Storage errors shared by every repository
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Query timed out
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// Stored value could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Store temporarily unavailable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Tournament persistence
#[async_trait]
pub trait TournamentRepository: Send + Sync {
    /// Insert a tournament in `scheduled` with an empty prize pool
    async fn insert_tournament(
        &self,
        new: &NewTournament,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Tournament>;

    async fn find_tournament(&self, id: TournamentId) -> RepositoryResult<Option<Tournament>>;

    /// Tournaments ordered by scheduled start, optionally filtered by status
    async fn list_tournaments(
        &self,
        status: Option<TournamentStatus>,
    ) -> RepositoryResult<Vec<Tournament>>;

    /// Non-completed tournaments whose `next_wake_at` is at or before `now`
    async fn list_due(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<Tournament>>;

    /// Tournaments the user entered, restricted to `statuses`
    async fn list_for_user(
        &self,
        user_id: UserId,
        statuses: &[TournamentStatus],
    ) -> RepositoryResult<Vec<Tournament>>;

    /// Atomically check joinability, capacity and duplicates, append the entry
    /// and add the entry fee to the prize pool
    async fn append_entry(
        &self,
        id: TournamentId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> RepositoryResult<AppendOutcome>;

    /// Set an entrant's score and completion time while the tournament is
    /// `active` and `completed_at` is before the play window ends. Returns
    /// `None` when nothing was updated.
    async fn record_score(
        &self,
        id: TournamentId,
        user_id: UserId,
        score: i64,
        completed_at: DateTime<Utc>,
    ) -> RepositoryResult<Option<Tournament>>;

    /// Store a settled rank and prize on an entry
    async fn record_placement(
        &self,
        id: TournamentId,
        user_id: UserId,
        rank: u32,
        tokens: i64,
    ) -> RepositoryResult<()>;

    /// Compare-and-set status change. Returns whether it was applied.
    async fn apply_transition(
        &self,
        id: TournamentId,
        transition: &Transition,
    ) -> RepositoryResult<bool>;
}

/// Leaderboard persistence
#[async_trait]
pub trait LeaderboardRepository: Send + Sync {
    /// Upsert a row and add the contribution to it
    async fn add_contribution(
        &self,
        key: &LeaderboardKey,
        contribution: &ScoreContribution,
    ) -> RepositoryResult<LeaderboardEntry>;

    /// Rows of one bucket in prior rank order; unranked rows last in
    /// creation order
    async fn period_entries(
        &self,
        period: Period,
        period_start: DateTime<Utc>,
    ) -> RepositoryResult<Vec<LeaderboardEntry>>;

    /// Overwrite ranks for one bucket
    async fn write_ranks(
        &self,
        period: Period,
        period_start: DateTime<Utc>,
        ranks: &[(UserId, u32)],
    ) -> RepositoryResult<()>;

    async fn find_entry(&self, key: &LeaderboardKey) -> RepositoryResult<Option<LeaderboardEntry>>;
}

/// Profile fields the core reads and writes
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn find_profile(&self, user_id: UserId) -> RepositoryResult<Option<UserProfile>>;

    async fn save_streak(&self, user_id: UserId, streak: &StreakState) -> RepositoryResult<()>;

    /// `tournaments_joined += 1`
    async fn record_tournament_join(&self, user_id: UserId) -> RepositoryResult<()>;

    /// `tournaments_won += 1`, `total_wins += 1`
    async fn record_tournament_win(&self, user_id: UserId) -> RepositoryResult<()>;

    /// `total_games += 1`, `daily_sessions_played += 1`, `total_wins += won`
    async fn record_daily_session(&self, user_id: UserId, won: bool) -> RepositoryResult<()>;
}

/// Streak freeze persistence
#[async_trait]
pub trait StreakFreezeRepository: Send + Sync {
    /// An unused freeze that has not expired at `now`
    async fn find_unused_freeze(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<StreakFreeze>>;

    /// Compare-and-set `used = true`. Returns whether this call consumed it.
    async fn mark_freeze_used(&self, freeze_id: i64) -> RepositoryResult<bool>;

    /// Insert a freeze unless the user still holds a usable one
    async fn insert_freeze(
        &self,
        user_id: UserId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<StreakFreeze>>;
}

/// Wallet ledger persistence
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn find_by_key(&self, idempotency_key: &str)
    -> RepositoryResult<Option<WalletTransaction>>;

    /// Atomically update the balance and append the transaction record
    async fn apply(&self, tx: &NewTransaction) -> RepositoryResult<LedgerOutcome>;

    async fn balance(&self, user_id: UserId) -> RepositoryResult<Option<i64>>;

    /// Most recent first
    async fn history(&self, user_id: UserId, limit: i64)
    -> RepositoryResult<Vec<WalletTransaction>>;
}

/// Daily session persistence
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_daily_session(
        &self,
        user_id: UserId,
        day: NaiveDate,
    ) -> RepositoryResult<Option<DailySession>>;

    /// Claim the user's session for the day. `None` if one already exists.
    async fn insert_daily_session(
        &self,
        session: &NewDailySession,
    ) -> RepositoryResult<Option<DailySession>>;

    async fn record_session_streak(
        &self,
        session_id: i64,
        outcome: &StreakOutcome,
    ) -> RepositoryResult<()>;

    /// Mark the session rewarded with `tokens`
    async fn record_session_tokens(&self, session_id: i64, tokens: i64) -> RepositoryResult<()>;
}

/// Question bank: storage and random sampling
#[async_trait]
pub trait QuestionBank: Send + Sync {
    /// Up to `count` distinct random questions
    async fn sample(&self, count: usize) -> RepositoryResult<Vec<Question>>;

    async fn find_many(&self, ids: &[QuestionId]) -> RepositoryResult<Vec<Question>>;
}
