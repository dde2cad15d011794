//! Per-period score accumulation with a full re-rank on every write.

use super::models::{
    LeaderboardEntry, LeaderboardKey, Period, ScoreContribution, assign_ranks,
};
use crate::db::{LeaderboardRepository, RepositoryError};
use crate::profile::UserId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

type BucketLocks = HashMap<(Period, DateTime<Utc>), Arc<Mutex<()>>>;

/// Leaderboard errors
#[derive(Debug, Error)]
pub enum LeaderboardError {
    /// Storage error
    #[error("Storage error: {0}")]
    Repository(#[from] RepositoryError),
}

impl LeaderboardError {
    pub fn client_message(&self) -> String {
        "Internal server error".to_string()
    }
}

/// Result type for leaderboard operations
pub type LeaderboardResult<T> = Result<T, LeaderboardError>;

/// Leaderboard aggregator
#[derive(Clone)]
pub struct LeaderboardAggregator {
    repo: Arc<dyn LeaderboardRepository>,
    /// One lock per (period, period_start) bucket; re-ranks of the same
    /// bucket never interleave their rank rewrites
    bucket_locks: Arc<Mutex<BucketLocks>>,
}

impl LeaderboardAggregator {
    pub fn new(repo: Arc<dyn LeaderboardRepository>) -> Self {
        Self {
            repo,
            bucket_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Add a scored result to every period bucket containing `now`, then
    /// re-rank each bucket.
    ///
    /// # Returns
    ///
    /// The user's row per period after re-ranking
    pub async fn record(
        &self,
        user_id: UserId,
        contribution: ScoreContribution,
        now: DateTime<Utc>,
    ) -> LeaderboardResult<Vec<LeaderboardEntry>> {
        let mut rows = Vec::with_capacity(Period::ALL.len());

        for period in Period::ALL {
            let key = LeaderboardKey {
                user_id,
                period,
                period_start: period.start_for(now),
            };
            let mut entry = self.repo.add_contribution(&key, &contribution).await?;
            let ranks = self.rerank(period, key.period_start).await?;
            entry.rank = ranks
                .iter()
                .find(|(user, _)| *user == user_id)
                .map(|(_, rank)| *rank);
            rows.push(entry);
        }

        log::debug!(
            "Leaderboard: user {} +{} (won: {}, tokens: {})",
            user_id,
            contribution.score,
            contribution.won,
            contribution.tokens_earned
        );
        Ok(rows)
    }

    /// Recompute dense ranks for one bucket
    pub async fn rerank(
        &self,
        period: Period,
        period_start: DateTime<Utc>,
    ) -> LeaderboardResult<Vec<(UserId, u32)>> {
        let _guard = self.lock_bucket(period, period_start).await;
        let mut entries = self.repo.period_entries(period, period_start).await?;
        let ranks = assign_ranks(&mut entries);
        self.repo.write_ranks(period, period_start, &ranks).await?;
        Ok(ranks)
    }

    async fn lock_bucket(
        &self,
        period: Period,
        period_start: DateTime<Utc>,
    ) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.bucket_locks.lock().await;
            // Forget locks nobody else holds a handle to
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((period, period_start))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Current bucket for `period`, ordered by rank
    pub async fn top(
        &self,
        period: Period,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> LeaderboardResult<Vec<LeaderboardEntry>> {
        let limit = limit.unwrap_or_else(|| period.default_limit());
        let mut entries = self
            .repo
            .period_entries(period, period.start_for(now))
            .await?;
        entries.truncate(limit);
        Ok(entries)
    }

    /// A user's row in the current bucket for `period`
    pub async fn position(
        &self,
        user_id: UserId,
        period: Period,
        now: DateTime<Utc>,
    ) -> LeaderboardResult<Option<LeaderboardEntry>> {
        let key = LeaderboardKey {
            user_id,
            period,
            period_start: period.start_for(now),
        };
        Ok(self.repo.find_entry(&key).await?)
    }
}
