//! Leaderboard module: daily, weekly, monthly and all-time score buckets.

pub mod aggregator;
pub mod models;

pub use aggregator::{LeaderboardAggregator, LeaderboardError, LeaderboardResult};
pub use models::{
    LeaderboardEntry, LeaderboardKey, Period, ScoreContribution, assign_ranks,
};
