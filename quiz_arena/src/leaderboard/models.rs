//! Leaderboard data models.

use crate::profile::UserId;
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregation period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
    #[serde(rename = "alltime")]
    AllTime,
}

impl Period {
    /// Every period a score is recorded into
    pub const ALL: [Period; 4] = [Period::Daily, Period::Weekly, Period::Monthly, Period::AllTime];

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
            Period::AllTime => "alltime",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Period::Daily),
            "weekly" => Some(Period::Weekly),
            "monthly" => Some(Period::Monthly),
            "alltime" | "all_time" => Some(Period::AllTime),
            _ => None,
        }
    }

    /// Start of the bucket containing `now`.
    ///
    /// Days are UTC days and weeks start on Sunday.
    pub fn start_for(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let day = match self {
            Period::Daily => today,
            Period::Weekly => {
                today - Duration::days(i64::from(today.weekday().num_days_from_sunday()))
            }
            Period::Monthly => today.with_day(1).unwrap_or(today),
            Period::AllTime => return DateTime::UNIX_EPOCH,
        };
        Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
    }

    /// Row count returned by `top` when no limit is given
    pub fn default_limit(self) -> usize {
        match self {
            Period::Daily => 10,
            _ => 100,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a leaderboard row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaderboardKey {
    pub user_id: UserId,
    pub period: Period,
    pub period_start: DateTime<Utc>,
}

/// Aggregated score row for one user in one period bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub period: Period,
    pub period_start: DateTime<Utc>,
    pub score: i64,
    /// `None` until the first re-rank after creation
    pub rank: Option<u32>,
    pub games_played: i64,
    pub wins: i64,
    pub tokens_earned: i64,
}

impl LeaderboardEntry {
    pub fn key(&self) -> LeaderboardKey {
        LeaderboardKey {
            user_id: self.user_id,
            period: self.period,
            period_start: self.period_start,
        }
    }
}

/// One scored session or tournament result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreContribution {
    pub score: i64,
    pub won: bool,
    pub tokens_earned: i64,
}

/// Rewrite ranks as dense 1-based positions.
///
/// `entries` must be in prior rank order. The sort is stable, so ties keep
/// that order. Returns the new `(user, rank)` assignments.
pub fn assign_ranks(entries: &mut [LeaderboardEntry]) -> Vec<(UserId, u32)> {
    entries.sort_by(|a, b| b.score.cmp(&a.score));
    entries
        .iter_mut()
        .enumerate()
        .map(|(idx, entry)| {
            let rank = idx as u32 + 1;
            entry.rank = Some(rank);
            (entry.user_id, rank)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 30, 0).unwrap()
    }

    fn entry(user_id: UserId, score: i64, rank: Option<u32>) -> LeaderboardEntry {
        LeaderboardEntry {
            user_id,
            period: Period::Daily,
            period_start: at(2026, 1, 1, 0),
            score,
            rank,
            games_played: 1,
            wins: 0,
            tokens_earned: 0,
        }
    }

    #[test]
    fn test_period_starts() {
        // 2026-10-16 is a Friday
        let now = at(2026, 10, 16, 15);
        assert_eq!(
            Period::Daily.start_for(now),
            Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap()
        );
        assert_eq!(
            Period::Weekly.start_for(now),
            Utc.with_ymd_and_hms(2026, 10, 11, 0, 0, 0).unwrap()
        );
        assert_eq!(
            Period::Monthly.start_for(now),
            Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(Period::AllTime.start_for(now), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_week_starting_on_sunday_is_its_own_start() {
        let sunday = at(2026, 10, 11, 23);
        assert_eq!(
            Period::Weekly.start_for(sunday),
            Utc.with_ymd_and_hms(2026, 10, 11, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_period_serde_names() {
        assert_eq!(serde_json::to_string(&Period::AllTime).unwrap(), "\"alltime\"");
        for period in Period::ALL {
            assert_eq!(Period::parse(period.as_str()), Some(period));
        }
        assert_eq!(Period::parse("yearly"), None);
    }

    #[test]
    fn test_assign_ranks_is_dense_and_stable() {
        let mut entries = vec![
            entry(1, 50, Some(1)),
            entry(2, 80, Some(2)),
            entry(3, 50, Some(3)),
            entry(4, 10, None),
        ];
        let ranks = assign_ranks(&mut entries);
        assert_eq!(ranks, vec![(2, 1), (1, 2), (3, 3), (4, 4)]);
        assert!(entries.iter().all(|e| e.rank.is_some()));
    }
}
