//! Daily streak state machine and reward multiplier.

use super::errors::{StreakError, StreakResult};
use crate::db::{ProfileRepository, StreakFreezeRepository};
use crate::profile::UserId;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Streak fields of a user profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    pub streak: u32,
    /// Calendar day (UTC) of the last counted play
    pub last_played: Option<NaiveDate>,
    pub locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
}

/// What a play did to the streak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakChange {
    /// First play ever
    Started,
    /// Already played today
    SameDay,
    /// Played the day after the last play
    Extended,
    /// Gap forgiven by a streak freeze
    Forgiven,
    /// Gap without a freeze; streak back to 1 and locked
    Reset,
}

impl StreakState {
    /// Whole days between the last play and `today`
    pub fn days_since_last_play(&self, today: NaiveDate) -> Option<i64> {
        self.last_played
            .map(|last| today.signed_duration_since(last).num_days())
    }

    /// Apply one play at `now`.
    ///
    /// `freeze_available` only matters for gaps longer than one day.
    pub fn advance(
        &self,
        now: DateTime<Utc>,
        freeze_available: bool,
        lock_duration: Duration,
    ) -> (StreakState, StreakChange) {
        let today = now.date_naive();
        let mut next = self.clone();

        let Some(days) = self.days_since_last_play(today) else {
            next.streak = 1;
            next.last_played = Some(today);
            return (next, StreakChange::Started);
        };

        match days {
            // A clock that moved backwards counts as the same day
            d if d <= 0 => (next, StreakChange::SameDay),
            1 => {
                next.streak += 1;
                next.last_played = Some(today);
                if next.locked && next.locked_until.is_some_and(|until| now > until) {
                    next.locked = false;
                    next.locked_until = None;
                }
                (next, StreakChange::Extended)
            }
            _ if freeze_available => (next, StreakChange::Forgiven),
            _ => {
                next.streak = 1;
                next.last_played = Some(today);
                next.locked = true;
                next.locked_until = Some(now + lock_duration);
                (next, StreakChange::Reset)
            }
        }
    }
}

/// Reward multiplier in tenths (15 = 1.5x)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Multiplier(pub u32);

impl Multiplier {
    pub const ONE: Multiplier = Multiplier(10);

    pub fn tenths(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 10.0
    }

    /// floor(floor(raw_score / 2) × multiplier)
    pub fn award(self, raw_score: i64) -> i64 {
        let base = raw_score.max(0) / 2;
        base * i64::from(self.0) / 10
    }
}

impl std::fmt::Display for Multiplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x", self.as_f64())
    }
}

/// Minimum streak for a multiplier step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplierStep {
    pub min_streak: u32,
    pub multiplier: Multiplier,
}

/// Streak engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreakConfig {
    /// Sorted by `min_streak`, highest first
    pub steps: Vec<MultiplierStep>,
    /// Lock window applied when a streak resets
    pub lock_duration: Duration,
}

impl StreakConfig {
    /// Steps at 1.5x, 2x and 3x
    pub fn with_thresholds(bronze: u32, silver: u32, gold: u32, lock_duration: Duration) -> Self {
        let mut steps = vec![
            MultiplierStep {
                min_streak: gold,
                multiplier: Multiplier(30),
            },
            MultiplierStep {
                min_streak: silver,
                multiplier: Multiplier(20),
            },
            MultiplierStep {
                min_streak: bronze,
                multiplier: Multiplier(15),
            },
        ];
        steps.sort_by(|a, b| b.min_streak.cmp(&a.min_streak));
        Self {
            steps,
            lock_duration,
        }
    }

    /// Multiplier for a streak length; monotonic in `streak`
    pub fn multiplier_for(&self, streak: u32) -> Multiplier {
        self.steps
            .iter()
            .find(|step| streak >= step.min_streak)
            .map(|step| step.multiplier)
            .unwrap_or(Multiplier::ONE)
    }
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self::with_thresholds(7, 14, 30, Duration::days(3))
    }
}

/// Result of recording a play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakOutcome {
    pub streak: u32,
    pub multiplier: Multiplier,
    pub locked: bool,
    pub change: StreakChange,
}

/// Streak engine: the only writer of a user's streak fields
#[derive(Clone)]
pub struct StreakEngine {
    profiles: Arc<dyn ProfileRepository>,
    freezes: Arc<dyn StreakFreezeRepository>,
    config: StreakConfig,
}

impl StreakEngine {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        freezes: Arc<dyn StreakFreezeRepository>,
        config: StreakConfig,
    ) -> Self {
        Self {
            profiles,
            freezes,
            config,
        }
    }

    pub fn config(&self) -> &StreakConfig {
        &self.config
    }

    /// Record a completed daily session for `user_id` at `now`.
    ///
    /// A streak freeze is consumed only for gaps longer than one day, and at
    /// most once per call.
    pub async fn record_play(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StreakResult<StreakOutcome> {
        let profile = self
            .profiles
            .find_profile(user_id)
            .await?
            .ok_or(StreakError::UserNotFound(user_id))?;
        let state = profile.streak;

        let gap = state.days_since_last_play(now.date_naive());
        let mut freeze_used = false;
        if gap.is_some_and(|days| days > 1) {
            if let Some(freeze) = self.freezes.find_unused_freeze(user_id, now).await? {
                // Another session may have spent it between find and mark
                freeze_used = self.freezes.mark_freeze_used(freeze.id).await?;
                if freeze_used {
                    log::info!(
                        "User {}: streak freeze {} forgave a {}-day gap",
                        user_id,
                        freeze.id,
                        gap.unwrap_or_default()
                    );
                }
            }
        }

        let (next, change) = state.advance(now, freeze_used, self.config.lock_duration);
        if next != state {
            self.profiles.save_streak(user_id, &next).await?;
        }

        if change == StreakChange::Reset {
            log::info!(
                "User {}: streak reset after {}-day gap, locked until {:?}",
                user_id,
                gap.unwrap_or_default(),
                next.locked_until
            );
        }

        Ok(StreakOutcome {
            streak: next.streak,
            multiplier: self.config.multiplier_for(next.streak),
            locked: next.locked,
            change,
        })
    }
}
