//! Daily session data models.

use crate::profile::UserId;
use crate::questions::{PublicQuestion, QuestionId};
use crate::streak::{Multiplier, StreakChange, StreakOutcome};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Base points for a correct answer
pub const POINTS_PER_CORRECT: i64 = 10;

/// Cap on the speed bonus for one answer
pub const MAX_SPEED_BONUS: i64 = 5;

/// Accuracy (percent) at or above which a session counts as a win
pub const WIN_ACCURACY: u32 = 85;

/// One submitted answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: QuestionId,
    pub selected_index: u8,
    /// Seconds left on the question timer when answered
    #[serde(default)]
    pub time_remaining: Option<u32>,
}

impl Answer {
    /// Points for this answer given whether it was correct
    pub fn points(&self, correct: bool) -> i64 {
        if !correct {
            return 0;
        }
        let bonus = i64::from(self.time_remaining.unwrap_or(0)) / 2;
        POINTS_PER_CORRECT + bonus.min(MAX_SPEED_BONUS)
    }
}

/// A finished daily session, one per user per UTC day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySession {
    pub id: i64,
    pub user_id: UserId,
    pub day: NaiveDate,
    pub score: i64,
    pub correct: u32,
    pub total: u32,
    pub accuracy: u32,
    /// `None` until the token award is credited
    pub tokens_earned: Option<i64>,
    /// Streak result of this session; a resumed finish reuses it
    pub streak: Option<StreakOutcome>,
    pub completed_at: DateTime<Utc>,
}

impl DailySession {
    /// Whether every reward step finished
    pub fn is_rewarded(&self) -> bool {
        self.tokens_earned.is_some()
    }
}

/// Session claim inserted before rewards are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDailySession {
    pub user_id: UserId,
    pub day: NaiveDate,
    pub score: i64,
    pub correct: u32,
    pub total: u32,
    pub accuracy: u32,
    pub completed_at: DateTime<Utc>,
}

/// Questions handed out at session start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionQuestions {
    pub day: NaiveDate,
    pub questions: Vec<PublicQuestion>,
}

/// Outcome of finishing a daily session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: i64,
    pub score: i64,
    pub correct: u32,
    pub total: u32,
    pub accuracy: u32,
    pub tokens_earned: i64,
    pub streak: u32,
    pub multiplier: Multiplier,
    pub streak_change: StreakChange,
    pub balance: i64,
}
