//! Daily sessions ("daily rush"): one scored run per user per UTC day.

pub mod models;
pub mod service;

pub use models::{
    Answer, DailySession, NewDailySession, SessionQuestions, SessionSummary, POINTS_PER_CORRECT,
    WIN_ACCURACY,
};
pub use service::{
    DailySessionService, SessionError, SessionResult, Tally, daily_credit_key, tally,
};
