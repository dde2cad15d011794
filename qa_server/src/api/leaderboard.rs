//! Period leaderboard handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use quiz_arena::leaderboard::{LeaderboardEntry, Period};
use quiz_arena::profile::UserId;
use serde::Deserialize;

use super::{ApiError, ApiResult, AppState};

/// Largest page a client may request
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub limit: Option<usize>,
}

fn parse_period(raw: &str) -> Result<Period, ApiError> {
    Period::parse(raw).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "Unknown period '{raw}', expected daily, weekly, monthly or alltime"
        ))
    })
}

/// Current bucket of a period board, ordered by rank
///
/// Without `limit`, daily returns 10 rows and the other periods 100.
pub async fn top(
    State(state): State<AppState>,
    Path(period): Path<String>,
    Query(query): Query<TopQuery>,
) -> ApiResult<Vec<LeaderboardEntry>> {
    let period = parse_period(&period)?;
    let limit = query.limit.map(|limit| limit.min(MAX_LIMIT));
    let entries = state.arena.leaderboard.top(period, Utc::now(), limit).await?;
    Ok(Json(entries))
}

/// A user's row in the current bucket; `null` if they have not scored yet
pub async fn position(
    State(state): State<AppState>,
    Path((period, user_id)): Path<(String, UserId)>,
) -> ApiResult<Option<LeaderboardEntry>> {
    let period = parse_period(&period)?;
    let entry = state
        .arena
        .leaderboard
        .position(user_id, period, Utc::now())
        .await?;
    Ok(Json(entry))
}
