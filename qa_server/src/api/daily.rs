//! Daily session handlers.
//!
//! A client starts the day's session, answers the questions locally and
//! submits every answer in one `finish` call. Scoring, streak, wallet and
//! leaderboard updates all happen inside that call.

use axum::{Json, extract::State};
use chrono::Utc;
use quiz_arena::profile::UserId;
use quiz_arena::session::{Answer, SessionQuestions, SessionSummary};
use serde::Deserialize;
use std::time::Instant;

use super::{ApiResult, AppState};
use crate::{logging, metrics};

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct FinishRequest {
    pub user_id: UserId,
    pub answers: Vec<Answer>,
}

/// Hand out today's questions, without their answers
///
/// # Errors
///
/// * `404 Not Found` - Unknown user
/// * `409 Conflict` - Already played today
/// * `503 Service Unavailable` - Question bank too small
pub async fn start(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> ApiResult<SessionQuestions> {
    let questions = state
        .arena
        .sessions
        .start(request.user_id, Utc::now())
        .await?;
    Ok(Json(questions))
}

/// Score today's run and apply its rewards
///
/// # Errors
///
/// * `400 Bad Request` - No answers, or an option index out of range
/// * `409 Conflict` - Already played today
pub async fn finish(
    State(state): State<AppState>,
    Json(request): Json<FinishRequest>,
) -> ApiResult<SessionSummary> {
    let started = Instant::now();
    let summary = state
        .arena
        .sessions
        .finish(request.user_id, &request.answers, Utc::now())
        .await?;

    metrics::daily_sessions_total();
    metrics::tokens_credited_total("daily", summary.tokens_earned);
    logging::log_performance(
        "daily_finish",
        started.elapsed().as_millis() as u64,
        Some(&format!("user {}", request.user_id)),
    );
    Ok(Json(summary))
}
