//! Tournament API handlers.
//!
//! Lifecycle transitions are driven by the scheduler, never by requests; these
//! endpoints only schedule, join, submit scores and read state.
//!
//! # Examples
//!
//! Join a tournament:
//! ```bash
//! curl -X POST http://localhost:6969/api/v1/tournaments/1/join \
//!   -H "Content-Type: application/json" \
//!   -d '{"user_id": 42}'
//! ```

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use quiz_arena::profile::UserId;
use quiz_arena::tournament::{
    LiveRank, NewTournament, Tier, Tournament, TournamentEntry, TournamentId, TournamentStatus,
};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// `scheduled`, `lobby`, `active`, `completed` or `upcoming`
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTournamentRequest {
    pub name: String,
    pub tier: Tier,
    pub scheduled_start: DateTime<Utc>,
    /// Defaults to the tier's capacity
    pub max_players: Option<usize>,
    #[serde(default)]
    pub entry_fee: i64,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub user_id: UserId,
    pub score: i64,
}

#[derive(Debug, Serialize)]
pub struct UserTournaments {
    pub joined: Vec<Tournament>,
    pub history: Vec<Tournament>,
}

/// List tournaments
///
/// `?status=upcoming` returns tournaments still accepting players.
///
/// # Errors
///
/// * `400 Bad Request` - Unknown status filter
pub async fn list_tournaments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Tournament>> {
    let tournaments = &state.arena.tournaments;
    let list = match query.status.as_deref() {
        None => tournaments.list(None).await?,
        Some("upcoming") => tournaments.upcoming().await?,
        Some(raw) => {
            let status = TournamentStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown status: {raw}")))?;
            tournaments.list(Some(status)).await?
        }
    };
    Ok(Json(list))
}

/// Schedule a new tournament
///
/// # Response
///
/// `201 Created` with the stored tournament in `scheduled`.
pub async fn create_tournament(
    State(state): State<AppState>,
    Json(request): Json<CreateTournamentRequest>,
) -> Result<(StatusCode, Json<Tournament>), ApiError> {
    let mut new = NewTournament::for_tier(
        request.name,
        request.tier,
        request.scheduled_start,
        request.entry_fee,
    );
    if let Some(max_players) = request.max_players {
        new = new.with_max_players(max_players);
    }

    let tournament = state
        .arena
        .tournaments
        .create_tournament(new, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(tournament)))
}

pub async fn get_tournament(
    State(state): State<AppState>,
    Path(id): Path<TournamentId>,
) -> ApiResult<Tournament> {
    Ok(Json(state.arena.tournaments.get(id).await?))
}

/// Join a tournament, paying its entry fee
///
/// # Errors
///
/// * `400 Bad Request` - Not enough tokens for the fee
/// * `404 Not Found` - Unknown tournament or user
/// * `409 Conflict` - Full, already joined, or past the lobby
pub async fn join_tournament(
    State(state): State<AppState>,
    Path(id): Path<TournamentId>,
    Json(request): Json<JoinRequest>,
) -> ApiResult<Tournament> {
    let tournament = state
        .arena
        .tournaments
        .join(id, request.user_id, Utc::now())
        .await?;
    Ok(Json(tournament))
}

/// Submit a finished run during the play window
///
/// # Errors
///
/// * `403 Forbidden` - User did not join
/// * `409 Conflict` - Tournament is not in play
pub async fn submit_score(
    State(state): State<AppState>,
    Path(id): Path<TournamentId>,
    Json(request): Json<ScoreRequest>,
) -> ApiResult<LiveRank> {
    let rank = state
        .arena
        .tournaments
        .submit_score(id, request.user_id, request.score, Utc::now())
        .await?;
    Ok(Json(rank))
}

pub async fn standings(
    State(state): State<AppState>,
    Path(id): Path<TournamentId>,
) -> ApiResult<Vec<TournamentEntry>> {
    Ok(Json(state.arena.tournaments.standings(id).await?))
}

/// Unfinished tournaments a user entered, plus their completed history
pub async fn user_tournaments(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<UserTournaments> {
    let tournaments = &state.arena.tournaments;
    Ok(Json(UserTournaments {
        joined: tournaments.joined_by(user_id).await?,
        history: tournaments.history(user_id).await?,
    }))
}
