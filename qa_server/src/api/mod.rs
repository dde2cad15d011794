//! HTTP/WebSocket API for the quiz arena.
//!
//! # Modules
//!
//! - [`tournaments`]: Scheduling, joins, score submission and standings
//! - [`leaderboard`]: Period leaderboards and a user's position
//! - [`daily`]: Daily session start/finish
//! - [`wallet`]: Balances, history and streak freeze purchases
//! - [`websocket`]: Live tournament events relayed from the event bus
//!
//! # Endpoints Overview
//!
//! ```text
//! GET  /health                                   - Health check
//! GET  /api/v1/tournaments?status=&user_id=      - List tournaments
//! POST /api/v1/tournaments                       - Schedule a tournament
//! GET  /api/v1/tournaments/{id}                  - Tournament details
//! POST /api/v1/tournaments/{id}/join             - Join, paying the entry fee
//! POST /api/v1/tournaments/{id}/score            - Submit a finished run
//! GET  /api/v1/tournaments/{id}/standings        - Live standings
//! GET  /api/v1/users/{user_id}/tournaments       - Joined and past tournaments
//! GET  /api/v1/leaderboard/{period}?limit=       - Top of a period board
//! GET  /api/v1/leaderboard/{period}/{user_id}    - One user's row
//! POST /api/v1/daily/start                       - Today's questions
//! POST /api/v1/daily/finish                      - Score today's run
//! GET  /api/v1/wallet/{user_id}?limit=           - Balance and history
//! POST /api/v1/streak-freeze                     - Buy a streak freeze
//! GET  /ws/{tournament_id}                       - Tournament event stream
//! GET  /ws/lobby                                 - Lobby event stream
//! ```
//!
//! Identity is supplied by the caller as a `user_id`; authentication is
//! expected in front of this service.
//!
//! # CORS
//!
//! CORS is configured permissively. In production, configure appropriate
//! origins, methods, and headers.

pub mod daily;
pub mod leaderboard;
pub mod tournaments;
pub mod wallet;
pub mod websocket;

use crate::{logging, metrics};
use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use quiz_arena::Arena;
use quiz_arena::db::Database;
use quiz_arena::leaderboard::LeaderboardError;
use quiz_arena::session::SessionError;
use quiz_arena::streak::StreakError;
use quiz_arena::tournament::TournamentError;
use quiz_arena::wallet::WalletError;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;
use thiserror::Error;
use tower_http::cors::CorsLayer;

/// Application state shared across all HTTP handlers and WebSocket connections.
///
/// Cloned for each request; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub arena: Arena,
    /// Postgres handle for health checks; `None` on the in-memory store
    pub database: Option<Database>,
    /// Open WebSocket connections
    pub ws_connections: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(arena: Arena, database: Option<Database>) -> Self {
        Self {
            arena,
            database,
            ws_connections: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error, mapped to a status code and a client-safe message
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Tournament(#[from] TournamentError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Streak(#[from] StreakError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Leaderboard(#[from] LeaderboardError),
}

fn wallet_status(err: &WalletError) -> StatusCode {
    match err {
        WalletError::InsufficientBalance { .. } | WalletError::InvalidAmount(_) => {
            StatusCode::BAD_REQUEST
        }
        WalletError::WalletNotFound(_) => StatusCode::NOT_FOUND,
        WalletError::DuplicateTransaction(_) => StatusCode::CONFLICT,
        WalletError::Repository(_) | WalletError::BalanceOverflow => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn streak_status(err: &StreakError) -> StatusCode {
    match err {
        StreakError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        StreakError::Wallet(e) => wallet_status(e),
        StreakError::UserNotFound(_) => StatusCode::NOT_FOUND,
        StreakError::AlreadyHasFreeze => StatusCode::CONFLICT,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Tournament(e) => match e {
                TournamentError::Validation(_) | TournamentError::InsufficientBalance { .. } => {
                    StatusCode::BAD_REQUEST
                }
                TournamentError::NotFound(_) | TournamentError::UserNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                TournamentError::TournamentFull
                | TournamentError::AlreadyJoined
                | TournamentError::NotJoinable(_)
                | TournamentError::NotActive(_)
                | TournamentError::PlayWindowClosed(_) => StatusCode::CONFLICT,
                TournamentError::NotEntrant => StatusCode::FORBIDDEN,
                TournamentError::Wallet(e) => wallet_status(e),
                TournamentError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Session(e) => match e {
                SessionError::Validation(_) => StatusCode::BAD_REQUEST,
                SessionError::UserNotFound(_) => StatusCode::NOT_FOUND,
                SessionError::AlreadyPlayed(_) => StatusCode::CONFLICT,
                SessionError::NotEnoughQuestions { .. } => StatusCode::SERVICE_UNAVAILABLE,
                SessionError::Streak(e) => streak_status(e),
                SessionError::Wallet(e) => wallet_status(e),
                SessionError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Streak(e) => streak_status(e),
            ApiError::Wallet(e) => wallet_status(e),
            ApiError::Leaderboard(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn client_message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Tournament(e) => e.client_message(),
            ApiError::Session(e) => e.client_message(),
            ApiError::Streak(e) => e.client_message(),
            ApiError::Wallet(e) => e.client_message(),
            ApiError::Leaderboard(e) => e.client_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }
        let body = ErrorResponse {
            error: self.client_message(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Create the complete API router with all endpoints and middleware.
///
/// # Example
///
/// ```rust,no_run
/// # use qa_server::api::{create_router, AppState};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// # let state: AppState = unimplemented!();
/// let app = create_router(state);
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```
pub fn create_router(state: AppState) -> Router {
    let root_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ws/lobby", get(websocket::lobby_handler))
        .route("/ws/{tournament_id}", get(websocket::websocket_handler));

    Router::new()
        .merge(root_routes)
        .nest("/api/v1", create_v1_router())
        .route_layer(axum::middleware::from_fn(track_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route(
            "/tournaments",
            get(tournaments::list_tournaments).post(tournaments::create_tournament),
        )
        .route("/tournaments/{id}", get(tournaments::get_tournament))
        .route("/tournaments/{id}/join", post(tournaments::join_tournament))
        .route("/tournaments/{id}/score", post(tournaments::submit_score))
        .route("/tournaments/{id}/standings", get(tournaments::standings))
        .route("/users/{user_id}/tournaments", get(tournaments::user_tournaments))
        .route("/leaderboard/{period}", get(leaderboard::top))
        .route("/leaderboard/{period}/{user_id}", get(leaderboard::position))
        .route("/daily/start", post(daily::start))
        .route("/daily/finish", post(daily::finish))
        .route("/wallet/{user_id}", get(wallet::wallet))
        .route("/streak-freeze", post(wallet::purchase_freeze))
}

/// Request counter and latency histogram, labelled by the matched route
async fn track_requests(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    let elapsed = started.elapsed();
    let status = response.status().as_u16();
    metrics::http_requests_total(&method, &path, status);
    metrics::http_request_duration_ms(&method, &path, elapsed.as_secs_f64() * 1000.0);
    logging::log_api_request(&method, &path, status, elapsed.as_millis() as u64);
    response
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the store answers, `503 Service Unavailable` otherwise.
///
/// ```bash
/// curl http://localhost:6969/health
/// # {"status":"healthy","store":"postgres","database":true,...}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (store, db_healthy) = match &state.database {
        Some(db) => ("postgres", db.health_check().await.is_ok()),
        None => ("memory", true),
    };

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if db_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "store": store,
        "database": db_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
