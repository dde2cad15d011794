//! Wallet and streak freeze handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use quiz_arena::profile::UserId;
use quiz_arena::streak::StreakFreeze;
use quiz_arena::wallet::WalletTransaction;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResult, AppState};
use crate::metrics;

const DEFAULT_HISTORY: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub user_id: UserId,
    pub balance: i64,
    pub has_freeze: bool,
    /// Most recent first
    pub transactions: Vec<WalletTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct FreezeRequest {
    pub user_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct FreezeResponse {
    pub freeze: StreakFreeze,
    pub price: i64,
    pub balance: i64,
}

/// Balance, freeze status and recent ledger entries
pub async fn wallet(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<WalletResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY);
    let arena = &state.arena;

    Ok(Json(WalletResponse {
        user_id,
        balance: arena.wallet.balance(user_id).await?,
        has_freeze: arena.freezes.has_freeze(user_id, Utc::now()).await?,
        transactions: arena.wallet.history(user_id, limit).await?,
    }))
}

/// Buy a streak freeze
///
/// # Errors
///
/// * `400 Bad Request` - Not enough tokens
/// * `409 Conflict` - An unused freeze is already held
pub async fn purchase_freeze(
    State(state): State<AppState>,
    Json(request): Json<FreezeRequest>,
) -> Result<(StatusCode, Json<FreezeResponse>), ApiError> {
    let arena = &state.arena;
    let freeze = arena.freezes.purchase(request.user_id, Utc::now()).await?;
    metrics::streak_freezes_sold_total();

    let balance = arena.wallet.balance(request.user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(FreezeResponse {
            freeze,
            price: arena.freezes.price(),
            balance,
        }),
    ))
}
