//! WebSocket relay of arena events.
//!
//! # Connection Flow
//!
//! 1. Client connects via `GET /ws/{tournament_id}` (or `GET /ws/lobby`)
//! 2. Server subscribes to the event bus channel before upgrading, so no
//!    event published after the handshake is missed
//! 3. For a tournament, the first frame is a `snapshot` of its current state
//! 4. Every bus event is forwarded as one JSON text frame
//! 5. When settlement closes the tournament channel, the server sends a
//!    close frame
//!
//! # Server Messages
//!
//! ```json
//! {"event": "tournament-starting", "data": {"tournament_id": 1, "starts_in_seconds": 60}}
//! {"event": "leaderboard-update", "data": {"tournament_id": 1, "user_id": 7, "score": 90, "rank": 1}}
//! ```
//!
//! Clients send nothing; incoming text frames are ignored.

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use quiz_arena::events::{ArenaEvent, Channel};
use quiz_arena::tournament::{Tournament, TournamentError, TournamentId, TournamentStatus};
use serde_json::json;
use std::sync::atomic::Ordering;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{ApiError, AppState};
use crate::metrics;

/// Upgrade to a WebSocket streaming one tournament's events.
///
/// # Response
///
/// * `101 Switching Protocols` - Stream established
/// * `404 Not Found` - Unknown tournament
/// * `409 Conflict` - Tournament already completed
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(tournament_id): Path<TournamentId>,
    State(state): State<AppState>,
) -> Response {
    let tournament = match state.arena.tournaments.get(tournament_id).await {
        Ok(tournament) => tournament,
        Err(e) => return ApiError::from(e).into_response(),
    };
    if tournament.status == TournamentStatus::Completed {
        return ApiError::from(TournamentError::NotActive(tournament.status)).into_response();
    }

    let events = state.arena.events.subscribe(Channel::Tournament(tournament_id));
    ws.on_upgrade(move |socket| {
        handle_socket(socket, Channel::Tournament(tournament_id), Some(tournament), events, state)
    })
}

/// Upgrade to a WebSocket streaming lobby events for every tournament
pub async fn lobby_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events = state.arena.events.subscribe(Channel::Lobby);
    ws.on_upgrade(move |socket| handle_socket(socket, Channel::Lobby, None, events, state))
}

fn encode(event: &ArenaEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Failed to serialize {} event: {}", event.name(), e);
            None
        }
    }
}

async fn handle_socket(
    socket: WebSocket,
    channel: Channel,
    snapshot: Option<Tournament>,
    mut events: broadcast::Receiver<ArenaEvent>,
    state: AppState,
) {
    let (mut sender, mut receiver) = socket.split();

    let active = state.ws_connections.fetch_add(1, Ordering::Relaxed) + 1;
    metrics::websocket_connections_total();
    metrics::websocket_connections_active(active);
    info!("WebSocket connected: {:?}", channel);

    if let Some(tournament) = snapshot {
        let frame = json!({ "event": "snapshot", "data": tournament }).to_string();
        if sender.send(Message::Text(frame.into())).await.is_err() {
            finish(&state, channel);
            return;
        }
    }

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    let Some(json) = encode(&event) else { continue };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                    metrics::websocket_messages_sent();
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket on {:?} lagged, {} events dropped", channel, skipped);
                }
                Err(RecvError::Closed) => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!("WebSocket error on {:?}: {}", channel, e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    finish(&state, channel);
}

fn finish(state: &AppState, channel: Channel) {
    let active = state
        .ws_connections
        .fetch_sub(1, Ordering::Relaxed)
        .saturating_sub(1);
    metrics::websocket_connections_active(active);
    info!("WebSocket disconnected: {:?}", channel);
}
