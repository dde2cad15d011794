//! Integration tests for the HTTP and WebSocket API.
//!
//! The router runs against the in-memory store, so these tests need no
//! database. Tournament timers are stepped directly through the orchestrator.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use qa_server::api::{AppState, create_router};
use quiz_arena::db::InMemoryStore;
use quiz_arena::profile::UserProfile;
use quiz_arena::questions::Question;
use quiz_arena::{Arena, ArenaConfig, BroadcastEventBus};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt; // For `oneshot` method

fn create_test_server() -> (Router, Arena, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    store.insert_profile(UserProfile::new(1, "alice", 100));
    store.insert_profile(UserProfile::new(2, "bob", 100));
    store.insert_profile(UserProfile::new(3, "carol", 5));
    store.insert_questions((1..=20).map(|id| Question {
        id,
        text: format!("Question {id}"),
        options: ["a", "b", "c", "d"].map(String::from),
        correct_index: 2,
    }));

    let arena = Arena::new(
        store.clone(),
        Arc::new(BroadcastEventBus::default()),
        ArenaConfig::default(),
    );
    let app = create_router(AppState::new(arena.clone(), None));
    (app, arena, store)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_tournament(app: &Router, fee: i64) -> i64 {
    let (status, body) = send(
        app,
        "POST",
        "/api/v1/tournaments",
        Some(json!({
            "name": "Friday Trivia",
            "tier": "small",
            "scheduled_start": (Utc::now() - Duration::minutes(1)).to_rfc3339(),
            "max_players": 2,
            "entry_fee": fee,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "scheduled");
    body["id"].as_i64().unwrap()
}

// ============================================================================
// Health Check Tests
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let (app, _, _) = create_test_server();

    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
}

// ============================================================================
// Tournament Tests
// ============================================================================

#[tokio::test]
async fn test_join_collects_fee_into_prize_pool() {
    let (app, _, store) = create_test_server();
    let id = create_tournament(&app, 10).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/tournaments/{id}/join"),
        Some(json!({ "user_id": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prize_pool"], 10);
    assert_eq!(store.profile(1).unwrap().tokens, 90);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/tournaments/{id}/join"),
        Some(json!({ "user_id": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Already joined this tournament");
}

#[tokio::test]
async fn test_join_rejections() {
    let (app, _, store) = create_test_server();
    let id = create_tournament(&app, 10).await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/tournaments/{id}/join"),
        Some(json!({ "user_id": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(store.profile(3).unwrap().tokens, 5);

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/tournaments/999/join",
        Some(json!({ "user_id": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    for user in [1, 2] {
        send(
            &app,
            "POST",
            &format!("/api/v1/tournaments/{id}/join"),
            Some(json!({ "user_id": user })),
        )
        .await;
    }
    store.insert_profile(UserProfile::new(4, "dave", 100));
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/tournaments/{id}/join"),
        Some(json!({ "user_id": 4 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Tournament is full");
}

#[tokio::test]
async fn test_create_rejects_empty_name() {
    let (app, _, _) = create_test_server();
    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/tournaments",
        Some(json!({
            "name": "  ",
            "tier": "medium",
            "scheduled_start": Utc::now().to_rfc3339(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let (app, _, _) = create_test_server();
    create_tournament(&app, 0).await;

    let (status, body) = send(&app, "GET", "/api/v1/tournaments?status=upcoming", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send(&app, "GET", "/api/v1/tournaments?status=active", None).await;
    assert!(body.as_array().unwrap().is_empty());

    let (status, _) = send(&app, "GET", "/api/v1/tournaments?status=paused", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_scores_only_accepted_during_play() {
    let (app, arena, _) = create_test_server();
    let id = create_tournament(&app, 0).await;
    for user in [1, 2] {
        send(
            &app,
            "POST",
            &format!("/api/v1/tournaments/{id}/join"),
            Some(json!({ "user_id": user })),
        )
        .await;
    }

    let score_uri = format!("/api/v1/tournaments/{id}/score");
    let (status, _) = send(&app, "POST", &score_uri, Some(json!({ "user_id": 1, "score": 40 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Lobby, then play
    let now = Utc::now();
    arena.orchestrator.step(id, now).await.unwrap();
    arena
        .orchestrator
        .step(id, now + arena.config.lobby_window)
        .await
        .unwrap();

    let (status, body) = send(&app, "POST", &score_uri, Some(json!({ "user_id": 1, "score": 40 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rank"], 1);

    let (_, body) = send(&app, "POST", &score_uri, Some(json!({ "user_id": 2, "score": 70 }))).await;
    assert_eq!(body["rank"], 1);

    assert_outsider_rejected(&app, &score_uri).await;

    let (_, standings) = send(&app, "GET", &format!("/api/v1/tournaments/{id}/standings"), None).await;
    let order: Vec<i64> = standings
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["user_id"].as_i64().unwrap())
        .collect();
    assert_eq!(order, vec![2, 1]);

    let (_, mine) = send(&app, "GET", "/api/v1/users/1/tournaments", None).await;
    assert_eq!(mine["joined"].as_array().unwrap().len(), 1);
    assert!(mine["history"].as_array().unwrap().is_empty());
}

async fn assert_outsider_rejected(app: &Router, score_uri: &str) {
    let (status, _) = send(app, "POST", score_uri, Some(json!({ "user_id": 3, "score": 10 }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ============================================================================
// Daily Session Tests
// ============================================================================

fn answers(count: i64) -> Value {
    let answers: Vec<Value> = (1..=count)
        .map(|id| json!({ "question_id": id, "selected_index": 2, "time_remaining": null }))
        .collect();
    Value::Array(answers)
}

#[tokio::test]
async fn test_daily_session_round_trip() {
    let (app, _, _) = create_test_server();

    let (status, body) = send(&app, "POST", "/api/v1/daily/start", Some(json!({ "user_id": 1 }))).await;
    assert_eq!(status, StatusCode::OK);
    let questions = body["questions"].as_array().unwrap();
    assert_eq!(questions.len(), 15);
    assert!(questions.iter().all(|q| q.get("correct_index").is_none()));

    let (status, summary) = send(
        &app,
        "POST",
        "/api/v1/daily/finish",
        Some(json!({ "user_id": 1, "answers": answers(10) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["score"], 100);
    assert_eq!(summary["tokens_earned"], 50);
    assert_eq!(summary["streak"], 1);
    assert_eq!(summary["balance"], 150);

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/daily/finish",
        Some(json!({ "user_id": 1, "answers": answers(10) })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "POST", "/api/v1/daily/start", Some(json!({ "user_id": 1 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, board) = send(&app, "GET", "/api/v1/leaderboard/daily", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(board[0]["user_id"], 1);
    assert_eq!(board[0]["rank"], 1);

    let (_, row) = send(&app, "GET", "/api/v1/leaderboard/alltime/1", None).await;
    assert_eq!(row["score"], 100);
    let (_, row) = send(&app, "GET", "/api/v1/leaderboard/weekly/2", None).await;
    assert!(row.is_null());
}

#[tokio::test]
async fn test_daily_finish_validation() {
    let (app, _, _) = create_test_server();

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/daily/finish",
        Some(json!({ "user_id": 1, "answers": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/daily/finish",
        Some(json!({ "user_id": 99, "answers": answers(3) })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_period_is_bad_request() {
    let (app, _, _) = create_test_server();
    let (status, body) = send(&app, "GET", "/api/v1/leaderboard/yearly", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("yearly"));
}

// ============================================================================
// Wallet Tests
// ============================================================================

#[tokio::test]
async fn test_streak_freeze_purchase() {
    let (app, _, _) = create_test_server();

    let (status, body) = send(&app, "POST", "/api/v1/streak-freeze", Some(json!({ "user_id": 2 }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["price"], 50);
    assert_eq!(body["balance"], 50);
    assert_eq!(body["freeze"]["used"], false);

    let (status, _) = send(&app, "POST", "/api/v1/streak-freeze", Some(json!({ "user_id": 2 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "POST", "/api/v1/streak-freeze", Some(json!({ "user_id": 3 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, wallet) = send(&app, "GET", "/api/v1/wallet/2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(wallet["balance"], 50);
    assert_eq!(wallet["has_freeze"], true);
    let transactions = wallet["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["amount"], -50);
}

#[tokio::test]
async fn test_wallet_unknown_user() {
    let (app, _, _) = create_test_server();
    let (status, body) = send(&app, "GET", "/api/v1/wallet/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Wallet not found");
}

// ============================================================================
// WebSocket Tests
// ============================================================================

#[tokio::test]
async fn test_websocket_relays_tournament_events() {
    let (app, arena, _) = create_test_server();
    let id = create_tournament(&app, 0).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/{id}"))
        .await
        .unwrap();

    let snapshot: Value =
        serde_json::from_str(ws.next().await.unwrap().unwrap().to_text().unwrap()).unwrap();
    assert_eq!(snapshot["event"], "snapshot");
    assert_eq!(snapshot["data"]["id"], id);

    arena.tournaments.join(id, 1, Utc::now()).await.unwrap();

    let update: Value =
        serde_json::from_str(ws.next().await.unwrap().unwrap().to_text().unwrap()).unwrap();
    assert_eq!(update["event"], "tournament-update");
    assert_eq!(update["data"]["current_players"], 1);
}

#[tokio::test]
async fn test_websocket_unknown_tournament_is_rejected() {
    let (app, _, _) = create_test_server();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/12345")).await;
    assert!(result.is_err());
}
