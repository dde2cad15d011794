//! Integration tests for daily streaks across several days of play.
//!
//! Each test plays daily sessions through the full arena wiring so the streak
//! engine, freeze shop, wallet and leaderboards interact as in production.

use chrono::{DateTime, Duration, TimeZone, Utc};
use quiz_arena::db::InMemoryStore;
use quiz_arena::events::BroadcastEventBus;
use quiz_arena::leaderboard::Period;
use quiz_arena::profile::UserProfile;
use quiz_arena::questions::Question;
use quiz_arena::session::{Answer, SessionSummary};
use quiz_arena::streak::{Multiplier, StreakChange, StreakError};
use quiz_arena::wallet::TransactionKind;
use quiz_arena::{Arena, ArenaConfig};
use std::sync::Arc;

const USER: i64 = 7;

fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap() + Duration::days(n)
}

fn setup(tokens: i64) -> (Arena, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    store.insert_profile(UserProfile::new(USER, "streaker", tokens));
    store.insert_questions((1..=20).map(|id| Question {
        id,
        text: format!("Question {id}"),
        options: ["a", "b", "c", "d"].map(String::from),
        correct_index: 1,
    }));
    let arena = Arena::new(
        store.clone(),
        Arc::new(BroadcastEventBus::default()),
        ArenaConfig::default(),
    );
    (arena, store)
}

/// Ten correct answers without speed bonus: raw score 100
async fn play(arena: &Arena, now: DateTime<Utc>) -> SessionSummary {
    let answers: Vec<Answer> = (1..=10)
        .map(|question_id| Answer {
            question_id,
            selected_index: 1,
            time_remaining: None,
        })
        .collect();
    arena.sessions.finish(USER, &answers, now).await.unwrap()
}

#[tokio::test]
async fn test_week_of_play_reaches_bronze_multiplier() {
    let (arena, _) = setup(0);

    for n in 0..6 {
        let summary = play(&arena, day(n)).await;
        assert_eq!(summary.streak, n as u32 + 1);
        assert_eq!(summary.multiplier, Multiplier::ONE);
        assert_eq!(summary.tokens_earned, 50);
    }

    let seventh = play(&arena, day(6)).await;
    assert_eq!(seventh.streak, 7);
    assert_eq!(seventh.multiplier, Multiplier(15));
    assert_eq!(seventh.tokens_earned, 75);
    assert_eq!(seventh.balance, 6 * 50 + 75);
}

#[tokio::test]
async fn test_missed_day_resets_and_locks() {
    let (arena, store) = setup(0);
    for n in 0..4 {
        play(&arena, day(n)).await;
    }

    let summary = play(&arena, day(6)).await;
    assert_eq!(summary.streak, 1);
    assert_eq!(summary.streak_change, StreakChange::Reset);

    let streak = store.profile(USER).unwrap().streak;
    assert!(streak.locked);
    assert_eq!(streak.locked_until, Some(day(6) + Duration::days(3)));

    // Consecutive play after the lock window clears it
    for n in 7..=10 {
        play(&arena, day(n)).await;
    }
    let streak = store.profile(USER).unwrap().streak;
    assert_eq!(streak.streak, 5);
    assert!(!streak.locked);
}

#[tokio::test]
async fn test_freeze_forgives_one_gap() {
    let (arena, store) = setup(200);
    for n in 0..3 {
        play(&arena, day(n)).await;
    }

    let freeze = arena.freezes.purchase(USER, day(2)).await.unwrap();
    assert!(!freeze.used);
    assert_eq!(store.profile(USER).unwrap().tokens, 200 + 150 - 50);
    let spend = store
        .transactions(USER)
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::Spend)
        .count();
    assert_eq!(spend, 1);

    // Skips day 3
    let forgiven = play(&arena, day(4)).await;
    assert_eq!(forgiven.streak_change, StreakChange::Forgiven);
    assert_eq!(forgiven.streak, 3);
    assert!(store.freezes(USER)[0].used);
    assert!(!arena.freezes.has_freeze(USER, day(4)).await.unwrap());

    // The forgiven play left last_played on day 2, so day 5 is a second gap
    let reset = play(&arena, day(5)).await;
    assert_eq!(reset.streak_change, StreakChange::Reset);
}

#[tokio::test]
async fn test_only_one_unused_freeze_at_a_time() {
    let (arena, store) = setup(500);
    arena.freezes.purchase(USER, day(0)).await.unwrap();

    assert!(matches!(
        arena.freezes.purchase(USER, day(1)).await,
        Err(StreakError::AlreadyHasFreeze)
    ));
    assert_eq!(store.profile(USER).unwrap().tokens, 450);
}

#[tokio::test]
async fn test_freeze_needs_enough_tokens() {
    let (arena, store) = setup(10);
    assert!(matches!(
        arena.freezes.purchase(USER, day(0)).await,
        Err(StreakError::Wallet(_))
    ));
    assert!(store.freezes(USER).is_empty());
}

#[tokio::test]
async fn test_sessions_accumulate_on_leaderboards() {
    let (arena, _) = setup(0);
    for n in 0..3 {
        play(&arena, day(n)).await;
    }

    let today = arena
        .leaderboard
        .position(USER, Period::Daily, day(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(today.score, 100);
    assert_eq!(today.games_played, 1);

    let all_time = arena
        .leaderboard
        .position(USER, Period::AllTime, day(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(all_time.score, 300);
    assert_eq!(all_time.games_played, 3);
    assert_eq!(all_time.tokens_earned, 150);
    assert_eq!(all_time.rank, Some(1));
}
