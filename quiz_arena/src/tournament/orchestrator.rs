//! Tournament lifecycle orchestrator.
//!
//! Drives `scheduled -> lobby -> active -> completed` one step at a time.
//! Every step re-loads the tournament, checks its persisted `next_wake_at`
//! and applies a compare-and-set [`Transition`], so a timer task and a
//! discovery pass racing on the same tournament cannot both advance it.

use super::manager::{TournamentError, TournamentResult};
use super::models::{Tournament, TournamentId, TournamentStatus, Transition, Winner};
use super::prize;
use crate::config::ArenaConfig;
use crate::db::{ProfileRepository, QuestionBank, TournamentRepository};
use crate::events::{ArenaEvent, Channel, EventBus};
use crate::leaderboard::{LeaderboardAggregator, ScoreContribution};
use crate::profile::UserId;
use crate::questions::PublicQuestion;
use crate::wallet::{RelatedEntity, TransactionKind, WalletError, WalletManager};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Idempotency key of a settlement credit
pub fn settlement_key(tournament_id: TournamentId, user_id: UserId, rank: u32) -> String {
    format!("tournament:{tournament_id}:user:{user_id}:rank:{rank}")
}

/// Result of one orchestration step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Moved to `status`; the next timer expires at `next_wake_at`
    Advanced {
        status: TournamentStatus,
        next_wake_at: Option<DateTime<Utc>>,
    },
    /// The current status's timer has not expired
    NotDue { next_wake_at: DateTime<Utc> },
    /// Already completed, or another worker applied the transition first
    Unchanged,
}

/// How a settlement credit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Credited { balance: i64 },
    /// The idempotency key was already in the ledger
    AlreadyCredited,
    /// Zero-token placements are recorded but not credited
    Skipped,
}

/// Tournament lifecycle orchestrator
pub struct TournamentOrchestrator {
    tournaments: Arc<dyn TournamentRepository>,
    profiles: Arc<dyn ProfileRepository>,
    questions: Arc<dyn QuestionBank>,
    wallet: WalletManager,
    leaderboard: LeaderboardAggregator,
    events: Arc<dyn EventBus>,
    config: ArenaConfig,
}

impl TournamentOrchestrator {
    pub fn new(
        tournaments: Arc<dyn TournamentRepository>,
        profiles: Arc<dyn ProfileRepository>,
        questions: Arc<dyn QuestionBank>,
        wallet: WalletManager,
        leaderboard: LeaderboardAggregator,
        events: Arc<dyn EventBus>,
        config: ArenaConfig,
    ) -> Self {
        Self {
            tournaments,
            profiles,
            questions,
            wallet,
            leaderboard,
            events,
            config,
        }
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Tournaments whose current timer has expired
    pub async fn due(&self, now: DateTime<Utc>) -> TournamentResult<Vec<Tournament>> {
        Ok(self.tournaments.list_due(now).await?)
    }

    /// Advance a tournament by one transition if its timer has expired
    pub async fn step(
        &self,
        tournament_id: TournamentId,
        now: DateTime<Utc>,
    ) -> TournamentResult<StepOutcome> {
        let tournament = self
            .tournaments
            .find_tournament(tournament_id)
            .await?
            .ok_or(TournamentError::NotFound(tournament_id))?;

        let Some(next_wake_at) = tournament.next_wake_at else {
            return Ok(StepOutcome::Unchanged);
        };
        if next_wake_at > now {
            return Ok(StepOutcome::NotDue { next_wake_at });
        }

        match tournament.status {
            TournamentStatus::Scheduled => self.open_lobby(&tournament, now).await,
            TournamentStatus::Lobby => self.start_play(&tournament, now).await,
            TournamentStatus::Active => self.settle(&tournament, now).await,
            TournamentStatus::Completed => Ok(StepOutcome::Unchanged),
        }
    }

    async fn open_lobby(
        &self,
        tournament: &Tournament,
        now: DateTime<Utc>,
    ) -> TournamentResult<StepOutcome> {
        let next_wake_at = now + self.config.lobby_window;
        let applied = self
            .tournaments
            .apply_transition(tournament.id, &Transition::OpenLobby { next_wake_at })
            .await?;
        if !applied {
            return Ok(StepOutcome::Unchanged);
        }

        let starting = ArenaEvent::TournamentStarting {
            tournament_id: tournament.id,
            starts_in_seconds: self.config.lobby_window.num_seconds().max(0) as u64,
        };
        self.events
            .publish(Channel::Tournament(tournament.id), starting.clone());
        self.events.publish(Channel::Lobby, starting);

        log::info!(
            "Tournament {} lobby open with {} players, play starts at {}",
            tournament.id,
            tournament.player_count(),
            next_wake_at
        );
        Ok(StepOutcome::Advanced {
            status: TournamentStatus::Lobby,
            next_wake_at: Some(next_wake_at),
        })
    }

    async fn start_play(
        &self,
        tournament: &Tournament,
        now: DateTime<Utc>,
    ) -> TournamentResult<StepOutcome> {
        let wanted = self.config.questions_per_tournament;
        let questions = self.questions.sample(wanted).await?;
        if questions.len() < wanted {
            log::warn!(
                "Tournament {}: question bank returned {} of {} questions",
                tournament.id,
                questions.len(),
                wanted
            );
        }

        let next_wake_at = now + self.config.play_window;
        let transition = Transition::Start {
            actual_start: now,
            question_ids: questions.iter().map(|q| q.id).collect(),
            next_wake_at,
        };
        if !self
            .tournaments
            .apply_transition(tournament.id, &transition)
            .await?
        {
            return Ok(StepOutcome::Unchanged);
        }

        self.events.publish(
            Channel::Tournament(tournament.id),
            ArenaEvent::TournamentStarted {
                tournament_id: tournament.id,
                questions: questions.iter().map(PublicQuestion::from).collect(),
            },
        );

        log::info!(
            "Tournament {} started with {} questions, play ends at {}",
            tournament.id,
            questions.len(),
            next_wake_at
        );
        Ok(StepOutcome::Advanced {
            status: TournamentStatus::Active,
            next_wake_at: Some(next_wake_at),
        })
    }

    /// Rank, pay out and complete an active tournament.
    ///
    /// Placements are recorded before any credit, and a re-run keeps the
    /// recorded ones, so every winner keeps one rank and one
    /// [`settlement_key`] across a settlement interrupted by a crash. Win
    /// counters and leaderboard deltas run only after the completion
    /// transition is applied.
    async fn settle(
        &self,
        tournament: &Tournament,
        now: DateTime<Utc>,
    ) -> TournamentResult<StepOutcome> {
        let standings = tournament.standings();
        let payouts = prize::distribute(tournament.tier, tournament.prize_pool);
        let winners = tournament.placements(&payouts);

        for winner in winners.iter().filter(|w| {
            tournament
                .entry(w.user_id)
                .is_some_and(|e| e.final_rank.is_none())
        }) {
            if let Err(e) = self
                .tournaments
                .record_placement(tournament.id, winner.user_id, winner.rank, winner.tokens)
                .await
            {
                log::error!(
                    "Tournament {}: failed to record placement for user {}: {}",
                    tournament.id,
                    winner.user_id,
                    e
                );
            }
        }

        for winner in &winners {
            if let Err(e) = self.credit_with_retry(tournament, winner).await {
                log::error!(
                    "Tournament {}: prize credit of {} for user {} (rank {}) failed: {}",
                    tournament.id,
                    winner.tokens,
                    winner.user_id,
                    winner.rank,
                    e
                );
            }
        }

        let transition = Transition::Complete {
            end_time: now,
            winners: winners.clone(),
        };
        if !self
            .tournaments
            .apply_transition(tournament.id, &transition)
            .await?
        {
            return Ok(StepOutcome::Unchanged);
        }

        if let Some(champion) = winners.iter().find(|w| w.rank == 1) {
            if let Err(e) = self.profiles.record_tournament_win(champion.user_id).await {
                log::error!(
                    "Tournament {}: failed to count win for user {}: {}",
                    tournament.id,
                    champion.user_id,
                    e
                );
            }
        }

        for entry in &standings {
            let placement = winners.iter().find(|w| w.user_id == entry.user_id);
            let contribution = ScoreContribution {
                score: entry.score,
                won: placement.is_some_and(|w| w.rank == 1),
                tokens_earned: placement.map_or(0, |w| w.tokens),
            };
            if let Err(e) = self
                .leaderboard
                .record(entry.user_id, contribution, now)
                .await
            {
                log::error!(
                    "Tournament {}: leaderboard update for user {} failed: {}",
                    tournament.id,
                    entry.user_id,
                    e
                );
            }
        }

        self.events.publish(
            Channel::Tournament(tournament.id),
            ArenaEvent::TournamentEnded {
                tournament_id: tournament.id,
            },
        );
        self.events.close(Channel::Tournament(tournament.id));

        let paid: i64 = winners.iter().map(|w| w.tokens).sum();
        log::info!(
            "Tournament {} completed: {} ranked, {} winners, {} of {} tokens paid",
            tournament.id,
            standings.len(),
            winners.len(),
            paid,
            tournament.prize_pool
        );
        Ok(StepOutcome::Advanced {
            status: TournamentStatus::Completed,
            next_wake_at: None,
        })
    }

    /// Credit one prize, retrying transient failures under the same key
    pub async fn credit_with_retry(
        &self,
        tournament: &Tournament,
        winner: &Winner,
    ) -> Result<CreditOutcome, WalletError> {
        if winner.tokens <= 0 {
            return Ok(CreditOutcome::Skipped);
        }

        let key = settlement_key(tournament.id, winner.user_id, winner.rank);
        if self.wallet.find_transaction(&key).await?.is_some() {
            return Ok(CreditOutcome::AlreadyCredited);
        }

        let attempts = self.config.settlement_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = self
                .wallet
                .credit(
                    winner.user_id,
                    winner.tokens,
                    TransactionKind::Reward,
                    format!("{} - rank {}", tournament.name, winner.rank),
                    Some(RelatedEntity::Tournament(tournament.id)),
                    key.clone(),
                )
                .await;

            match result {
                Ok(balance) => return Ok(CreditOutcome::Credited { balance }),
                Err(WalletError::DuplicateTransaction(_)) => {
                    return Ok(CreditOutcome::AlreadyCredited);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    log::warn!(
                        "Tournament {}: credit attempt {}/{} for user {} failed: {}",
                        tournament.id,
                        attempt,
                        attempts,
                        winner.user_id,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.settlement_retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryStore;
    use crate::events::BroadcastEventBus;
    use crate::profile::UserProfile;
    use crate::questions::Question;
    use crate::tournament::models::{NewTournament, Tier};
    use crate::tournament::TournamentManager;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        store: Arc<InMemoryStore>,
        events: Arc<BroadcastEventBus>,
        manager: TournamentManager,
        orchestrator: TournamentOrchestrator,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, 20, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        for id in 1..=6 {
            store.insert_profile(UserProfile::new(id, format!("p{id}"), 100));
        }
        store.insert_questions((1..=12).map(|id| Question {
            id,
            text: format!("Question {id}"),
            options: ["a", "b", "c", "d"].map(String::from),
            correct_index: 1,
        }));
        let events = Arc::new(BroadcastEventBus::default());
        let wallet = WalletManager::new(store.clone());
        let config = ArenaConfig {
            settlement_retry_backoff: std::time::Duration::from_millis(1),
            ..ArenaConfig::default()
        };
        Fixture {
            manager: TournamentManager::new(
                store.clone(),
                store.clone(),
                wallet.clone(),
                events.clone(),
            ),
            orchestrator: TournamentOrchestrator::new(
                store.clone(),
                store.clone(),
                store.clone(),
                wallet,
                LeaderboardAggregator::new(store.clone()),
                events.clone(),
                config,
            ),
            store,
            events,
        }
    }

    async fn to_active(f: &Fixture, players: &[UserId]) -> Tournament {
        let t = f
            .manager
            .create_tournament(
                NewTournament::for_tier("Night Cup", Tier::Small, start(), 20),
                start() - Duration::hours(2),
            )
            .await
            .unwrap();
        for user in players {
            f.manager.join(t.id, *user, start()).await.unwrap();
        }
        f.orchestrator.step(t.id, start()).await.unwrap();
        f.orchestrator
            .step(t.id, start() + Duration::seconds(60))
            .await
            .unwrap();
        f.manager.get(t.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_step_is_not_due_before_start() {
        let f = fixture();
        let t = f
            .manager
            .create_tournament(
                NewTournament::for_tier("Cup", Tier::Small, start(), 0),
                start(),
            )
            .await
            .unwrap();

        assert_eq!(
            f.orchestrator
                .step(t.id, start() - Duration::seconds(1))
                .await
                .unwrap(),
            StepOutcome::NotDue {
                next_wake_at: start()
            }
        );
    }

    #[tokio::test]
    async fn test_lobby_then_start_draws_questions() {
        let f = fixture();
        let t = f
            .manager
            .create_tournament(
                NewTournament::for_tier("Cup", Tier::Small, start(), 0),
                start(),
            )
            .await
            .unwrap();
        let mut lobby = f.events.subscribe(Channel::Lobby);
        let mut channel = f.events.subscribe(Channel::Tournament(t.id));

        let outcome = f.orchestrator.step(t.id, start()).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Advanced {
                status: TournamentStatus::Lobby,
                next_wake_at: Some(start() + Duration::seconds(60)),
            }
        );
        assert!(matches!(
            lobby.recv().await.unwrap(),
            ArenaEvent::TournamentStarting {
                starts_in_seconds: 60,
                ..
            }
        ));

        // Lobby window not over yet
        assert!(matches!(
            f.orchestrator
                .step(t.id, start() + Duration::seconds(30))
                .await
                .unwrap(),
            StepOutcome::NotDue { .. }
        ));

        f.orchestrator
            .step(t.id, start() + Duration::seconds(60))
            .await
            .unwrap();
        let t = f.manager.get(t.id).await.unwrap();
        assert_eq!(t.status, TournamentStatus::Active);
        assert_eq!(t.question_ids.len(), 10);
        assert_eq!(t.actual_start, Some(start() + Duration::seconds(60)));

        let _starting = channel.recv().await.unwrap();
        match channel.recv().await.unwrap() {
            ArenaEvent::TournamentStarted { questions, .. } => {
                assert_eq!(questions.len(), 10);
                let json = serde_json::to_string(&questions).unwrap();
                assert!(!json.contains("correct_index"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_settlement_pays_top_three() {
        let f = fixture();
        let t = to_active(&f, &[1, 2, 3, 4, 5]).await;
        let play = t.actual_start.unwrap();
        for (user, score) in [(1, 30), (2, 90), (3, 60), (4, 60)] {
            f.manager
                .submit_score(t.id, user, score, play + Duration::seconds(10))
                .await
                .unwrap();
        }

        let outcome = f
            .orchestrator
            .step(t.id, play + Duration::seconds(120))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Advanced {
                status: TournamentStatus::Completed,
                next_wake_at: None
            }
        );

        let t = f.manager.get(t.id).await.unwrap();
        assert_eq!(t.prize_pool, 100);
        assert_eq!(
            t.winners,
            vec![
                Winner { user_id: 2, rank: 1, tokens: 50 },
                Winner { user_id: 3, rank: 2, tokens: 30 },
                Winner { user_id: 4, rank: 3, tokens: 20 },
            ]
        );
        assert_eq!(f.store.profile(2).unwrap().tokens, 130);
        assert_eq!(f.store.profile(2).unwrap().tournaments_won, 1);
        assert_eq!(f.store.profile(1).unwrap().tokens, 80);
        // User 5 never submitted and is not ranked
        assert_eq!(t.entry(5).unwrap().final_rank, None);
        assert_eq!(t.entry(4).unwrap().final_rank, Some(3));
        assert!(t.end_time.is_some());
    }

    #[tokio::test]
    async fn test_settlement_is_idempotent() {
        let f = fixture();
        let t = to_active(&f, &[1, 2]).await;
        let play = t.actual_start.unwrap();
        f.manager.submit_score(t.id, 1, 10, play).await.unwrap();

        // First run credits but crashes before the completion transition
        f.store.inject_transition_failures(1);
        let end = play + Duration::seconds(120);
        assert!(f.orchestrator.step(t.id, end).await.is_err());
        assert_eq!(f.store.profile(1).unwrap().tokens, 80 + 20);

        // Recovery pass settles again without paying twice
        f.orchestrator.step(t.id, end).await.unwrap();
        assert_eq!(f.store.profile(1).unwrap().tokens, 100);
        let rewards = f
            .store
            .transactions(1)
            .into_iter()
            .filter(|tx| tx.kind == TransactionKind::Reward)
            .count();
        assert_eq!(rewards, 1);
        assert_eq!(f.store.profile(1).unwrap().tournaments_won, 1);

        assert_eq!(
            f.orchestrator.step(t.id, end).await.unwrap(),
            StepOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn test_transient_credit_failure_is_retried() {
        let f = fixture();
        let t = to_active(&f, &[1, 2]).await;
        let play = t.actual_start.unwrap();
        f.manager.submit_score(t.id, 2, 10, play).await.unwrap();

        f.store.inject_ledger_failures(2, 2);
        f.orchestrator
            .step(t.id, play + Duration::seconds(120))
            .await
            .unwrap();
        assert_eq!(f.store.profile(2).unwrap().tokens, 80 + 20);
    }

    #[tokio::test]
    async fn test_exhausted_retries_still_complete() {
        let f = fixture();
        let t = to_active(&f, &[1, 2, 3]).await;
        let play = t.actual_start.unwrap();
        f.manager.submit_score(t.id, 1, 50, play).await.unwrap();
        f.manager.submit_score(t.id, 2, 40, play).await.unwrap();

        f.store.inject_ledger_failures(1, 10);
        f.orchestrator
            .step(t.id, play + Duration::seconds(120))
            .await
            .unwrap();

        let t = f.manager.get(t.id).await.unwrap();
        assert_eq!(t.status, TournamentStatus::Completed);
        // Rank stays assigned even though the credit failed
        assert_eq!(t.entry(1).unwrap().final_rank, Some(1));
        assert_eq!(f.store.profile(1).unwrap().tokens, 80);
        assert_eq!(f.store.profile(2).unwrap().tokens, 80 + 18);
    }

    #[tokio::test]
    async fn test_settlement_feeds_leaderboard() {
        let f = fixture();
        let t = to_active(&f, &[1, 2]).await;
        let play = t.actual_start.unwrap();
        f.manager.submit_score(t.id, 1, 70, play).await.unwrap();
        f.manager.submit_score(t.id, 2, 20, play).await.unwrap();
        let end = play + Duration::seconds(120);
        f.orchestrator.step(t.id, end).await.unwrap();

        let aggregator = LeaderboardAggregator::new(f.store.clone());
        let top = aggregator
            .top(crate::leaderboard::Period::AllTime, end, None)
            .await
            .unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].user_id, 1);
        assert_eq!(top[0].wins, 1);
        assert_eq!(top[0].tokens_earned, 20);
        assert_eq!(top[1].wins, 0);
        assert_eq!(top[1].tokens_earned, 12);
    }
}
