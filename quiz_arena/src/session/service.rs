//! Daily session service: one scored quiz run per user per UTC day.
//!
//! Finishing a session feeds the streak engine, credits the multiplied
//! token award and records the score on every leaderboard period.

use super::models::{
    Answer, DailySession, NewDailySession, SessionQuestions, SessionSummary, WIN_ACCURACY,
};
use crate::db::{ProfileRepository, QuestionBank, RepositoryError, SessionRepository};
use crate::leaderboard::{LeaderboardAggregator, ScoreContribution};
use crate::profile::UserId;
use crate::questions::{OPTION_COUNT, PublicQuestion, Question, QuestionId};
use crate::streak::{StreakEngine, StreakError, StreakOutcome};
use crate::wallet::{RelatedEntity, TransactionKind, WalletError, WalletManager};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Daily session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session: {0}")]
    Validation(String),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Daily session already played on {0}")]
    AlreadyPlayed(NaiveDate),

    #[error("Question bank has {available} questions, need at least {required}")]
    NotEnoughQuestions { available: usize, required: usize },

    #[error("Streak error: {0}")]
    Streak(#[from] StreakError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Storage error: {0}")]
    Repository(#[from] RepositoryError),
}

impl SessionError {
    pub fn client_message(&self) -> String {
        match self {
            SessionError::Streak(e) => e.client_message(),
            SessionError::Wallet(e) => e.client_message(),
            SessionError::Repository(_) => "Internal server error".to_string(),
            SessionError::NotEnoughQuestions { .. } => {
                "Daily session is temporarily unavailable".to_string()
            }
            _ => self.to_string(),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Idempotency key of a daily session's token credit
pub fn daily_credit_key(user_id: UserId, day: NaiveDate) -> String {
    format!("daily:{user_id}:{}", day.format("%Y-%m-%d"))
}

/// Score tally for one submitted run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub score: i64,
    pub correct: u32,
    pub total: u32,
    /// Whole percent, floored
    pub accuracy: u32,
}

/// Score a run. Only the first answer per question counts; answers to
/// unknown questions count as wrong.
pub fn tally(answers: &[Answer], questions: &HashMap<QuestionId, Question>) -> Tally {
    let mut seen = HashSet::new();
    let mut score = 0;
    let mut correct = 0u32;
    let mut total = 0u32;

    for answer in answers {
        if !seen.insert(answer.question_id) {
            continue;
        }
        total += 1;
        let is_correct = questions
            .get(&answer.question_id)
            .is_some_and(|q| q.is_correct(answer.selected_index));
        if is_correct {
            correct += 1;
        }
        score += answer.points(is_correct);
    }

    let accuracy = if total == 0 { 0 } else { correct * 100 / total };
    Tally {
        score,
        correct,
        total,
        accuracy,
    }
}

/// Daily session service
#[derive(Clone)]
pub struct DailySessionService {
    sessions: Arc<dyn SessionRepository>,
    profiles: Arc<dyn ProfileRepository>,
    questions: Arc<dyn QuestionBank>,
    streaks: StreakEngine,
    wallet: WalletManager,
    leaderboard: LeaderboardAggregator,
    daily_questions: usize,
    min_daily_questions: usize,
    user_locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl DailySessionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        profiles: Arc<dyn ProfileRepository>,
        questions: Arc<dyn QuestionBank>,
        streaks: StreakEngine,
        wallet: WalletManager,
        leaderboard: LeaderboardAggregator,
        daily_questions: usize,
        min_daily_questions: usize,
    ) -> Self {
        Self {
            sessions,
            profiles,
            questions,
            streaks,
            wallet,
            leaderboard,
            daily_questions,
            min_daily_questions,
            user_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Today's session for a user, if already finished
    pub async fn today(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> SessionResult<Option<DailySession>> {
        Ok(self
            .sessions
            .find_daily_session(user_id, now.date_naive())
            .await?)
    }

    /// Hand out today's questions
    ///
    /// # Errors
    ///
    /// * `SessionError::AlreadyPlayed` - Finished a session today
    /// * `SessionError::NotEnoughQuestions` - Question bank too small
    pub async fn start(&self, user_id: UserId, now: DateTime<Utc>) -> SessionResult<SessionQuestions> {
        let day = now.date_naive();
        if self.profiles.find_profile(user_id).await?.is_none() {
            return Err(SessionError::UserNotFound(user_id));
        }
        if self.sessions.find_daily_session(user_id, day).await?.is_some() {
            return Err(SessionError::AlreadyPlayed(day));
        }

        let questions = self.questions.sample(self.daily_questions).await?;
        if questions.len() < self.min_daily_questions {
            log::warn!(
                "Daily session for user {}: only {} questions available",
                user_id,
                questions.len()
            );
            return Err(SessionError::NotEnoughQuestions {
                available: questions.len(),
                required: self.min_daily_questions,
            });
        }

        Ok(SessionQuestions {
            day,
            questions: questions.iter().map(PublicQuestion::from).collect(),
        })
    }

    /// Score a finished run and apply its rewards.
    ///
    /// The day's session row is claimed before any reward is applied, so a
    /// second finish fails with `AlreadyPlayed` once the rewards are in. A
    /// claim left unrewarded by a failed finish is resumed by the next call:
    /// the claimed score is kept, the recorded streak result is reused and
    /// the credit runs again under the day's key.
    ///
    /// # Errors
    ///
    /// * `SessionError::Validation` - No answers, or an option index out of range
    /// * `SessionError::UserNotFound` - Unknown user
    /// * `SessionError::AlreadyPlayed` - Finished a session today
    pub async fn finish(
        &self,
        user_id: UserId,
        answers: &[Answer],
        now: DateTime<Utc>,
    ) -> SessionResult<SessionSummary> {
        if answers.is_empty() {
            return Err(SessionError::Validation("no answers submitted".into()));
        }
        if answers
            .iter()
            .any(|a| usize::from(a.selected_index) >= OPTION_COUNT)
        {
            return Err(SessionError::Validation(format!(
                "selected_index must be below {OPTION_COUNT}"
            )));
        }
        if self.profiles.find_profile(user_id).await?.is_none() {
            return Err(SessionError::UserNotFound(user_id));
        }

        let _guard = self.lock_user(user_id).await;
        let day = now.date_naive();
        let session = match self.sessions.find_daily_session(user_id, day).await? {
            Some(session) if session.is_rewarded() => {
                return Err(SessionError::AlreadyPlayed(day));
            }
            Some(session) => {
                log::warn!(
                    "User {}: resuming unrewarded daily session {}",
                    user_id,
                    session.id
                );
                session
            }
            None => self.claim(user_id, answers, now).await?,
        };
        let tally = Tally {
            score: session.score,
            correct: session.correct,
            total: session.total,
            accuracy: session.accuracy,
        };

        let streak = match session.streak {
            Some(outcome) => outcome,
            None => self.record_streak(user_id, session.id, now).await?,
        };
        let tokens = streak.multiplier.award(tally.score);

        let balance = if tokens > 0 {
            let credit = self
                .wallet
                .credit(
                    user_id,
                    tokens,
                    TransactionKind::Earn,
                    format!("Daily session {day} ({} multiplier)", streak.multiplier),
                    Some(RelatedEntity::DailySession(session.id)),
                    daily_credit_key(user_id, day),
                )
                .await;
            match credit {
                Ok(balance) => balance,
                // Credited by the failed attempt this call resumes
                Err(WalletError::DuplicateTransaction(_)) => self.wallet.balance(user_id).await?,
                Err(e) => return Err(e.into()),
            }
        } else {
            self.wallet.balance(user_id).await?
        };
        self.sessions
            .record_session_tokens(session.id, tokens)
            .await?;

        let won = tally.accuracy >= WIN_ACCURACY;
        if let Err(e) = self.profiles.record_daily_session(user_id, won).await {
            log::warn!("Failed to count daily session for user {}: {}", user_id, e);
        }

        let contribution = ScoreContribution {
            score: tally.score,
            won: false,
            tokens_earned: tokens,
        };
        if let Err(e) = self.leaderboard.record(user_id, contribution, now).await {
            log::error!("Leaderboard update for user {} failed: {}", user_id, e);
        }

        log::info!(
            "User {} finished daily session {}: score {}, {}/{} correct, {} tokens at {} (streak {})",
            user_id,
            session.id,
            tally.score,
            tally.correct,
            tally.total,
            tokens,
            streak.multiplier,
            streak.streak
        );

        Ok(SessionSummary {
            session_id: session.id,
            score: tally.score,
            correct: tally.correct,
            total: tally.total,
            accuracy: tally.accuracy,
            tokens_earned: tokens,
            streak: streak.streak,
            multiplier: streak.multiplier,
            streak_change: streak.change,
            balance,
        })
    }

    async fn claim(
        &self,
        user_id: UserId,
        answers: &[Answer],
        now: DateTime<Utc>,
    ) -> SessionResult<DailySession> {
        let ids: Vec<QuestionId> = answers.iter().map(|a| a.question_id).collect();
        let questions: HashMap<QuestionId, Question> = self
            .questions
            .find_many(&ids)
            .await?
            .into_iter()
            .map(|q| (q.id, q))
            .collect();
        let tally = tally(answers, &questions);

        let day = now.date_naive();
        self.sessions
            .insert_daily_session(&NewDailySession {
                user_id,
                day,
                score: tally.score,
                correct: tally.correct,
                total: tally.total,
                accuracy: tally.accuracy,
                completed_at: now,
            })
            .await?
            .ok_or(SessionError::AlreadyPlayed(day))
    }

    async fn record_streak(
        &self,
        user_id: UserId,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> SessionResult<StreakOutcome> {
        let outcome = self.streaks.record_play(user_id, now).await?;
        self.sessions
            .record_session_streak(session_id, &outcome)
            .await?;
        Ok(outcome)
    }

    async fn lock_user(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.user_locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryStore;
    use crate::leaderboard::Period;
    use crate::profile::UserProfile;
    use crate::db::StreakFreezeRepository;
    use crate::streak::{Multiplier, StreakChange, StreakConfig, StreakState};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0).unwrap()
    }

    fn question(id: QuestionId) -> Question {
        Question {
            id,
            text: format!("Q{id}"),
            options: ["a", "b", "c", "d"].map(String::from),
            correct_index: 0,
        }
    }

    fn answer(question_id: QuestionId, selected_index: u8) -> Answer {
        Answer {
            question_id,
            selected_index,
            time_remaining: None,
        }
    }

    fn service(question_count: i64) -> (DailySessionService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store.insert_profile(UserProfile::new(1, "grace", 0));
        store.insert_questions((1..=question_count).map(question));
        let wallet = WalletManager::new(store.clone());
        let streaks = StreakEngine::new(store.clone(), store.clone(), StreakConfig::default());
        let service = DailySessionService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            streaks,
            wallet,
            LeaderboardAggregator::new(store.clone()),
            15,
            10,
        );
        (service, store)
    }

    #[test]
    fn test_tally_counts_first_answer_only() {
        let questions: HashMap<_, _> = (1..=3).map(|id| (id, question(id))).collect();
        let answers = [
            Answer {
                question_id: 1,
                selected_index: 0,
                time_remaining: Some(8),
            },
            answer(1, 0),
            answer(2, 3),
            answer(99, 0),
        ];
        let t = tally(&answers, &questions);
        assert_eq!(t.total, 3);
        assert_eq!(t.correct, 1);
        assert_eq!(t.score, 14);
        assert_eq!(t.accuracy, 33);
    }

    #[tokio::test]
    async fn test_start_samples_questions_without_answers() {
        let (service, _) = service(20);
        let started = service.start(1, now()).await.unwrap();
        assert_eq!(started.questions.len(), 15);
        assert_eq!(started.day, now().date_naive());
    }

    #[tokio::test]
    async fn test_start_fails_on_small_bank() {
        let (service, _) = service(6);
        assert!(matches!(
            service.start(1, now()).await,
            Err(SessionError::NotEnoughQuestions {
                available: 6,
                required: 10
            })
        ));
    }

    #[tokio::test]
    async fn test_finish_credits_and_records() {
        let (service, store) = service(10);
        let answers: Vec<Answer> = (1..=10).map(|id| answer(id, 0)).collect();

        let summary = service.finish(1, &answers, now()).await.unwrap();
        assert_eq!(summary.score, 100);
        assert_eq!(summary.accuracy, 100);
        assert_eq!(summary.tokens_earned, 50);
        assert_eq!(summary.streak, 1);
        assert_eq!(summary.multiplier, Multiplier::ONE);
        assert_eq!(summary.balance, 50);

        let profile = store.profile(1).unwrap();
        assert_eq!(profile.daily_sessions_played, 1);
        assert_eq!(profile.total_wins, 1);
        let tx = store.transactions(1);
        assert_eq!(tx.len(), 1);
        assert_eq!(tx[0].idempotency_key, "daily:1:2026-03-10");

        let today = service.today(1, now()).await.unwrap().unwrap();
        assert_eq!(today.tokens_earned, Some(50));

        let row = LeaderboardAggregator::new(store.clone())
            .position(1, Period::Daily, now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.score, 100);
        assert_eq!(row.wins, 0);
    }

    #[tokio::test]
    async fn test_second_finish_same_day_is_rejected() {
        let (service, store) = service(10);
        service.finish(1, &[answer(1, 0)], now()).await.unwrap();

        let later = now() + Duration::hours(5);
        assert!(matches!(
            service.finish(1, &[answer(2, 0)], later).await,
            Err(SessionError::AlreadyPlayed(_))
        ));
        assert!(matches!(
            service.start(1, later).await,
            Err(SessionError::AlreadyPlayed(_))
        ));
        assert_eq!(store.transactions(1).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_credit_is_resumed_on_retry() {
        let (service, store) = service(10);
        let answers: Vec<Answer> = (1..=10).map(|id| answer(id, 0)).collect();

        store.inject_ledger_failures(1, 1);
        assert!(matches!(
            service.finish(1, &answers, now()).await,
            Err(SessionError::Wallet(_))
        ));
        let pending = service.today(1, now()).await.unwrap().unwrap();
        assert!(!pending.is_rewarded());
        assert_eq!(store.profile(1).unwrap().streak.streak, 1);

        // The retry keeps the claimed score and awards it once
        let later = now() + Duration::minutes(1);
        let summary = service.finish(1, &[answer(1, 3)], later).await.unwrap();
        assert_eq!(summary.score, 100);
        assert_eq!(summary.tokens_earned, 50);
        assert_eq!(summary.streak, 1);
        assert_eq!(summary.balance, 50);
        assert_eq!(store.transactions(1).len(), 1);
        assert_eq!(store.profile(1).unwrap().daily_sessions_played, 1);

        assert!(matches!(
            service.finish(1, &answers, later).await,
            Err(SessionError::AlreadyPlayed(_))
        ));
    }

    #[tokio::test]
    async fn test_resumed_finish_reuses_forgiven_streak() {
        let (service, store) = service(10);
        let mut profile = store.profile(1).unwrap();
        profile.streak = StreakState {
            streak: 9,
            last_played: Some(now().date_naive() - Duration::days(4)),
            locked: false,
            locked_until: None,
        };
        store.insert_profile(profile);
        store
            .insert_freeze(1, now() + Duration::days(7), now() - Duration::days(5))
            .await
            .unwrap()
            .unwrap();

        store.inject_ledger_failures(1, 1);
        let answers: Vec<Answer> = (1..=4).map(|id| answer(id, 0)).collect();
        assert!(service.finish(1, &answers, now()).await.is_err());

        let summary = service.finish(1, &answers, now()).await.unwrap();
        assert_eq!(summary.streak_change, StreakChange::Forgiven);
        assert_eq!(summary.streak, 9);
        assert_eq!(summary.multiplier, Multiplier(15));
        assert_eq!(summary.tokens_earned, 30);
        let streak = store.profile(1).unwrap().streak;
        assert_eq!(streak.streak, 9);
        assert!(!streak.locked);
    }

    #[tokio::test]
    async fn test_multiplier_applies_to_award() {
        let (service, store) = service(10);
        let mut profile = store.profile(1).unwrap();
        profile.streak = StreakState {
            streak: 13,
            last_played: Some(now().date_naive() - Duration::days(1)),
            locked: false,
            locked_until: None,
        };
        store.insert_profile(profile);

        let answers: Vec<Answer> = (1..=3).map(|id| answer(id, 0)).collect();
        let summary = service.finish(1, &answers, now()).await.unwrap();
        assert_eq!(summary.streak, 14);
        assert_eq!(summary.multiplier, Multiplier(20));
        assert_eq!(summary.tokens_earned, 30);
    }

    #[tokio::test]
    async fn test_zero_score_credits_nothing() {
        let (service, store) = service(10);
        let summary = service.finish(1, &[answer(1, 2)], now()).await.unwrap();
        assert_eq!(summary.tokens_earned, 0);
        assert_eq!(summary.balance, 0);
        assert!(store.transactions(1).is_empty());
    }

    #[tokio::test]
    async fn test_validation() {
        let (service, _) = service(10);
        assert!(matches!(
            service.finish(1, &[], now()).await,
            Err(SessionError::Validation(_))
        ));
        assert!(matches!(
            service.finish(1, &[answer(1, 4)], now()).await,
            Err(SessionError::Validation(_))
        ));
        assert!(matches!(
            service.finish(42, &[answer(1, 0)], now()).await,
            Err(SessionError::UserNotFound(42))
        ));
    }
}
