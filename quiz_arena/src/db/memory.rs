//! In-memory implementation of every repository trait.
//!
//! Used by the test suites and by the server when no `DATABASE_URL` is
//! configured. All state sits behind one mutex, so every trait method is
//! atomic the same way a single SQL transaction is.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::repository::{
    LedgerRepository, LeaderboardRepository, ProfileRepository, QuestionBank, RepositoryError,
    RepositoryResult, SessionRepository, StreakFreezeRepository, TournamentRepository,
};
use crate::leaderboard::{LeaderboardEntry, LeaderboardKey, Period, ScoreContribution};
use crate::profile::{UserId, UserProfile};
use crate::questions::{Question, QuestionId};
use crate::session::{DailySession, NewDailySession};
use crate::streak::{StreakFreeze, StreakOutcome, StreakState};
use crate::tournament::models::{
    AppendOutcome, NewTournament, Tournament, TournamentEntry, TournamentId, TournamentStatus,
    Transition,
};
use crate::wallet::{LedgerOutcome, NewTransaction, WalletTransaction};

#[derive(Default)]
struct State {
    profiles: HashMap<UserId, UserProfile>,
    tournaments: BTreeMap<TournamentId, Tournament>,
    /// Value carries a creation sequence for stable ordering of unranked rows
    leaderboard: HashMap<LeaderboardKey, (u64, LeaderboardEntry)>,
    next_seq: u64,
    freezes: Vec<StreakFreeze>,
    transactions: Vec<WalletTransaction>,
    sessions: Vec<DailySession>,
    questions: BTreeMap<QuestionId, Question>,
    #[cfg(any(test, feature = "test-util"))]
    ledger_failures: HashMap<UserId, u32>,
    #[cfg(any(test, feature = "test-util"))]
    transition_failures: u32,
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a profile
    pub fn insert_profile(&self, profile: UserProfile) {
        self.state().profiles.insert(profile.id, profile);
    }

    /// Snapshot of a profile
    pub fn profile(&self, user_id: UserId) -> Option<UserProfile> {
        self.state().profiles.get(&user_id).cloned()
    }

    pub fn insert_question(&self, question: Question) {
        self.state().questions.insert(question.id, question);
    }

    pub fn insert_questions(&self, questions: impl IntoIterator<Item = Question>) {
        let mut state = self.state();
        for question in questions {
            state.questions.insert(question.id, question);
        }
    }

    /// Every ledger record for a user, oldest first
    pub fn transactions(&self, user_id: UserId) -> Vec<WalletTransaction> {
        self.state()
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Every freeze a user bought, oldest first
    pub fn freezes(&self, user_id: UserId) -> Vec<StreakFreeze> {
        self.state()
            .freezes
            .iter()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Make the next `times` ledger writes for a user fail as unavailable
    #[cfg(any(test, feature = "test-util"))]
    pub fn inject_ledger_failures(&self, user_id: UserId, times: u32) {
        self.state().ledger_failures.insert(user_id, times);
    }

    /// Make the next `times` tournament transitions fail as unavailable
    #[cfg(any(test, feature = "test-util"))]
    pub fn inject_transition_failures(&self, times: u32) {
        self.state().transition_failures = times;
    }

    /// Overwrite a tournament's wake time
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_next_wake_at(&self, id: TournamentId, next_wake_at: Option<DateTime<Utc>>) {
        if let Some(t) = self.state().tournaments.get_mut(&id) {
            t.next_wake_at = next_wake_at;
        }
    }
}

fn profile_mut(state: &mut State, user_id: UserId) -> RepositoryResult<&mut UserProfile> {
    state
        .profiles
        .get_mut(&user_id)
        .ok_or_else(|| RepositoryError::Corrupt(format!("no profile for user {user_id}")))
}

#[async_trait]
impl TournamentRepository for InMemoryStore {
    async fn insert_tournament(
        &self,
        new: &NewTournament,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Tournament> {
        let mut state = self.state();
        let id = state.tournaments.keys().next_back().copied().unwrap_or(0) + 1;
        let tournament = Tournament {
            id,
            name: new.name.clone(),
            tier: new.tier,
            status: TournamentStatus::Scheduled,
            scheduled_start: new.scheduled_start,
            actual_start: None,
            end_time: None,
            next_wake_at: Some(new.scheduled_start),
            max_players: new.max_players,
            entry_fee: new.entry_fee,
            prize_pool: 0,
            entries: Vec::new(),
            question_ids: Vec::new(),
            winners: Vec::new(),
            created_at: now,
        };
        state.tournaments.insert(id, tournament.clone());
        Ok(tournament)
    }

    async fn find_tournament(&self, id: TournamentId) -> RepositoryResult<Option<Tournament>> {
        Ok(self.state().tournaments.get(&id).cloned())
    }

    async fn list_tournaments(
        &self,
        status: Option<TournamentStatus>,
    ) -> RepositoryResult<Vec<Tournament>> {
        let mut list: Vec<Tournament> = self
            .state()
            .tournaments
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        list.sort_by_key(|t| (t.scheduled_start, t.id));
        Ok(list)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<Tournament>> {
        let mut list: Vec<Tournament> = self
            .state()
            .tournaments
            .values()
            .filter(|t| t.status != TournamentStatus::Completed && t.is_due(now))
            .cloned()
            .collect();
        list.sort_by_key(|t| (t.next_wake_at, t.id));
        Ok(list)
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        statuses: &[TournamentStatus],
    ) -> RepositoryResult<Vec<Tournament>> {
        let mut list: Vec<Tournament> = self
            .state()
            .tournaments
            .values()
            .filter(|t| t.has_entrant(user_id) && statuses.contains(&t.status))
            .cloned()
            .collect();
        list.sort_by_key(|t| (t.scheduled_start, t.id));
        Ok(list)
    }

    async fn append_entry(
        &self,
        id: TournamentId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> RepositoryResult<AppendOutcome> {
        let mut state = self.state();
        let Some(tournament) = state.tournaments.get_mut(&id) else {
            return Ok(AppendOutcome::NotFound);
        };
        if !tournament.status.is_joinable() {
            return Ok(AppendOutcome::NotJoinable(tournament.status));
        }
        if tournament.has_entrant(user_id) {
            return Ok(AppendOutcome::AlreadyJoined);
        }
        if tournament.is_full() {
            return Ok(AppendOutcome::Full);
        }
        tournament
            .entries
            .push(TournamentEntry::new(user_id, joined_at));
        tournament.prize_pool += tournament.entry_fee;
        Ok(AppendOutcome::Appended(tournament.clone()))
    }

    async fn record_score(
        &self,
        id: TournamentId,
        user_id: UserId,
        score: i64,
        completed_at: DateTime<Utc>,
    ) -> RepositoryResult<Option<Tournament>> {
        let mut state = self.state();
        let Some(tournament) = state.tournaments.get_mut(&id) else {
            return Ok(None);
        };
        if tournament.status != TournamentStatus::Active || tournament.is_due(completed_at) {
            return Ok(None);
        }
        let Some(entry) = tournament.entries.iter_mut().find(|e| e.user_id == user_id) else {
            return Ok(None);
        };
        entry.score = score;
        entry.completed_at = Some(completed_at);
        Ok(Some(tournament.clone()))
    }

    async fn record_placement(
        &self,
        id: TournamentId,
        user_id: UserId,
        rank: u32,
        tokens: i64,
    ) -> RepositoryResult<()> {
        let mut state = self.state();
        let entry = state
            .tournaments
            .get_mut(&id)
            .and_then(|t| t.entries.iter_mut().find(|e| e.user_id == user_id))
            .ok_or_else(|| {
                RepositoryError::Corrupt(format!("no entry for user {user_id} in {id}"))
            })?;
        entry.final_rank = Some(rank);
        entry.tokens_won = tokens;
        Ok(())
    }

    async fn apply_transition(
        &self,
        id: TournamentId,
        transition: &Transition,
    ) -> RepositoryResult<bool> {
        let mut state = self.state();
        #[cfg(any(test, feature = "test-util"))]
        if state.transition_failures > 0 {
            state.transition_failures -= 1;
            return Err(RepositoryError::Unavailable(
                "injected transition failure".to_string(),
            ));
        }
        match state.tournaments.get_mut(&id) {
            Some(t) if t.status == transition.from() => {
                transition.apply_to(t);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl LeaderboardRepository for InMemoryStore {
    async fn add_contribution(
        &self,
        key: &LeaderboardKey,
        contribution: &ScoreContribution,
    ) -> RepositoryResult<LeaderboardEntry> {
        let mut state = self.state();
        let seq = state.next_seq;
        let (_, entry) = state.leaderboard.entry(*key).or_insert_with(|| {
            (
                seq,
                LeaderboardEntry {
                    user_id: key.user_id,
                    period: key.period,
                    period_start: key.period_start,
                    score: 0,
                    rank: None,
                    games_played: 0,
                    wins: 0,
                    tokens_earned: 0,
                },
            )
        });
        entry.score += contribution.score;
        entry.games_played += 1;
        entry.wins += i64::from(contribution.won);
        entry.tokens_earned += contribution.tokens_earned;
        let entry = entry.clone();
        state.next_seq += 1;
        Ok(entry)
    }

    async fn period_entries(
        &self,
        period: Period,
        period_start: DateTime<Utc>,
    ) -> RepositoryResult<Vec<LeaderboardEntry>> {
        let state = self.state();
        let mut rows: Vec<&(u64, LeaderboardEntry)> = state
            .leaderboard
            .values()
            .filter(|(_, e)| e.period == period && e.period_start == period_start)
            .collect();
        // Ranked rows first by rank, then unranked by creation order
        rows.sort_by_key(|(seq, e)| (e.rank.is_none(), e.rank, *seq));
        Ok(rows.into_iter().map(|(_, e)| e.clone()).collect())
    }

    async fn write_ranks(
        &self,
        period: Period,
        period_start: DateTime<Utc>,
        ranks: &[(UserId, u32)],
    ) -> RepositoryResult<()> {
        let mut state = self.state();
        for &(user_id, rank) in ranks {
            let key = LeaderboardKey {
                user_id,
                period,
                period_start,
            };
            if let Some((_, entry)) = state.leaderboard.get_mut(&key) {
                entry.rank = Some(rank);
            }
        }
        Ok(())
    }

    async fn find_entry(&self, key: &LeaderboardKey) -> RepositoryResult<Option<LeaderboardEntry>> {
        Ok(self.state().leaderboard.get(key).map(|(_, e)| e.clone()))
    }
}

#[async_trait]
impl ProfileRepository for InMemoryStore {
    async fn find_profile(&self, user_id: UserId) -> RepositoryResult<Option<UserProfile>> {
        Ok(self.profile(user_id))
    }

    async fn save_streak(&self, user_id: UserId, streak: &StreakState) -> RepositoryResult<()> {
        profile_mut(&mut self.state(), user_id)?.streak = streak.clone();
        Ok(())
    }

    async fn record_tournament_join(&self, user_id: UserId) -> RepositoryResult<()> {
        profile_mut(&mut self.state(), user_id)?.tournaments_joined += 1;
        Ok(())
    }

    async fn record_tournament_win(&self, user_id: UserId) -> RepositoryResult<()> {
        let mut state = self.state();
        let profile = profile_mut(&mut state, user_id)?;
        profile.tournaments_won += 1;
        profile.total_wins += 1;
        Ok(())
    }

    async fn record_daily_session(&self, user_id: UserId, won: bool) -> RepositoryResult<()> {
        let mut state = self.state();
        let profile = profile_mut(&mut state, user_id)?;
        profile.total_games += 1;
        profile.daily_sessions_played += 1;
        profile.total_wins += i64::from(won);
        Ok(())
    }
}

#[async_trait]
impl StreakFreezeRepository for InMemoryStore {
    async fn find_unused_freeze(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<StreakFreeze>> {
        Ok(self
            .state()
            .freezes
            .iter()
            .find(|f| f.user_id == user_id && f.is_available(now))
            .cloned())
    }

    async fn mark_freeze_used(&self, freeze_id: i64) -> RepositoryResult<bool> {
        let mut state = self.state();
        match state.freezes.iter_mut().find(|f| f.id == freeze_id) {
            Some(freeze) if !freeze.used => {
                freeze.used = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_freeze(
        &self,
        user_id: UserId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<StreakFreeze>> {
        let mut state = self.state();
        if state
            .freezes
            .iter()
            .any(|f| f.user_id == user_id && f.is_available(now))
        {
            return Ok(None);
        }
        let freeze = StreakFreeze {
            id: state.freezes.len() as i64 + 1,
            user_id,
            used: false,
            expires_at,
            created_at: now,
        };
        state.freezes.push(freeze.clone());
        Ok(Some(freeze))
    }
}

#[async_trait]
impl LedgerRepository for InMemoryStore {
    async fn find_by_key(
        &self,
        idempotency_key: &str,
    ) -> RepositoryResult<Option<WalletTransaction>> {
        Ok(self
            .state()
            .transactions
            .iter()
            .find(|tx| tx.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn apply(&self, tx: &NewTransaction) -> RepositoryResult<LedgerOutcome> {
        let mut state = self.state();

        #[cfg(any(test, feature = "test-util"))]
        if let Some(remaining) = state.ledger_failures.get_mut(&tx.user_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RepositoryError::Unavailable(
                    "injected ledger failure".to_string(),
                ));
            }
        }

        if let Some(existing) = state
            .transactions
            .iter()
            .find(|t| t.idempotency_key == tx.idempotency_key)
        {
            return Ok(LedgerOutcome::Duplicate(existing.clone()));
        }

        let Some(profile) = state.profiles.get_mut(&tx.user_id) else {
            return Ok(LedgerOutcome::UserNotFound);
        };
        let Some(balance_after) = profile.tokens.checked_add(tx.amount) else {
            return Ok(LedgerOutcome::Overflow);
        };
        if balance_after < 0 {
            return Ok(LedgerOutcome::InsufficientBalance {
                available: profile.tokens,
            });
        }
        profile.tokens = balance_after;

        let record = WalletTransaction {
            id: state.transactions.len() as i64 + 1,
            user_id: tx.user_id,
            amount: tx.amount,
            kind: tx.kind,
            description: tx.description.clone(),
            related: tx.related,
            idempotency_key: tx.idempotency_key.clone(),
            balance_after,
            created_at: Utc::now(),
        };
        state.transactions.push(record.clone());
        Ok(LedgerOutcome::Applied(record))
    }

    async fn balance(&self, user_id: UserId) -> RepositoryResult<Option<i64>> {
        Ok(self.state().profiles.get(&user_id).map(|p| p.tokens))
    }

    async fn history(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> RepositoryResult<Vec<WalletTransaction>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .state()
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn find_daily_session(
        &self,
        user_id: UserId,
        day: NaiveDate,
    ) -> RepositoryResult<Option<DailySession>> {
        Ok(self
            .state()
            .sessions
            .iter()
            .find(|s| s.user_id == user_id && s.day == day)
            .cloned())
    }

    async fn insert_daily_session(
        &self,
        session: &NewDailySession,
    ) -> RepositoryResult<Option<DailySession>> {
        let mut state = self.state();
        if state
            .sessions
            .iter()
            .any(|s| s.user_id == session.user_id && s.day == session.day)
        {
            return Ok(None);
        }
        let record = DailySession {
            id: state.sessions.len() as i64 + 1,
            user_id: session.user_id,
            day: session.day,
            score: session.score,
            correct: session.correct,
            total: session.total,
            accuracy: session.accuracy,
            tokens_earned: None,
            streak: None,
            completed_at: session.completed_at,
        };
        state.sessions.push(record.clone());
        Ok(Some(record))
    }

    async fn record_session_streak(
        &self,
        session_id: i64,
        outcome: &StreakOutcome,
    ) -> RepositoryResult<()> {
        if let Some(session) = self
            .state()
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
        {
            session.streak = Some(*outcome);
        }
        Ok(())
    }

    async fn record_session_tokens(&self, session_id: i64, tokens: i64) -> RepositoryResult<()> {
        if let Some(session) = self
            .state()
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
        {
            session.tokens_earned = Some(tokens);
        }
        Ok(())
    }
}

#[async_trait]
impl QuestionBank for InMemoryStore {
    async fn sample(&self, count: usize) -> RepositoryResult<Vec<Question>> {
        let mut all: Vec<Question> = self.state().questions.values().cloned().collect();
        all.shuffle(&mut rand::rng());
        all.truncate(count);
        Ok(all)
    }

    async fn find_many(&self, ids: &[QuestionId]) -> RepositoryResult<Vec<Question>> {
        let state = self.state();
        Ok(ids
            .iter()
            .filter_map(|id| state.questions.get(id).cloned())
            .collect())
    }
}
