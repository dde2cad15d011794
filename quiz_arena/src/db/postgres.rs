//! PostgreSQL implementation of every repository trait.
//!
//! Schema lives in `migrations/001_arena_schema.sql`. Multi-statement writes
//! run in one transaction; single reads go through [`with_timeout`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::time::Duration;

use super::repository::{
    LedgerRepository, LeaderboardRepository, ProfileRepository, QuestionBank, RepositoryError,
    RepositoryResult, SessionRepository, StreakFreezeRepository, TournamentRepository,
};
use super::timeouts::{DEFAULT_QUERY_TIMEOUT, with_timeout};
use crate::leaderboard::{LeaderboardEntry, LeaderboardKey, Period, ScoreContribution};
use crate::profile::{UserId, UserProfile};
use crate::questions::{OPTION_COUNT, Question, QuestionId};
use crate::session::{DailySession, NewDailySession};
use crate::streak::{StreakFreeze, StreakOutcome, StreakState};
use crate::tournament::models::{
    AppendOutcome, NewTournament, Tier, Tournament, TournamentEntry, TournamentId,
    TournamentStatus, Transition, Winner,
};
use crate::wallet::{
    LedgerOutcome, NewTransaction, RelatedEntity, TransactionKind, WalletTransaction,
};

const TOURNAMENT_COLUMNS: &str = "id, name, tier, status, scheduled_start, actual_start, end_time,
     next_wake_at, max_players, entry_fee, prize_pool, question_ids, created_at";

const PROFILE_COLUMNS: &str = "id, display_name, tokens, streak, last_played, streak_locked,
     streak_locked_until, total_games, total_wins, tournaments_joined, tournaments_won,
     daily_sessions_played, created_at";

const TRANSACTION_COLUMNS: &str = "id, user_id, amount, kind, description, related_kind,
     related_id, idempotency_key, balance_after, created_at";

const LEADERBOARD_COLUMNS: &str =
    "user_id, period, period_start, score, rank, games_played, wins, tokens_earned";

/// Postgres-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Attach entries and winners to tournament rows
    async fn hydrate(&self, rows: Vec<PgRow>) -> RepositoryResult<Vec<Tournament>> {
        let mut tournaments = rows
            .iter()
            .map(tournament_from_row)
            .collect::<RepositoryResult<Vec<_>>>()?;
        if tournaments.is_empty() {
            return Ok(tournaments);
        }
        let ids: Vec<TournamentId> = tournaments.iter().map(|t| t.id).collect();

        let entry_rows = with_timeout(
            self.query_timeout,
            sqlx::query(
                "SELECT tournament_id, user_id, joined_at, score, completed_at, final_rank, tokens_won
                 FROM tournament_entries WHERE tournament_id = ANY($1) ORDER BY seq",
            )
            .bind(&ids)
            .fetch_all(&self.pool),
        )
        .await?;
        let winner_rows = with_timeout(
            self.query_timeout,
            sqlx::query(
                "SELECT tournament_id, user_id, rank, tokens
                 FROM tournament_winners WHERE tournament_id = ANY($1) ORDER BY rank",
            )
            .bind(&ids)
            .fetch_all(&self.pool),
        )
        .await?;

        let mut entries: HashMap<TournamentId, Vec<TournamentEntry>> = HashMap::new();
        for r in &entry_rows {
            entries
                .entry(r.get("tournament_id"))
                .or_default()
                .push(TournamentEntry {
                    user_id: r.get("user_id"),
                    joined_at: r.get("joined_at"),
                    score: r.get("score"),
                    completed_at: r.get("completed_at"),
                    final_rank: r.get::<Option<i32>, _>("final_rank").map(|rank| rank as u32),
                    tokens_won: r.get("tokens_won"),
                });
        }
        let mut winners: HashMap<TournamentId, Vec<Winner>> = HashMap::new();
        for r in &winner_rows {
            winners
                .entry(r.get("tournament_id"))
                .or_default()
                .push(Winner {
                    user_id: r.get("user_id"),
                    rank: r.get::<i32, _>("rank") as u32,
                    tokens: r.get("tokens"),
                });
        }

        for t in &mut tournaments {
            t.entries = entries.remove(&t.id).unwrap_or_default();
            t.winners = winners.remove(&t.id).unwrap_or_default();
        }
        Ok(tournaments)
    }

    async fn load_tournament(&self, id: TournamentId) -> RepositoryResult<Option<Tournament>> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&format!(
                "SELECT {TOURNAMENT_COLUMNS} FROM tournaments WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

fn tournament_from_row(r: &PgRow) -> RepositoryResult<Tournament> {
    let status: String = r.get("status");
    let status = TournamentStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Corrupt(format!("tournament status {status}")))?;
    let tier: String = r.get("tier");
    Ok(Tournament {
        id: r.get("id"),
        name: r.get("name"),
        tier: tier.parse::<Tier>().unwrap_or(Tier::Small),
        status,
        scheduled_start: r.get("scheduled_start"),
        actual_start: r.get("actual_start"),
        end_time: r.get("end_time"),
        next_wake_at: r.get("next_wake_at"),
        max_players: r.get::<i32, _>("max_players").max(0) as usize,
        entry_fee: r.get("entry_fee"),
        prize_pool: r.get("prize_pool"),
        entries: Vec::new(),
        question_ids: r.get("question_ids"),
        winners: Vec::new(),
        created_at: r.get("created_at"),
    })
}

fn profile_from_row(r: &PgRow) -> UserProfile {
    UserProfile {
        id: r.get("id"),
        display_name: r.get("display_name"),
        tokens: r.get("tokens"),
        streak: StreakState {
            streak: r.get::<i32, _>("streak").max(0) as u32,
            last_played: r.get("last_played"),
            locked: r.get("streak_locked"),
            locked_until: r.get("streak_locked_until"),
        },
        total_games: r.get("total_games"),
        total_wins: r.get("total_wins"),
        tournaments_joined: r.get("tournaments_joined"),
        tournaments_won: r.get("tournaments_won"),
        daily_sessions_played: r.get("daily_sessions_played"),
        created_at: r.get("created_at"),
    }
}

fn transaction_from_row(r: &PgRow) -> RepositoryResult<WalletTransaction> {
    let kind: String = r.get("kind");
    let kind = TransactionKind::parse(&kind)
        .ok_or_else(|| RepositoryError::Corrupt(format!("transaction kind {kind}")))?;
    Ok(WalletTransaction {
        id: r.get("id"),
        user_id: r.get("user_id"),
        amount: r.get("amount"),
        kind,
        description: r.get("description"),
        related: RelatedEntity::from_parts(
            r.get::<Option<String>, _>("related_kind").as_deref(),
            r.get("related_id"),
        ),
        idempotency_key: r.get("idempotency_key"),
        balance_after: r.get("balance_after"),
        created_at: r.get("created_at"),
    })
}

fn leaderboard_from_row(r: &PgRow) -> RepositoryResult<LeaderboardEntry> {
    let period: String = r.get("period");
    let period = Period::parse(&period)
        .ok_or_else(|| RepositoryError::Corrupt(format!("leaderboard period {period}")))?;
    Ok(LeaderboardEntry {
        user_id: r.get("user_id"),
        period,
        period_start: r.get("period_start"),
        score: r.get("score"),
        rank: r.get::<Option<i32>, _>("rank").map(|rank| rank as u32),
        games_played: r.get("games_played"),
        wins: r.get("wins"),
        tokens_earned: r.get("tokens_earned"),
    })
}

fn freeze_from_row(r: &PgRow) -> StreakFreeze {
    StreakFreeze {
        id: r.get("id"),
        user_id: r.get("user_id"),
        used: r.get("used"),
        expires_at: r.get("expires_at"),
        created_at: r.get("created_at"),
    }
}

fn session_from_row(r: &PgRow) -> DailySession {
    DailySession {
        id: r.get("id"),
        user_id: r.get("user_id"),
        day: r.get("day"),
        score: r.get("score"),
        correct: r.get::<i32, _>("correct").max(0) as u32,
        total: r.get::<i32, _>("total").max(0) as u32,
        accuracy: r.get::<i32, _>("accuracy").max(0) as u32,
        tokens_earned: r.get("tokens_earned"),
        streak: r
            .get::<Option<Json<StreakOutcome>>, _>("streak_outcome")
            .map(|outcome| outcome.0),
        completed_at: r.get("completed_at"),
    }
}

fn question_from_row(r: &PgRow) -> RepositoryResult<Question> {
    let id: QuestionId = r.get("id");
    let options: Vec<String> = r.get("options");
    let options: [String; OPTION_COUNT] = options
        .try_into()
        .map_err(|_| RepositoryError::Corrupt(format!("question {id} option count")))?;
    Ok(Question {
        id,
        text: r.get("text"),
        options,
        correct_index: r.get::<i16, _>("correct_index").clamp(0, 3) as u8,
    })
}

async fn insert_winners(
    tx: &mut Transaction<'_, Postgres>,
    id: TournamentId,
    winners: &[Winner],
) -> Result<(), sqlx::Error> {
    for winner in winners {
        sqlx::query(
            "INSERT INTO tournament_winners (tournament_id, user_id, rank, tokens)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (tournament_id, rank) DO NOTHING",
        )
        .bind(id)
        .bind(winner.user_id)
        .bind(winner.rank as i32)
        .bind(winner.tokens)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl TournamentRepository for PgStore {
    async fn insert_tournament(
        &self,
        new: &NewTournament,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Tournament> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&format!(
                "INSERT INTO tournaments
                    (name, tier, status, scheduled_start, next_wake_at, max_players, entry_fee, created_at)
                 VALUES ($1, $2, 'scheduled', $3, $3, $4, $5, $6)
                 RETURNING {TOURNAMENT_COLUMNS}"
            ))
            .bind(&new.name)
            .bind(new.tier.as_str())
            .bind(new.scheduled_start)
            .bind(i32::try_from(new.max_players).unwrap_or(i32::MAX))
            .bind(new.entry_fee)
            .bind(now)
            .fetch_one(&self.pool),
        )
        .await?;
        tournament_from_row(&row)
    }

    async fn find_tournament(&self, id: TournamentId) -> RepositoryResult<Option<Tournament>> {
        self.load_tournament(id).await
    }

    async fn list_tournaments(
        &self,
        status: Option<TournamentStatus>,
    ) -> RepositoryResult<Vec<Tournament>> {
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query(&format!(
                "SELECT {TOURNAMENT_COLUMNS} FROM tournaments
                 WHERE $1::TEXT IS NULL OR status = $1
                 ORDER BY scheduled_start, id"
            ))
            .bind(status.map(TournamentStatus::as_str))
            .fetch_all(&self.pool),
        )
        .await?;
        self.hydrate(rows).await
    }

    async fn list_due(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<Tournament>> {
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query(&format!(
                "SELECT {TOURNAMENT_COLUMNS} FROM tournaments
                 WHERE status <> 'completed' AND next_wake_at <= $1
                 ORDER BY next_wake_at, id"
            ))
            .bind(now)
            .fetch_all(&self.pool),
        )
        .await?;
        self.hydrate(rows).await
    }

    async fn list_for_user(
        &self,
        user_id: UserId,
        statuses: &[TournamentStatus],
    ) -> RepositoryResult<Vec<Tournament>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query(&format!(
                "SELECT {TOURNAMENT_COLUMNS} FROM tournaments t
                 WHERE t.status = ANY($2)
                   AND EXISTS (SELECT 1 FROM tournament_entries e
                               WHERE e.tournament_id = t.id AND e.user_id = $1)
                 ORDER BY t.scheduled_start, t.id"
            ))
            .bind(user_id)
            .bind(&statuses)
            .fetch_all(&self.pool),
        )
        .await?;
        self.hydrate(rows).await
    }

    async fn append_entry(
        &self,
        id: TournamentId,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> RepositoryResult<AppendOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes joins for this tournament
        let row = sqlx::query(
            "SELECT status, max_players,
                    (SELECT COUNT(*) FROM tournament_entries WHERE tournament_id = $1) AS players,
                    EXISTS (SELECT 1 FROM tournament_entries
                            WHERE tournament_id = $1 AND user_id = $2) AS joined
             FROM tournaments WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(AppendOutcome::NotFound);
        };
        let status: String = row.get("status");
        let status = TournamentStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Corrupt(format!("tournament status {status}")))?;
        if !status.is_joinable() {
            return Ok(AppendOutcome::NotJoinable(status));
        }
        if row.get::<bool, _>("joined") {
            return Ok(AppendOutcome::AlreadyJoined);
        }
        if row.get::<i64, _>("players") >= i64::from(row.get::<i32, _>("max_players")) {
            return Ok(AppendOutcome::Full);
        }

        sqlx::query(
            "INSERT INTO tournament_entries (tournament_id, user_id, joined_at) VALUES ($1, $2, $3)",
        )
        .bind(id)
        .bind(user_id)
        .bind(joined_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE tournaments SET prize_pool = prize_pool + entry_fee WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.load_tournament(id)
            .await?
            .map(AppendOutcome::Appended)
            .ok_or_else(|| RepositoryError::Corrupt(format!("tournament {id} vanished")))
    }

    async fn record_score(
        &self,
        id: TournamentId,
        user_id: UserId,
        score: i64,
        completed_at: DateTime<Utc>,
    ) -> RepositoryResult<Option<Tournament>> {
        let updated = with_timeout(
            self.query_timeout,
            sqlx::query(
                "UPDATE tournament_entries e SET score = $3, completed_at = $4
                 FROM tournaments t
                 WHERE e.tournament_id = t.id AND t.id = $1 AND e.user_id = $2
                   AND t.status = 'active' AND t.next_wake_at > $4",
            )
            .bind(id)
            .bind(user_id)
            .bind(score)
            .bind(completed_at)
            .execute(&self.pool),
        )
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.load_tournament(id).await
    }

    async fn record_placement(
        &self,
        id: TournamentId,
        user_id: UserId,
        rank: u32,
        tokens: i64,
    ) -> RepositoryResult<()> {
        with_timeout(
            self.query_timeout,
            sqlx::query(
                "UPDATE tournament_entries SET final_rank = $3, tokens_won = $4
                 WHERE tournament_id = $1 AND user_id = $2",
            )
            .bind(id)
            .bind(user_id)
            .bind(rank as i32)
            .bind(tokens)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn apply_transition(
        &self,
        id: TournamentId,
        transition: &Transition,
    ) -> RepositoryResult<bool> {
        let mut tx = self.pool.begin().await?;
        let from = transition.from().as_str();
        let to = transition.to().as_str();

        let updated = match transition {
            Transition::OpenLobby { next_wake_at } => {
                sqlx::query(
                    "UPDATE tournaments SET status = $3, next_wake_at = $4
                     WHERE id = $1 AND status = $2",
                )
                .bind(id)
                .bind(from)
                .bind(to)
                .bind(next_wake_at)
                .execute(&mut *tx)
                .await?
            }
            Transition::Start {
                actual_start,
                question_ids,
                next_wake_at,
            } => {
                sqlx::query(
                    "UPDATE tournaments
                     SET status = $3, actual_start = $4, question_ids = $5, next_wake_at = $6
                     WHERE id = $1 AND status = $2",
                )
                .bind(id)
                .bind(from)
                .bind(to)
                .bind(actual_start)
                .bind(question_ids)
                .bind(next_wake_at)
                .execute(&mut *tx)
                .await?
            }
            Transition::Complete { end_time, winners } => {
                let updated = sqlx::query(
                    "UPDATE tournaments SET status = $3, end_time = $4, next_wake_at = NULL
                     WHERE id = $1 AND status = $2",
                )
                .bind(id)
                .bind(from)
                .bind(to)
                .bind(end_time)
                .execute(&mut *tx)
                .await?;
                if updated.rows_affected() == 1 {
                    insert_winners(&mut tx, id, winners).await?;
                }
                updated
            }
        };

        let applied = updated.rows_affected() == 1;
        tx.commit().await?;
        Ok(applied)
    }
}

#[async_trait]
impl LeaderboardRepository for PgStore {
    async fn add_contribution(
        &self,
        key: &LeaderboardKey,
        contribution: &ScoreContribution,
    ) -> RepositoryResult<LeaderboardEntry> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&format!(
                "INSERT INTO leaderboard_entries
                    (user_id, period, period_start, score, games_played, wins, tokens_earned)
                 VALUES ($1, $2, $3, $4, 1, $5, $6)
                 ON CONFLICT (user_id, period, period_start) DO UPDATE SET
                    score = leaderboard_entries.score + EXCLUDED.score,
                    games_played = leaderboard_entries.games_played + 1,
                    wins = leaderboard_entries.wins + EXCLUDED.wins,
                    tokens_earned = leaderboard_entries.tokens_earned + EXCLUDED.tokens_earned
                 RETURNING {LEADERBOARD_COLUMNS}"
            ))
            .bind(key.user_id)
            .bind(key.period.as_str())
            .bind(key.period_start)
            .bind(contribution.score)
            .bind(i64::from(contribution.won))
            .bind(contribution.tokens_earned)
            .fetch_one(&self.pool),
        )
        .await?;
        leaderboard_from_row(&row)
    }

    async fn period_entries(
        &self,
        period: Period,
        period_start: DateTime<Utc>,
    ) -> RepositoryResult<Vec<LeaderboardEntry>> {
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query(&format!(
                "SELECT {LEADERBOARD_COLUMNS} FROM leaderboard_entries
                 WHERE period = $1 AND period_start = $2
                 ORDER BY rank ASC NULLS LAST, seq ASC"
            ))
            .bind(period.as_str())
            .bind(period_start)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(leaderboard_from_row).collect()
    }

    async fn write_ranks(
        &self,
        period: Period,
        period_start: DateTime<Utc>,
        ranks: &[(UserId, u32)],
    ) -> RepositoryResult<()> {
        let users: Vec<UserId> = ranks.iter().map(|(user, _)| *user).collect();
        let values: Vec<i32> = ranks.iter().map(|(_, rank)| *rank as i32).collect();
        with_timeout(
            self.query_timeout,
            sqlx::query(
                "UPDATE leaderboard_entries l SET rank = r.rank
                 FROM UNNEST($3::BIGINT[], $4::INTEGER[]) AS r(user_id, rank)
                 WHERE l.user_id = r.user_id AND l.period = $1 AND l.period_start = $2",
            )
            .bind(period.as_str())
            .bind(period_start)
            .bind(&users)
            .bind(&values)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find_entry(&self, key: &LeaderboardKey) -> RepositoryResult<Option<LeaderboardEntry>> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&format!(
                "SELECT {LEADERBOARD_COLUMNS} FROM leaderboard_entries
                 WHERE user_id = $1 AND period = $2 AND period_start = $3"
            ))
            .bind(key.user_id)
            .bind(key.period.as_str())
            .bind(key.period_start)
            .fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(leaderboard_from_row).transpose()
    }
}

#[async_trait]
impl ProfileRepository for PgStore {
    async fn find_profile(&self, user_id: UserId) -> RepositoryResult<Option<UserProfile>> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&format!(
                "SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE id = $1"
            ))
            .bind(user_id)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.as_ref().map(profile_from_row))
    }

    async fn save_streak(&self, user_id: UserId, streak: &StreakState) -> RepositoryResult<()> {
        with_timeout(
            self.query_timeout,
            sqlx::query(
                "UPDATE user_profiles
                 SET streak = $2, last_played = $3, streak_locked = $4, streak_locked_until = $5
                 WHERE id = $1",
            )
            .bind(user_id)
            .bind(i32::try_from(streak.streak).unwrap_or(i32::MAX))
            .bind(streak.last_played)
            .bind(streak.locked)
            .bind(streak.locked_until)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn record_tournament_join(&self, user_id: UserId) -> RepositoryResult<()> {
        with_timeout(
            self.query_timeout,
            sqlx::query(
                "UPDATE user_profiles SET tournaments_joined = tournaments_joined + 1 WHERE id = $1",
            )
            .bind(user_id)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn record_tournament_win(&self, user_id: UserId) -> RepositoryResult<()> {
        with_timeout(
            self.query_timeout,
            sqlx::query(
                "UPDATE user_profiles
                 SET tournaments_won = tournaments_won + 1, total_wins = total_wins + 1
                 WHERE id = $1",
            )
            .bind(user_id)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn record_daily_session(&self, user_id: UserId, won: bool) -> RepositoryResult<()> {
        with_timeout(
            self.query_timeout,
            sqlx::query(
                "UPDATE user_profiles
                 SET total_games = total_games + 1,
                     daily_sessions_played = daily_sessions_played + 1,
                     total_wins = total_wins + $2
                 WHERE id = $1",
            )
            .bind(user_id)
            .bind(i64::from(won))
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StreakFreezeRepository for PgStore {
    async fn find_unused_freeze(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<StreakFreeze>> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(
                "SELECT id, user_id, used, expires_at, created_at FROM streak_freezes
                 WHERE user_id = $1 AND NOT used AND expires_at > $2
                 ORDER BY created_at LIMIT 1",
            )
            .bind(user_id)
            .bind(now)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.as_ref().map(freeze_from_row))
    }

    async fn mark_freeze_used(&self, freeze_id: i64) -> RepositoryResult<bool> {
        let updated = with_timeout(
            self.query_timeout,
            sqlx::query("UPDATE streak_freezes SET used = TRUE WHERE id = $1 AND NOT used")
                .bind(freeze_id)
                .execute(&self.pool),
        )
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn insert_freeze(
        &self,
        user_id: UserId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<StreakFreeze>> {
        let mut tx = self.pool.begin().await?;

        // Expired freezes give up their slot in the unused index
        sqlx::query(
            "UPDATE streak_freezes SET used = TRUE
             WHERE user_id = $1 AND NOT used AND expires_at <= $2",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            "INSERT INTO streak_freezes (user_id, expires_at, created_at) VALUES ($1, $2, $3)
             ON CONFLICT (user_id) WHERE NOT used DO NOTHING
             RETURNING id, user_id, used, expires_at, created_at",
        )
        .bind(user_id)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.as_ref().map(freeze_from_row))
    }
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn find_by_key(
        &self,
        idempotency_key: &str,
    ) -> RepositoryResult<Option<WalletTransaction>> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions WHERE idempotency_key = $1"
            ))
            .bind(idempotency_key)
            .fetch_optional(&self.pool),
        )
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn apply(&self, new: &NewTransaction) -> RepositoryResult<LedgerOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions WHERE idempotency_key = $1"
        ))
        .bind(&new.idempotency_key)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            return Ok(LedgerOutcome::Duplicate(transaction_from_row(&row)?));
        }

        let current = sqlx::query("SELECT tokens FROM user_profiles WHERE id = $1 FOR UPDATE")
            .bind(new.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(current) = current else {
            return Ok(LedgerOutcome::UserNotFound);
        };
        let available: i64 = current.get("tokens");
        let Some(balance_after) = available.checked_add(new.amount) else {
            return Ok(LedgerOutcome::Overflow);
        };
        if balance_after < 0 {
            return Ok(LedgerOutcome::InsufficientBalance { available });
        }

        sqlx::query("UPDATE user_profiles SET tokens = $2 WHERE id = $1")
            .bind(new.user_id)
            .bind(balance_after)
            .execute(&mut *tx)
            .await?;

        let (related_kind, related_id) = match new.related.map(RelatedEntity::to_parts) {
            Some((kind, id)) => (Some(kind), Some(id)),
            None => (None, None),
        };
        let row = sqlx::query(&format!(
            "INSERT INTO wallet_transactions
                (user_id, amount, kind, description, related_kind, related_id,
                 idempotency_key, balance_after)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(new.user_id)
        .bind(new.amount)
        .bind(new.kind.as_str())
        .bind(&new.description)
        .bind(related_kind)
        .bind(related_id)
        .bind(&new.idempotency_key)
        .bind(balance_after)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(LedgerOutcome::Applied(transaction_from_row(&row)?))
    }

    async fn balance(&self, user_id: UserId) -> RepositoryResult<Option<i64>> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query("SELECT tokens FROM user_profiles WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(|r| r.get("tokens")))
    }

    async fn history(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> RepositoryResult<Vec<WalletTransaction>> {
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions
                 WHERE user_id = $1 ORDER BY id DESC LIMIT $2"
            ))
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }
}

#[async_trait]
impl SessionRepository for PgStore {
    async fn find_daily_session(
        &self,
        user_id: UserId,
        day: NaiveDate,
    ) -> RepositoryResult<Option<DailySession>> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(
                "SELECT id, user_id, day, score, correct, total, accuracy, tokens_earned,
                        streak_outcome, completed_at
                 FROM daily_sessions WHERE user_id = $1 AND day = $2",
            )
            .bind(user_id)
            .bind(day)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn insert_daily_session(
        &self,
        session: &NewDailySession,
    ) -> RepositoryResult<Option<DailySession>> {
        let row = with_timeout(
            self.query_timeout,
            sqlx::query(
                "INSERT INTO daily_sessions
                    (user_id, day, score, correct, total, accuracy, completed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (user_id, day) DO NOTHING
                 RETURNING id, user_id, day, score, correct, total, accuracy, tokens_earned,
                           streak_outcome, completed_at",
            )
            .bind(session.user_id)
            .bind(session.day)
            .bind(session.score)
            .bind(session.correct as i32)
            .bind(session.total as i32)
            .bind(session.accuracy as i32)
            .bind(session.completed_at)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn record_session_streak(
        &self,
        session_id: i64,
        outcome: &StreakOutcome,
    ) -> RepositoryResult<()> {
        with_timeout(
            self.query_timeout,
            sqlx::query("UPDATE daily_sessions SET streak_outcome = $2 WHERE id = $1")
                .bind(session_id)
                .bind(Json(outcome))
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn record_session_tokens(&self, session_id: i64, tokens: i64) -> RepositoryResult<()> {
        with_timeout(
            self.query_timeout,
            sqlx::query("UPDATE daily_sessions SET tokens_earned = $2 WHERE id = $1")
                .bind(session_id)
                .bind(tokens)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl QuestionBank for PgStore {
    async fn sample(&self, count: usize) -> RepositoryResult<Vec<Question>> {
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query(
                "SELECT id, text, options, correct_index FROM questions
                 ORDER BY random() LIMIT $1",
            )
            .bind(i64::try_from(count).unwrap_or(i64::MAX))
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(question_from_row).collect()
    }

    async fn find_many(&self, ids: &[QuestionId]) -> RepositoryResult<Vec<Question>> {
        let rows = with_timeout(
            self.query_timeout,
            sqlx::query(
                "SELECT id, text, options, correct_index FROM questions WHERE id = ANY($1)",
            )
            .bind(ids)
            .fetch_all(&self.pool),
        )
        .await?;
        rows.iter().map(question_from_row).collect()
    }
}
