//! Tournament manager: creation, joins, score submission and queries.
//!
//! State transitions are driven by the [`super::TournamentOrchestrator`]; the
//! manager only handles player-facing operations.

use super::models::{
    AppendOutcome, NewTournament, Tournament, TournamentEntry, TournamentId, TournamentStatus,
};
use crate::db::{ProfileRepository, RepositoryError, TournamentRepository};
use crate::events::{ArenaEvent, Channel, EventBus};
use crate::profile::UserId;
use crate::wallet::{RelatedEntity, TransactionKind, WalletError, WalletManager};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Tournament errors
#[derive(Debug, Error)]
pub enum TournamentError {
    #[error("Invalid tournament request: {0}")]
    Validation(String),

    #[error("Tournament not found: {0}")]
    NotFound(TournamentId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Tournament is full")]
    TournamentFull,

    #[error("Already joined this tournament")]
    AlreadyJoined,

    #[error("Tournament is no longer accepting players (status: {0})")]
    NotJoinable(TournamentStatus),

    #[error("Tournament is not in play (status: {0})")]
    NotActive(TournamentStatus),

    #[error("Play window closed at {0}")]
    PlayWindowClosed(DateTime<Utc>),

    #[error("Not entered in this tournament")]
    NotEntrant,

    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: i64, required: i64 },

    #[error("Wallet error: {0}")]
    Wallet(WalletError),

    #[error("Storage error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<WalletError> for TournamentError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::InsufficientBalance {
                available,
                required,
                ..
            } => TournamentError::InsufficientBalance {
                available,
                required,
            },
            WalletError::WalletNotFound(user_id) => TournamentError::UserNotFound(user_id),
            other => TournamentError::Wallet(other),
        }
    }
}

impl TournamentError {
    /// Get a client-safe error message
    pub fn client_message(&self) -> String {
        match self {
            TournamentError::Repository(_) => "Internal server error".to_string(),
            TournamentError::Wallet(e) => e.client_message(),
            TournamentError::UserNotFound(_) => "User not found".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type TournamentResult<T> = Result<T, TournamentError>;

/// A participant's live position after a score submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRank {
    pub tournament_id: TournamentId,
    pub user_id: UserId,
    pub score: i64,
    pub rank: u32,
}

/// Idempotency key of one entry fee debit. The nonce keeps a retried join
/// after a refunded attempt from colliding with the refunded debit.
pub fn entry_fee_key(tournament_id: TournamentId, user_id: UserId) -> String {
    format!(
        "tournament:{tournament_id}:entry:{user_id}:{}",
        uuid::Uuid::new_v4()
    )
}

/// Tournament manager
#[derive(Clone)]
pub struct TournamentManager {
    tournaments: Arc<dyn TournamentRepository>,
    profiles: Arc<dyn ProfileRepository>,
    wallet: WalletManager,
    events: Arc<dyn EventBus>,
}

impl TournamentManager {
    /// Create a new tournament manager
    pub fn new(
        tournaments: Arc<dyn TournamentRepository>,
        profiles: Arc<dyn ProfileRepository>,
        wallet: WalletManager,
        events: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            tournaments,
            profiles,
            wallet,
            events,
        }
    }

    /// Schedule a new tournament
    ///
    /// # Errors
    ///
    /// * `TournamentError::Validation` - Empty name, zero capacity or negative fee
    pub async fn create_tournament(
        &self,
        new: NewTournament,
        now: DateTime<Utc>,
    ) -> TournamentResult<Tournament> {
        if new.name.trim().is_empty() {
            return Err(TournamentError::Validation("name must not be empty".into()));
        }
        if new.max_players == 0 {
            return Err(TournamentError::Validation(
                "max_players must be greater than 0".into(),
            ));
        }
        if new.entry_fee < 0 {
            return Err(TournamentError::Validation(
                "entry_fee must not be negative".into(),
            ));
        }

        let tournament = self.tournaments.insert_tournament(&new, now).await?;
        log::info!(
            "Scheduled tournament {} '{}' ({}, {} seats, fee {}) at {}",
            tournament.id,
            tournament.name,
            tournament.tier,
            tournament.max_players,
            tournament.entry_fee,
            tournament.scheduled_start
        );
        Ok(tournament)
    }

    /// Join a tournament, paying the entry fee
    ///
    /// The fee is debited before the entry is appended; if the append loses a
    /// race (seat taken, status moved on) the fee is refunded.
    ///
    /// # Errors
    ///
    /// * `TournamentError::NotFound` - Unknown tournament
    /// * `TournamentError::NotJoinable` - Past the lobby
    /// * `TournamentError::TournamentFull` - No seats left
    /// * `TournamentError::AlreadyJoined` - Duplicate join
    /// * `TournamentError::InsufficientBalance` - Not enough tokens for the fee
    pub async fn join(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> TournamentResult<Tournament> {
        let tournament = self
            .tournaments
            .find_tournament(tournament_id)
            .await?
            .ok_or(TournamentError::NotFound(tournament_id))?;

        if !tournament.status.is_joinable() {
            return Err(TournamentError::NotJoinable(tournament.status));
        }
        if tournament.has_entrant(user_id) {
            return Err(TournamentError::AlreadyJoined);
        }
        if tournament.is_full() {
            return Err(TournamentError::TournamentFull);
        }
        if self.profiles.find_profile(user_id).await?.is_none() {
            return Err(TournamentError::UserNotFound(user_id));
        }

        let fee_key = entry_fee_key(tournament_id, user_id);
        if tournament.entry_fee > 0 {
            self.wallet
                .debit(
                    user_id,
                    tournament.entry_fee,
                    TransactionKind::Spend,
                    format!("Entry fee: {}", tournament.name),
                    Some(RelatedEntity::Tournament(tournament_id)),
                    fee_key.clone(),
                )
                .await?;
        }

        let outcome = match self
            .tournaments
            .append_entry(tournament_id, user_id, now)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.refund_entry(&tournament, user_id, &fee_key).await;
                return Err(e.into());
            }
        };

        let tournament = match outcome {
            AppendOutcome::Appended(t) => t,
            lost => {
                self.refund_entry(&tournament, user_id, &fee_key).await;
                return Err(match lost {
                    AppendOutcome::AlreadyJoined => TournamentError::AlreadyJoined,
                    AppendOutcome::Full => TournamentError::TournamentFull,
                    AppendOutcome::NotJoinable(status) => TournamentError::NotJoinable(status),
                    _ => TournamentError::NotFound(tournament_id),
                });
            }
        };

        if let Err(e) = self.profiles.record_tournament_join(user_id).await {
            log::warn!("Failed to count tournament join for user {}: {}", user_id, e);
        }

        let update = ArenaEvent::TournamentUpdate {
            tournament_id,
            current_players: tournament.player_count(),
            prize_pool: tournament.prize_pool,
            max_players: tournament.max_players,
        };
        self.events
            .publish(Channel::Tournament(tournament_id), update.clone());
        self.events.publish(Channel::Lobby, update);

        log::info!(
            "User {} joined tournament {} ({}/{} players, pool {})",
            user_id,
            tournament_id,
            tournament.player_count(),
            tournament.max_players,
            tournament.prize_pool
        );
        Ok(tournament)
    }

    async fn refund_entry(&self, tournament: &Tournament, user_id: UserId, fee_key: &str) {
        if tournament.entry_fee <= 0 {
            return;
        }
        let refund = self
            .wallet
            .credit(
                user_id,
                tournament.entry_fee,
                TransactionKind::Refund,
                format!("Entry fee refund: {}", tournament.name),
                Some(RelatedEntity::Tournament(tournament.id)),
                format!("{fee_key}:refund"),
            )
            .await;
        match refund {
            Ok(_) | Err(WalletError::DuplicateTransaction(_)) => {}
            Err(e) => log::error!(
                "Failed to refund entry fee for user {} in tournament {}: {}",
                user_id,
                tournament.id,
                e
            ),
        }
    }

    /// Submit a finished run during the play window
    ///
    /// # Errors
    ///
    /// * `TournamentError::Validation` - Negative score
    /// * `TournamentError::NotActive` - Not in play
    /// * `TournamentError::PlayWindowClosed` - Submitted at or after the window end
    /// * `TournamentError::NotEntrant` - User did not join
    pub async fn submit_score(
        &self,
        tournament_id: TournamentId,
        user_id: UserId,
        score: i64,
        now: DateTime<Utc>,
    ) -> TournamentResult<LiveRank> {
        if score < 0 {
            return Err(TournamentError::Validation(
                "score must not be negative".into(),
            ));
        }

        let tournament = self.get(tournament_id).await?;
        if tournament.status != TournamentStatus::Active {
            return Err(TournamentError::NotActive(tournament.status));
        }
        if let Some(window_end) = tournament.next_wake_at.filter(|end| *end <= now) {
            return Err(TournamentError::PlayWindowClosed(window_end));
        }
        if !tournament.has_entrant(user_id) {
            return Err(TournamentError::NotEntrant);
        }

        // `None` means settlement closed the tournament in between
        let Some(tournament) = self
            .tournaments
            .record_score(tournament_id, user_id, score, now)
            .await?
        else {
            return Err(TournamentError::NotActive(TournamentStatus::Completed));
        };

        let rank = tournament
            .live_rank(user_id)
            .unwrap_or(tournament.player_count() as u32);
        self.events.publish(
            Channel::Tournament(tournament_id),
            ArenaEvent::LeaderboardUpdate {
                tournament_id,
                user_id,
                score,
                rank,
            },
        );

        Ok(LiveRank {
            tournament_id,
            user_id,
            score,
            rank,
        })
    }

    /// Live standings: completed entries by score, ties in join order
    pub async fn standings(
        &self,
        tournament_id: TournamentId,
    ) -> TournamentResult<Vec<TournamentEntry>> {
        let tournament = self.get(tournament_id).await?;
        Ok(tournament.standings().into_iter().cloned().collect())
    }

    /// Get a tournament
    pub async fn get(&self, tournament_id: TournamentId) -> TournamentResult<Tournament> {
        self.tournaments
            .find_tournament(tournament_id)
            .await?
            .ok_or(TournamentError::NotFound(tournament_id))
    }

    /// List tournaments, optionally filtered by status
    pub async fn list(
        &self,
        status: Option<TournamentStatus>,
    ) -> TournamentResult<Vec<Tournament>> {
        Ok(self.tournaments.list_tournaments(status).await?)
    }

    /// Tournaments still accepting players, soonest first
    pub async fn upcoming(&self) -> TournamentResult<Vec<Tournament>> {
        let mut list = self.list(None).await?;
        list.retain(|t| t.status.is_joinable());
        Ok(list)
    }

    /// Unfinished tournaments the user entered
    pub async fn joined_by(&self, user_id: UserId) -> TournamentResult<Vec<Tournament>> {
        Ok(self
            .tournaments
            .list_for_user(
                user_id,
                &[
                    TournamentStatus::Scheduled,
                    TournamentStatus::Lobby,
                    TournamentStatus::Active,
                ],
            )
            .await?)
    }

    /// Completed tournaments the user entered, most recent first
    pub async fn history(&self, user_id: UserId) -> TournamentResult<Vec<Tournament>> {
        let mut list = self
            .tournaments
            .list_for_user(user_id, &[TournamentStatus::Completed])
            .await?;
        list.reverse();
        Ok(list)
    }
}
