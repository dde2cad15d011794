//! Tournament data models for scheduled quiz tournaments.

use super::prize::Payout;
use crate::profile::UserId;
use crate::questions::QuestionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tournament ID type
pub type TournamentId = i64;

/// Tournament tier, selecting the payout table and default capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Small,
    Medium,
    Large,
    Mega,
}

impl Tier {
    /// Default seat count for a tier
    pub fn default_max_players(self) -> usize {
        match self {
            Tier::Small => 50,
            Tier::Medium => 200,
            Tier::Large => 500,
            Tier::Mega => 1000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Small => "small",
            Tier::Medium => "medium",
            Tier::Large => "large",
            Tier::Mega => "mega",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = std::convert::Infallible;

    /// Unknown tiers fall back to `Small`, the payout table every
    /// tournament is guaranteed to support.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "medium" => Tier::Medium,
            "large" => Tier::Large,
            "mega" => Tier::Mega,
            _ => Tier::Small,
        })
    }
}

/// Tournament lifecycle status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    /// Waiting for the scheduled start
    Scheduled,
    /// Lobby window: players get ready, questions not yet drawn
    Lobby,
    /// Play window: questions drawn, scores accepted
    Active,
    /// Settled; winners recorded
    Completed,
}

impl TournamentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TournamentStatus::Scheduled => "scheduled",
            TournamentStatus::Lobby => "lobby",
            TournamentStatus::Active => "active",
            TournamentStatus::Completed => "completed",
        }
    }

    /// Parse a stored status string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(TournamentStatus::Scheduled),
            "lobby" => Some(TournamentStatus::Lobby),
            "active" => Some(TournamentStatus::Active),
            "completed" => Some(TournamentStatus::Completed),
            _ => None,
        }
    }

    /// The only status this one may move to
    pub fn next(self) -> Option<Self> {
        match self {
            TournamentStatus::Scheduled => Some(TournamentStatus::Lobby),
            TournamentStatus::Lobby => Some(TournamentStatus::Active),
            TournamentStatus::Active => Some(TournamentStatus::Completed),
            TournamentStatus::Completed => None,
        }
    }

    /// Whether new entrants are still accepted
    pub fn is_joinable(self) -> bool {
        matches!(self, TournamentStatus::Scheduled | TournamentStatus::Lobby)
    }
}

impl fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A participant's entry in a tournament
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentEntry {
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub score: i64,
    /// Set when the participant submits a finished run
    pub completed_at: Option<DateTime<Utc>>,
    /// Set at settlement for participants inside the payout table
    pub final_rank: Option<u32>,
    pub tokens_won: i64,
}

impl TournamentEntry {
    pub fn new(user_id: UserId, joined_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            joined_at,
            score: 0,
            completed_at: None,
            final_rank: None,
            tokens_won: 0,
        }
    }

    pub fn has_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Settled placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub user_id: UserId,
    pub rank: u32,
    pub tokens: i64,
}

/// Tournament aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tournament {
    pub id: TournamentId,
    pub name: String,
    pub tier: Tier,
    pub status: TournamentStatus,
    pub scheduled_start: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// When the timer for the current status expires; `None` once completed
    pub next_wake_at: Option<DateTime<Utc>>,
    pub max_players: usize,
    pub entry_fee: i64,
    pub prize_pool: i64,
    /// Join order is preserved
    pub entries: Vec<TournamentEntry>,
    pub question_ids: Vec<QuestionId>,
    pub winners: Vec<Winner>,
    pub created_at: DateTime<Utc>,
}

impl Tournament {
    pub fn player_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_players
    }

    pub fn entry(&self, user_id: UserId) -> Option<&TournamentEntry> {
        self.entries.iter().find(|e| e.user_id == user_id)
    }

    pub fn has_entrant(&self, user_id: UserId) -> bool {
        self.entry(user_id).is_some()
    }

    /// Whether the current status's timer has expired
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_wake_at.is_some_and(|wake| wake <= now)
    }

    /// Completed entries ordered by score descending. The sort is stable, so
    /// equal scores keep join order.
    pub fn standings(&self) -> Vec<&TournamentEntry> {
        let mut ranked: Vec<&TournamentEntry> =
            self.entries.iter().filter(|e| e.has_completed()).collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked
    }

    /// Placements for settlement.
    ///
    /// Ranks already recorded by an interrupted settlement are kept as they
    /// are. Open payout ranks are filled from the standings, skipping users
    /// who already hold a placement.
    pub fn placements(&self, payouts: &[Payout]) -> Vec<Winner> {
        let mut winners: Vec<Winner> = self
            .entries
            .iter()
            .filter_map(|e| {
                e.final_rank.map(|rank| Winner {
                    user_id: e.user_id,
                    rank,
                    tokens: e.tokens_won,
                })
            })
            .collect();

        let mut unplaced = self
            .standings()
            .into_iter()
            .filter(|e| e.final_rank.is_none());
        for payout in payouts {
            if winners.iter().any(|w| w.rank == payout.rank) {
                continue;
            }
            let Some(entry) = unplaced.next() else { break };
            winners.push(Winner {
                user_id: entry.user_id,
                rank: payout.rank,
                tokens: payout.tokens,
            });
        }

        winners.sort_by_key(|w| w.rank);
        winners
    }

    /// 1-based live rank of a user among completed entries
    pub fn live_rank(&self, user_id: UserId) -> Option<u32> {
        self.standings()
            .iter()
            .position(|e| e.user_id == user_id)
            .map(|idx| idx as u32 + 1)
    }
}

/// Request to schedule a new tournament
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTournament {
    pub name: String,
    pub tier: Tier,
    pub scheduled_start: DateTime<Utc>,
    pub max_players: usize,
    pub entry_fee: i64,
}

impl NewTournament {
    /// Tournament with the tier's default capacity
    pub fn for_tier(
        name: impl Into<String>,
        tier: Tier,
        scheduled_start: DateTime<Utc>,
        entry_fee: i64,
    ) -> Self {
        Self {
            name: name.into(),
            tier,
            scheduled_start,
            max_players: tier.default_max_players(),
            entry_fee,
        }
    }

    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players;
        self
    }
}

/// Compare-and-set state change applied by the repository. A transition is
/// applied only when the stored status equals [`Transition::from`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    OpenLobby {
        next_wake_at: DateTime<Utc>,
    },
    Start {
        actual_start: DateTime<Utc>,
        question_ids: Vec<QuestionId>,
        next_wake_at: DateTime<Utc>,
    },
    Complete {
        end_time: DateTime<Utc>,
        winners: Vec<Winner>,
    },
}

impl Transition {
    pub fn from(&self) -> TournamentStatus {
        match self {
            Transition::OpenLobby { .. } => TournamentStatus::Scheduled,
            Transition::Start { .. } => TournamentStatus::Lobby,
            Transition::Complete { .. } => TournamentStatus::Active,
        }
    }

    pub fn to(&self) -> TournamentStatus {
        match self {
            Transition::OpenLobby { .. } => TournamentStatus::Lobby,
            Transition::Start { .. } => TournamentStatus::Active,
            Transition::Complete { .. } => TournamentStatus::Completed,
        }
    }

    /// Apply to an in-memory tournament after the status check passed
    pub fn apply_to(&self, tournament: &mut Tournament) {
        tournament.status = self.to();
        match self {
            Transition::OpenLobby { next_wake_at } => {
                tournament.next_wake_at = Some(*next_wake_at);
            }
            Transition::Start {
                actual_start,
                question_ids,
                next_wake_at,
            } => {
                tournament.actual_start = Some(*actual_start);
                tournament.question_ids = question_ids.clone();
                tournament.next_wake_at = Some(*next_wake_at);
            }
            Transition::Complete { end_time, winners } => {
                tournament.end_time = Some(*end_time);
                tournament.winners = winners.clone();
                tournament.next_wake_at = None;
            }
        }
    }
}

/// Result of an atomic entry append
#[derive(Debug, Clone)]
pub enum AppendOutcome {
    Appended(Tournament),
    AlreadyJoined,
    Full,
    NotJoinable(TournamentStatus),
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tournament_with_scores(scores: &[(UserId, Option<i64>)]) -> Tournament {
        let now = Utc::now();
        let entries = scores
            .iter()
            .enumerate()
            .map(|(i, (user, score))| {
                let mut entry = TournamentEntry::new(*user, now + Duration::seconds(i as i64));
                if let Some(score) = score {
                    entry.score = *score;
                    entry.completed_at = Some(now);
                }
                entry
            })
            .collect();

        Tournament {
            id: 1,
            name: "Evening Rush".to_string(),
            tier: Tier::Small,
            status: TournamentStatus::Active,
            scheduled_start: now,
            actual_start: Some(now),
            end_time: None,
            next_wake_at: Some(now),
            max_players: 50,
            entry_fee: 20,
            prize_pool: 20 * scores.len() as i64,
            entries,
            question_ids: vec![],
            winners: vec![],
            created_at: now,
        }
    }

    #[test]
    fn test_unknown_tier_falls_back_to_small() {
        assert_eq!("mega".parse::<Tier>().unwrap(), Tier::Mega);
        assert_eq!("LARGE".parse::<Tier>().unwrap(), Tier::Large);
        assert_eq!("legendary".parse::<Tier>().unwrap(), Tier::Small);
    }

    #[test]
    fn test_status_is_forward_only() {
        assert_eq!(TournamentStatus::Scheduled.next(), Some(TournamentStatus::Lobby));
        assert_eq!(TournamentStatus::Lobby.next(), Some(TournamentStatus::Active));
        assert_eq!(TournamentStatus::Active.next(), Some(TournamentStatus::Completed));
        assert_eq!(TournamentStatus::Completed.next(), None);
    }

    #[test]
    fn test_status_round_trips_through_storage_string() {
        for status in [
            TournamentStatus::Scheduled,
            TournamentStatus::Lobby,
            TournamentStatus::Active,
            TournamentStatus::Completed,
        ] {
            assert_eq!(TournamentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TournamentStatus::parse("cancelled"), None);
    }

    #[test]
    fn test_standings_skip_unfinished_and_keep_join_order_on_ties() {
        let t = tournament_with_scores(&[(1, Some(40)), (2, None), (3, Some(70)), (4, Some(40))]);
        let order: Vec<UserId> = t.standings().iter().map(|e| e.user_id).collect();
        assert_eq!(order, vec![3, 1, 4]);
        assert_eq!(t.live_rank(4), Some(3));
        assert_eq!(t.live_rank(2), None);
    }

    #[test]
    fn test_placements_keep_recorded_ranks() {
        let payouts = crate::tournament::prize::distribute(Tier::Small, 90);
        let mut t = tournament_with_scores(&[(1, Some(30)), (2, Some(20)), (3, Some(10))]);
        assert_eq!(
            t.placements(&payouts),
            vec![
                Winner { user_id: 1, rank: 1, tokens: 45 },
                Winner { user_id: 2, rank: 2, tokens: 27 },
                Winner { user_id: 3, rank: 3, tokens: 18 },
            ]
        );

        // Ranks 1 and 2 were recorded, then user 3 posted a higher score
        for (user, rank, tokens) in [(1, 1, 45), (2, 2, 27)] {
            let entry = t.entries.iter_mut().find(|e| e.user_id == user).unwrap();
            entry.final_rank = Some(rank);
            entry.tokens_won = tokens;
        }
        t.entries[2].score = 999;

        assert_eq!(
            t.placements(&payouts),
            vec![
                Winner { user_id: 1, rank: 1, tokens: 45 },
                Winner { user_id: 2, rank: 2, tokens: 27 },
                Winner { user_id: 3, rank: 3, tokens: 18 },
            ]
        );
    }

    #[test]
    fn test_placements_stop_at_finishers() {
        let payouts = crate::tournament::prize::distribute(Tier::Small, 100);
        let t = tournament_with_scores(&[(1, None), (2, Some(5))]);
        assert_eq!(
            t.placements(&payouts),
            vec![Winner { user_id: 2, rank: 1, tokens: 50 }]
        );
    }

    #[test]
    fn test_transition_from_and_to() {
        let now = Utc::now();
        let complete = Transition::Complete {
            end_time: now,
            winners: vec![],
        };
        assert_eq!(complete.from(), TournamentStatus::Active);
        assert_eq!(complete.to(), TournamentStatus::Completed);

        let mut t = tournament_with_scores(&[]);
        complete.apply_to(&mut t);
        assert_eq!(t.status, TournamentStatus::Completed);
        assert_eq!(t.next_wake_at, None);
        assert_eq!(t.end_time, Some(now));
    }

    #[test]
    fn test_new_tournament_uses_tier_capacity() {
        let new = NewTournament::for_tier("Late Night Battle", Tier::Medium, Utc::now(), 30);
        assert_eq!(new.max_players, 200);
        assert_eq!(new.with_max_players(10).max_players, 10);
    }
}
