//! Tournament event bus.
//!
//! The orchestrator and manager publish [`ArenaEvent`]s to a [`Channel`];
//! transports (the WebSocket endpoint in `qa_server`) subscribe. The bus is a
//! trait so the core never depends on a particular transport.

use crate::profile::UserId;
use crate::questions::PublicQuestion;
use crate::tournament::models::TournamentId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Default per-channel buffer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Every connected client
    Lobby,
    /// Clients following one tournament
    Tournament(TournamentId),
}

/// Events produced by the arena core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ArenaEvent {
    /// A player joined
    TournamentUpdate {
        tournament_id: TournamentId,
        current_players: usize,
        prize_pool: i64,
        max_players: usize,
    },
    /// Scheduled start reached; lobby is open
    TournamentStarting {
        tournament_id: TournamentId,
        starts_in_seconds: u64,
    },
    /// Questions drawn, play window open
    TournamentStarted {
        tournament_id: TournamentId,
        questions: Vec<PublicQuestion>,
    },
    /// Live score submission during play
    LeaderboardUpdate {
        tournament_id: TournamentId,
        user_id: UserId,
        score: i64,
        rank: u32,
    },
    /// Settlement finished
    TournamentEnded { tournament_id: TournamentId },
}

impl ArenaEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ArenaEvent::TournamentUpdate { .. } => "tournament-update",
            ArenaEvent::TournamentStarting { .. } => "tournament-starting",
            ArenaEvent::TournamentStarted { .. } => "tournament-started",
            ArenaEvent::LeaderboardUpdate { .. } => "leaderboard-update",
            ArenaEvent::TournamentEnded { .. } => "tournament-ended",
        }
    }
}

/// Publish/subscribe abstraction
pub trait EventBus: Send + Sync {
    /// Publish an event; returns how many subscribers received it
    fn publish(&self, channel: Channel, event: ArenaEvent) -> usize;

    /// Subscribe to a channel
    fn subscribe(&self, channel: Channel) -> broadcast::Receiver<ArenaEvent>;

    /// Drop a channel. Subscribers see the stream end after draining.
    fn close(&self, channel: Channel);
}

/// In-process bus backed by one `tokio::sync::broadcast` channel per scope
pub struct BroadcastEventBus {
    capacity: usize,
    channels: Mutex<HashMap<Channel, broadcast::Sender<ArenaEvent>>>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live channels
    pub fn channel_count(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, channel: Channel, event: ArenaEvent) -> usize {
        let channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match channels.get(&channel) {
            // Err only means nobody is listening right now
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    fn subscribe(&self, channel: Channel) -> broadcast::Receiver<ArenaEvent> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    fn close(&self, channel: Channel) {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&channel);
    }
}
