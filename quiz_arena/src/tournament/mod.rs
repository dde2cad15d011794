//! Scheduled quiz tournaments.
//!
//! This module provides:
//! - Tournament creation, joins with entry fees, and score submission
//! - The `scheduled -> lobby -> active -> completed` state machine
//! - Prize distribution per tier and idempotent settlement
//! - A discovery loop with per-tournament timers
//!
//! ## Example
//!
//! ```no_run
//! use quiz_arena::tournament::{NewTournament, Tier, TournamentManager};
//! use quiz_arena::db::InMemoryStore;
//! use quiz_arena::events::BroadcastEventBus;
//! use quiz_arena::wallet::WalletManager;
//! use chrono::{Duration, Utc};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryStore::new());
//!     let manager = TournamentManager::new(
//!         store.clone(),
//!         store.clone(),
//!         WalletManager::new(store.clone()),
//!         Arc::new(BroadcastEventBus::default()),
//!     );
//!
//!     let start = Utc::now() + Duration::hours(1);
//!     let tournament = manager
//!         .create_tournament(NewTournament::for_tier("Evening Cup", Tier::Medium, start, 25), Utc::now())
//!         .await?;
//!     println!("Scheduled tournament {}", tournament.id);
//!
//!     Ok(())
//! }
//! ```

pub mod manager;
pub mod models;
pub mod orchestrator;
pub mod prize;
pub mod scheduler;

pub use manager::{LiveRank, TournamentError, TournamentManager, TournamentResult, entry_fee_key};
pub use models::{
    NewTournament, Tier, Tournament, TournamentEntry, TournamentId, TournamentStatus, Transition,
    Winner,
};
pub use orchestrator::{CreditOutcome, StepOutcome, TournamentOrchestrator, settlement_key};
pub use prize::{Payout, distribute};
pub use scheduler::TournamentScheduler;
