//! # Quiz Arena
//!
//! Core of a quiz platform: scheduled multi-player tournaments with token
//! prizes, a daily play streak with reward multipliers, and leaderboards
//! across daily, weekly, monthly and all-time periods.
//!
//! ## Architecture
//!
//! A tournament moves through a forward-only state machine:
//!
//! - **Scheduled**: accepting entries until the scheduled start
//! - **Lobby**: still accepting entries; questions not yet drawn
//! - **Active**: questions drawn, scores accepted
//! - **Completed**: prizes paid, winners recorded
//!
//! Each status carries a persisted wake time. The
//! [`tournament::TournamentScheduler`] arms a timer per due tournament and the
//! [`tournament::TournamentOrchestrator`] applies each transition as a
//! compare-and-set, so a restart resumes where the last process stopped.
//!
//! ## Core Modules
//!
//! - [`tournament`]: Lifecycle, prize tables, settlement and scheduling
//! - [`streak`]: Daily streaks, multipliers and streak freezes
//! - [`leaderboard`]: Per-period score buckets with full re-rank
//! - [`session`]: Daily sessions tying streaks, wallet and leaderboards together
//! - [`wallet`]: Idempotent token ledger
//! - [`db`]: Repository traits with Postgres and in-memory implementations
//!
//! ## Example
//!
//! ```
//! use quiz_arena::tournament::{Tier, distribute};
//!
//! let payouts = distribute(Tier::Small, 1_000);
//! assert_eq!(payouts[0].tokens, 500);
//! ```

/// Service wiring.
pub mod arena;
pub use arena::Arena;

/// Environment-driven timing and reward configuration.
pub mod config;
pub use config::{ArenaConfig, ConfigError};

/// Persistence: repository traits, Postgres and in-memory stores.
pub mod db;

/// Publish/subscribe for tournament events.
pub mod events;
pub use events::{ArenaEvent, BroadcastEventBus, Channel, EventBus};

pub mod leaderboard;
pub mod profile;
pub mod questions;
pub mod session;
pub mod streak;
pub mod tournament;
pub mod wallet;
