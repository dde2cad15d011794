//! Streak module: daily play continuity, reward multipliers and freezes.
//!
//! The [`StreakEngine`] is the only writer of a user's streak fields. It is
//! invoked once at the end of every daily session; the multiplier it returns
//! scales that session's token award.

pub mod engine;
pub mod errors;
pub mod freeze;

pub use engine::{
    Multiplier, MultiplierStep, StreakChange, StreakConfig, StreakEngine, StreakOutcome,
    StreakState,
};
pub use errors::{StreakError, StreakResult};
pub use freeze::{FreezeShop, StreakFreeze};
