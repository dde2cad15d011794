//! Arena timing and reward configuration.
//!
//! Consolidates the environment variables the arena core reads and validates
//! them together.

use crate::streak::StreakConfig;
use std::time::Duration;

/// Arena configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Interval between discovery passes
    pub discovery_interval: Duration,
    /// Time between lobby opening and question draw
    pub lobby_window: chrono::Duration,
    /// Time players have to submit scores
    pub play_window: chrono::Duration,
    /// Questions drawn at tournament start
    pub questions_per_tournament: usize,
    /// Questions handed out at daily session start
    pub daily_questions: usize,
    /// Fewer available questions than this fails the daily start
    pub min_daily_questions: usize,
    /// Multiplier thresholds and lock duration
    pub streak: StreakConfig,
    /// Streak freeze price in tokens
    pub freeze_price: i64,
    /// Lifetime of a purchased freeze
    pub freeze_validity: chrono::Duration,
    /// Attempts per settlement credit
    pub settlement_retry_attempts: u32,
    /// Fixed back-off between settlement credit attempts
    pub settlement_retry_backoff: Duration,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(120),
            lobby_window: chrono::Duration::seconds(60),
            play_window: chrono::Duration::seconds(120),
            questions_per_tournament: 10,
            daily_questions: 15,
            min_daily_questions: 10,
            streak: StreakConfig::default(),
            freeze_price: 50,
            freeze_validity: chrono::Duration::days(365),
            settlement_retry_attempts: 3,
            settlement_retry_backoff: Duration::from_millis(500),
        }
    }
}

impl ArenaConfig {
    /// Load configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - `ARENA_DISCOVERY_INTERVAL_SECS` (default: 120)
    /// - `ARENA_LOBBY_WINDOW_SECS` (default: 60)
    /// - `ARENA_PLAY_WINDOW_SECS` (default: 120)
    /// - `ARENA_QUESTIONS_PER_TOURNAMENT` (default: 10)
    /// - `DAILY_QUESTIONS` / `DAILY_MIN_QUESTIONS` (default: 15 / 10)
    /// - `STREAK_THRESHOLD_BRONZE` / `_SILVER` / `_GOLD` (default: 7 / 14 / 30)
    /// - `STREAK_FREEZE_LOCK_HOURS` (default: 72)
    /// - `STREAK_FREEZE_PRICE` (default: 50)
    /// - `STREAK_FREEZE_VALIDITY_DAYS` (default: 365)
    /// - `SETTLEMENT_RETRY_ATTEMPTS` (default: 3)
    /// - `SETTLEMENT_RETRY_BACKOFF_MS` (default: 500)
    ///
    /// # Errors
    ///
    /// Returns error if the loaded values are inconsistent
    pub fn from_env() -> Result<Self, ConfigError> {
        let streak = StreakConfig::with_thresholds(
            parse_env_or("STREAK_THRESHOLD_BRONZE", 7),
            parse_env_or("STREAK_THRESHOLD_SILVER", 14),
            parse_env_or("STREAK_THRESHOLD_GOLD", 30),
            chrono::Duration::hours(parse_env_or("STREAK_FREEZE_LOCK_HOURS", 72)),
        );

        let config = Self {
            discovery_interval: Duration::from_secs(parse_env_or(
                "ARENA_DISCOVERY_INTERVAL_SECS",
                120,
            )),
            lobby_window: chrono::Duration::seconds(parse_env_or("ARENA_LOBBY_WINDOW_SECS", 60)),
            play_window: chrono::Duration::seconds(parse_env_or("ARENA_PLAY_WINDOW_SECS", 120)),
            questions_per_tournament: parse_env_or("ARENA_QUESTIONS_PER_TOURNAMENT", 10),
            daily_questions: parse_env_or("DAILY_QUESTIONS", 15),
            min_daily_questions: parse_env_or("DAILY_MIN_QUESTIONS", 10),
            streak,
            freeze_price: parse_env_or("STREAK_FREEZE_PRICE", 50),
            freeze_validity: chrono::Duration::days(parse_env_or(
                "STREAK_FREEZE_VALIDITY_DAYS",
                365,
            )),
            settlement_retry_attempts: parse_env_or("SETTLEMENT_RETRY_ATTEMPTS", 3),
            settlement_retry_backoff: Duration::from_millis(parse_env_or(
                "SETTLEMENT_RETRY_BACKOFF_MS",
                500,
            )),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery_interval.is_zero() {
            return Err(invalid("ARENA_DISCOVERY_INTERVAL_SECS", "Must be greater than 0"));
        }
        if self.lobby_window <= chrono::Duration::zero() {
            return Err(invalid("ARENA_LOBBY_WINDOW_SECS", "Must be greater than 0"));
        }
        if self.play_window <= chrono::Duration::zero() {
            return Err(invalid("ARENA_PLAY_WINDOW_SECS", "Must be greater than 0"));
        }
        if self.questions_per_tournament == 0 {
            return Err(invalid("ARENA_QUESTIONS_PER_TOURNAMENT", "Must be greater than 0"));
        }
        if self.min_daily_questions == 0 {
            return Err(invalid("DAILY_MIN_QUESTIONS", "Must be greater than 0"));
        }
        if self.min_daily_questions > self.daily_questions {
            return Err(ConfigError::Invalid {
                var: "DAILY_MIN_QUESTIONS".to_string(),
                reason: format!("Cannot exceed DAILY_QUESTIONS ({})", self.daily_questions),
            });
        }

        // Steps are stored highest threshold first
        let steps = &self.streak.steps;
        if steps.last().is_some_and(|lowest| lowest.min_streak < 2) {
            return Err(invalid("STREAK_THRESHOLD_BRONZE", "Must be at least 2"));
        }
        if steps.windows(2).any(|pair| {
            pair[0].min_streak == pair[1].min_streak || pair[0].multiplier <= pair[1].multiplier
        }) {
            return Err(invalid(
                "STREAK_THRESHOLD_SILVER",
                "Thresholds must satisfy bronze < silver < gold",
            ));
        }
        if self.streak.lock_duration < chrono::Duration::zero() {
            return Err(invalid("STREAK_FREEZE_LOCK_HOURS", "Must not be negative"));
        }

        if self.freeze_price <= 0 {
            return Err(invalid("STREAK_FREEZE_PRICE", "Must be greater than 0"));
        }
        if self.freeze_validity <= chrono::Duration::zero() {
            return Err(invalid("STREAK_FREEZE_VALIDITY_DAYS", "Must be greater than 0"));
        }
        if self.settlement_retry_attempts == 0 {
            return Err(invalid("SETTLEMENT_RETRY_ATTEMPTS", "Must be at least 1"));
        }

        Ok(())
    }
}

fn invalid(var: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        reason: reason.to_string(),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Helper to parse environment variable with default fallback
pub fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streak::Multiplier;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "ARENA_DISCOVERY_INTERVAL_SECS",
        "ARENA_LOBBY_WINDOW_SECS",
        "ARENA_PLAY_WINDOW_SECS",
        "ARENA_QUESTIONS_PER_TOURNAMENT",
        "DAILY_QUESTIONS",
        "DAILY_MIN_QUESTIONS",
        "STREAK_THRESHOLD_BRONZE",
        "STREAK_THRESHOLD_SILVER",
        "STREAK_THRESHOLD_GOLD",
        "STREAK_FREEZE_LOCK_HOURS",
        "STREAK_FREEZE_PRICE",
        "STREAK_FREEZE_VALIDITY_DAYS",
        "SETTLEMENT_RETRY_ATTEMPTS",
        "SETTLEMENT_RETRY_BACKOFF_MS",
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn test_defaults_from_empty_env() {
        clear_env();
        let config = ArenaConfig::from_env().unwrap();
        assert_eq!(config, ArenaConfig::default());
        assert_eq!(config.lobby_window.num_seconds(), 60);
        assert_eq!(config.streak.lock_duration, chrono::Duration::days(3));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("ARENA_LOBBY_WINDOW_SECS", "5");
            std::env::set_var("STREAK_THRESHOLD_BRONZE", "3");
            std::env::set_var("SETTLEMENT_RETRY_ATTEMPTS", "7");
            std::env::set_var("DAILY_QUESTIONS", "not-a-number");
        }
        let config = ArenaConfig::from_env().unwrap();
        assert_eq!(config.lobby_window.num_seconds(), 5);
        assert_eq!(config.streak.multiplier_for(3), Multiplier(15));
        assert_eq!(config.settlement_retry_attempts, 7);
        // Unparseable values fall back to the default
        assert_eq!(config.daily_questions, 15);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_inconsistent_env_is_rejected() {
        clear_env();
        unsafe {
            std::env::set_var("DAILY_QUESTIONS", "5");
            std::env::set_var("DAILY_MIN_QUESTIONS", "8");
        }
        let err = ArenaConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("DAILY_MIN_QUESTIONS"));
        clear_env();
    }

    #[test]
    fn test_validation() {
        let mut config = ArenaConfig::default();
        assert!(config.validate().is_ok());

        config.settlement_retry_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = ArenaConfig::default();
        config.streak = StreakConfig::with_thresholds(7, 7, 30, chrono::Duration::days(3));
        assert!(config.validate().is_err());

        let mut config = ArenaConfig::default();
        config.streak = StreakConfig::with_thresholds(20, 14, 30, chrono::Duration::days(3));
        assert!(config.validate().is_err());

        let mut config = ArenaConfig::default();
        config.play_window = chrono::Duration::zero();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_error_display() {
        let err = invalid("ARENA_PLAY_WINDOW_SECS", "Must be greater than 0");
        let msg = err.to_string();
        assert!(msg.contains("ARENA_PLAY_WINDOW_SECS"));
        assert!(msg.contains("greater than 0"));
    }
}
