//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use quiz_arena::ArenaConfig;
use quiz_arena::config::ConfigError;
use quiz_arena::db::DatabaseConfig;
use std::net::SocketAddr;

/// Default HTTP bind address
pub const DEFAULT_BIND: &str = "127.0.0.1:6969";

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Postgres settings; `None` runs on the in-memory store
    pub database: Option<DatabaseConfig>,
    /// Tournament timing, streak and reward settings
    pub arena: ArenaConfig,
    /// Prometheus scrape address, if metrics are enabled
    pub metrics_bind: Option<SocketAddr>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `in_memory` - Ignore `DATABASE_URL` and keep all state in process
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for unparseable addresses or
    /// inconsistent arena/pool settings
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        in_memory: bool,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_addr("SERVER_BIND")?.unwrap_or_else(default_bind),
        };

        let database = if in_memory {
            None
        } else {
            match database_url_override {
                Some(database_url) => {
                    let mut database = DatabaseConfig::from_env()?.unwrap_or_default();
                    database.database_url = database_url;
                    Some(database)
                }
                None => DatabaseConfig::from_env()?,
            }
        };

        let config = ServerConfig {
            bind,
            database,
            arena: ArenaConfig::from_env()?,
            metrics_bind: parse_addr("METRICS_BIND")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.arena.validate()?;

        if self.metrics_bind == Some(self.bind) {
            return Err(ConfigError::Invalid {
                var: "METRICS_BIND".to_string(),
                reason: format!("must differ from the server bind address ({})", self.bind),
            });
        }
        Ok(())
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6969))
}

fn parse_addr(var: &str) -> Result<Option<SocketAddr>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: var.to_string(),
                reason: format!("'{value}' is not an IP:PORT address ({e})"),
            }),
        Err(_) => Ok(None),
    }
}
