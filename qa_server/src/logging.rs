//! Structured logging configuration.
//!
//! The library crate logs through the `log` facade; `tracing-subscriber`
//! picks those records up through its `tracing-log` bridge, so one
//! subscriber formats both.

use quiz_arena::tournament::{TournamentId, TournamentStatus};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn";

/// Operations slower than this are logged at warn level
const SLOW_OPERATION_MS: u64 = 1000;

/// Initialize structured logging
///
/// Levels are configurable through the `RUST_LOG` env var.
///
/// # Example
///
/// ```no_run
/// use qa_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log a tournament status change
pub fn log_transition(tournament_id: TournamentId, status: TournamentStatus) {
    tracing::info!(
        tournament_id = tournament_id,
        status = status.as_str(),
        "Tournament transition"
    );
}

/// Log a finished settlement
///
/// # Example
///
/// ```
/// use qa_server::logging::log_settlement;
///
/// log_settlement(42, 50);
/// ```
pub fn log_settlement(tournament_id: TournamentId, subscribers: usize) {
    tracing::info!(
        tournament_id = tournament_id,
        subscribers = subscribers,
        "Tournament settled"
    );
}

/// Log performance metric
///
/// # Arguments
///
/// * `operation` - Operation name
/// * `duration_ms` - Duration in milliseconds
/// * `metadata` - Additional metadata
///
/// # Example
///
/// ```
/// use qa_server::logging::log_performance;
/// use std::time::Instant;
///
/// let start = Instant::now();
/// // ... do work ...
/// let duration = start.elapsed().as_millis() as u64;
/// log_performance("daily_finish", duration, Some("user 7"));
/// ```
pub fn log_performance(operation: &str, duration_ms: u64, metadata: Option<&str>) {
    if duration_ms > SLOW_OPERATION_MS {
        tracing::warn!(
            operation = operation,
            duration_ms = duration_ms,
            metadata = metadata,
            "PERFORMANCE: Slow operation"
        );
    } else {
        tracing::debug!(
            operation = operation,
            duration_ms = duration_ms,
            metadata = metadata,
            "Performance metric"
        );
    }
}

/// Log API request/response
pub fn log_api_request(method: &str, path: &str, status_code: u16, duration_ms: u64) {
    tracing::info!(
        http_method = method,
        http_path = path,
        http_status = status_code,
        duration_ms = duration_ms,
        "API request completed"
    );
}
