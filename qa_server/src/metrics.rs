//! Prometheus metrics for monitoring arena health.
//!
//! Metrics are exposed in Prometheus text format at `http://<METRICS_BIND>/metrics`
//! once [`init_metrics`] has installed the exporter. Without an exporter the
//! `metrics` macros are no-ops.
//!
//! # Metrics Categories
//!
//! - **HTTP Metrics**: Request counts and duration
//! - **WebSocket Metrics**: Active and total connections, messages relayed
//! - **Tournament Metrics**: Transitions, joins, score submissions, settlements
//! - **Reward Metrics**: Daily sessions, tokens credited, freezes sold
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use qa_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::http_requests_total("POST", "/api/v1/daily/finish", 200);
//! ```

use crate::logging;
use metrics_exporter_prometheus::PrometheusBuilder;
use quiz_arena::events::{ArenaEvent, Channel, EventBus};
use quiz_arena::tournament::TournamentStatus;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Initialize Prometheus metrics exporter.
///
/// # Errors
///
/// Fails if the listener cannot bind or a recorder is already installed.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// WebSocket Metrics
// ============================================================================

/// Set current active WebSocket connections count.
pub fn websocket_connections_active(count: u64) {
    metrics::gauge!("websocket_connections_active").set(count as f64);
}

/// Increment total WebSocket connections counter.
pub fn websocket_connections_total() {
    metrics::counter!("websocket_connections_total").increment(1);
}

/// Increment WebSocket messages sent counter.
pub fn websocket_messages_sent() {
    metrics::counter!("websocket_messages_sent").increment(1);
}

// ============================================================================
// Tournament Metrics
// ============================================================================

/// Increment tournament transitions counter.
pub fn tournament_transitions_total(status: TournamentStatus) {
    metrics::counter!("tournament_transitions_total",
        "status" => status.as_str()
    )
    .increment(1);
}

/// Increment tournament joins counter.
pub fn tournament_joins_total() {
    metrics::counter!("tournament_joins_total").increment(1);
}

/// Increment score submissions counter.
pub fn tournament_scores_total() {
    metrics::counter!("tournament_scores_total").increment(1);
}

/// Increment settled tournaments counter.
pub fn tournament_settlements_total() {
    metrics::counter!("tournament_settlements_total").increment(1);
}

/// Record the prize pool of a tournament after a join.
pub fn prize_pool_tokens(pool: i64) {
    metrics::histogram!("prize_pool_tokens").record(pool as f64);
}

// ============================================================================
// Reward Metrics
// ============================================================================

/// Increment finished daily sessions counter.
pub fn daily_sessions_total() {
    metrics::counter!("daily_sessions_total").increment(1);
}

/// Add credited tokens, labelled by source.
pub fn tokens_credited_total(source: &'static str, tokens: i64) {
    if tokens > 0 {
        metrics::counter!("tokens_credited_total", "source" => source).increment(tokens as u64);
    }
}

/// Increment streak freezes sold counter.
pub fn streak_freezes_sold_total() {
    metrics::counter!("streak_freezes_sold_total").increment(1);
}

// ============================================================================
// Instrumented event bus
// ============================================================================

/// Event bus decorator that counts and logs lifecycle events before
/// forwarding them to the inner bus.
///
/// Events are counted on their tournament channel only, since the lobby
/// receives copies of some of them.
pub struct InstrumentedEventBus {
    inner: Arc<dyn EventBus>,
}

impl InstrumentedEventBus {
    pub fn new(inner: Arc<dyn EventBus>) -> Self {
        Self { inner }
    }

    fn observe(channel: Channel, event: &ArenaEvent, delivered: usize) {
        if channel == Channel::Lobby {
            return;
        }
        match event {
            ArenaEvent::TournamentUpdate { prize_pool, .. } => {
                tournament_joins_total();
                prize_pool_tokens(*prize_pool);
            }
            ArenaEvent::TournamentStarting { tournament_id, .. } => {
                tournament_transitions_total(TournamentStatus::Lobby);
                logging::log_transition(*tournament_id, TournamentStatus::Lobby);
            }
            ArenaEvent::TournamentStarted { tournament_id, .. } => {
                tournament_transitions_total(TournamentStatus::Active);
                logging::log_transition(*tournament_id, TournamentStatus::Active);
            }
            ArenaEvent::LeaderboardUpdate { .. } => tournament_scores_total(),
            ArenaEvent::TournamentEnded { tournament_id } => {
                tournament_transitions_total(TournamentStatus::Completed);
                tournament_settlements_total();
                logging::log_settlement(*tournament_id, delivered);
            }
        }
    }
}

impl EventBus for InstrumentedEventBus {
    fn publish(&self, channel: Channel, event: ArenaEvent) -> usize {
        let kind = event.clone();
        let delivered = self.inner.publish(channel, event);
        Self::observe(channel, &kind, delivered);
        delivered
    }

    fn subscribe(&self, channel: Channel) -> broadcast::Receiver<ArenaEvent> {
        self.inner.subscribe(channel)
    }

    fn close(&self, channel: Channel) {
        self.inner.close(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_arena::BroadcastEventBus;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        http_requests_total("GET", "/health", 200);
        http_request_duration_ms("GET", "/health", 1.5);
        tokens_credited_total("daily", 0);
        tokens_credited_total("daily", 50);
        tournament_transitions_total(TournamentStatus::Active);
    }

    #[tokio::test]
    async fn test_instrumented_bus_forwards_events() {
        let bus = InstrumentedEventBus::new(Arc::new(BroadcastEventBus::default()));
        let mut rx = bus.subscribe(Channel::Tournament(4));

        let delivered = bus.publish(
            Channel::Tournament(4),
            ArenaEvent::TournamentEnded { tournament_id: 4 },
        );
        assert_eq!(delivered, 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            ArenaEvent::TournamentEnded { tournament_id: 4 }
        );

        bus.close(Channel::Tournament(4));
        assert!(rx.recv().await.is_err());
    }
}
