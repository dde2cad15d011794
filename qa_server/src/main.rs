//! Quiz arena server.
//!
//! Runs the tournament scheduler next to the HTTP/WebSocket API, backed by
//! Postgres or, without `DATABASE_URL`, by an in-process store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Error, anyhow};
use ctrlc::set_handler;
use log::{info, warn};
use pico_args::Arguments;
use qa_server::{api, config::ServerConfig, logging, metrics};
use quiz_arena::db::{Database, InMemoryStore};
use quiz_arena::{Arena, BroadcastEventBus, EventBus};
use tokio::sync::watch;

const HELP: &str = "\
Run the quiz arena server

USAGE:
  qa_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:6969]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --memory                 Keep all state in process, ignoring DATABASE_URL
  -h, --help               Print help information

ENVIRONMENT:
  SERVER_BIND              Server bind address (e.g., 0.0.0.0:8080)
  DATABASE_URL             PostgreSQL connection string
  METRICS_BIND             Prometheus scrape address (disabled when unset)
  ARENA_LOBBY_WINDOW_SECS  Lobby duration before questions are drawn
  ARENA_PLAY_WINDOW_SECS   Play duration before settlement
  RUST_LOG                 Log filter
  Variables may also be set in a .env file in the working directory
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        in_memory: pargs.contains("--memory"),
    };

    let config = ServerConfig::from_env(args.bind, args.database_url, args.in_memory)?;

    logging::init();
    info!("Starting quiz arena server at {}", config.bind);

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(Error::msg)?;
        info!("Prometheus metrics at http://{}/metrics", addr);
    }

    // First signal starts a graceful shutdown, a second one exits immediately
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    set_handler(move || {
        if shutdown_tx.send_replace(true) {
            std::process::exit(1);
        }
    })?;

    let events: Arc<dyn EventBus> = Arc::new(metrics::InstrumentedEventBus::new(Arc::new(
        BroadcastEventBus::default(),
    )));

    let (arena, database) = match &config.database {
        Some(db_config) => {
            info!("Connecting to database");
            let db = Database::new(db_config)
                .await
                .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;
            db.migrate()
                .await
                .map_err(|e| anyhow!("Failed to run migrations: {}", e))?;
            info!("Database connected and migrated");

            let arena = Arena::new(Arc::new(db.store()), events, config.arena.clone());
            (arena, Some(db))
        }
        None => {
            warn!("DATABASE_URL not set; arena state is kept in memory and lost on exit");
            let arena = Arena::new(Arc::new(InMemoryStore::new()), events, config.arena.clone());
            (arena, None)
        }
    };

    let scheduler = arena.scheduler();
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let app = api::create_router(api::AppState::new(arena, database.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| anyhow!("Failed to bind to {}: {}", config.bind, e))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| anyhow!("Server error: {}", e))?;

    info!("Shutting down server...");

    if let Err(e) = scheduler_task.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }
    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}
