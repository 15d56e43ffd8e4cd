// Shared application state, router assembly and the HTTP server loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use chrono::Utc;
use tracing::{debug, info, warn};

use marketlens_core::config::Config;
use marketlens_core::db::Database;
use marketlens_llm::ChatService;
use marketlens_quotes::{QuoteSource, RateLimiters, YahooQuoteSource};

use crate::routes;

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Shared state for HTTP handlers.
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub quotes: Arc<dyn QuoteSource>,
    pub chat: ChatService,
    pub limiters: RateLimiters,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Database,
        quotes: Arc<dyn QuoteSource>,
        chat: ChatService,
    ) -> Self {
        let limiters = RateLimiters::from_config(&config.rate_limits);
        Self {
            config,
            db,
            quotes,
            chat,
            limiters,
        }
    }

    /// Production wiring: open the database and build the upstream clients
    /// from `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let db = Database::open(&config.db_path).context("failed to open database")?;
        info!("Database opened at {}", config.db_path);

        let quotes: Arc<dyn QuoteSource> = Arc::new(YahooQuoteSource::from_config(&config.quotes));
        let chat = ChatService::from_config(&config);
        let configured = chat.configured();
        if configured.is_empty() {
            warn!("No AI provider configured; chat requests will fail");
        } else {
            info!(?configured, "AI providers configured");
        }

        Ok(Self::new(config, db, quotes, chat))
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Build the axum router with all routes.
pub fn router(state: Arc<AppState>) -> Router {
    routes::router(state)
}

/// Bind and serve until Ctrl+C.
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                state.config.server.host, state.config.server.port
            )
        })?;

    let housekeeping = tokio::spawn(housekeeping(state.clone()));

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!("MarketLens API listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;

    housekeeping.abort();
    info!("MarketLens API shut down cleanly");
    Ok(())
}

/// Periodically drop closed rate-limit windows and expired sessions.
async fn housekeeping(state: Arc<AppState>) {
    let period = state
        .config
        .rate_limits
        .quotes
        .window_secs
        .min(state.config.rate_limits.ai.window_secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(period));
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let now = Utc::now();
        let windows = state.limiters.prune(now);
        match state.db.purge_expired_sessions(now) {
            Ok(sessions) => debug!(windows, sessions, "housekeeping pass"),
            Err(e) => warn!("failed to purge expired sessions: {e:#}"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
