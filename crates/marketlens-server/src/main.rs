// MarketLens entry point.
//
// `serve` runs the HTTP API. `inspect` and `session` are maintenance
// commands that work directly on the database named in config.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use marketlens_core::config::{self, Config, LoggingConfig, MAX_SESSION_TTL_DAYS};
use marketlens_core::db::Database;
use marketlens_server::app::{self, AppState};
use marketlens_server::inspect;

const DEFAULT_LOG_FILTER: &str = "marketlens=info,tower_http=info,warn";

#[derive(Parser)]
#[command(name = "marketlens")]
#[command(about = "Stock-market analysis API: quotes, AI chat and watchlists")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve(ServeArgs),

    /// Print database contents
    #[command(subcommand)]
    Inspect(InspectCommand),

    /// Issue or revoke session tokens
    #[command(subcommand)]
    Session(SessionCommand),
}

#[derive(Args)]
struct ServeArgs {
    /// Listen port (overrides config and MARKETLENS_PORT)
    #[arg(long, short)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum InspectCommand {
    /// List every watchlist
    Watchlists {
        /// Only show watchlists owned by this user
        #[arg(long)]
        user: Option<String>,

        /// Output CSV instead of a table
        #[arg(long)]
        csv: bool,
    },

    /// Row counts per table
    Stats,
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Create a session token for a user and print it
    Create {
        user: String,

        /// Lifetime in days (defaults to auth.session_ttl_days)
        #[arg(long)]
        ttl_days: Option<i64>,
    },

    /// Delete a session token
    Revoke { token: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = config::load_config().context("failed to load configuration")?;
    init_tracing(&config.logging)?;

    match cli.command {
        Commands::Serve(args) => {
            if let Some(port) = args.port {
                config.server.port = port;
            }
            serve(config).await
        }
        Commands::Inspect(cmd) => run_inspect(&config, cmd),
        Commands::Session(cmd) => run_session(&config, cmd),
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("MarketLens starting up");
    let state = AppState::from_config(config).context("failed to initialize application")?;
    app::run_server(Arc::new(state)).await
}

fn run_inspect(config: &Config, cmd: InspectCommand) -> Result<()> {
    let db = Database::open(&config.db_path).context("failed to open database")?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cmd {
        InspectCommand::Watchlists { user, csv } => {
            let watchlists = inspect::filter_by_user(db.list_all_watchlists()?, user.as_deref());
            if csv {
                inspect::write_csv(&mut out, &watchlists)?;
            } else {
                inspect::write_table(&mut out, &watchlists)?;
            }
        }
        InspectCommand::Stats => {
            inspect::write_stats(&mut out, &db.table_counts()?)?;
        }
    }
    out.flush().context("failed to flush stdout")?;
    Ok(())
}

fn run_session(config: &Config, cmd: SessionCommand) -> Result<()> {
    let db = Database::open(&config.db_path).context("failed to open database")?;

    match cmd {
        SessionCommand::Create { user, ttl_days } => {
            let ttl = session_ttl(ttl_days.unwrap_or(config.auth.session_ttl_days))?;
            let session = db.create_session(&user, ttl)?;
            info!(user = %session.user_id, expires_at = %session.expires_at, "session created");
            println!("{}", session.token);
        }
        SessionCommand::Revoke { token } => {
            if db.revoke_session(&token)? {
                println!("Session revoked");
            } else {
                anyhow::bail!("no such session");
            }
        }
    }
    Ok(())
}

fn session_ttl(days: i64) -> Result<chrono::Duration> {
    if !(1..=MAX_SESSION_TTL_DAYS).contains(&days) {
        anyhow::bail!("--ttl-days must be between 1 and {MAX_SESSION_TTL_DAYS}, got {days}");
    }
    Ok(chrono::Duration::days(days))
}

/// Initialize tracing to the configured log file, or stderr when none is
/// set (stdout carries command output such as session tokens).
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let default_filter = logging.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);

    match &logging.file {
        Some(path) => {
            let path = std::path::Path::new(path);
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let subscriber = builder
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_thread_ids(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set tracing subscriber")?;
        }
        None => {
            let subscriber = builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("failed to set tracing subscriber")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ttl_bounds() {
        assert_eq!(session_ttl(30).unwrap(), chrono::Duration::days(30));
        assert_eq!(
            session_ttl(MAX_SESSION_TTL_DAYS).unwrap(),
            chrono::Duration::days(3650)
        );
        for days in [0, -1, MAX_SESSION_TTL_DAYS + 1, i64::MAX] {
            let err = session_ttl(days).unwrap_err();
            assert!(err.to_string().contains("--ttl-days"), "got: {err}");
        }
    }
}
