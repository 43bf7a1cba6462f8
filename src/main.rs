//! DAO Governance Service Entry Point
//!
//! Runs the proposal voting API with its SQLite proposal store and the
//! background worker that releases timelocked executions.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default configuration
//! dao-governance
//!
//! # Run with a config file and a throwaway database
//! dao-governance --config governance.toml --db :memory:
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dao_governance::api::run_api_server;
use dao_governance::clock::SystemClock;
use dao_governance::config::Config;
use dao_governance::sqlite_store::SqliteStore;
use dao_governance::treasury::TreasuryLedger;
use dao_governance::GovernanceService;

/// DAO governance service
#[derive(Parser, Debug)]
#[command(name = "dao-governance")]
#[command(author = "AEGIS Team")]
#[command(version = "0.1.0")]
#[command(about = "DAO proposal voting and timelocked execution service", long_about = None)]
struct Args {
    /// Path to configuration file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// API port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database path, or ":memory:" (overrides config)
    #[arg(long)]
    db: Option<String>,

    /// Write the effective configuration to this path and exit
    #[arg(long)]
    write_config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting DAO governance service v{}", env!("CARGO_PKG_VERSION"));

    // Load or create configuration
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Config::from_file(path)?
        }
        None => Config::default(),
    };

    // Override with command line arguments
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db) = args.db {
        config.database.path = db;
    }

    config.validate()?;

    if let Some(path) = &args.write_config {
        config.to_file(path)?;
        info!("Configuration written to {}", path.display());
        return Ok(());
    }

    let store = if config.database.path == ":memory:" {
        info!("Persistence disabled (in-memory database)");
        SqliteStore::open_in_memory()?
    } else {
        if let Some(parent) = Path::new(&config.database.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        SqliteStore::open(&config.database.path)?
    };

    let treasury = TreasuryLedger::with_balances(config.treasury.balance_map());

    let service = Arc::new(GovernanceService::new(
        Arc::new(store),
        Arc::new(treasury),
        Arc::new(SystemClock),
        config.governance.clone(),
    ));

    let worker = service.spawn_execution_worker();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    info!("Governance configuration:");
    info!("  API: http://{}", addr);
    info!("  Database: {}", config.database.path);
    info!(
        "  Default threshold: {}%, timelock: {}h",
        config.governance.default_threshold, config.governance.execution_timelock_hours
    );

    tokio::select! {
        result = run_api_server(addr, service) => {
            if let Err(e) = result {
                error!("Governance API server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    worker.abort();
    Ok(())
}
