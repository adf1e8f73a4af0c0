//! Wallet provenance CLI - funding chains, behavioral labels and launch correlation
//!
//! Reads are paced against the configured ledger API. Use `--fixture` to
//! replay a recorded snapshot without network access.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, warn};

// Use the library crate
use wallet_provenance::cli::commands::{self, Session};
use wallet_provenance::config::Config;

/// Wallet provenance and insider analysis
#[derive(Parser)]
#[command(name = "provenance")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "PROVENANCE_CONFIG", default_value = "provenance.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Replay a recorded ledger snapshot (JSON) instead of calling the API
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trace funding chains back to a known entity or dead end
    Trace {
        /// Wallet addresses
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Build a wallet's behavioral profile
    Profile {
        /// Wallet address
        address: String,

        /// Activity window in days (default: profile.window_days)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Trace, profile and classify wallets
    Classify {
        /// Wallet addresses
        #[arg(required = true)]
        addresses: Vec<String>,

        /// Activity window in days (default: profile.window_days)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Find wallets buying early across several launches
    Correlate {
        /// Token mint addresses (at least two)
        #[arg(required = true)]
        tokens: Vec<String>,

        /// Trade lookback in days (default: profile.window_days)
        #[arg(long)]
        days: Option<u32>,

        /// Keep only the first N buyers of each launch
        #[arg(long)]
        max_position: Option<u32>,

        /// Keep only buyers within N seconds of the first trade
        #[arg(long)]
        max_delay_secs: Option<i64>,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing; stdout carries the JSON report
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wallet_provenance=info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Commands::Config = cli.command {
        return commands::show_config(&config);
    }

    let session = match Session::open(&config, cli.fixture.as_deref()) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to start analysis: {:#}", e);
            std::process::exit(1);
        }
    };

    // Ctrl-C stops traversal; partial chains are still reported
    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted - cancelling in-flight traces");
            cancel.cancel();
        }
    });

    // Execute command
    let result = match cli.command {
        Commands::Trace { addresses } => commands::trace(&session, &addresses).await,
        Commands::Profile { address, days } => commands::profile(&session, &address, days).await,
        Commands::Classify { addresses, days } => {
            commands::classify(&session, &addresses, days).await
        }
        Commands::Correlate {
            tokens,
            days,
            max_position,
            max_delay_secs,
        } => commands::correlate(&session, &tokens, days, max_position, max_delay_secs).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
