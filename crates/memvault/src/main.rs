//! Memvault Daemon - keeps the store indexed and backed up

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use memvault::MemoryService;
use memvault::config::Config;
use memvault::error::Result;

/// Memvault - durable conversational memory
#[derive(Parser)]
#[command(name = "memvaultd")]
#[command(about = "Durable conversational memory with periodic snapshots")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Open the store and run the backup schedule (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,memvault=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting Memvault daemon");

    let config = Config::load(config_path.as_deref())?;
    tracing::debug!("Config loaded: {:?}", config);

    let service = MemoryService::open(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_handle = if service.config().backup.enabled {
        let scheduler = Arc::new(service.backup_scheduler());
        if let Err(e) = scheduler.resume().await {
            tracing::warn!("Could not read existing snapshots: {}", e);
        }
        Some(tokio::spawn(scheduler.run(shutdown_rx)))
    } else {
        tracing::info!("Backups disabled by configuration");
        None
    };

    tracing::info!("Memvault daemon ready; press Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            tracing::error!("Backup scheduler task failed: {}", e);
        }
    }
    if let Err(e) = service.persist_access().await {
        tracing::warn!("Failed to save access counters: {}", e);
    }

    Ok(())
}
