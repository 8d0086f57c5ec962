use std::path::PathBuf;

use clap::{Parser, Subcommand};
use memvault::MemoryService;
use memvault::config::Config;
use memvault_cli::commands::{
    BackupCommand, ConfigCommand, IndexCommand, MemoryCommand, SecureCommand, StatsCommand,
    UpgradeCommand,
};
use memvault_cli::error::CliResult;
use memvault_cli::output::OutputFormat;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "memvault-cli")]
#[command(about = "Memvault CLI - Management tool for the memvault store")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Memory management commands")]
    Memory(MemoryCommand),

    #[clap(about = "Show or replace the secure personal info")]
    Secure(SecureCommand),

    #[clap(about = "Rebuild or verify the summary index")]
    Index(IndexCommand),

    #[clap(about = "Snapshot commands")]
    Backup(BackupCommand),

    #[clap(about = "Show storage statistics")]
    Stats(StatsCommand),

    #[clap(about = "Rewrite legacy records in the current format")]
    Upgrade(UpgradeCommand),

    #[clap(about = "Configuration commands")]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    if let Command::Config(cmd) = &cli.command {
        return cmd
            .execute(cli.config.as_deref(), cli.data_dir.as_deref(), format)
            .await;
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }

    if let Command::Backup(cmd) = &cli.command {
        return cmd.execute(config, format).await;
    }

    let service = MemoryService::open(config).await?;

    match &cli.command {
        Command::Memory(cmd) => cmd.execute(&service, format).await?,
        Command::Secure(cmd) => cmd.execute(&service, format).await?,
        Command::Index(cmd) => cmd.execute(&service, format).await?,
        Command::Stats(cmd) => cmd.execute(&service, format).await?,
        Command::Upgrade(cmd) => cmd.execute(&service, format).await?,
        Command::Backup(_) | Command::Config(_) => unreachable!(),
    }

    service.persist_access().await?;
    Ok(())
}
