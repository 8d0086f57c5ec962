use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use memvault::backup::{self, SnapshotInfo};
use memvault::config::Config;
use memvault::{MemoryService, MemvaultError};

use crate::error::CliResult;
use crate::output::{OutputFormat, format_size, format_timestamp};

#[derive(Parser)]
pub struct BackupCommand {
    #[clap(subcommand)]
    pub command: BackupSubcommand,
}

#[derive(Subcommand)]
pub enum BackupSubcommand {
    #[clap(about = "Take a snapshot now")]
    Run,

    #[clap(about = "List snapshots, newest first")]
    List,

    #[clap(about = "Delete all but the newest snapshots")]
    Prune(PruneArgs),

    #[clap(about = "Restore a snapshot into an empty directory")]
    Restore(RestoreArgs),
}

#[derive(Parser)]
pub struct PruneArgs {
    #[clap(long, help = "How many snapshots to keep (defaults to the configured value)")]
    pub retain: Option<usize>,
}

#[derive(Parser)]
pub struct RestoreArgs {
    #[clap(help = "Snapshot name from `backup list`, or a path to a snapshot directory")]
    pub snapshot: String,

    #[clap(long, short, help = "Directory to restore into (must be empty or absent)")]
    pub target: PathBuf,
}

impl BackupCommand {
    pub async fn execute(&self, config: Config, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            BackupSubcommand::Run => Self::run(config, format).await,
            BackupSubcommand::List => Self::list(&config, format).await,
            BackupSubcommand::Prune(args) => Self::prune(&config, args, format).await,
            BackupSubcommand::Restore(args) => Self::restore(&config, args, format).await,
        }
    }

    async fn run(config: Config, format: OutputFormat) -> CliResult<()> {
        let service = MemoryService::open(config).await?;
        let info = service.backup_now().await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&snapshot_json(&info))?);
            }
            OutputFormat::Table => {
                println!("Snapshot {} created.", info.name);
                println!("  Path: {}", info.path.display());
                println!("  Records: {}", info.metadata.record_count);
                if info.metadata.compressed {
                    println!(
                        "  Compressed: {} -> {} ({:.0}% saved)",
                        format_size(info.metadata.original_bytes),
                        format_size(info.metadata.stored_bytes),
                        (1.0 - info.metadata.compression_ratio()) * 100.0
                    );
                }
            }
        }

        Ok(())
    }

    async fn list(config: &Config, format: OutputFormat) -> CliResult<()> {
        let backup_root = config.storage.backup_dir();
        let snapshots = backup::list_snapshots(&backup_root).await?;

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = snapshots.iter().map(snapshot_json).collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if snapshots.is_empty() {
                    println!("No snapshots in {}.", backup_root.display());
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header([
                        "Name",
                        "Created",
                        "Records",
                        "Tombstones",
                        "Secure Info",
                        "Size",
                    ]);

                for snapshot in &snapshots {
                    table.add_row([
                        snapshot.name.clone(),
                        format_timestamp(&snapshot.metadata.created_at),
                        snapshot.metadata.record_count.to_string(),
                        snapshot.metadata.tombstone_count.to_string(),
                        if snapshot.metadata.secure_info { "yes" } else { "no" }.to_string(),
                        snapshot_size(snapshot),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} snapshots", snapshots.len());
            }
        }

        Ok(())
    }

    async fn prune(config: &Config, args: &PruneArgs, format: OutputFormat) -> CliResult<()> {
        let retain = args.retain.unwrap_or(config.backup.retain);
        if retain == 0 {
            return Err(MemvaultError::Config(
                "retain must be at least 1; pruning to zero would delete every snapshot".to_string(),
            )
            .into());
        }
        let removed = backup::prune(&config.storage.backup_dir(), retain).await?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({ "retain": retain, "removed": removed });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if removed.is_empty() {
                    println!("Nothing to prune.");
                } else {
                    for name in &removed {
                        println!("Removed {name}");
                    }
                }
            }
        }

        Ok(())
    }

    async fn restore(config: &Config, args: &RestoreArgs, format: OutputFormat) -> CliResult<()> {
        let snapshot = resolve_snapshot(&config.storage.backup_dir(), &args.snapshot);
        let metadata = backup::restore(&snapshot, &args.target).await?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "snapshot": snapshot.display().to_string(),
                    "target": args.target.display().to_string(),
                    "metadata": metadata,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                println!(
                    "Restored {} records from {} into {}.",
                    metadata.record_count,
                    snapshot.display(),
                    args.target.display()
                );
            }
        }

        Ok(())
    }
}

/// A bare snapshot name refers to the backup root; anything else is a path.
fn resolve_snapshot(backup_root: &Path, snapshot: &str) -> PathBuf {
    let candidate = Path::new(snapshot);
    if candidate.components().count() == 1 && !candidate.exists() {
        backup_root.join(candidate)
    } else {
        candidate.to_path_buf()
    }
}

fn snapshot_json(info: &SnapshotInfo) -> serde_json::Value {
    serde_json::json!({
        "name": info.name,
        "path": info.path.display().to_string(),
        "created_at": info.metadata.created_at.to_rfc3339(),
        "record_count": info.metadata.record_count,
        "tombstone_count": info.metadata.tombstone_count,
        "secure_info": info.metadata.secure_info,
        "compressed": info.metadata.compressed,
        "original_bytes": info.metadata.original_bytes,
        "stored_bytes": info.metadata.stored_bytes,
        "compression_ratio": info.metadata.compression_ratio(),
        "space_saved": info.metadata.space_saved(),
    })
}

fn snapshot_size(info: &SnapshotInfo) -> String {
    let stored = format_size(info.metadata.stored_bytes);
    if info.metadata.compressed {
        format!("{stored} (gz, {:.2}x)", info.metadata.compression_ratio())
    } else {
        stored
    }
}
