use std::path::Path;

use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use memvault::MemoryService;
use memvault::storage::Evictor;
use walkdir::WalkDir;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_size, format_timestamp};

#[derive(Parser)]
pub struct StatsCommand {
    #[clap(long, help = "Also list the most used tags")]
    pub tags: bool,
}

impl StatsCommand {
    pub async fn execute(&self, service: &MemoryService, format: OutputFormat) -> CliResult<()> {
        let stats = service.stats().await?;
        let max_memories = service.config().memory.max_memories;
        let capacity = Evictor::new(max_memories).capacity_status(stats.total);

        let data_dir = service.store().layout().root().to_path_buf();
        let backup_dir = service.config().storage.backup_dir();
        let store_bytes = disk_usage(&data_dir, Some(&backup_dir));
        let backup_bytes = disk_usage(&backup_dir, None);

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "stats": stats,
                    "max_memories": max_memories,
                    "capacity": format!("{capacity:?}"),
                    "store_size_bytes": store_bytes,
                    "backup_size_bytes": backup_bytes,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                println!("Memvault Statistics");
                println!("===================\n");

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Metric", "Value"]);

                table.add_row([
                    "Memories".to_string(),
                    format!("{} / {} ({capacity:?})", stats.total, max_memories),
                ]);
                table.add_row([
                    "Average importance".to_string(),
                    format!("{:.2}", stats.average_importance),
                ]);
                table.add_row(["Legacy records".to_string(), stats.legacy_records.to_string()]);
                table.add_row([
                    "Unreadable records".to_string(),
                    stats.unreadable_records.to_string(),
                ]);
                table.add_row(["Tombstones".to_string(), stats.tombstones.to_string()]);
                table.add_row([
                    "Secure info".to_string(),
                    if stats.secure_info_set { "set" } else { "not set" }.to_string(),
                ]);
                table.add_row([
                    "Oldest".to_string(),
                    stats.oldest.as_ref().map_or("-".to_string(), format_timestamp),
                ]);
                table.add_row([
                    "Newest".to_string(),
                    stats.newest.as_ref().map_or("-".to_string(), format_timestamp),
                ]);
                table.add_row(["Content".to_string(), format_size(stats.content_bytes as u64)]);
                table.add_row(["Store on disk".to_string(), format_size(store_bytes)]);
                table.add_row(["Backups on disk".to_string(), format_size(backup_bytes)]);

                println!("{table}\n");

                let mut kinds = Table::new();
                kinds
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Kind", "Count"]);
                for (kind, count) in &stats.by_kind {
                    kinds.add_row([kind.clone(), count.to_string()]);
                }
                println!("{kinds}\n");

                let mut ages = Table::new();
                ages.load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Age", "Count"]);
                for (bucket, count) in &stats.age_distribution {
                    ages.add_row([bucket.clone(), count.to_string()]);
                }
                println!("{ages}");

                if self.tags && !stats.top_tags.is_empty() {
                    let mut tags = Table::new();
                    tags.load_preset(UTF8_FULL_CONDENSED)
                        .set_content_arrangement(ContentArrangement::Dynamic)
                        .set_header(["Tag", "Count"]);
                    for (tag, count) in &stats.top_tags {
                        tags.add_row([tag.clone(), count.to_string()]);
                    }
                    println!("\n{tags}");
                }
            }
        }

        Ok(())
    }
}

/// Total size of the regular files under `root`, skipping the `skip` subtree.
fn disk_usage(root: &Path, skip: Option<&Path>) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| skip.is_none_or(|skip| !entry.path().starts_with(skip)))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_disk_usage_skips_backup_subtree() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("records")).unwrap();
        std::fs::create_dir_all(dir.path().join("backups/snapshot-a")).unwrap();
        std::fs::write(dir.path().join("records/a.json"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("index.json"), vec![0u8; 20]).unwrap();
        std::fs::write(dir.path().join("backups/snapshot-a/a.json"), vec![0u8; 100]).unwrap();

        let backups = dir.path().join("backups");
        assert_eq!(disk_usage(dir.path(), Some(&backups)), 120);
        assert_eq!(disk_usage(&backups, None), 100);
    }

    #[test]
    fn test_disk_usage_of_missing_dir_is_zero() {
        let dir = tempdir().unwrap();
        assert_eq!(disk_usage(&dir.path().join("nope"), None), 0);
    }
}
