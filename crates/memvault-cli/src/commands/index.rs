use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use memvault::MemoryService;
use memvault::storage::IndexDrift;

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct IndexCommand {
    #[clap(subcommand)]
    pub command: IndexSubcommand,
}

#[derive(Subcommand)]
pub enum IndexSubcommand {
    #[clap(about = "Rebuild the index from the record files")]
    Rebuild,

    #[clap(about = "Compare the persisted index with the record files")]
    Verify,
}

impl IndexCommand {
    pub async fn execute(&self, service: &MemoryService, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            IndexSubcommand::Rebuild => Self::rebuild(service, format).await,
            IndexSubcommand::Verify => Self::verify(service, format).await,
        }
    }

    async fn rebuild(service: &MemoryService, format: OutputFormat) -> CliResult<()> {
        let entries = service.store().rebuild_index().await?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({ "entries": entries });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                println!("Index rebuilt with {entries} entries.");
            }
        }

        Ok(())
    }

    async fn verify(service: &MemoryService, format: OutputFormat) -> CliResult<()> {
        let drift = service.store().verify_index().await?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "clean": drift.is_clean(),
                    "missing": drift.missing,
                    "stale": drift.stale,
                    "mismatched": drift.mismatched,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if drift.is_clean() {
                    println!("Index matches the record files.");
                } else {
                    println!("{}", drift_table(&drift));
                }
            }
        }

        if drift.is_clean() {
            Ok(())
        } else {
            Err("Index is out of date; run `memvault-cli index rebuild`".into())
        }
    }
}

fn drift_table(drift: &IndexDrift) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(["Problem", "ID"]);

    let rows = [
        ("missing from index", &drift.missing),
        ("no record file", &drift.stale),
        ("summary differs", &drift.mismatched),
    ];
    for (problem, ids) in rows {
        for id in ids {
            table.add_row([problem, id.as_str()]);
        }
    }

    table
}
