use clap::Parser;
use memvault::MemoryService;

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct UpgradeCommand {
    #[clap(long, help = "Only report how many legacy records would be rewritten")]
    pub dry_run: bool,
}

impl UpgradeCommand {
    pub async fn execute(&self, service: &MemoryService, format: OutputFormat) -> CliResult<()> {
        let (count, upgraded) = if self.dry_run {
            (service.stats().await?.legacy_records, false)
        } else {
            (service.store().upgrade_legacy().await?, true)
        };

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "legacy_records": count,
                    "upgraded": upgraded,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if count == 0 {
                    println!("No legacy records found.");
                } else if upgraded {
                    println!("Upgraded {count} legacy records to the current format.");
                } else {
                    println!("{count} legacy records would be upgraded.");
                }
            }
        }

        Ok(())
    }
}
