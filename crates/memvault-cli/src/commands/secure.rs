use std::path::PathBuf;

use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use memvault::MemoryService;

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct SecureCommand {
    #[clap(subcommand)]
    pub command: SecureSubcommand,
}

#[derive(Subcommand)]
pub enum SecureSubcommand {
    #[clap(about = "Show the secure info and the facts parsed from it")]
    Show,

    #[clap(about = "Replace the secure info")]
    Set(SetArgs),
}

#[derive(Parser)]
pub struct SetArgs {
    #[clap(
        help = "New content",
        required_unless_present = "file",
        conflicts_with = "file"
    )]
    pub content: Option<String>,

    #[clap(long, short, help = "Read the new content from a file")]
    pub file: Option<PathBuf>,
}

impl SecureCommand {
    pub async fn execute(&self, service: &MemoryService, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            SecureSubcommand::Show => Self::show(service, format).await,
            SecureSubcommand::Set(args) => Self::set(service, args, format).await,
        }
    }

    async fn show(service: &MemoryService, format: OutputFormat) -> CliResult<()> {
        let info = service.get_secure_info().await?;
        let facts = info.facts();

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "content": info.content,
                    "updated_at": (!info.is_empty()).then(|| info.updated_at.to_rfc3339()),
                    "facts": facts,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if info.is_empty() {
                    println!("No secure info set.");
                    return Ok(());
                }

                println!("Updated: {}\n", info.updated_at.to_rfc3339());

                if facts.is_empty() {
                    println!("{}", info.content);
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Section", "Fact"]);

                for (section, items) in &facts {
                    for fact in items {
                        table.add_row([section.as_str(), fact.as_str()]);
                    }
                }

                println!("{table}");
            }
        }

        Ok(())
    }

    async fn set(service: &MemoryService, args: &SetArgs, format: OutputFormat) -> CliResult<()> {
        let content = match (&args.content, &args.file) {
            (Some(content), _) => content.clone(),
            (None, Some(path)) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
            (None, None) => return Err("Provide the content or --file".into()),
        };

        let info = service.set_secure_info(content).await?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "updated_at": info.updated_at.to_rfc3339(),
                    "facts": info.facts().values().map(Vec::len).sum::<usize>(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if info.is_empty() {
                    println!("Secure info cleared.");
                } else {
                    println!("Secure info updated at {}.", info.updated_at.to_rfc3339());
                }
            }
        }

        Ok(())
    }
}
