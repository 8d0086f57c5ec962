use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use memvault::MemoryService;
use memvault::memory::{MemoryRecord, NewMemory};
use memvault::storage::MemoryFilter;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, truncate_string};

#[derive(Parser)]
pub struct MemoryCommand {
    #[clap(subcommand)]
    pub command: MemorySubcommand,
}

#[derive(Subcommand)]
pub enum MemorySubcommand {
    #[clap(about = "Store a new memory")]
    Add(AddArgs),

    #[clap(about = "List memories, newest first")]
    List(ListArgs),

    #[clap(about = "Show memory details")]
    Show(IdArgs),

    #[clap(about = "Delete a memory (its identifier can never be reused)")]
    Forget(IdArgs),

    #[clap(about = "Replace a memory's importance")]
    Rescore(RescoreArgs),

    #[clap(about = "Rank memories the way a conversation would receive them")]
    Retrieve(RetrieveArgs),

    #[clap(about = "Fuzzy search memory contents")]
    Search(SearchArgs),

    #[clap(about = "Show the most accessed memories")]
    Usage(UsageArgs),
}

#[derive(Parser)]
pub struct AddArgs {
    #[clap(help = "Memory content text")]
    pub text: String,

    #[clap(long, short, help = "Importance in [0, 1] (defaults to the configured value)")]
    pub importance: Option<f32>,

    #[clap(long = "tag", short, help = "Tag to attach (repeatable)")]
    pub tags: Vec<String>,

    #[clap(long, short, help = "Memory kind (defaults to general)")]
    pub kind: Option<String>,

    #[clap(long, help = "Where the memory came from")]
    pub source: Option<String>,
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(
        long,
        short,
        default_value = "20",
        help = "Maximum number of memories to display"
    )]
    pub limit: usize,

    #[clap(long, help = "Only memories at or above this importance")]
    pub min_importance: Option<f32>,

    #[clap(long = "tag", short, help = "Require this tag (repeatable)")]
    pub tags: Vec<String>,

    #[clap(long, short, help = "Filter by memory kind")]
    pub kind: Option<String>,

    #[clap(long, help = "Only memories created at or after this RFC 3339 time")]
    pub since: Option<String>,

    #[clap(long, help = "Case-insensitive content search")]
    pub contains: Option<String>,
}

#[derive(Parser)]
pub struct IdArgs {
    #[clap(help = "Memory ID")]
    pub id: String,
}

#[derive(Parser)]
pub struct RescoreArgs {
    #[clap(help = "Memory ID")]
    pub id: String,

    #[clap(help = "New importance in [0, 1]")]
    pub importance: f32,
}

#[derive(Parser)]
pub struct RetrieveArgs {
    #[clap(help = "Conversation context")]
    pub context: String,

    #[clap(
        long,
        short,
        allow_negative_numbers = true,
        help = "Maximum number of memories (defaults to the configured value)"
    )]
    pub limit: Option<i64>,
}

#[derive(Parser)]
pub struct SearchArgs {
    #[clap(help = "Search text")]
    pub query: String,

    #[clap(long, short, help = "Maximum number of results (defaults to the configured value)")]
    pub limit: Option<usize>,

    #[clap(long, help = "Minimum match score in [0, 1] (defaults to the configured value)")]
    pub min_score: Option<f32>,
}

#[derive(Parser)]
pub struct UsageArgs {
    #[clap(long, short, default_value = "10", help = "Number of memories to show")]
    pub limit: usize,
}

impl MemoryCommand {
    pub async fn execute(&self, service: &MemoryService, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            MemorySubcommand::Add(args) => Self::add(service, args, format).await,
            MemorySubcommand::List(args) => Self::list(service, args, format).await,
            MemorySubcommand::Show(args) => Self::show(service, args, format).await,
            MemorySubcommand::Forget(args) => Self::forget(service, args, format).await,
            MemorySubcommand::Rescore(args) => Self::rescore(service, args, format).await,
            MemorySubcommand::Retrieve(args) => Self::retrieve(service, args, format).await,
            MemorySubcommand::Search(args) => Self::search(service, args, format).await,
            MemorySubcommand::Usage(args) => Self::usage(service, args, format).await,
        }
    }

    async fn add(service: &MemoryService, args: &AddArgs, format: OutputFormat) -> CliResult<()> {
        let mut new = NewMemory::new(args.text.clone());
        new.importance = args.importance;
        new.kind = args.kind.clone();
        new.source = args.source.clone();
        new.tags.extend(args.tags.iter().cloned());

        let id = service.remember_with(new).await?;
        let memory = service.get(&id).await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&memory)?);
            }
            OutputFormat::Table => {
                println!("Memory added successfully.");
                println!("  ID: {}", memory.id);
                println!("  Importance: {:.2}", memory.importance);
                println!("  Kind: {}", memory.kind);
            }
        }

        Ok(())
    }

    async fn list(service: &MemoryService, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let mut filter = MemoryFilter::new();
        if let Some(min) = args.min_importance {
            filter = filter.with_min_importance(min);
        }
        for tag in &args.tags {
            filter = filter.with_tag(tag.clone());
        }
        if let Some(kind) = &args.kind {
            filter = filter.with_kind(kind.clone());
        }
        if let Some(since) = &args.since {
            filter = filter.since(parse_time(since)?);
        }
        if let Some(text) = &args.contains {
            filter = filter.containing(text.clone());
        }

        let memories = service.list(&filter, Some(args.limit)).await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&memories)?);
            }
            OutputFormat::Table => {
                if memories.is_empty() {
                    println!("No memories found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Content", "Kind", "Importance", "Tags", "Created"]);

                for memory in &memories {
                    table.add_row([
                        truncate_string(&memory.id, 8),
                        truncate_string(&memory.content, 50),
                        memory.kind.clone(),
                        format!("{:.2}", memory.importance),
                        join_tags(memory),
                        format_timestamp(&memory.created_at),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} memories", memories.len());
            }
        }

        Ok(())
    }

    async fn show(service: &MemoryService, args: &IdArgs, format: OutputFormat) -> CliResult<()> {
        let memory = service.get(&args.id).await?;
        let generation = service.store().generation(&args.id).await?;
        let access = service.access_pattern(&args.id)?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "record": memory,
                    "schema_generation": generation.to_string(),
                    "access": access,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Property", "Value"]);

                table.add_row(["ID", memory.id.as_str()]);
                table.add_row(["Content", memory.content.as_str()]);
                table.add_row(["Kind", memory.kind.as_str()]);
                table.add_row(["Importance", &format!("{:.4}", memory.importance)]);
                table.add_row(["Tags", &join_tags(&memory)]);
                table.add_row(["Source", memory.source.as_deref().unwrap_or("-")]);
                table.add_row(["Created", &memory.created_at.to_rfc3339()]);
                table.add_row(["Schema", &generation.to_string()]);
                if !memory.metadata.is_empty() {
                    table.add_row([
                        "Metadata",
                        &serde_json::to_string(&memory.metadata)?,
                    ]);
                }
                table.add_row([
                    "Reads / Writes",
                    &format!("{} / {}", access.total_reads, access.total_writes),
                ]);
                table.add_row([
                    "Last accessed",
                    &access
                        .last_accessed
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
                table.add_row(["Peak hours (UTC)", &format_hours(&access.peak_hours)]);

                println!("{table}");
            }
        }

        Ok(())
    }

    async fn forget(service: &MemoryService, args: &IdArgs, format: OutputFormat) -> CliResult<()> {
        service.forget(&args.id).await?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "id": args.id,
                    "deleted": true,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                println!("Memory {} deleted successfully.", args.id);
            }
        }

        Ok(())
    }

    async fn rescore(
        service: &MemoryService,
        args: &RescoreArgs,
        format: OutputFormat,
    ) -> CliResult<()> {
        let memory = service.rescore(&args.id, args.importance).await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&memory)?);
            }
            OutputFormat::Table => {
                println!(
                    "Memory {} importance set to {:.2}.",
                    memory.id, memory.importance
                );
            }
        }

        Ok(())
    }

    async fn retrieve(
        service: &MemoryService,
        args: &RetrieveArgs,
        format: OutputFormat,
    ) -> CliResult<()> {
        let results = match args.limit {
            Some(limit) => service.retrieve(&args.context, limit).await?,
            None => service.retrieve_default(&args.context).await?,
        };

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
            OutputFormat::Table => {
                if results.is_empty() {
                    println!("No memories qualify.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["#", "ID", "Content", "Importance", "Recency", "Score"]);

                for (rank, result) in results.iter().enumerate() {
                    let id = if result.secure {
                        format!("{} (secure)", result.record.id)
                    } else {
                        truncate_string(&result.record.id, 8)
                    };
                    table.add_row([
                        (rank + 1).to_string(),
                        id,
                        truncate_string(&result.record.content, 50),
                        format!("{:.2}", result.record.importance),
                        format!("{:.3}", result.recency_weight),
                        format!("{:.3}", result.score),
                    ]);
                }

                println!("{table}");
            }
        }

        Ok(())
    }

    async fn search(service: &MemoryService, args: &SearchArgs, format: OutputFormat) -> CliResult<()> {
        let hits = match args.min_score {
            Some(min) => {
                service
                    .search_with_min_score(&args.query, min, args.limit)
                    .await?
            }
            None => service.search(&args.query, args.limit).await?,
        };

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            }
            OutputFormat::Table => {
                if hits.is_empty() {
                    println!("No memories match.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Content", "Importance", "Score"]);

                for hit in &hits {
                    table.add_row([
                        truncate_string(&hit.record.id, 8),
                        truncate_string(&hit.record.content, 50),
                        format!("{:.2}", hit.record.importance),
                        format!("{:.3}", hit.score),
                    ]);
                }

                println!("{table}");
            }
        }

        Ok(())
    }

    async fn usage(service: &MemoryService, args: &UsageArgs, format: OutputFormat) -> CliResult<()> {
        let usage = service.most_accessed(args.limit);

        match format {
            OutputFormat::Json => {
                let output: Vec<_> = usage
                    .iter()
                    .map(|(id, pattern)| serde_json::json!({ "id": id, "access": pattern }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                if usage.is_empty() {
                    println!("No recorded accesses.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Reads", "Writes", "Per day", "Last accessed", "Peak hours"]);

                for (id, pattern) in &usage {
                    table.add_row([
                        truncate_string(id, 8),
                        pattern.total_reads.to_string(),
                        pattern.total_writes.to_string(),
                        format!("{:.2}", pattern.accesses_per_day),
                        pattern
                            .last_accessed
                            .as_ref()
                            .map(format_timestamp)
                            .unwrap_or_else(|| "-".to_string()),
                        format_hours(&pattern.peak_hours),
                    ]);
                }

                println!("{table}");
            }
        }

        Ok(())
    }
}

fn format_hours(hours: &[u32]) -> String {
    if hours.is_empty() {
        return "-".to_string();
    }
    hours
        .iter()
        .map(|h| format!("{h:02}:00"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_tags(memory: &MemoryRecord) -> String {
    if memory.tags.is_empty() {
        "-".to_string()
    } else {
        memory.tags.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

fn parse_time(value: &str) -> CliResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("Invalid time '{value}': {e}").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_accepts_offsets() {
        let parsed = parse_time("2024-06-01T14:00:00+02:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-06-01T12:00:00+00:00");
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_join_tags() {
        let now = Utc::now();
        let bare = MemoryRecord::new("x", 0.5, now);
        assert_eq!(join_tags(&bare), "-");

        let tagged = bare.with_tags(["work", "family"]);
        assert_eq!(join_tags(&tagged), "family, work");
    }

    #[test]
    fn test_format_hours() {
        assert_eq!(format_hours(&[]), "-");
        assert_eq!(format_hours(&[9, 14]), "09:00, 14:00");
    }
}
