use std::path::Path;

use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use memvault::config::Config;

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct ConfigCommand {
    #[clap(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    #[clap(about = "Show the effective configuration")]
    Show,

    #[clap(about = "Check the configuration file and environment overrides")]
    Validate,
}

impl ConfigCommand {
    pub async fn execute(
        &self,
        config_path: Option<&Path>,
        data_dir: Option<&Path>,
        format: OutputFormat,
    ) -> CliResult<()> {
        let mut config = Config::load(config_path)?;
        if let Some(data_dir) = data_dir {
            config.storage.data_dir = data_dir.to_path_buf();
        }

        match &self.command {
            ConfigSubcommand::Show => Self::show(&config, config_path, format),
            ConfigSubcommand::Validate => Self::validate(&config, format),
        }
    }

    fn show(config: &Config, config_path: Option<&Path>, format: OutputFormat) -> CliResult<()> {
        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(config)?);
            }
            OutputFormat::Table => {
                match config_path {
                    Some(path) => println!("Configuration from: {}", path.display()),
                    None => println!("Configuration: (defaults, config search path and environment)"),
                }
                println!("==============================\n");

                for (section, rows) in sections(config) {
                    println!("[{section}]");
                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL_CONDENSED)
                        .set_content_arrangement(ContentArrangement::Dynamic)
                        .set_header(["Setting", "Value"]);
                    for (setting, value) in rows {
                        table.add_row([setting.to_string(), value]);
                    }
                    println!("{table}\n");
                }
            }
        }

        Ok(())
    }

    fn validate(config: &Config, format: OutputFormat) -> CliResult<()> {
        config.validate()?;

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({ "valid": true });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => println!("Configuration is valid."),
        }

        Ok(())
    }
}

fn sections(config: &Config) -> Vec<(&'static str, Vec<(&'static str, String)>)> {
    vec![
        (
            "Storage",
            vec![
                ("data_dir", config.storage.data_dir.display().to_string()),
                ("backup_dir", config.storage.backup_dir().display().to_string()),
            ],
        ),
        (
            "Memory",
            vec![
                ("max_memories", config.memory.max_memories.to_string()),
                (
                    "importance_threshold",
                    config.memory.importance_threshold.to_string(),
                ),
                (
                    "default_importance",
                    config.memory.default_importance.to_string(),
                ),
            ],
        ),
        (
            "Ranking",
            vec![
                ("half_life_hours", config.ranking.half_life_hours.to_string()),
                ("default_limit", config.ranking.default_limit.to_string()),
            ],
        ),
        (
            "Backup",
            vec![
                ("enabled", config.backup.enabled.to_string()),
                ("interval_secs", config.backup.interval_secs.to_string()),
                ("retain", config.backup.retain.to_string()),
                ("compress", config.backup.compress.to_string()),
                ("compression_level", config.backup.compression_level.to_string()),
            ],
        ),
        (
            "Search",
            vec![
                ("min_score", config.search.min_score.to_string()),
                ("default_limit", config.search.default_limit.to_string()),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_cover_every_setting() {
        let config = Config::default();
        let count: usize = sections(&config).iter().map(|(_, rows)| rows.len()).sum();
        assert_eq!(count, 14);
    }

    #[test]
    fn test_backup_dir_defaults_under_data_dir() {
        let mut config = Config::default();
        config.storage.data_dir = "/srv/vault".into();
        let storage = &sections(&config)[0].1;
        assert_eq!(storage[1].1, Path::new("/srv/vault").join("backups").display().to_string());
    }
}
