pub mod commands;
pub mod error;
pub mod output;

pub use commands::{
    BackupCommand, ConfigCommand, IndexCommand, MemoryCommand, SecureCommand, StatsCommand,
    UpgradeCommand,
};
pub use error::{CliError, CliResult};
pub use output::{OutputFormat, format_size, format_timestamp, truncate_string};
