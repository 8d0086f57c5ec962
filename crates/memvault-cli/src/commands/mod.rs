pub mod backup;
pub mod config;
pub mod index;
pub mod memory;
pub mod secure;
pub mod stats;
pub mod upgrade;

pub use backup::BackupCommand;
pub use config::ConfigCommand;
pub use index::IndexCommand;
pub use memory::MemoryCommand;
pub use secure::SecureCommand;
pub use stats::StatsCommand;
pub use upgrade::UpgradeCommand;
