use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MemvaultError, Result};

/// Environment variables that override file configuration
pub const ENV_MAX_MEMORIES: &str = "MEMVAULT_MAX_MEMORIES";
pub const ENV_IMPORTANCE_THRESHOLD: &str = "MEMVAULT_IMPORTANCE_THRESHOLD";
pub const ENV_BACKUP_INTERVAL_SECS: &str = "MEMVAULT_BACKUP_INTERVAL_SECS";
pub const ENV_DATA_DIR: &str = "MEMVAULT_DATA_DIR";

/// Main configuration structure for Memvault
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Where records, the index and backups live
    #[serde(default)]
    pub storage: StorageConfig,
    /// Rotation and retrieval thresholds
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Recency decay used by the retrieval ranker
    #[serde(default)]
    pub ranking: RankingConfig,
    /// Snapshot schedule and retention
    #[serde(default)]
    pub backup: BackupConfig,
    /// Fuzzy content search
    #[serde(default)]
    pub search: SearchConfig,
}

/// Storage location configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for records, index and secure info
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding timestamped snapshots (defaults to `<data_dir>/backups`)
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backup_dir: None,
        }
    }
}

impl StorageConfig {
    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backups"))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".memvault"))
        .unwrap_or_else(|| PathBuf::from(".memvault"))
}

/// Record rotation and retrieval thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Upper bound on live records (secure info excluded)
    #[serde(default = "default_max_memories")]
    pub max_memories: usize,
    /// Minimum importance for a record to be retrieved
    #[serde(default = "default_importance_threshold")]
    pub importance_threshold: f32,
    /// Importance assigned when `remember` is called without one
    #[serde(default = "default_importance")]
    pub default_importance: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memories: default_max_memories(),
            importance_threshold: default_importance_threshold(),
            default_importance: default_importance(),
        }
    }
}

fn default_max_memories() -> usize {
    1000
}

fn default_importance_threshold() -> f32 {
    0.2
}

fn default_importance() -> f32 {
    0.5
}

/// Recency decay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Age at which a record's recency weight halves, in hours
    #[serde(default = "default_half_life_hours")]
    pub half_life_hours: f64,
    /// Result count used when a caller does not pass one
    #[serde(default = "default_retrieval_limit")]
    pub default_limit: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            half_life_hours: default_half_life_hours(),
            default_limit: default_retrieval_limit(),
        }
    }
}

impl RankingConfig {
    pub fn half_life(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.half_life_hours * 3_600_000.0) as i64)
    }
}

fn default_half_life_hours() -> f64 {
    168.0
}

fn default_retrieval_limit() -> usize {
    5
}

/// Snapshot schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Run the periodic snapshot task in the daemon
    #[serde(default = "default_backup_enabled")]
    pub enabled: bool,
    /// Seconds between snapshots
    #[serde(default = "default_backup_interval_secs")]
    pub interval_secs: u64,
    /// Number of snapshots to keep
    #[serde(default = "default_backup_retain")]
    pub retain: usize,
    /// Gzip record bodies inside snapshots
    #[serde(default)]
    pub compress: bool,
    /// Gzip level, 0 (store) to 9 (smallest)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: default_backup_enabled(),
            interval_secs: default_backup_interval_secs(),
            retain: default_backup_retain(),
            compress: false,
            compression_level: default_compression_level(),
        }
    }
}

impl BackupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_backup_enabled() -> bool {
    true
}

fn default_backup_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_backup_retain() -> usize {
    5
}

fn default_compression_level() -> u32 {
    6
}

/// Fuzzy search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Minimum match score in [0, 1] for a memory to be returned
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Result count used when a caller does not pass one
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            default_limit: default_search_limit(),
        }
    }
}

fn default_min_score() -> f32 {
    0.6
}

fn default_search_limit() -> usize {
    10
}

impl Config {
    /// Load configuration from an explicit path, or from the first default
    /// location that exists, then apply environment overrides and validate.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => {
                tracing::info!("Loading config from: {}", path.display());
                Self::from_file(path)?
            }
            None => match Self::default_paths().into_iter().find(|p| p.exists()) {
                Some(path) => {
                    tracing::info!("Loading config from: {}", path.display());
                    Self::from_file(&path)?
                }
                None => {
                    tracing::info!("No config file found, using defaults");
                    Config::default()
                }
            },
        };

        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_paths() -> Vec<PathBuf> {
        [
            dirs::home_dir().map(|h| h.join(".memvault").join("config.toml")),
            dirs::config_dir().map(|c| c.join("memvault").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MemvaultError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| MemvaultError::Config(format!("Failed to parse config: {e}")))
    }

    /// Apply `MEMVAULT_*` overrides from the given variables.
    ///
    /// Unparsable values are an error; they are never ignored or clamped.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                ENV_MAX_MEMORIES => {
                    self.memory.max_memories = parse_env(&key, &value)?;
                }
                ENV_IMPORTANCE_THRESHOLD => {
                    self.memory.importance_threshold = parse_env(&key, &value)?;
                }
                ENV_BACKUP_INTERVAL_SECS => {
                    self.backup.interval_secs = parse_env(&key, &value)?;
                }
                ENV_DATA_DIR => {
                    self.storage.data_dir = PathBuf::from(value);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Reject values outside their documented ranges.
    pub fn validate(&self) -> Result<()> {
        if self.memory.max_memories == 0 {
            return Err(MemvaultError::Config(
                "memory.max_memories must be greater than 0".to_string(),
            ));
        }
        check_unit_interval("memory.importance_threshold", self.memory.importance_threshold)?;
        check_unit_interval("memory.default_importance", self.memory.default_importance)?;

        if self.backup.interval_secs == 0 {
            return Err(MemvaultError::Config(
                "backup.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.backup.retain == 0 {
            return Err(MemvaultError::Config(
                "backup.retain must be greater than 0".to_string(),
            ));
        }
        if self.backup.compression_level > 9 {
            return Err(MemvaultError::Config(format!(
                "backup.compression_level must be between 0 and 9, got {}",
                self.backup.compression_level
            )));
        }

        check_unit_interval("search.min_score", self.search.min_score)?;
        if self.search.default_limit == 0 {
            return Err(MemvaultError::Config(
                "search.default_limit must be greater than 0".to_string(),
            ));
        }

        let half_life = self.ranking.half_life_hours;
        if !half_life.is_finite() || half_life <= 0.0 {
            return Err(MemvaultError::Config(format!(
                "ranking.half_life_hours must be a positive number, got {half_life}"
            )));
        }
        if self.ranking.default_limit == 0 {
            return Err(MemvaultError::Config(
                "ranking.default_limit must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| MemvaultError::Config(format!("Invalid value for {key} ({value:?}): {e}")))
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(MemvaultError::Config(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}
