//! Error types for Memvault

use thiserror::Error;

/// Main error type for Memvault operations
#[derive(Error, Debug)]
pub enum MemvaultError {
    /// The identifier does not name a live record
    #[error("Memory not found: {0}")]
    NotFound(String),

    /// The backing medium rejected a write, or the write would reuse a tombstoned identifier
    #[error("Write error: {0}")]
    Write(String),

    /// The backing medium could not be read
    #[error("Read error: {0}")]
    Read(String),

    /// A stored record is structurally malformed
    #[error("Schema error: {0}")]
    Schema(String),

    /// Retrieval was asked for a negative number of results
    #[error("Invalid limit: {0} (must be >= 0)")]
    InvalidLimit(i64),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied a record that can never be stored
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MemvaultError {
    /// Whether the caller can reasonably fall back instead of failing outright.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MemvaultError::NotFound(_))
    }

    pub(crate) fn write(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        MemvaultError::Write(format!("{context}: {err}"))
    }

    pub(crate) fn read(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        MemvaultError::Read(format!("{context}: {err}"))
    }
}

/// Result type alias for Memvault operations
pub type Result<T> = std::result::Result<T, MemvaultError>;
