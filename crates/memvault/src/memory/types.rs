//! Memory types for the Memvault system
//!
//! Defines the normalized in-memory record shape and the input type used by
//! `remember`, plus identifier rules shared by the store and the service.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{MemvaultError, Result};

/// Fixed identifier of the secure info singleton
pub const SECURE_INFO_ID: &str = "secure_info";

/// Kind assigned when none is given
pub const DEFAULT_KIND: &str = "general";

const MAX_ID_LEN: usize = 128;

/// A single memory unit, always in the current schema shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier, stable across rewrites
    pub id: String,
    /// The text body of the memory
    pub content: String,
    /// When this memory was created (immutable)
    pub created_at: DateTime<Utc>,
    /// Retrieval priority in [0, 1]
    pub importance: f32,
    /// Free-form labels
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Classification, e.g. "general" or "personal_info"
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Where this memory came from
    #[serde(default)]
    pub source: Option<String>,
    /// Caller-defined extra fields
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_kind() -> String {
    DEFAULT_KIND.to_string()
}

impl MemoryRecord {
    /// Create a record with a fresh identifier
    pub fn new(content: impl Into<String>, importance: f32, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            created_at,
            importance,
            tags: BTreeSet::new(),
            kind: default_kind(),
            source: None,
            metadata: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Check the record can be persisted as-is.
    pub fn validate(&self) -> Result<()> {
        validate_id(&self.id)?;
        validate_importance(self.importance)?;
        if self.content.trim().is_empty() {
            return Err(MemvaultError::InvalidRecord(format!(
                "memory {} has empty content",
                self.id
            )));
        }
        Ok(())
    }
}

/// Input for `MemoryService::remember_with`
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub content: String,
    pub importance: Option<f32>,
    pub tags: BTreeSet<String>,
    pub kind: Option<String>,
    pub source: Option<String>,
    pub metadata: Map<String, Value>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Identifiers double as file names, so they are restricted to a safe alphabet.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(MemvaultError::InvalidRecord(format!(
            "identifier must be 1..={MAX_ID_LEN} bytes, got {}",
            id.len()
        )));
    }
    if id.starts_with('.') {
        return Err(MemvaultError::InvalidRecord(format!(
            "identifier {id:?} must not start with '.'"
        )));
    }
    if id == SECURE_INFO_ID {
        return Err(MemvaultError::InvalidRecord(format!(
            "identifier {id:?} is reserved"
        )));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(MemvaultError::InvalidRecord(format!(
            "identifier {id:?} contains illegal character {c:?}"
        )));
    }
    Ok(())
}

pub fn validate_importance(importance: f32) -> Result<()> {
    if importance.is_finite() && (0.0..=1.0).contains(&importance) {
        Ok(())
    } else {
        Err(MemvaultError::InvalidRecord(format!(
            "importance must be within [0, 1], got {importance}"
        )))
    }
}
