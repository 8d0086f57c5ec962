//! The secure info singleton
//!
//! Secure info holds durable personal facts. It lives beside the record
//! store (`secure_info.json`), is never rotated or evicted, and is placed
//! ahead of every other result at retrieval time.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::clock::SharedClock;
use crate::error::{MemvaultError, Result};
use crate::memory::types::{MemoryRecord, SECURE_INFO_ID};
use crate::storage::RecordStore;
use crate::storage::layout::{read_optional, write_atomic};

/// Kind reported when secure info is surfaced as a record
pub const SECURE_INFO_KIND: &str = "secure_info";

const DEFAULT_SECTION: &str = "personal";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecureInfoRecord {
    pub id: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

impl Default for SecureInfoRecord {
    fn default() -> Self {
        Self {
            id: SECURE_INFO_ID.to_string(),
            content: String::new(),
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl SecureInfoRecord {
    /// True when there is nothing worth surfacing
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// Split the content into named sections of facts.
    ///
    /// A line ending in `:` opens a section; numbered (`1.`, `2)`) and
    /// bulleted (`-`, `*`) lines are facts. Facts before any heading land in
    /// the `personal` section. Other lines are ignored.
    pub fn facts(&self) -> BTreeMap<String, Vec<String>> {
        let mut sections: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut current = DEFAULT_SECTION.to_string();

        for line in self.content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(heading) = line.strip_suffix(':') {
                current = heading.trim().to_lowercase();
                continue;
            }
            if let Some(fact) = strip_list_marker(line) {
                sections.entry(current.clone()).or_default().push(fact.to_string());
            }
        }

        sections
    }

    /// View as an ordinary record for retrieval results.
    pub fn to_memory_record(&self) -> MemoryRecord {
        MemoryRecord::new(self.content.clone(), 1.0, self.updated_at)
            .with_id(SECURE_INFO_ID)
            .with_kind(SECURE_INFO_KIND)
    }
}

fn strip_list_marker(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Some(rest.trim()).filter(|s| !s.is_empty());
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    let rest = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))?;
    Some(rest.trim()).filter(|s| !s.is_empty())
}

/// Reads and writes the singleton under the store's commit lock
pub struct SecureInfoStore {
    path: PathBuf,
    commit: Arc<RwLock<()>>,
    clock: SharedClock,
}

impl SecureInfoStore {
    pub fn new(store: &RecordStore) -> Self {
        Self {
            path: store.layout().secure_info_path(),
            commit: store.commit_lock(),
            clock: Arc::clone(store.clock()),
        }
    }

    /// The current secure info, or the default if none has been written
    pub async fn read(&self) -> Result<SecureInfoRecord> {
        let _guard = self.commit.read().await;
        self.read_unlocked().await
    }

    /// Replace the content. The timestamp strictly increases on every write
    /// even if the clock has not moved.
    pub async fn write(&self, content: impl Into<String>) -> Result<SecureInfoRecord> {
        let _guard = self.commit.write().await;

        let previous = self.read_unlocked().await?;
        let now = self.clock.now();
        let updated_at = if now > previous.updated_at {
            now
        } else {
            previous.updated_at + Duration::microseconds(1)
        };

        let record = SecureInfoRecord {
            id: SECURE_INFO_ID.to_string(),
            content: content.into(),
            updated_at,
        };
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| MemvaultError::Serialization(format!("secure info: {e}")))?;
        write_atomic(&self.path, &bytes).await?;

        tracing::info!("Updated secure info ({} bytes)", record.content.len());
        Ok(record)
    }

    pub(crate) async fn read_unlocked(&self) -> Result<SecureInfoRecord> {
        let Some(bytes) = read_optional(&self.path).await? else {
            return Ok(SecureInfoRecord::default());
        };

        let record: SecureInfoRecord = serde_json::from_slice(&bytes)
            .map_err(|e| MemvaultError::Schema(format!("secure info is malformed: {e}")))?;
        if record.id != SECURE_INFO_ID {
            return Err(MemvaultError::Schema(format!(
                "secure info carries identifier {}",
                record.id
            )));
        }
        Ok(record)
    }
}
