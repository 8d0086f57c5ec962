//! Tombstones for deleted records
//!
//! A tombstone is written for every identifier that leaves the store, whether
//! it was evicted by rotation or explicitly forgotten. Tombstones are never
//! removed, which keeps a deleted identifier from ever naming a new record.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemvaultError, Result};
use crate::storage::index::IndexEntry;
use crate::storage::layout::{read_optional, write_atomic};

/// Why a record left the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TombstoneReason {
    /// Removed by rotation to stay within `max_memories`
    Evicted,
    /// Removed by an explicit `forget`/`delete`
    Forgotten,
}

/// A permanent marker for a deleted identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: String,
    pub deleted_at: DateTime<Utc>,
    pub reason: TombstoneReason,
    /// Importance of the record at the time it was deleted
    pub importance: f32,
    /// Creation time of the deleted record
    pub created_at: DateTime<Utc>,
}

impl Tombstone {
    pub fn new(entry: &IndexEntry, reason: TombstoneReason, deleted_at: DateTime<Utc>) -> Self {
        Self {
            id: entry.id.clone(),
            deleted_at,
            reason,
            importance: entry.importance,
            created_at: entry.created_at,
        }
    }
}

impl fmt::Display for Tombstone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason_str = match self.reason {
            TombstoneReason::Evicted => "evicted to stay within capacity",
            TombstoneReason::Forgotten => "forgotten on request",
        };

        write!(
            f,
            "{} (importance {:.2}, created {}) was {} on {}",
            self.id,
            self.importance,
            self.created_at.format("%B %Y"),
            reason_str,
            self.deleted_at.format("%Y-%m-%d")
        )
    }
}

/// The persisted set of tombstones for one store
#[derive(Debug)]
pub struct TombstoneLog {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Tombstone>>,
}

impl TombstoneLog {
    /// Load the log at `path`; a missing file is an empty log.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let entries = match read_optional(&path).await? {
            Some(bytes) => {
                let list: Vec<Tombstone> = serde_json::from_slice(&bytes).map_err(|e| {
                    MemvaultError::Schema(format!("{} is malformed: {e}", path.display()))
                })?;
                list.into_iter().map(|t| (t.id.clone(), t)).collect()
            }
            None => BTreeMap::new(),
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Tombstone> {
        self.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All tombstones, oldest deletion first
    pub fn list(&self) -> Vec<Tombstone> {
        let mut list: Vec<Tombstone> = self.read().values().cloned().collect();
        list.sort_by(|a, b| a.deleted_at.cmp(&b.deleted_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    /// Record a tombstone in memory and persist the whole log. The in-memory
    /// insert is undone if persisting fails.
    pub(crate) async fn append(&self, tombstone: Tombstone) -> Result<()> {
        let id = tombstone.id.clone();
        self.write().insert(id.clone(), tombstone);
        if let Err(e) = self.persist().await {
            self.write().remove(&id);
            return Err(e);
        }
        Ok(())
    }

    /// Undo an `append` whose surrounding operation failed.
    pub(crate) async fn revoke(&self, id: &str) -> Result<()> {
        self.write().remove(id);
        self.persist().await
    }

    pub(crate) async fn persist(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.list())
            .map_err(|e| MemvaultError::Serialization(format!("tombstones: {e}")))?;
        write_atomic(&self.path, &bytes).await
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Tombstone>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Tombstone>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn entry(id: &str) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            importance: 0.3,
            tags: BTreeSet::new(),
            kind: "general".to_string(),
        }
    }

    #[test]
    fn test_tombstone_display() {
        let deleted_at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let tombstone = Tombstone::new(&entry("abc"), TombstoneReason::Evicted, deleted_at);

        assert_eq!(
            tombstone.to_string(),
            "abc (importance 0.30, created January 2024) was evicted to stay within capacity on 2024-03-01"
        );
    }

    #[test]
    fn test_tombstone_serialization() {
        let tombstone = Tombstone::new(&entry("abc"), TombstoneReason::Forgotten, Utc::now());
        let json = serde_json::to_string(&tombstone).unwrap();
        assert!(json.contains("\"Forgotten\""));

        let back: Tombstone = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tombstone);
    }

    #[tokio::test]
    async fn test_log_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tombstones.json");

        let log = TombstoneLog::load(path.clone()).await.unwrap();
        assert!(log.is_empty());

        log.append(Tombstone::new(&entry("a"), TombstoneReason::Evicted, Utc::now()))
            .await
            .unwrap();
        log.append(Tombstone::new(&entry("b"), TombstoneReason::Forgotten, Utc::now()))
            .await
            .unwrap();

        let reloaded = TombstoneLog::load(path).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("a"));
        assert_eq!(reloaded.get("b").unwrap().reason, TombstoneReason::Forgotten);
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_log_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("tombstones.json");

        let log = TombstoneLog::load(path).await.unwrap();
        let result = log
            .append(Tombstone::new(&entry("a"), TombstoneReason::Evicted, Utc::now()))
            .await;

        assert!(matches!(result, Err(MemvaultError::Write(_))));
        assert!(!log.contains("a"));
    }

    #[tokio::test]
    async fn test_malformed_log_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tombstones.json");
        tokio::fs::write(&path, b"{oops").await.unwrap();

        assert!(matches!(
            TombstoneLog::load(path).await,
            Err(MemvaultError::Schema(_))
        ));
    }
}
