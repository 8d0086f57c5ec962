//! Summary index over the record store
//!
//! The index maps every live identifier to the fields needed for ranking,
//! listing and rotation, so none of those have to load record bodies. The
//! in-memory map is copy-on-write: readers take a cheap `Arc` clone of the
//! current map and are never exposed to a half-applied rebuild.
//!
//! The map is persisted to `index.json` after every update.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemvaultError, Result};
use crate::memory::types::MemoryRecord;
use crate::storage::layout::{read_optional, write_atomic};

const INDEX_FORMAT_VERSION: u32 = 1;

pub type IndexMap = BTreeMap<String, IndexEntry>;

/// Denormalized projection of a [`MemoryRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub importance: f32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub kind: String,
}

impl From<&MemoryRecord> for IndexEntry {
    fn from(record: &MemoryRecord) -> Self {
        Self {
            id: record.id.clone(),
            created_at: record.created_at,
            importance: record.importance,
            tags: record.tags.clone(),
            kind: record.kind.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct IndexArtifact {
    version: u32,
    entries: Vec<IndexEntry>,
}

/// Differences between the maintained index and a fresh rebuild
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexDrift {
    /// Present on disk but absent from the index
    pub missing: Vec<String>,
    /// Present in the index but no longer on disk
    pub stale: Vec<String>,
    /// Present in both with different summary fields
    pub mismatched: Vec<String>,
}

impl IndexDrift {
    pub fn between(maintained: &IndexMap, rebuilt: &IndexMap) -> Self {
        let missing = rebuilt
            .keys()
            .filter(|id| !maintained.contains_key(*id))
            .cloned()
            .collect();
        let stale = maintained
            .keys()
            .filter(|id| !rebuilt.contains_key(*id))
            .cloned()
            .collect();
        let mismatched = maintained
            .iter()
            .filter(|(id, entry)| rebuilt.get(*id).is_some_and(|other| other != *entry))
            .map(|(id, _)| id.clone())
            .collect();

        Self {
            missing,
            stale,
            mismatched,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.stale.is_empty() && self.mismatched.is_empty()
    }
}

/// Copy-on-write index with a persisted artifact
#[derive(Debug)]
pub struct MemoryIndex {
    path: PathBuf,
    entries: RwLock<Arc<IndexMap>>,
}

impl MemoryIndex {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: RwLock::new(Arc::new(IndexMap::new())),
        }
    }

    /// Read the persisted artifact.
    ///
    /// Returns `None` when the artifact is absent or cannot be parsed; the
    /// caller is expected to rebuild in that case.
    pub async fn read_artifact(&self) -> Result<Option<IndexMap>> {
        let Some(bytes) = read_optional(&self.path).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<IndexArtifact>(&bytes) {
            Ok(artifact) if artifact.version == INDEX_FORMAT_VERSION => Ok(Some(
                artifact
                    .entries
                    .into_iter()
                    .map(|e| (e.id.clone(), e))
                    .collect(),
            )),
            Ok(artifact) => {
                tracing::warn!(
                    "Ignoring index artifact with unsupported version {}",
                    artifact.version
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("Ignoring unparsable index artifact {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    /// The current map. Later updates do not affect the returned value.
    pub fn snapshot(&self) -> Arc<IndexMap> {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Swap in a fully built map.
    pub fn install(&self, map: IndexMap) {
        *self.entries.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(map);
    }

    pub fn upsert(&self, entry: IndexEntry) -> Option<IndexEntry> {
        let mut guard = self.entries.write().unwrap_or_else(|p| p.into_inner());
        Arc::make_mut(&mut *guard).insert(entry.id.clone(), entry)
    }

    pub fn remove(&self, id: &str) -> Option<IndexEntry> {
        let mut guard = self.entries.write().unwrap_or_else(|p| p.into_inner());
        if !guard.contains_key(id) {
            return None;
        }
        Arc::make_mut(&mut *guard).remove(id)
    }

    pub fn get(&self, id: &str) -> Option<IndexEntry> {
        self.snapshot().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Highest importance first; ties broken by identifier.
    pub fn top_by_importance(&self, n: usize) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = self.snapshot().values().cloned().collect();
        entries.sort_by(|a, b| {
            b.importance
                .total_cmp(&a.importance)
                .then_with(|| a.id.cmp(&b.id))
        });
        entries.truncate(n);
        entries
    }

    /// Newest first; ties broken by identifier.
    pub fn top_by_recency(&self, n: usize) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = self.snapshot().values().cloned().collect();
        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        entries.truncate(n);
        entries
    }

    /// Write the current map to the artifact.
    pub async fn persist(&self) -> Result<()> {
        let snapshot = self.snapshot();
        let bytes = encode_artifact(&snapshot)?;
        write_atomic(&self.path, &bytes).await
    }
}

/// Serialize a map in the artifact format shared by the store and snapshots.
pub fn encode_artifact(map: &IndexMap) -> Result<Vec<u8>> {
    let artifact = IndexArtifact {
        version: INDEX_FORMAT_VERSION,
        entries: map.values().cloned().collect(),
    };
    serde_json::to_vec_pretty(&artifact)
        .map_err(|e| MemvaultError::Serialization(format!("index: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn entry(id: &str, importance: f32, hours_ago: i64) -> IndexEntry {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        IndexEntry {
            id: id.to_string(),
            created_at: base - Duration::hours(hours_ago),
            importance,
            tags: BTreeSet::new(),
            kind: "general".to_string(),
        }
    }

    #[test]
    fn test_top_by_importance_orders_and_breaks_ties_by_id() {
        let index = MemoryIndex::new(PathBuf::from("unused"));
        index.upsert(entry("c", 0.5, 1));
        index.upsert(entry("a", 0.5, 2));
        index.upsert(entry("b", 0.9, 3));
        index.upsert(entry("d", 0.1, 4));

        let ids: Vec<_> = index
            .top_by_importance(3)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_top_by_recency_orders_and_breaks_ties_by_id() {
        let index = MemoryIndex::new(PathBuf::from("unused"));
        index.upsert(entry("old", 0.9, 48));
        index.upsert(entry("y", 0.1, 1));
        index.upsert(entry("x", 0.2, 1));

        let ids: Vec<_> = index
            .top_by_recency(10)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["x", "y", "old"]);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_updates() {
        let index = MemoryIndex::new(PathBuf::from("unused"));
        index.upsert(entry("a", 0.5, 1));

        let before = index.snapshot();
        index.upsert(entry("b", 0.5, 1));
        index.remove("a");

        assert_eq!(before.len(), 1);
        assert!(before.contains_key("a"));
        assert_eq!(index.len(), 1);
        assert!(index.contains("b"));
    }

    #[test]
    fn test_remove_missing_is_none() {
        let index = MemoryIndex::new(PathBuf::from("unused"));
        assert!(index.remove("ghost").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_drift_detection() {
        let mut maintained = IndexMap::new();
        let mut rebuilt = IndexMap::new();

        maintained.insert("same".into(), entry("same", 0.5, 1));
        rebuilt.insert("same".into(), entry("same", 0.5, 1));
        maintained.insert("stale".into(), entry("stale", 0.5, 1));
        rebuilt.insert("missing".into(), entry("missing", 0.5, 1));
        maintained.insert("changed".into(), entry("changed", 0.5, 1));
        rebuilt.insert("changed".into(), entry("changed", 0.7, 1));

        let drift = IndexDrift::between(&maintained, &rebuilt);
        assert_eq!(drift.missing, vec!["missing"]);
        assert_eq!(drift.stale, vec!["stale"]);
        assert_eq!(drift.mismatched, vec!["changed"]);
        assert!(!drift.is_clean());

        assert!(IndexDrift::between(&rebuilt, &rebuilt).is_clean());
    }

    #[tokio::test]
    async fn test_persist_and_read_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let index = MemoryIndex::new(dir.path().join("index.json"));
        assert!(index.read_artifact().await.unwrap().is_none());

        index.upsert(entry("a", 0.4, 1));
        index.upsert(entry("b", 0.8, 2));
        index.persist().await.unwrap();

        let loaded = index.read_artifact().await.unwrap().unwrap();
        assert_eq!(loaded, *index.snapshot());
    }

    #[tokio::test]
    async fn test_corrupt_artifact_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        tokio::fs::write(&path, b"not an index").await.unwrap();

        let index = MemoryIndex::new(path);
        assert!(index.read_artifact().await.unwrap().is_none());
    }
}
