//! File-per-record store
//!
//! Each live record is one JSON unit under `records/<id>.json`, written
//! atomically. A commit lock serializes writers against each other and
//! against readers, so a record file and its index entry always change
//! together: writers hold the write guard across the file operation and the
//! index update, readers hold a read guard and never block one another.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_stream::wrappers::ReadDirStream;

use crate::clock::{SharedClock, system_clock};
use crate::error::{MemvaultError, Result};
use crate::memory::schema::{self, RawRecord, SchemaGeneration};
use crate::memory::types::{MemoryRecord, validate_id};
use crate::storage::eviction::Evictor;
use crate::storage::index::{IndexDrift, IndexEntry, IndexMap, MemoryIndex};
use crate::storage::layout::{StoreLayout, read_optional, record_id_from_file_name, write_atomic};
use crate::storage::tombstone::{Tombstone, TombstoneLog, TombstoneReason};

/// How `put` treats an identifier that is already live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Fail if the identifier is live
    Insert,
    /// Replace a live record, keeping its identifier and creation time
    Update,
}

/// Options for opening a [`RecordStore`]
#[derive(Clone)]
pub struct StoreOptions {
    /// Rotation bound; `None` disables eviction
    pub max_memories: Option<usize>,
    pub clock: SharedClock,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_memories: None,
            clock: system_clock(),
        }
    }
}

impl StoreOptions {
    pub fn with_max_memories(mut self, max_memories: usize) -> Self {
        self.max_memories = Some(max_memories);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }
}

/// Result of a successful `put`
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub id: String,
    /// Records removed by rotation as a consequence of this put
    pub evicted: Vec<Tombstone>,
    /// Rotation failed and the store holds more than `max_memories` live
    /// records until the next successful rotation
    pub over_capacity: bool,
}

/// Every record on disk, normalized, plus those that failed to load
#[derive(Debug, Default)]
pub struct StoreScan {
    pub records: Vec<(SchemaGeneration, MemoryRecord)>,
    pub failures: Vec<(String, MemvaultError)>,
}

impl StoreScan {
    pub fn index_map(&self) -> IndexMap {
        self.records
            .iter()
            .map(|(_, record)| (record.id.clone(), IndexEntry::from(record)))
            .collect()
    }
}

/// A consistent read of the store
///
/// While a view is alive no writer can commit, so every identifier in
/// [`StoreView::entries`] names a record file that loads.
pub struct StoreView<'a> {
    store: &'a RecordStore,
    entries: Arc<IndexMap>,
    _guard: RwLockReadGuard<'a, ()>,
}

impl StoreView<'_> {
    pub fn entries(&self) -> &IndexMap {
        &self.entries
    }

    pub async fn get(&self, id: &str) -> Result<MemoryRecord> {
        self.store.load_unlocked(id).await
    }
}

pub struct RecordStore {
    layout: StoreLayout,
    index: MemoryIndex,
    tombstones: TombstoneLog,
    commit: Arc<RwLock<()>>,
    evictor: Option<Evictor>,
    clock: SharedClock,
}

impl RecordStore {
    /// Open (creating if needed) the store rooted at `root`.
    ///
    /// The persisted index is trusted only if it names exactly the record
    /// files present; otherwise it is rebuilt from the files.
    pub async fn open(root: impl Into<std::path::PathBuf>, options: StoreOptions) -> Result<Self> {
        let layout = StoreLayout::new(root);
        layout.ensure().await?;

        match tokio::fs::remove_dir_all(layout.staging_dir()).await {
            Ok(()) => tracing::debug!("Removed leftover snapshot staging directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(MemvaultError::write(layout.staging_dir().display(), e)),
        }

        let tombstones = TombstoneLog::load(layout.tombstones_path()).await?;
        let index = MemoryIndex::new(layout.index_path());

        let store = Self {
            layout,
            index,
            tombstones,
            commit: Arc::new(RwLock::new(())),
            evictor: options.max_memories.map(Evictor::new),
            clock: options.clock,
        };

        let on_disk: BTreeSet<String> = store.list_ids().await?.try_collect().await?;
        match store.index.read_artifact().await? {
            Some(map) if map.keys().eq(on_disk.iter()) => {
                tracing::debug!("Loaded index with {} entries", map.len());
                store.index.install(map);
            }
            Some(_) => {
                tracing::info!("Index does not match record files, rebuilding");
                store.rebuild_index().await?;
            }
            None => {
                tracing::info!("No usable index found, rebuilding");
                store.rebuild_index().await?;
            }
        }

        let evicted = store.rotate().await?;
        if !evicted.is_empty() {
            tracing::info!("Evicted {} records on open to honor max_memories", evicted.len());
        }

        Ok(store)
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn index(&self) -> &MemoryIndex {
        &self.index
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn max_memories(&self) -> Option<usize> {
        self.evictor.map(|e| e.max_memories())
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub(crate) fn commit_lock(&self) -> Arc<RwLock<()>> {
        Arc::clone(&self.commit)
    }

    pub(crate) async fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.commit.read().await
    }

    pub(crate) async fn write_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.commit.write().await
    }

    /// Persist a record.
    ///
    /// `Insert` refuses a live identifier; `Update` requires one and keeps
    /// its creation time. Tombstoned identifiers are always refused. When a
    /// rotation bound is set, the lowest-priority records beyond it are
    /// evicted before returning.
    pub async fn put(&self, mut record: MemoryRecord, mode: PutMode) -> Result<PutOutcome> {
        record.validate()?;

        let _guard = self.write_guard().await;

        if self.tombstones.contains(&record.id) {
            return Err(MemvaultError::Write(format!(
                "identifier {} belongs to a deleted record and cannot be reused",
                record.id
            )));
        }

        let path = self.layout.record_path(&record.id);
        let previous = read_optional(&path).await?;

        match (mode, previous.as_deref()) {
            (PutMode::Insert, Some(_)) => {
                return Err(MemvaultError::Write(format!(
                    "memory {} already exists",
                    record.id
                )));
            }
            (PutMode::Update, None) => return Err(MemvaultError::NotFound(record.id)),
            (PutMode::Update, Some(bytes)) => {
                let existing = schema::normalize(RawRecord::decode(&record.id, bytes)?)?;
                record.created_at = existing.created_at;
            }
            (PutMode::Insert, None) => {}
        }

        self.commit_record(&record, previous).await?;
        tracing::debug!(id = %record.id, ?mode, "Stored memory");

        let (evicted, over_capacity) = match self.rotate_locked().await {
            Ok(evicted) => (evicted, false),
            Err(e) => {
                tracing::warn!("Rotation after storing {} failed: {}", record.id, e);
                let over = self
                    .evictor
                    .is_some_and(|evictor| self.index.len() > evictor.max_memories());
                (Vec::new(), over)
            }
        };

        Ok(PutOutcome {
            id: record.id,
            evicted,
            over_capacity,
        })
    }

    /// Hold the read guard and take the index it protects.
    pub async fn view(&self) -> StoreView<'_> {
        let guard = self.read_guard().await;
        StoreView {
            store: self,
            entries: self.index.snapshot(),
            _guard: guard,
        }
    }

    /// Load and normalize a record.
    pub async fn get(&self, id: &str) -> Result<MemoryRecord> {
        let _guard = self.read_guard().await;
        self.load_unlocked(id).await
    }

    /// Which schema generation the unit for `id` is stored in
    pub async fn generation(&self, id: &str) -> Result<SchemaGeneration> {
        let _guard = self.read_guard().await;
        Ok(self.load_raw_unlocked(id).await?.generation())
    }

    /// Delete a record, leaving a tombstone. Returns whether anything was
    /// deleted; missing and already-deleted identifiers are a no-op.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_guard().await;
        Ok(self
            .remove_locked(id, TombstoneReason::Forgotten)
            .await?
            .is_some())
    }

    /// Lazily stream the identifiers of every record file. Order is
    /// unspecified.
    pub async fn list_ids(&self) -> Result<BoxStream<'static, Result<String>>> {
        let dir = self.layout.records_dir();
        let read_dir = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| MemvaultError::read(dir.display(), e))?;

        let stream = ReadDirStream::new(read_dir).filter_map(|entry| async move {
            match entry {
                Ok(entry) => {
                    let name = entry.file_name();
                    let id = record_id_from_file_name(name.to_str()?)?;
                    Some(Ok(id.to_string()))
                }
                Err(e) => Some(Err(MemvaultError::read("records directory", e))),
            }
        });

        Ok(stream.boxed())
    }

    /// Normalize a decoded unit and insert it.
    pub async fn import(&self, raw: RawRecord) -> Result<PutOutcome> {
        let record = schema::normalize(raw)?;
        self.put(record, PutMode::Insert).await
    }

    /// Rewrite every legacy-generation unit in the current format.
    ///
    /// Units that fail to normalize are left untouched. Returns how many
    /// units were rewritten.
    pub async fn upgrade_legacy(&self) -> Result<usize> {
        let _guard = self.write_guard().await;

        let ids: Vec<String> = self.list_ids().await?.try_collect().await?;
        let mut upgraded = 0;
        for id in ids {
            let raw = match self.load_raw_unlocked(&id).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("Skipping {} during upgrade: {}", id, e);
                    continue;
                }
            };
            if raw.generation() == SchemaGeneration::Current {
                continue;
            }

            let record = match schema::normalize(raw) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Skipping {} during upgrade: {}", id, e);
                    continue;
                }
            };

            write_atomic(&self.layout.record_path(&id), &schema::encode(&record)?).await?;
            self.index.upsert(IndexEntry::from(&record));
            upgraded += 1;
        }

        if upgraded > 0 {
            self.index.persist().await?;
            tracing::info!("Upgraded {} legacy records", upgraded);
        }
        Ok(upgraded)
    }

    /// Rebuild the index from the record files and swap it in.
    pub async fn rebuild_index(&self) -> Result<usize> {
        let _guard = self.write_guard().await;

        let scan = self.scan_unlocked().await?;
        for (id, err) in &scan.failures {
            tracing::warn!("Skipping {} during index rebuild: {}", id, err);
        }

        let map = scan.index_map();
        let count = map.len();
        self.index.install(map);
        self.index.persist().await?;

        tracing::info!("Rebuilt index with {} entries", count);
        Ok(count)
    }

    /// Compare the persisted index with a fresh rebuild, changing nothing.
    pub async fn verify_index(&self) -> Result<IndexDrift> {
        let _guard = self.read_guard().await;

        let rebuilt = self.scan_unlocked().await?.index_map();
        let persisted = self.index.read_artifact().await?.unwrap_or_default();
        Ok(IndexDrift::between(&persisted, &rebuilt))
    }

    /// Load every record file.
    pub async fn scan(&self) -> Result<StoreScan> {
        let _guard = self.read_guard().await;
        self.scan_unlocked().await
    }

    /// Evict records beyond the rotation bound.
    pub async fn rotate(&self) -> Result<Vec<Tombstone>> {
        let _guard = self.write_guard().await;
        self.rotate_locked().await
    }

    pub fn tombstones(&self) -> Vec<Tombstone> {
        self.tombstones.list()
    }

    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstones.contains(id)
    }

    pub(crate) async fn load_unlocked(&self, id: &str) -> Result<MemoryRecord> {
        schema::normalize(self.load_raw_unlocked(id).await?)
    }

    pub(crate) async fn load_raw_unlocked(&self, id: &str) -> Result<RawRecord> {
        if validate_id(id).is_err() {
            return Err(MemvaultError::NotFound(id.to_string()));
        }

        let path = self.layout.record_path(id);
        match read_optional(&path).await? {
            Some(bytes) => RawRecord::decode(id, &bytes),
            None => Err(MemvaultError::NotFound(id.to_string())),
        }
    }

    async fn scan_unlocked(&self) -> Result<StoreScan> {
        let ids: Vec<String> = self.list_ids().await?.try_collect().await?;

        let mut scan = StoreScan::default();
        for id in ids {
            let loaded = match self.load_raw_unlocked(&id).await {
                Ok(raw) => {
                    let generation = raw.generation();
                    schema::normalize(raw).map(|record| (generation, record))
                }
                Err(e) => Err(e),
            };
            match loaded {
                Ok(entry) => scan.records.push(entry),
                Err(e) => scan.failures.push((id, e)),
            }
        }
        Ok(scan)
    }

    /// Write the record file and its index entry as one unit. On failure
    /// both are restored to their previous state.
    async fn commit_record(&self, record: &MemoryRecord, previous: Option<Vec<u8>>) -> Result<()> {
        let path = self.layout.record_path(&record.id);
        write_atomic(&path, &schema::encode(record)?).await?;

        let prev_entry = self.index.upsert(IndexEntry::from(record));
        if let Err(e) = self.index.persist().await {
            match prev_entry {
                Some(entry) => {
                    self.index.upsert(entry);
                }
                None => {
                    self.index.remove(&record.id);
                }
            }
            let restored = match previous {
                Some(bytes) => write_atomic(&path, &bytes).await,
                None => tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| MemvaultError::write(path.display(), e)),
            };
            if let Err(restore_err) = restored {
                tracing::error!(
                    "Failed to roll back {} after index write failure: {}",
                    record.id,
                    restore_err
                );
            }
            return Err(e);
        }
        Ok(())
    }

    async fn remove_locked(&self, id: &str, reason: TombstoneReason) -> Result<Option<Tombstone>> {
        if self.tombstones.contains(id) || validate_id(id).is_err() {
            return Ok(None);
        }

        let path = self.layout.record_path(id);
        let Some(previous) = read_optional(&path).await? else {
            return Ok(None);
        };

        let now = self.clock.now();
        let entry = self.index.get(id).unwrap_or_else(|| IndexEntry {
            id: id.to_string(),
            created_at: now,
            importance: 0.0,
            tags: BTreeSet::new(),
            kind: String::new(),
        });
        let tombstone = Tombstone::new(&entry, reason, now);
        self.tombstones.append(tombstone.clone()).await?;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            self.revoke_tombstone(id).await;
            return Err(MemvaultError::write(path.display(), e));
        }

        let prev_entry = self.index.remove(id);
        if let Err(e) = self.index.persist().await {
            if let Some(entry) = prev_entry {
                self.index.upsert(entry);
            }
            if let Err(restore_err) = write_atomic(&path, &previous).await {
                tracing::error!("Failed to restore {} after index write failure: {}", id, restore_err);
            }
            self.revoke_tombstone(id).await;
            return Err(e);
        }

        tracing::info!(id = %id, ?reason, "Deleted memory");
        Ok(Some(tombstone))
    }

    async fn revoke_tombstone(&self, id: &str) {
        if let Err(e) = self.tombstones.revoke(id).await {
            tracing::error!("Failed to revoke tombstone for {}: {}", id, e);
        }
    }

    async fn rotate_locked(&self) -> Result<Vec<Tombstone>> {
        let Some(evictor) = self.evictor else {
            return Ok(Vec::new());
        };

        let victims = evictor.select_victims(&self.index.snapshot());
        let mut evicted = Vec::with_capacity(victims.len());
        for victim in victims {
            if let Some(tombstone) = self.remove_locked(&victim.id, TombstoneReason::Evicted).await? {
                tracing::debug!("Evicted {}", tombstone);
                evicted.push(tombstone);
            }
        }
        Ok(evicted)
    }
}
