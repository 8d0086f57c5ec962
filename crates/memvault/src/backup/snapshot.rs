//! Consistent, timestamped snapshots of a store
//!
//! A snapshot is taken in two phases. Under the store's read guard the
//! manifest (index, tombstones, secure info) is captured and every record
//! file is hard-linked into a staging directory inside the store root, which
//! is cheap and freezes the set of bodies. The guard is then released and
//! the staged bodies are copied into a `.partial` directory under the backup
//! root, which is renamed to `<backup_root>/<name>/` only once complete.
//!
//! With compression enabled each body is stored as `records/<id>.json.gz`.
//! Restore accepts both forms.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{MemvaultError, Result};
use crate::storage::index::encode_artifact;
use crate::storage::layout::{
    INDEX_FILE, RECORDS_DIR, SECURE_INFO_FILE, StoreLayout, TOMBSTONES_FILE, read_optional,
    record_id_from_file_name,
};
use crate::storage::{IndexMap, RecordStore, Tombstone};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;
pub const SNAPSHOT_PREFIX: &str = "snapshot-";
const PARTIAL_SUFFIX: &str = ".partial";
const METADATA_FILE: &str = "snapshot.json";
const GZIP_SUFFIX: &str = ".gz";

/// Contents of `snapshot.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub record_count: usize,
    pub tombstone_count: usize,
    pub secure_info: bool,
    /// Record bodies are gzipped
    #[serde(default)]
    pub compressed: bool,
    /// Total size of the record bodies as stored in the live store
    #[serde(default)]
    pub original_bytes: u64,
    /// Total size of the record bodies inside the snapshot
    #[serde(default)]
    pub stored_bytes: u64,
}

impl SnapshotMetadata {
    /// Stored size over original size; 0 for a snapshot without records.
    pub fn compression_ratio(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        self.stored_bytes as f64 / self.original_bytes as f64
    }

    pub fn space_saved(&self) -> u64 {
        self.original_bytes.saturating_sub(self.stored_bytes)
    }
}

/// A completed snapshot on disk
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotInfo {
    pub name: String,
    pub path: PathBuf,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Completed(SnapshotInfo),
    /// Shutdown was signalled mid-copy; nothing was left behind
    Aborted,
}

/// What was captured under the read guard
struct Manifest {
    index: Arc<IndexMap>,
    tombstones: Vec<Tombstone>,
    secure_info: Option<Vec<u8>>,
    record_count: usize,
}

/// Writes snapshots of one store into one backup root
pub struct SnapshotWriter {
    store: Arc<RecordStore>,
    backup_root: PathBuf,
    retain: usize,
    compression: Option<Compression>,
}

impl SnapshotWriter {
    pub fn new(store: Arc<RecordStore>, backup_root: impl Into<PathBuf>, retain: usize) -> Self {
        Self {
            store,
            backup_root: backup_root.into(),
            retain,
            compression: None,
        }
    }

    /// Gzip record bodies at `level` (0 to 9).
    pub fn with_compression(mut self, level: u32) -> Self {
        self.compression = Some(Compression::new(level.min(9)));
        self
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Take a snapshot, then prune old ones beyond the retention count.
    ///
    /// `shutdown` is checked between record copies; when it reads `true` the
    /// partial snapshot is removed and `Aborted` is returned.
    pub async fn create(&self, shutdown: &watch::Receiver<bool>) -> Result<SnapshotOutcome> {
        let created_at = self.store.clock().now();
        let name = snapshot_name(created_at);
        // Two runs started in the same millisecond share a name; their
        // working directories must not.
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let staging = self.store.layout().staging_dir().join(format!("{name}-{run_id}"));

        let staged = self.stage(&staging).await;
        let outcome = match staged {
            Ok(manifest) => {
                self.write_snapshot(&name, &run_id, &staging, manifest, created_at, shutdown)
                    .await
            }
            Err(e) => Err(e),
        };
        remove_dir_if_present(&staging).await;

        if let Ok(SnapshotOutcome::Completed(ref info)) = outcome {
            tracing::info!(
                "Snapshot {} written ({} records)",
                info.name,
                info.metadata.record_count
            );
            if let Err(e) = prune(&self.backup_root, self.retain).await {
                tracing::warn!("Failed to prune old snapshots: {}", e);
            }
        }
        outcome
    }

    async fn stage(&self, staging: &Path) -> Result<Manifest> {
        let _guard = self.store.read_guard().await;

        let staged_records = staging.join(RECORDS_DIR);
        tokio::fs::create_dir_all(&staged_records)
            .await
            .map_err(|e| MemvaultError::write(staged_records.display(), e))?;

        let ids: Vec<String> = self.store.list_ids().await?.try_collect().await?;
        for id in &ids {
            let source = self.store.layout().record_path(id);
            let target = staged_records.join(format!("{id}.json"));
            link_or_copy(&source, &target).await?;
        }

        Ok(Manifest {
            index: self.store.index().snapshot(),
            tombstones: self.store.tombstones(),
            secure_info: read_optional(&self.store.layout().secure_info_path()).await?,
            record_count: ids.len(),
        })
    }

    async fn write_snapshot(
        &self,
        name: &str,
        run_id: &str,
        staging: &Path,
        manifest: Manifest,
        created_at: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<SnapshotOutcome> {
        let partial = self
            .backup_root
            .join(format!("{name}-{run_id}{PARTIAL_SUFFIX}"));
        let result = self
            .fill_partial(&partial, staging, manifest, created_at, shutdown)
            .await;

        match result {
            Ok(Some(metadata)) => {
                let path = self.backup_root.join(name);
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    remove_dir_if_present(&partial).await;
                    return Err(MemvaultError::Write(format!(
                        "snapshot {name} already exists"
                    )));
                }
                if let Err(e) = tokio::fs::rename(&partial, &path).await {
                    remove_dir_if_present(&partial).await;
                    return Err(MemvaultError::write(path.display(), e));
                }
                Ok(SnapshotOutcome::Completed(SnapshotInfo {
                    name: name.to_string(),
                    path,
                    metadata,
                }))
            }
            Ok(None) => {
                remove_dir_if_present(&partial).await;
                tracing::info!("Snapshot {} aborted by shutdown", name);
                Ok(SnapshotOutcome::Aborted)
            }
            Err(e) => {
                remove_dir_if_present(&partial).await;
                Err(e)
            }
        }
    }

    /// Copy staged bodies and write the manifest into `partial`. Returns
    /// `None` if shutdown was observed.
    async fn fill_partial(
        &self,
        partial: &Path,
        staging: &Path,
        manifest: Manifest,
        created_at: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Option<SnapshotMetadata>> {
        let records = partial.join(RECORDS_DIR);
        tokio::fs::create_dir_all(&records)
            .await
            .map_err(|e| MemvaultError::write(records.display(), e))?;

        let staged_records = staging.join(RECORDS_DIR);
        let mut entries = tokio::fs::read_dir(&staged_records)
            .await
            .map_err(|e| MemvaultError::read(staged_records.display(), e))?;
        let mut original_bytes = 0u64;
        let mut stored_bytes = 0u64;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MemvaultError::read(staged_records.display(), e))?
        {
            if *shutdown.borrow() {
                return Ok(None);
            }
            let (original, stored) = match self.compression {
                Some(level) => {
                    let mut name = entry.file_name();
                    name.push(GZIP_SUFFIX);
                    let target = records.join(name);
                    let body = tokio::fs::read(entry.path())
                        .await
                        .map_err(|e| MemvaultError::read(entry.path().display(), e))?;
                    let original = body.len() as u64;
                    let packed = gzip(body, level).await?;
                    write_file(&target, &packed).await?;
                    (original, packed.len() as u64)
                }
                None => {
                    let target = records.join(entry.file_name());
                    let copied = tokio::fs::copy(entry.path(), &target)
                        .await
                        .map_err(|e| MemvaultError::write(target.display(), e))?;
                    (copied, copied)
                }
            };
            original_bytes += original;
            stored_bytes += stored;
        }

        write_file(&partial.join(INDEX_FILE), &encode_artifact(&manifest.index)?).await?;

        let tombstones = serde_json::to_vec_pretty(&manifest.tombstones)
            .map_err(|e| MemvaultError::Serialization(format!("tombstones: {e}")))?;
        write_file(&partial.join(TOMBSTONES_FILE), &tombstones).await?;

        if let Some(ref secure) = manifest.secure_info {
            write_file(&partial.join(SECURE_INFO_FILE), secure).await?;
        }

        let metadata = SnapshotMetadata {
            format_version: SNAPSHOT_FORMAT_VERSION,
            created_at,
            record_count: manifest.record_count,
            tombstone_count: manifest.tombstones.len(),
            secure_info: manifest.secure_info.is_some(),
            compressed: self.compression.is_some(),
            original_bytes,
            stored_bytes,
        };
        let bytes = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| MemvaultError::Serialization(format!("snapshot metadata: {e}")))?;
        write_file(&partial.join(METADATA_FILE), &bytes).await?;

        Ok(Some(metadata))
    }
}

/// `snapshot-YYYYMMDDTHHMMSSmmmZ`
pub fn snapshot_name(created_at: DateTime<Utc>) -> String {
    format!("{SNAPSHOT_PREFIX}{}", created_at.format("%Y%m%dT%H%M%S%3fZ"))
}

/// Completed snapshots under `backup_root`, newest first.
///
/// Partial directories and snapshots with unreadable metadata are skipped.
pub async fn list_snapshots(backup_root: &Path) -> Result<Vec<SnapshotInfo>> {
    let mut entries = match tokio::fs::read_dir(backup_root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MemvaultError::read(backup_root.display(), e)),
    };

    let mut snapshots = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MemvaultError::read(backup_root.display(), e))?
    {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !name.starts_with(SNAPSHOT_PREFIX) || name.ends_with(PARTIAL_SUFFIX) {
            continue;
        }

        match read_metadata(&entry.path()).await {
            Ok(metadata) => snapshots.push(SnapshotInfo {
                name,
                path: entry.path(),
                metadata,
            }),
            Err(e) => tracing::warn!("Ignoring snapshot {}: {}", name, e),
        }
    }

    snapshots.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(snapshots)
}

/// Delete all but the newest `retain` snapshots. Returns the removed names.
pub async fn prune(backup_root: &Path, retain: usize) -> Result<Vec<String>> {
    let snapshots = list_snapshots(backup_root).await?;
    let mut removed = Vec::new();
    for snapshot in snapshots.into_iter().skip(retain) {
        tokio::fs::remove_dir_all(&snapshot.path)
            .await
            .map_err(|e| MemvaultError::write(snapshot.path.display(), e))?;
        tracing::debug!("Pruned snapshot {}", snapshot.name);
        removed.push(snapshot.name);
    }
    Ok(removed)
}

/// Copy a snapshot into `target_root` so it can be opened as a store.
///
/// The target must be absent or an empty directory.
pub async fn restore(snapshot: &Path, target_root: &Path) -> Result<SnapshotMetadata> {
    let metadata = read_metadata(snapshot).await?;
    if metadata.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(MemvaultError::Schema(format!(
            "snapshot format {} is not supported",
            metadata.format_version
        )));
    }

    match tokio::fs::read_dir(target_root).await {
        Ok(mut entries) => {
            let first = entries
                .next_entry()
                .await
                .map_err(|e| MemvaultError::read(target_root.display(), e))?;
            if first.is_some() {
                return Err(MemvaultError::Write(format!(
                    "restore target {} is not empty",
                    target_root.display()
                )));
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(MemvaultError::read(target_root.display(), e)),
    }

    let layout = StoreLayout::new(target_root);
    layout.ensure().await?;

    let source_records = snapshot.join(RECORDS_DIR);
    let mut entries = tokio::fs::read_dir(&source_records)
        .await
        .map_err(|e| MemvaultError::read(source_records.display(), e))?;
    let mut restored = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MemvaultError::read(source_records.display(), e))?
    {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some(id) = name.strip_suffix(GZIP_SUFFIX).and_then(record_id_from_file_name) {
            let packed = tokio::fs::read(entry.path())
                .await
                .map_err(|e| MemvaultError::read(entry.path().display(), e))?;
            write_file(&layout.record_path(id), &gunzip(packed).await?).await?;
        } else if let Some(id) = record_id_from_file_name(name) {
            let target = layout.record_path(id);
            tokio::fs::copy(entry.path(), &target)
                .await
                .map_err(|e| MemvaultError::write(target.display(), e))?;
        } else {
            continue;
        }
        restored += 1;
    }

    for (file, target) in [
        (INDEX_FILE, layout.index_path()),
        (TOMBSTONES_FILE, layout.tombstones_path()),
        (SECURE_INFO_FILE, layout.secure_info_path()),
    ] {
        if let Some(bytes) = read_optional(&snapshot.join(file)).await? {
            write_file(&target, &bytes).await?;
        }
    }

    tracing::info!(
        "Restored {} records from {} into {}",
        restored,
        snapshot.display(),
        target_root.display()
    );
    Ok(metadata)
}

async fn read_metadata(snapshot: &Path) -> Result<SnapshotMetadata> {
    let path = snapshot.join(METADATA_FILE);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| MemvaultError::read(path.display(), e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| MemvaultError::Schema(format!("{} is malformed: {e}", path.display())))
}

/// Hard-link `source` to `target`, copying only when the filesystem cannot
/// link. An existing `target` is an error and is never written through.
async fn link_or_copy(source: &Path, target: &Path) -> Result<()> {
    match tokio::fs::hard_link(source, target).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(MemvaultError::write(target.display(), e))
        }
        Err(e) => {
            tracing::debug!("Hard link to {} failed ({}), copying", target.display(), e);
            tokio::fs::copy(source, target)
                .await
                .map(|_| ())
                .map_err(|e| MemvaultError::write(target.display(), e))
        }
    }
}

async fn gzip(body: Vec<u8>, level: Compression) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), level);
        encoder.write_all(&body)?;
        encoder.finish()
    })
    .await
    .map_err(|e| MemvaultError::Write(format!("compression task failed: {e}")))?
    .map_err(|e| MemvaultError::Write(format!("gzip: {e}")))
}

async fn gunzip(packed: Vec<u8>) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let mut body = Vec::new();
        GzDecoder::new(packed.as_slice()).read_to_end(&mut body)?;
        Ok::<_, std::io::Error>(body)
    })
    .await
    .map_err(|e| MemvaultError::Read(format!("decompression task failed: {e}")))?
    .map_err(|e| MemvaultError::Schema(format!("corrupt compressed record: {e}")))
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| MemvaultError::write(path.display(), e))
}

async fn remove_dir_if_present(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}
