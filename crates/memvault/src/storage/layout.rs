//! On-disk layout of a store root

use std::path::{Path, PathBuf};

use crate::error::{MemvaultError, Result};

pub const RECORDS_DIR: &str = "records";
pub const INDEX_FILE: &str = "index.json";
pub const SECURE_INFO_FILE: &str = "secure_info.json";
pub const TOMBSTONES_FILE: &str = "tombstones.json";
pub const STAGING_DIR: &str = ".staging";
pub const ACCESS_FILE: &str = "access.json";

const RECORD_EXTENSION: &str = "json";

/// Paths of every artifact under a store root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn records_dir(&self) -> PathBuf {
        self.root.join(RECORDS_DIR)
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.records_dir().join(format!("{id}.{RECORD_EXTENSION}"))
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn secure_info_path(&self) -> PathBuf {
        self.root.join(SECURE_INFO_FILE)
    }

    pub fn tombstones_path(&self) -> PathBuf {
        self.root.join(TOMBSTONES_FILE)
    }

    pub fn access_path(&self) -> PathBuf {
        self.root.join(ACCESS_FILE)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Create the directories a store needs.
    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.records_dir())
            .await
            .map_err(|e| MemvaultError::write(self.records_dir().display(), e))
    }
}

/// The record identifier for a file name inside `records/`, if it is one.
///
/// Temporary files (`.<id>.json.tmp`) and anything without the record
/// extension are ignored.
pub fn record_id_from_file_name(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(".json")?;
    if stem.is_empty() || stem.starts_with('.') {
        return None;
    }
    Some(stem)
}

/// Write `bytes` to `path` by way of a temporary sibling and a rename, so
/// readers only ever see the old or the new content.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MemvaultError::Write(format!("invalid path {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(MemvaultError::write(tmp.display(), e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(MemvaultError::write(path.display(), e));
    }
    Ok(())
}

/// Read a file, mapping absence to `None`.
pub async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MemvaultError::read(path.display(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = StoreLayout::new("/data");
        assert_eq!(layout.record_path("abc"), PathBuf::from("/data/records/abc.json"));
        assert_eq!(layout.index_path(), PathBuf::from("/data/index.json"));
        assert_eq!(layout.secure_info_path(), PathBuf::from("/data/secure_info.json"));
        assert_eq!(layout.tombstones_path(), PathBuf::from("/data/tombstones.json"));
        assert_eq!(layout.staging_dir(), PathBuf::from("/data/.staging"));
    }

    #[test]
    fn test_record_id_from_file_name() {
        assert_eq!(record_id_from_file_name("abc.json"), Some("abc"));
        assert_eq!(
            record_id_from_file_name("20240101_120000.json"),
            Some("20240101_120000")
        );
        assert_eq!(record_id_from_file_name(".abc.json.tmp"), None);
        assert_eq!(record_id_from_file_name(".abc.json"), None);
        assert_eq!(record_id_from_file_name("notes.txt"), None);
        assert_eq!(record_id_from_file_name(".json"), None);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"second");
        assert!(!dir.path().join(".unit.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_write_atomic_missing_directory_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("unit.json");

        let err = write_atomic(&path, b"x").await.unwrap_err();
        assert!(matches!(err, MemvaultError::Write(_)));
    }

    #[tokio::test]
    async fn test_read_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.json");
        assert!(read_optional(&path).await.unwrap().is_none());

        tokio::fs::write(&path, b"data").await.unwrap();
        assert_eq!(read_optional(&path).await.unwrap().as_deref(), Some(&b"data"[..]));
    }
}
