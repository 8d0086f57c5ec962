//! The memory service facade used by the chat layer
//!
//! `MemoryService` ties the record store, secure info, retrieval and
//! snapshots together behind the small set of calls a conversation needs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::backup::{BackupScheduler, SnapshotInfo, SnapshotOutcome, SnapshotWriter};
use crate::clock::{SharedClock, system_clock};
use crate::config::Config;
use crate::error::{MemvaultError, Result};
use crate::memory::access::{AccessKind, AccessPattern, AccessTracker};
use crate::memory::retrieval::{RetrievalConfig, RetrievalPipeline, RetrievedMemory};
use crate::memory::search::{FuzzySearch, SearchHit};
use crate::memory::secure::{SecureInfoRecord, SecureInfoStore};
use crate::memory::stats::MemoryStats;
use crate::memory::types::{MemoryRecord, NewMemory, validate_importance};
use crate::storage::{MemoryFilter, PutMode, RecordStore, StoreOptions};

pub struct MemoryService {
    config: Config,
    store: Arc<RecordStore>,
    secure: SecureInfoStore,
    retrieval: RetrievalConfig,
    search: FuzzySearch,
    access: AccessTracker,
}

impl MemoryService {
    /// Validate `config` and open the store it points at.
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with_clock(config, system_clock()).await
    }

    pub async fn open_with_clock(config: Config, clock: SharedClock) -> Result<Self> {
        config.validate()?;

        let options = StoreOptions::default()
            .with_max_memories(config.memory.max_memories)
            .with_clock(clock);
        let store = Arc::new(RecordStore::open(config.storage.data_dir.clone(), options).await?);
        let secure = SecureInfoStore::new(&store);
        let retrieval = RetrievalConfig::from_config(&config);
        let search = FuzzySearch::new(config.search.min_score)?;

        let access = AccessTracker::load(store.layout().access_path()).await?;
        let stale = access.retain(|id| store.index().contains(id));
        if stale > 0 {
            tracing::debug!("Dropped access counters for {} deleted memories", stale);
        }

        tracing::info!(
            "Opened memory store at {} ({} records)",
            config.storage.data_dir.display(),
            store.len()
        );

        Ok(Self {
            config,
            store,
            secure,
            retrieval,
            search,
            access,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Store a new memory and return its identifier.
    ///
    /// Without an explicit importance the configured default is used.
    pub async fn remember(&self, content: impl Into<String>, importance: Option<f32>) -> Result<String> {
        let new = NewMemory {
            importance,
            ..NewMemory::new(content)
        };
        self.remember_with(new).await
    }

    pub async fn remember_with(&self, new: NewMemory) -> Result<String> {
        let importance = new
            .importance
            .unwrap_or(self.config.memory.default_importance);

        let mut record = MemoryRecord::new(new.content, importance, self.store.clock().now());
        record.tags = new.tags;
        if let Some(kind) = new.kind {
            record.kind = kind;
        }
        record.source = new.source;
        record.metadata = new.metadata;

        let outcome = self.store.put(record, PutMode::Insert).await?;
        for tombstone in &outcome.evicted {
            tracing::debug!("Rotation removed {}", tombstone);
            self.access.forget(&tombstone.id);
        }
        if outcome.over_capacity {
            tracing::warn!(
                "Store is above max_memories ({}) until rotation succeeds",
                self.config.memory.max_memories
            );
        }
        if !outcome.evicted.iter().any(|t| t.id == outcome.id) {
            self.access
                .record(&outcome.id, AccessKind::Write, self.store.clock().now());
        }
        Ok(outcome.id)
    }

    /// Rank and load up to `limit` memories for a conversation.
    pub async fn retrieve(&self, context: &str, limit: i64) -> Result<Vec<RetrievedMemory>> {
        let results = RetrievalPipeline::new(&self.store, &self.secure, self.retrieval)
            .retrieve(context, limit)
            .await?;

        let now = self.store.clock().now();
        for result in results.iter().filter(|r| !r.secure) {
            self.access.record(&result.record.id, AccessKind::Read, now);
        }
        Ok(results)
    }

    /// Retrieve with the configured default limit.
    pub async fn retrieve_default(&self, context: &str) -> Result<Vec<RetrievedMemory>> {
        let limit = i64::try_from(self.config.ranking.default_limit).unwrap_or(i64::MAX);
        self.retrieve(context, limit).await
    }

    /// Delete a memory. Unlike the store's `delete`, an unknown identifier
    /// is reported as `NotFound`.
    pub async fn forget(&self, id: &str) -> Result<()> {
        if self.store.delete(id).await? {
            self.access.forget(id);
            Ok(())
        } else {
            Err(MemvaultError::NotFound(id.to_string()))
        }
    }

    pub async fn get(&self, id: &str) -> Result<MemoryRecord> {
        let record = self.store.get(id).await?;
        self.access.record(id, AccessKind::Read, self.store.clock().now());
        Ok(record)
    }

    pub async fn get_secure_info(&self) -> Result<SecureInfoRecord> {
        self.secure.read().await
    }

    pub async fn set_secure_info(&self, content: impl Into<String>) -> Result<SecureInfoRecord> {
        self.secure.write(content).await
    }

    /// Replace a memory's importance with a caller-computed value.
    pub async fn rescore(&self, id: &str, importance: f32) -> Result<MemoryRecord> {
        validate_importance(importance)?;

        let mut record = self.store.get(id).await?;
        record.importance = importance;
        match self.store.put(record.clone(), PutMode::Update).await {
            Ok(_) => {}
            // Deleted between the load and the write
            Err(MemvaultError::Write(_)) if self.store.is_tombstoned(id) => {
                return Err(MemvaultError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e),
        }
        self.access.record(id, AccessKind::Write, self.store.clock().now());

        tracing::debug!(id = %id, importance, "Rescored memory");
        Ok(record)
    }

    /// Memories matching `filter`, newest first.
    pub async fn list(&self, filter: &MemoryFilter, limit: Option<usize>) -> Result<Vec<MemoryRecord>> {
        let limit = limit.unwrap_or(usize::MAX);
        let entries = self.store.index().top_by_recency(usize::MAX);

        let mut records = Vec::new();
        for entry in entries.iter().filter(|e| filter.matches_entry(e)) {
            if records.len() >= limit {
                break;
            }
            match self.store.get(&entry.id).await {
                Ok(record) if filter.matches_record(&record) => records.push(record),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!("Skipping {} while listing: {}", entry.id, e),
            }
        }
        Ok(records)
    }

    /// Memories whose content fuzzily matches `query`, best first.
    ///
    /// Without a limit the configured default is used.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchHit>> {
        let limit = limit.unwrap_or(self.config.search.default_limit);
        self.search.search(&self.store, query, limit).await
    }

    /// Search with a minimum score other than the configured one.
    pub async fn search_with_min_score(
        &self,
        query: &str,
        min_score: f32,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let limit = limit.unwrap_or(self.config.search.default_limit);
        FuzzySearch::new(min_score)?
            .search(&self.store, query, limit)
            .await
    }

    /// How a live memory has been read and written.
    pub fn access_pattern(&self, id: &str) -> Result<AccessPattern> {
        if !self.store.index().contains(id) {
            return Err(MemvaultError::NotFound(id.to_string()));
        }
        Ok(self.access.pattern(id))
    }

    /// The most accessed memories, busiest first.
    pub fn most_accessed(&self, limit: usize) -> Vec<(String, AccessPattern)> {
        self.access.most_accessed(limit)
    }

    /// Write access counters to disk if they changed.
    pub async fn persist_access(&self) -> Result<()> {
        self.access.persist().await
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        let scan = self.store.scan().await?;
        let secure_info_set = match self.secure.read().await {
            Ok(info) => !info.is_empty(),
            Err(e) => {
                tracing::warn!("Secure info unreadable: {}", e);
                false
            }
        };

        Ok(MemoryStats::from_scan(
            &scan,
            self.store.clock().now(),
            self.store.tombstones().len(),
            secure_info_set,
        ))
    }

    pub fn snapshot_writer(&self) -> SnapshotWriter {
        let writer = SnapshotWriter::new(
            Arc::clone(&self.store),
            self.config.storage.backup_dir(),
            self.config.backup.retain,
        );
        if self.config.backup.compress {
            writer.with_compression(self.config.backup.compression_level)
        } else {
            writer
        }
    }

    /// A scheduler for periodic snapshots of this store.
    pub fn backup_scheduler(&self) -> BackupScheduler {
        let interval: Duration = self.config.backup.interval();
        BackupScheduler::new(
            self.snapshot_writer(),
            interval,
            Arc::clone(self.store.clock()),
        )
    }

    /// Take a snapshot immediately, outside any schedule.
    pub async fn backup_now(&self) -> Result<SnapshotInfo> {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        match self.snapshot_writer().create(&shutdown_rx).await? {
            SnapshotOutcome::Completed(info) => Ok(info),
            SnapshotOutcome::Aborted => Err(MemvaultError::Write("snapshot was aborted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use crate::clock::Clock;
    use chrono::Duration as ChronoDuration;

    async fn service(dir: &tempfile::TempDir, clock: Arc<ManualClock>) -> MemoryService {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().join("data");
        config.storage.backup_dir = Some(dir.path().join("backups"));
        MemoryService::open_with_clock(config, clock).await.unwrap()
    }

    #[tokio::test]
    async fn test_remember_uses_default_importance() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, Arc::new(ManualClock::fixed())).await;

        let id = service.remember("I have a cat", None).await.unwrap();
        let record = service.get(&id).await.unwrap();
        assert!((record.importance - 0.5).abs() < f32::EPSILON);
        assert_eq!(record.kind, "general");
    }

    #[tokio::test]
    async fn test_remember_rejects_out_of_range_importance() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, Arc::new(ManualClock::fixed())).await;

        let err = service.remember("bad", Some(1.5)).await.unwrap_err();
        assert!(matches!(err, MemvaultError::InvalidRecord(_)));
        assert!(service.store().is_empty());
    }

    #[tokio::test]
    async fn test_forget_unknown_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, Arc::new(ManualClock::fixed())).await;

        let id = service.remember("temporary", Some(0.4)).await.unwrap();
        service.forget(&id).await.unwrap();
        assert!(service.forget(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rescore_changes_only_importance() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::fixed());
        let service = service(&dir, clock.clone()).await;

        let id = service.remember("rescored", Some(0.3)).await.unwrap();
        let before = service.get(&id).await.unwrap();

        clock.advance(ChronoDuration::hours(1));
        let after = service.rescore(&id, 0.8).await.unwrap();

        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.content, before.content);
        assert!((service.get(&id).await.unwrap().importance - 0.8).abs() < f32::EPSILON);
        assert!(service.rescore(&id, -0.1).await.is_err());
    }

    #[tokio::test]
    async fn test_list_filters_and_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::fixed());
        let service = service(&dir, clock.clone()).await;

        service
            .remember_with(NewMemory::new("old family fact").tag("family"))
            .await
            .unwrap();
        clock.advance(ChronoDuration::minutes(1));
        service.remember("work note", Some(0.9)).await.unwrap();
        clock.advance(ChronoDuration::minutes(1));
        service
            .remember_with(NewMemory::new("new family fact").tag("family"))
            .await
            .unwrap();

        let family = service
            .list(&MemoryFilter::new().with_tag("family"), None)
            .await
            .unwrap();
        let contents: Vec<_> = family.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["new family fact", "old family fact"]);

        let limited = service.list(&MemoryFilter::new(), Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].content, "new family fact");
    }

    #[tokio::test]
    async fn test_secure_info_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, Arc::new(ManualClock::fixed())).await;

        assert!(service.get_secure_info().await.unwrap().is_empty());
        service.set_secure_info("1. Name is Ada").await.unwrap();
        assert_eq!(
            service.get_secure_info().await.unwrap().content,
            "1. Name is Ada"
        );
    }

    #[tokio::test]
    async fn test_search_ranks_fuzzy_matches() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, Arc::new(ManualClock::fixed())).await;

        let exact = service.remember("Likes hiking in the Alps", Some(0.4)).await.unwrap();
        let typo = service.remember("Hikking in the alps", Some(0.9)).await.unwrap();
        service.remember("Allergic to peanuts", Some(0.9)).await.unwrap();

        let hits = service.search("hiking in the alps", None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec![exact.as_str(), typo.as_str()]);
        assert_eq!(hits[0].score, 1.0);
        assert!(hits[1].score < 1.0);

        let strict = service
            .search_with_min_score("hiking in the alps", 1.0, None)
            .await
            .unwrap();
        assert_eq!(strict.len(), 1);
        assert!(service.search("hiking", Some(0)).await.unwrap().is_empty());
        assert!(service.search_with_min_score("x", 2.0, None).await.is_err());
    }

    #[tokio::test]
    async fn test_access_is_tracked_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::fixed());
        let service = service(&dir, clock.clone()).await;

        let id = service.remember("tracked", Some(0.9)).await.unwrap();
        service.get(&id).await.unwrap();
        service.retrieve("anything", 5).await.unwrap();
        service.rescore(&id, 0.8).await.unwrap();

        let pattern = service.access_pattern(&id).unwrap();
        assert_eq!(pattern.total_reads, 2);
        assert_eq!(pattern.total_writes, 2);
        assert_eq!(pattern.last_accessed, Some(clock.now()));
        assert_eq!(pattern.peak_hours, vec![12]);

        service.persist_access().await.unwrap();
        drop(service);

        let reopened = MemoryService::open_with_clock(
            {
                let mut config = Config::default();
                config.storage.data_dir = dir.path().join("data");
                config
            },
            clock,
        )
        .await
        .unwrap();
        assert_eq!(reopened.access_pattern(&id).unwrap().total_reads, 2);
        assert_eq!(reopened.most_accessed(1)[0].0, id);

        reopened.forget(&id).await.unwrap();
        assert!(reopened.access_pattern(&id).unwrap_err().is_not_found());
        assert!(reopened.most_accessed(10).is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_backup_now() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir, Arc::new(ManualClock::fixed())).await;

        service.remember("one", Some(0.2)).await.unwrap();
        service.remember("two", Some(0.4)).await.unwrap();

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert!((stats.average_importance - 0.3).abs() < 1e-6);
        assert!(!stats.secure_info_set);

        let info = service.backup_now().await.unwrap();
        assert_eq!(info.metadata.record_count, 2);
        assert!(info.path.starts_with(dir.path().join("backups")));
    }
}
