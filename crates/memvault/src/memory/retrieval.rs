//! Memory retrieval ranked by importance and recency
//!
//! Retrieval works in three steps:
//! 1. Secure info, when set, takes the first slot
//! 2. Index entries at or above the importance threshold are scored as
//!    importance × recency weight and sorted (ties broken by identifier)
//! 3. Bodies are loaded best-first until the limit is reached; any body that
//!    fails to load is skipped and the next candidate takes its place
//!
//! The whole pass runs under one read guard, so it sees a single committed
//! state of the store.

use serde::Serialize;

use crate::config::Config;
use crate::error::{MemvaultError, Result};
use crate::memory::ranking::RecencyDecay;
use crate::memory::secure::SecureInfoStore;
use crate::memory::types::MemoryRecord;
use crate::storage::{IndexEntry, RecordStore};

/// A retrieved memory with scoring information
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedMemory {
    /// The retrieved memory
    pub record: MemoryRecord,
    /// Recency factor in (0, 1]
    pub recency_weight: f32,
    /// importance × recency weight
    pub score: f32,
    /// Whether this is the secure info singleton
    pub secure: bool,
}

/// Configuration for the retrieval pipeline
#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    /// Minimum importance for a non-secure record to be considered
    pub importance_threshold: f32,
    pub decay: RecencyDecay,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RetrievalConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            importance_threshold: config.memory.importance_threshold,
            decay: RecencyDecay::from_config(&config.ranking),
        }
    }
}

pub struct RetrievalPipeline<'a> {
    store: &'a RecordStore,
    secure: &'a SecureInfoStore,
    config: RetrievalConfig,
}

impl<'a> RetrievalPipeline<'a> {
    pub fn new(store: &'a RecordStore, secure: &'a SecureInfoStore, config: RetrievalConfig) -> Self {
        Self {
            store,
            secure,
            config,
        }
    }

    /// Retrieve up to `limit` memories for a conversation.
    ///
    /// `context` is recorded for tracing only; it does not affect ranking.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn retrieve(&self, context: &str, limit: i64) -> Result<Vec<RetrievedMemory>> {
        if limit < 0 {
            return Err(MemvaultError::InvalidLimit(limit));
        }
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let _guard = self.store.read_guard().await;
        let now = self.store.clock().now();
        let mut results = Vec::with_capacity(limit.min(self.store.len() + 1));

        match self.secure.read_unlocked().await {
            Ok(info) if !info.is_empty() => results.push(RetrievedMemory {
                record: info.to_memory_record(),
                recency_weight: 1.0,
                score: 1.0,
                secure: true,
            }),
            Ok(_) => {}
            Err(e) => tracing::warn!("Skipping secure info: {}", e),
        }

        let snapshot = self.store.index().snapshot();
        let candidates = self.rank(snapshot.values(), now);
        for (entry, recency_weight, score) in candidates {
            if results.len() >= limit {
                break;
            }
            match self.store.load_unlocked(&entry.id).await {
                Ok(record) => results.push(RetrievedMemory {
                    record,
                    recency_weight,
                    score,
                    secure: false,
                }),
                Err(e) => tracing::warn!("Skipping {} during retrieval: {}", entry.id, e),
            }
        }

        tracing::debug!("Retrieved {} memories", results.len());
        Ok(results)
    }

    /// Entries above the threshold with their recency weight and score,
    /// best first.
    fn rank<'e>(
        &self,
        entries: impl Iterator<Item = &'e IndexEntry>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Vec<(&'e IndexEntry, f32, f32)> {
        let mut ranked: Vec<_> = entries
            .filter(|e| e.importance >= self.config.importance_threshold)
            .map(|e| {
                let weight = self.config.decay.weight(e.created_at, now);
                (e, weight, e.importance * weight)
            })
            .collect();

        ranked.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.id.cmp(&b.0.id)));
        ranked
    }
}
