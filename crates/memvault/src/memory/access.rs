//! Per-memory access tracking
//!
//! Counts reads and writes per identifier, remembers first and last access,
//! and keeps an hour-of-day histogram for peak usage. Counters live in
//! memory and are written to `access.json` by [`AccessTracker::persist`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemvaultError, Result};
use crate::storage::layout::{read_optional, write_atomic};

const PEAK_HOURS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Raw counters for one identifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessCounters {
    pub reads: u64,
    pub writes: u64,
    pub first_access: Option<DateTime<Utc>>,
    pub last_access: Option<DateTime<Utc>>,
    /// Accesses per UTC hour of day
    pub hours: [u64; 24],
}

impl AccessCounters {
    fn record(&mut self, kind: AccessKind, at: DateTime<Utc>) {
        match kind {
            AccessKind::Read => self.reads += 1,
            AccessKind::Write => self.writes += 1,
        }
        if self.first_access.is_none_or(|first| at < first) {
            self.first_access = Some(at);
        }
        if self.last_access.is_none_or(|last| at > last) {
            self.last_access = Some(at);
        }
        self.hours[at.hour() as usize] += 1;
    }

    pub fn total(&self) -> u64 {
        self.reads + self.writes
    }
}

/// Summary of how one memory has been used
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessPattern {
    pub total_reads: u64,
    pub total_writes: u64,
    pub last_accessed: Option<DateTime<Utc>>,
    /// Accesses per day between the first and last access, with spans under
    /// a day counted as one day
    pub accesses_per_day: f64,
    /// Busiest UTC hours, most accesses first
    pub peak_hours: Vec<u32>,
}

impl From<&AccessCounters> for AccessPattern {
    fn from(counters: &AccessCounters) -> Self {
        let days = match (counters.first_access, counters.last_access) {
            (Some(first), Some(last)) => (last - first).num_seconds() as f64 / 86_400.0,
            _ => 0.0,
        };
        let days = if days > 0.0 { days } else { 1.0 };

        let mut hours: Vec<(u32, u64)> = counters
            .hours
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(hour, count)| (hour as u32, *count))
            .collect();
        hours.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Self {
            total_reads: counters.reads,
            total_writes: counters.writes,
            last_accessed: counters.last_access,
            accesses_per_day: counters.total() as f64 / days,
            peak_hours: hours.into_iter().take(PEAK_HOURS).map(|(h, _)| h).collect(),
        }
    }
}

pub struct AccessTracker {
    path: PathBuf,
    counters: Mutex<BTreeMap<String, AccessCounters>>,
    dirty: AtomicBool,
}

impl AccessTracker {
    /// Load counters from `path`. A missing file starts empty; an
    /// unreadable one is logged and also starts empty.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let counters = match read_optional(&path).await? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(counters) => counters,
                Err(e) => {
                    tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            None => BTreeMap::new(),
        };

        Ok(Self {
            path,
            counters: Mutex::new(counters),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn record(&self, id: &str, kind: AccessKind, at: DateTime<Utc>) {
        self.lock().entry(id.to_string()).or_default().record(kind, at);
        self.dirty.store(true, Ordering::Release);
    }

    /// Drop the counters of a deleted memory.
    pub fn forget(&self, id: &str) {
        if self.lock().remove(id).is_some() {
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Keep only the identifiers `keep` accepts. Returns how many were
    /// dropped.
    pub fn retain(&self, keep: impl Fn(&str) -> bool) -> usize {
        let mut counters = self.lock();
        let before = counters.len();
        counters.retain(|id, _| keep(id.as_str()));
        let dropped = before - counters.len();
        if dropped > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        dropped
    }

    pub fn counters(&self, id: &str) -> Option<AccessCounters> {
        self.lock().get(id).cloned()
    }

    /// Usage summary for `id`; an untracked identifier reports zeros.
    pub fn pattern(&self, id: &str) -> AccessPattern {
        let counters = self.counters(id).unwrap_or_default();
        AccessPattern::from(&counters)
    }

    /// The `limit` most accessed identifiers, busiest first.
    pub fn most_accessed(&self, limit: usize) -> Vec<(String, AccessPattern)> {
        let counters = self.lock();
        let mut ranked: Vec<(&String, &AccessCounters)> = counters.iter().collect();
        ranked.sort_by(|a, b| {
            b.1.total()
                .cmp(&a.1.total())
                .then_with(|| b.1.last_access.cmp(&a.1.last_access))
                .then_with(|| a.0.cmp(b.0))
        });
        ranked
            .into_iter()
            .take(limit)
            .map(|(id, c)| (id.clone(), AccessPattern::from(c)))
            .collect()
    }

    /// Write the counters if anything changed since the last write.
    pub async fn persist(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let bytes = {
            let counters = self.lock();
            serde_json::to_vec_pretty(&*counters)
                .map_err(|e| MemvaultError::Serialization(format!("access counters: {e}")))?
        };
        if let Err(e) = write_atomic(&self.path, &bytes).await {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        tracing::debug!("Persisted access counters to {}", self.path.display());
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, AccessCounters>> {
        self.counters.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 15, 0).unwrap()
    }

    async fn tracker(dir: &tempfile::TempDir) -> AccessTracker {
        AccessTracker::load(dir.path().join("access.json")).await.unwrap()
    }

    #[tokio::test]
    async fn test_counts_reads_writes_and_last_access() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(&dir).await;

        tracker.record("a", AccessKind::Write, at(9));
        tracker.record("a", AccessKind::Read, at(10));
        tracker.record("a", AccessKind::Read, at(10));

        let pattern = tracker.pattern("a");
        assert_eq!(pattern.total_reads, 2);
        assert_eq!(pattern.total_writes, 1);
        assert_eq!(pattern.last_accessed, Some(at(10)));
        assert_eq!(pattern.peak_hours, vec![10, 9]);
        // Accesses within one day count against a single day.
        assert_eq!(pattern.accesses_per_day, 3.0);
    }

    #[tokio::test]
    async fn test_untracked_identifier_reports_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = tracker(&dir).await.pattern("nobody");
        assert_eq!(pattern.total_reads, 0);
        assert_eq!(pattern.total_writes, 0);
        assert!(pattern.last_accessed.is_none());
        assert!(pattern.peak_hours.is_empty());
    }

    #[tokio::test]
    async fn test_frequency_spreads_over_the_span() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(&dir).await;

        for day in 0..4 {
            tracker.record("a", AccessKind::Read, at(8) + Duration::days(day));
        }
        let pattern = tracker.pattern("a");
        assert!((pattern.accesses_per_day - 4.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_most_accessed_and_forget() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(&dir).await;

        tracker.record("quiet", AccessKind::Read, at(1));
        for _ in 0..3 {
            tracker.record("busy", AccessKind::Read, at(2));
        }

        let top: Vec<String> = tracker.most_accessed(5).into_iter().map(|(id, _)| id).collect();
        assert_eq!(top, vec!["busy", "quiet"]);

        tracker.forget("busy");
        assert!(tracker.counters("busy").is_none());
        assert_eq!(tracker.most_accessed(5).len(), 1);

        assert_eq!(tracker.retain(|id| id != "quiet"), 1);
        assert!(tracker.most_accessed(5).is_empty());
    }

    #[tokio::test]
    async fn test_persist_round_trips_and_skips_clean_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.json");

        let tracker = tracker(&dir).await;
        tracker.persist().await.unwrap();
        assert!(!path.exists());

        tracker.record("a", AccessKind::Write, at(12));
        tracker.persist().await.unwrap();

        let reloaded = AccessTracker::load(path).await.unwrap();
        assert_eq!(reloaded.counters("a"), tracker.counters("a"));
    }

    #[tokio::test]
    async fn test_malformed_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.json");
        std::fs::write(&path, b"not json").unwrap();

        let tracker = AccessTracker::load(path).await.unwrap();
        assert!(tracker.most_accessed(10).is_empty());
    }
}
