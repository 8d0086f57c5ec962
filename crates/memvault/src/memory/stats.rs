//! Aggregate statistics over a store

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::memory::schema::SchemaGeneration;
use crate::storage::StoreScan;

const TOP_TAGS: usize = 5;

/// Upper bounds (exclusive, in seconds) of each age bucket but the last
const AGE_BOUNDS: [(i64, &str); 5] = [
    (3_600, "<1 hour"),
    (86_400, "1-24 hours"),
    (604_800, "1-7 days"),
    (2_592_000, "1-4 weeks"),
    (31_536_000, "1-12 months"),
];
const OLDEST_BUCKET: &str = ">1 year";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemoryStats {
    pub total: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub average_importance: f32,
    /// Count per age bucket, youngest first
    pub age_distribution: Vec<(String, usize)>,
    /// Most used tags with their counts
    pub top_tags: Vec<(String, usize)>,
    pub content_bytes: usize,
    pub legacy_records: usize,
    pub unreadable_records: usize,
    pub tombstones: usize,
    pub secure_info_set: bool,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

impl MemoryStats {
    pub fn from_scan(
        scan: &StoreScan,
        now: DateTime<Utc>,
        tombstones: usize,
        secure_info_set: bool,
    ) -> Self {
        let total = scan.records.len();

        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut tag_counts: BTreeMap<&str, usize> = BTreeMap::new();
        let mut buckets = vec![0usize; AGE_BOUNDS.len() + 1];
        let mut importance_sum = 0.0f64;
        let mut content_bytes = 0;
        let mut legacy_records = 0;

        for (generation, record) in &scan.records {
            *by_kind.entry(record.kind.clone()).or_default() += 1;
            for tag in &record.tags {
                *tag_counts.entry(tag.as_str()).or_default() += 1;
            }
            buckets[age_bucket((now - record.created_at).num_seconds())] += 1;
            importance_sum += f64::from(record.importance);
            content_bytes += record.content.len();
            if *generation == SchemaGeneration::Legacy {
                legacy_records += 1;
            }
        }

        let mut top_tags: Vec<(String, usize)> = tag_counts
            .into_iter()
            .map(|(tag, count)| (tag.to_string(), count))
            .collect();
        top_tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_tags.truncate(TOP_TAGS);

        let labels = AGE_BOUNDS
            .iter()
            .map(|(_, label)| *label)
            .chain(std::iter::once(OLDEST_BUCKET));

        Self {
            total,
            by_kind,
            average_importance: if total == 0 {
                0.0
            } else {
                (importance_sum / total as f64) as f32
            },
            age_distribution: labels
                .zip(buckets)
                .map(|(label, count)| (label.to_string(), count))
                .collect(),
            top_tags,
            content_bytes,
            legacy_records,
            unreadable_records: scan.failures.len(),
            tombstones,
            secure_info_set,
            oldest: scan.records.iter().map(|(_, r)| r.created_at).min(),
            newest: scan.records.iter().map(|(_, r)| r.created_at).max(),
        }
    }
}

fn age_bucket(age_secs: i64) -> usize {
    let age_secs = age_secs.max(0);
    AGE_BOUNDS
        .iter()
        .position(|(bound, _)| age_secs < *bound)
        .unwrap_or(AGE_BOUNDS.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemvaultError;
    use crate::memory::types::MemoryRecord;
    use chrono::Duration;

    #[test]
    fn test_empty_scan() {
        let stats = MemoryStats::from_scan(&StoreScan::default(), Utc::now(), 0, false);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.average_importance, 0.0);
        assert!(stats.oldest.is_none());
        assert_eq!(stats.age_distribution.len(), 6);
        assert!(stats.age_distribution.iter().all(|(_, n)| *n == 0));
    }

    #[test]
    fn test_stats_aggregate() {
        let now = Utc::now();
        let scan = StoreScan {
            records: vec![
                (
                    SchemaGeneration::Current,
                    MemoryRecord::new("abcd", 0.2, now - Duration::minutes(5)).with_tags(["x"]),
                ),
                (
                    SchemaGeneration::Legacy,
                    MemoryRecord::new("ef", 0.6, now - Duration::days(3))
                        .with_tags(["x", "y"])
                        .with_kind("personal_info"),
                ),
                (
                    SchemaGeneration::Current,
                    MemoryRecord::new("g", 1.0, now - Duration::days(800)),
                ),
            ],
            failures: vec![("bad".to_string(), MemvaultError::Schema("oops".into()))],
        };

        let stats = MemoryStats::from_scan(&scan, now, 4, true);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_kind["general"], 2);
        assert_eq!(stats.by_kind["personal_info"], 1);
        assert!((stats.average_importance - 0.6).abs() < 1e-6);
        assert_eq!(stats.content_bytes, 7);
        assert_eq!(stats.legacy_records, 1);
        assert_eq!(stats.unreadable_records, 1);
        assert_eq!(stats.tombstones, 4);
        assert!(stats.secure_info_set);
        assert_eq!(stats.top_tags, vec![("x".to_string(), 2), ("y".to_string(), 1)]);

        let counts: Vec<usize> = stats.age_distribution.iter().map(|(_, n)| *n).collect();
        assert_eq!(counts, vec![1, 0, 1, 0, 0, 1]);
        assert_eq!(stats.age_distribution[5].0, ">1 year");
    }

    #[test]
    fn test_age_bucket_edges() {
        assert_eq!(age_bucket(-10), 0);
        assert_eq!(age_bucket(3_599), 0);
        assert_eq!(age_bucket(3_600), 1);
        assert_eq!(age_bucket(604_800), 3);
        assert_eq!(age_bucket(31_536_000), 5);
    }
}
