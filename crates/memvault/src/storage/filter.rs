//! Filter types for listing memories
//!
//! Index-level criteria are checked against [`IndexEntry`] without loading
//! bodies; `content_contains` needs the loaded record.

use chrono::{DateTime, Utc};

use crate::memory::types::MemoryRecord;
use crate::storage::index::IndexEntry;

/// Filter criteria for listing memories.
///
/// All fields are optional - when `None`, that filter is not applied.
/// Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    /// Minimum importance (inclusive)
    pub min_importance: Option<f32>,
    /// Every listed tag must be present
    pub tags: Vec<String>,
    /// Exact kind match
    pub kind: Option<String>,
    /// Only memories created at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the content
    pub content_contains: Option<String>,
}

impl MemoryFilter {
    /// Create a new empty filter (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_importance(mut self, min_importance: f32) -> Self {
        self.min_importance = Some(min_importance);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn containing(mut self, text: impl Into<String>) -> Self {
        self.content_contains = Some(text.into());
        self
    }

    pub fn matches_entry(&self, entry: &IndexEntry) -> bool {
        if let Some(min) = self.min_importance {
            if entry.importance < min {
                return false;
            }
        }
        if let Some(ref kind) = self.kind {
            if &entry.kind != kind {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.created_at < since {
                return false;
            }
        }
        self.tags.iter().all(|t| entry.tags.contains(t))
    }

    pub fn matches_record(&self, record: &MemoryRecord) -> bool {
        if !self.matches_entry(&IndexEntry::from(record)) {
            return false;
        }
        match self.content_contains {
            Some(ref needle) => record
                .content
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            None => true,
        }
    }

    /// Whether matching needs record bodies
    pub fn needs_content(&self) -> bool {
        self.content_contains.is_some()
    }

    /// Check if this filter is empty (no conditions set)
    pub fn is_empty(&self) -> bool {
        self.min_importance.is_none()
            && self.tags.is_empty()
            && self.kind.is_none()
            && self.since.is_none()
            && self.content_contains.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> MemoryRecord {
        MemoryRecord::new("My sister lives in Porto", 0.6, Utc::now())
            .with_tags(["family", "location"])
            .with_kind("personal_info")
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = MemoryFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches_record(&record()));
    }

    #[test]
    fn test_min_importance() {
        let entry = IndexEntry::from(&record());
        assert!(MemoryFilter::new().with_min_importance(0.6).matches_entry(&entry));
        assert!(!MemoryFilter::new().with_min_importance(0.61).matches_entry(&entry));
    }

    #[test]
    fn test_tags_require_all() {
        let entry = IndexEntry::from(&record());
        assert!(MemoryFilter::new().with_tag("family").matches_entry(&entry));
        assert!(
            !MemoryFilter::new()
                .with_tag("family")
                .with_tag("work")
                .matches_entry(&entry)
        );
    }

    #[test]
    fn test_kind_and_since() {
        let record = record();
        let entry = IndexEntry::from(&record);
        assert!(MemoryFilter::new().with_kind("personal_info").matches_entry(&entry));
        assert!(!MemoryFilter::new().with_kind("general").matches_entry(&entry));

        let later = record.created_at + Duration::seconds(1);
        assert!(!MemoryFilter::new().since(later).matches_entry(&entry));
        assert!(MemoryFilter::new().since(record.created_at).matches_entry(&entry));
    }

    #[test]
    fn test_content_contains_is_case_insensitive() {
        let filter = MemoryFilter::new().containing("porto");
        assert!(filter.needs_content());
        assert!(filter.matches_record(&record()));
        assert!(!MemoryFilter::new().containing("lisbon").matches_record(&record()));
    }
}
