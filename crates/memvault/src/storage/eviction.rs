//! Rotation of live records to stay within `max_memories`
//!
//! Victims are chosen from the index alone: lowest importance first, then the
//! oldest, then the lowest identifier. Secure info never appears in the index
//! and is therefore never a candidate.

use std::cmp::Ordering;

use crate::storage::index::{IndexEntry, IndexMap};

/// Current occupancy relative to the rotation bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityStatus {
    /// Room for at least one more record
    Normal,
    /// Exactly at the bound; the next insert evicts
    Full,
    /// Over the bound; eviction is required
    EvictionNeeded,
}

/// Selects rotation victims for a bounded store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evictor {
    max_memories: usize,
}

impl Evictor {
    pub fn new(max_memories: usize) -> Self {
        Self { max_memories }
    }

    pub fn max_memories(&self) -> usize {
        self.max_memories
    }

    pub fn capacity_status(&self, live: usize) -> CapacityStatus {
        match live.cmp(&self.max_memories) {
            Ordering::Less => CapacityStatus::Normal,
            Ordering::Equal => CapacityStatus::Full,
            Ordering::Greater => CapacityStatus::EvictionNeeded,
        }
    }

    /// The entries to evict, in eviction order. Empty when within bounds.
    pub fn select_victims(&self, entries: &IndexMap) -> Vec<IndexEntry> {
        let excess = entries.len().saturating_sub(self.max_memories);
        if excess == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<&IndexEntry> = entries.values().collect();
        candidates.sort_by(|a, b| eviction_order(a, b));
        candidates.into_iter().take(excess).cloned().collect()
    }
}

/// Lowest importance, then oldest, then identifier
pub fn eviction_order(a: &IndexEntry, b: &IndexEntry) -> Ordering {
    a.importance
        .total_cmp(&b.importance)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}
