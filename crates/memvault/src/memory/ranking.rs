//! Recency weighting for retrieval
//!
//! A record's recency weight halves every `half_life`:
//!
//! ```text
//! weight = 0.5 ^ (age / half_life)
//! ```
//!
//! Ages below zero (a record stamped ahead of the clock) count as zero, so the
//! weight is always in (0, 1] and never increases with age.

use chrono::{DateTime, Duration, Utc};

use crate::config::RankingConfig;
use crate::storage::IndexEntry;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecencyDecay {
    half_life: Duration,
}

impl Default for RecencyDecay {
    fn default() -> Self {
        Self::from_config(&RankingConfig::default())
    }
}

impl RecencyDecay {
    pub fn new(half_life: Duration) -> Self {
        Self { half_life }
    }

    pub fn from_config(config: &RankingConfig) -> Self {
        Self::new(config.half_life())
    }

    pub fn half_life(&self) -> Duration {
        self.half_life
    }

    pub fn weight(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
        let age_ms = (now - created_at).num_milliseconds().max(0) as f64;
        let half_life_ms = self.half_life.num_milliseconds().max(1) as f64;
        0.5_f64.powf(age_ms / half_life_ms) as f32
    }

    /// importance × recency weight
    pub fn score(&self, entry: &IndexEntry, now: DateTime<Utc>) -> f32 {
        entry.importance * self.weight(entry.created_at, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn decay() -> RecencyDecay {
        RecencyDecay::new(Duration::hours(24))
    }

    #[test]
    fn test_weight_at_zero_age_is_one() {
        let now = Utc::now();
        assert_eq!(decay().weight(now, now), 1.0);
    }

    #[test]
    fn test_weight_halves_each_half_life() {
        let now = Utc::now();
        let one = decay().weight(now - Duration::hours(24), now);
        let two = decay().weight(now - Duration::hours(48), now);
        assert!((one - 0.5).abs() < 1e-6);
        assert!((two - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_future_timestamps_count_as_now() {
        let now = Utc::now();
        assert_eq!(decay().weight(now + Duration::hours(5), now), 1.0);
    }

    #[test]
    fn test_weight_is_non_increasing_in_age() {
        let now = Utc::now();
        let mut previous = f32::INFINITY;
        for hours in [0, 1, 2, 12, 24, 100, 1_000, 100_000] {
            let weight = decay().weight(now - Duration::hours(hours), now);
            assert!(weight <= previous);
            assert!(weight >= 0.0);
            previous = weight;
        }
    }

    #[test]
    fn test_score_multiplies_importance() {
        let now = Utc::now();
        let entry = IndexEntry {
            id: "a".to_string(),
            created_at: now - Duration::hours(24),
            importance: 0.8,
            tags: BTreeSet::new(),
            kind: "general".to_string(),
        };
        assert!((decay().score(&entry, now) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_default_half_life_is_a_week() {
        assert_eq!(RecencyDecay::default().half_life(), Duration::hours(168));
    }
}
