//! Fuzzy content search
//!
//! Matching is lexical: query and content are split into lowercase
//! alphanumeric tokens and compared as token sets, so word order and
//! repeated words do not matter. A score is the better of two ratios:
//!
//! - the sorted token strings compared as a whole
//! - the shared tokens compared with each side's full token string, which
//!   scores 1.0 whenever every query token appears in the content
//!
//! Ratios are normalized Levenshtein similarities in `[0, 1]`.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{MemvaultError, Result};
use crate::memory::types::MemoryRecord;
use crate::storage::RecordStore;

/// A memory whose content matched a search query
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub record: MemoryRecord,
    /// Match score in `[0, 1]`
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct FuzzySearch {
    min_score: f32,
}

impl FuzzySearch {
    pub fn new(min_score: f32) -> Result<Self> {
        if !min_score.is_finite() || !(0.0..=1.0).contains(&min_score) {
            return Err(MemvaultError::Config(format!(
                "search min_score must be within [0, 1], got {min_score}"
            )));
        }
        Ok(Self { min_score })
    }

    pub fn min_score(&self) -> f32 {
        self.min_score
    }

    /// Score `content` against `query`, or `None` below the minimum.
    pub fn score(&self, query: &str, content: &str) -> Option<f32> {
        let score = token_ratio(query, content);
        (score >= self.min_score).then_some(score)
    }

    /// Search every live record, best match first.
    ///
    /// Ties are broken by importance, then identifier. A query without any
    /// alphanumeric token matches nothing.
    #[tracing::instrument(level = "debug", skip(self, store))]
    pub async fn search(
        &self,
        store: &RecordStore,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        if limit == 0 || tokens(query).is_empty() {
            return Ok(Vec::new());
        }

        let view = store.view().await;
        let mut hits = Vec::new();
        for id in view.entries().keys() {
            match view.get(id).await {
                Ok(record) => {
                    if let Some(score) = self.score(query, &record.content) {
                        hits.push(SearchHit { record, score });
                    }
                }
                Err(e) => tracing::warn!("Skipping {} during search: {}", id, e),
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.record.importance.total_cmp(&a.record.importance))
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        hits.truncate(limit);

        tracing::debug!("Search matched {} memories", hits.len());
        Ok(hits)
    }
}

/// Token-set similarity of two strings in `[0, 1]`.
pub fn token_ratio(a: &str, b: &str) -> f32 {
    let a = tokens(a);
    let b = tokens(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let sorted_a = join(a.iter());
    let sorted_b = join(b.iter());
    let sort_ratio = ratio(&sorted_a, &sorted_b);

    let shared: Vec<&String> = a.intersection(&b).collect();
    let only_a: Vec<&String> = a.difference(&b).collect();
    let only_b: Vec<&String> = b.difference(&a).collect();

    let set_ratio = if shared.is_empty() {
        0.0
    } else if only_a.is_empty() || only_b.is_empty() {
        1.0
    } else {
        let shared_str = join(shared.iter().copied());
        let with_a = join(shared.iter().chain(only_a.iter()).copied());
        let with_b = join(shared.iter().chain(only_b.iter()).copied());
        ratio(&shared_str, &with_a)
            .max(ratio(&shared_str, &with_b))
            .max(ratio(&with_a, &with_b))
    };

    sort_ratio.max(set_ratio) as f32
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn join<'a>(tokens: impl Iterator<Item = &'a String>) -> String {
    tokens.map(String::as_str).collect::<Vec<_>>().join(" ")
}

fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}
