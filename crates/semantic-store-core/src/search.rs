//! Exact top-K similarity ranking over chunk vectors.
//!
//! The ranking operates on any iterator of [`ChunkRecord`]s, with no
//! storage or runtime dependencies. Store backends call [`rank`] under
//! their own read lock.
//!
//! # Algorithm
//!
//! 1. Drop records whose metadata fails the [`Filters`].
//! 2. Score the rest with cosine similarity against the query vector.
//! 3. Drop scores below `min_score`.
//! 4. Sort by score descending. The sort is stable, so ties keep
//!    insertion order.
//! 5. Truncate to `top_k`.

use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{ChunkRecord, Filters, SearchHit};

/// Upper bound on results per query.
pub const MAX_TOP_K: usize = 20;

pub const DEFAULT_TOP_K: usize = 5;

/// Ranking parameters for a single query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Maximum results to return; clamped to [`MAX_TOP_K`].
    pub top_k: usize,
    /// Minimum cosine similarity for a result to qualify.
    pub min_score: f32,
    #[serde(default)]
    pub filters: Filters,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score: 0.0,
            filters: Filters::default(),
        }
    }
}

impl SearchParams {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn effective_top_k(&self) -> usize {
        self.top_k.min(MAX_TOP_K)
    }
}

/// Rank `records` against `query`, returning at most `top_k` hits.
///
/// # Errors
///
/// Propagates [`DimensionMismatch`](crate::StoreError::DimensionMismatch)
/// if any candidate vector differs in length from the query.
pub fn rank<'a, I>(query: &[f32], records: I, params: &SearchParams) -> Result<Vec<SearchHit>>
where
    I: IntoIterator<Item = &'a ChunkRecord>,
{
    let mut scored: Vec<(f32, &ChunkRecord)> = Vec::new();

    for record in records {
        let meta = &record.metadata;
        if !params.filters.matches(&meta.source, &meta.tags) {
            continue;
        }
        let score = cosine_similarity(query, &record.embedding)?;
        if score >= params.min_score {
            scored.push((score, record));
        }
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(params.effective_top_k());

    Ok(scored
        .into_iter()
        .map(|(score, record)| SearchHit {
            text: record.text.clone(),
            score,
            metadata: record.metadata.clone(),
        })
        .collect())
}
