//! Core data models used throughout Semantic Store.
//!
//! These types represent the documents, chunk vectors, and search results
//! that flow through the ingestion and retrieval pipeline. All of them
//! serialize with camelCase field names so the route layer can return
//! them as-is.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Passthrough bag for caller-defined metadata fields.
pub type Extra = serde_json::Map<String, serde_json::Value>;

/// Caller-supplied identity and display fields for an ingested document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInput {
    pub source: String,
    pub path: String,
    pub title: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Pre-computed content hash, to skip re-hashing large text.
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub extra: Extra,
}

impl DocumentInput {
    pub fn new(source: &str, path: &str, title: &str) -> Self {
        Self {
            source: source.to_string(),
            path: path.to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Stored document metadata. The body text is not retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub document_id: String,
    pub source: String,
    pub path: String,
    pub title: String,
    pub content_hash: String,
    pub tags: BTreeSet<String>,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: Extra,
}

/// Denormalized document fields carried on every chunk record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub document_id: String,
    pub chunk_index: usize,
    pub source: String,
    pub path: String,
    pub title: String,
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: Extra,
}

impl ChunkMetadata {
    pub fn for_chunk(doc: &Document, chunk_index: usize) -> Self {
        Self {
            document_id: doc.document_id.clone(),
            chunk_index,
            source: doc.source.clone(),
            path: doc.path.clone(),
            title: doc.title.clone(),
            tags: doc.tags.clone(),
            extra: doc.extra.clone(),
        }
    }
}

/// One embedded chunk. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub document_id: String,
    pub chunk_index: usize,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertStatus {
    Created,
    Updated,
    Unchanged,
}

impl std::fmt::Display for UpsertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpsertStatus::Created => "created",
            UpsertStatus::Updated => "updated",
            UpsertStatus::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertResult {
    pub document_id: String,
    pub chunk_count: usize,
    pub status: UpsertStatus,
}

/// Conjunctive metadata filters. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(default)]
    pub source: Option<String>,
    /// Matches when the record shares at least one tag with this list.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Filters {
    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn matches(&self, source: &str, tags: &BTreeSet<String>) -> bool {
        if let Some(want) = &self.source {
            if want != source {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| tags.contains(t)) {
            return false;
        }
        true
    }
}

/// A ranked chunk returned from similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub text: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub avg_chunks_per_document: f64,
}

impl StoreStats {
    pub fn new(document_count: usize, chunk_count: usize) -> Self {
        let avg = if document_count > 0 {
            let raw = chunk_count as f64 / document_count as f64;
            (raw * 100.0).round() / 100.0
        } else {
            0.0
        };
        Self {
            document_count,
            chunk_count,
            avg_chunks_per_document: avg,
        }
    }
}

/// Hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable document id for a `(source, path)` pair.
///
/// The first 128 bits of `SHA-256("{source}:{path}")`, hex encoded.
pub fn document_id(source: &str, path: &str) -> String {
    let mut id = content_hash(&format!("{}:{}", source, path));
    id.truncate(32);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_document_id_deterministic() {
        let a = document_id("s1", "/a.txt");
        let b = document_id("s1", "/a.txt");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, document_id("s1", "/b.txt"));
        assert_ne!(a, document_id("s2", "/a.txt"));
    }

    #[test]
    fn test_content_hash_hex() {
        let h = content_hash("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_filters_conjunctive() {
        let f = Filters::default().source("s1").tag("x");
        assert!(f.matches("s1", &tags(&["x", "y"])));
        assert!(!f.matches("s2", &tags(&["x"])));
        assert!(!f.matches("s1", &tags(&["y"])));
    }

    #[test]
    fn test_empty_filters_match_everything() {
        assert!(Filters::default().matches("anything", &BTreeSet::new()));
    }

    #[test]
    fn test_stats_average_rounding() {
        let stats = StoreStats::new(3, 10);
        assert_eq!(stats.avg_chunks_per_document, 3.33);
        assert_eq!(StoreStats::new(0, 0).avg_chunks_per_document, 0.0);
    }

    #[test]
    fn test_upsert_result_json_shape() {
        let r = UpsertResult {
            document_id: "abc".to_string(),
            chunk_count: 2,
            status: UpsertStatus::Unchanged,
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"documentId": "abc", "chunkCount": 2, "status": "unchanged"})
        );
    }
}
