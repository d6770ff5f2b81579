//! In-memory [`VectorStore`] implementation.
//!
//! Documents live in a `HashMap`, chunk vectors in a flat `Vec`, both
//! behind a single `std::sync::RwLock` so a document's chunk set is
//! swapped in one critical section. Search is a brute-force linear scan.
//! Nothing is persisted.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChunkRecord, Document, Filters, SearchHit, StoreStats};
use crate::search::{rank, SearchParams};

use super::VectorStore;

#[derive(Default)]
struct State {
    docs: HashMap<String, Document>,
    vectors: Vec<ChunkRecord>,
}

/// In-memory store for single-process deployments and tests.
#[derive(Default)]
pub struct InMemoryVectorStore {
    state: RwLock<State>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave `State` half-updated
    // (every mutation is a single retain/extend/insert), so poisoning is
    // safe to ignore.
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn replace_document(&self, doc: Document, records: Vec<ChunkRecord>) -> Result<()> {
        let mut state = self.write();
        let id = doc.document_id.clone();
        state.vectors.retain(|r| r.document_id != id);
        state.vectors.extend(records);
        state.docs.insert(id, doc);
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read().docs.get(id).cloned())
    }

    async fn document_chunks(&self, id: &str) -> Result<Vec<ChunkRecord>> {
        let state = self.read();
        let mut chunks: Vec<ChunkRecord> = state
            .vectors
            .iter()
            .filter(|r| r.document_id == id)
            .cloned()
            .collect();
        chunks.sort_by_key(|r| r.chunk_index);
        Ok(chunks)
    }

    async fn list_documents(&self, filters: &Filters) -> Result<Vec<Document>> {
        Ok(self
            .read()
            .docs
            .values()
            .filter(|d| filters.matches(&d.source, &d.tags))
            .cloned()
            .collect())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut state = self.write();
        if state.docs.remove(id).is_none() {
            return Ok(false);
        }
        state.vectors.retain(|r| r.document_id != id);
        Ok(true)
    }

    async fn search(&self, query: &[f32], params: &SearchParams) -> Result<Vec<SearchHit>> {
        let state = self.read();
        rank(query, &state.vectors, params)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let state = self.read();
        Ok(StoreStats::new(state.docs.len(), state.vectors.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{document_id, ChunkMetadata};
    use chrono::Utc;

    fn doc(source: &str, path: &str, tags: &[&str], chunk_count: usize) -> Document {
        let now = Utc::now();
        Document {
            document_id: document_id(source, path),
            source: source.to_string(),
            path: path.to_string(),
            title: path.to_string(),
            content_hash: "h".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            chunk_count,
            created_at: now,
            updated_at: now,
            extra: Default::default(),
        }
    }

    fn records(doc: &Document, vectors: &[Vec<f32>]) -> Vec<ChunkRecord> {
        vectors
            .iter()
            .enumerate()
            .map(|(i, v)| ChunkRecord {
                document_id: doc.document_id.clone(),
                chunk_index: i,
                embedding: v.clone(),
                text: format!("{} chunk {}", doc.path, i),
                metadata: ChunkMetadata::for_chunk(doc, i),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_chunk_set() {
        let store = InMemoryVectorStore::new();
        let d = doc("s", "/a", &[], 3);
        store
            .replace_document(d.clone(), records(&d, &[vec![1.0], vec![2.0], vec![3.0]]))
            .await
            .unwrap();

        let d2 = doc("s", "/a", &[], 1);
        store
            .replace_document(d2.clone(), records(&d2, &[vec![9.0]]))
            .await
            .unwrap();

        let chunks = store.document_chunks(&d.document_id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].embedding, vec![9.0]);
        assert_eq!(store.stats().await.unwrap().chunk_count, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_chunks() {
        let store = InMemoryVectorStore::new();
        let a = doc("s", "/a", &[], 1);
        let b = doc("s", "/b", &[], 1);
        store.replace_document(a.clone(), records(&a, &[vec![1.0, 0.0]])).await.unwrap();
        store.replace_document(b.clone(), records(&b, &[vec![1.0, 0.0]])).await.unwrap();

        assert!(store.delete_document(&a.document_id).await.unwrap());
        assert!(!store.delete_document(&a.document_id).await.unwrap());
        assert!(store.get_document(&a.document_id).await.unwrap().is_none());

        let hits = store.search(&[1.0, 0.0], &SearchParams::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.document_id, b.document_id);
    }

    #[tokio::test]
    async fn test_list_documents_filters() {
        let store = InMemoryVectorStore::new();
        for d in [
            doc("s1", "/a", &["x"], 0),
            doc("s1", "/b", &["y"], 0),
            doc("s2", "/c", &["x"], 0),
        ] {
            store.replace_document(d, Vec::new()).await.unwrap();
        }

        assert_eq!(store.list_documents(&Filters::default()).await.unwrap().len(), 3);
        assert_eq!(
            store.list_documents(&Filters::default().source("s1")).await.unwrap().len(),
            2
        );
        let both = store
            .list_documents(&Filters::default().source("s1").tag("x"))
            .await
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].path, "/a");
    }

    #[tokio::test]
    async fn test_stats() {
        let store = InMemoryVectorStore::new();
        assert_eq!(store.stats().await.unwrap(), StoreStats::new(0, 0));
        let d = doc("s", "/a", &[], 2);
        store.replace_document(d.clone(), records(&d, &[vec![1.0], vec![1.0]])).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.avg_chunks_per_document, 2.0);
        assert!(store.health_check().await.unwrap());
    }
}
