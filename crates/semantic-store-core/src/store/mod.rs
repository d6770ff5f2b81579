//! Storage abstraction for Semantic Store.
//!
//! The [`VectorStore`] trait defines the storage operations needed by the
//! document service: whole-document chunk replacement, metadata lookup,
//! and similarity search. Backends must be `Send + Sync` to work with
//! async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChunkRecord, Document, Filters, SearchHit, StoreStats};
use crate::search::SearchParams;

/// Abstract storage backend for documents and their chunk vectors.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_document`](VectorStore::replace_document) | Store a document and swap in its full chunk set |
/// | [`get_document`](VectorStore::get_document) | Retrieve document metadata |
/// | [`document_chunks`](VectorStore::document_chunks) | Retrieve a document's chunk records in index order |
/// | [`list_documents`](VectorStore::list_documents) | List documents matching filters |
/// | [`delete_document`](VectorStore::delete_document) | Remove a document and all its chunks |
/// | [`search`](VectorStore::search) | Ranked similarity search over all chunks |
/// | [`stats`](VectorStore::stats) | Document and chunk counts |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace `doc` together with its complete chunk set.
    ///
    /// Readers observe either the old document and chunks or the new
    /// ones, never a mix.
    async fn replace_document(&self, doc: Document, records: Vec<ChunkRecord>) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn document_chunks(&self, id: &str) -> Result<Vec<ChunkRecord>>;

    /// Order is unspecified.
    async fn list_documents(&self, filters: &Filters) -> Result<Vec<Document>>;

    /// Returns `false` if no such document existed.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    async fn search(&self, query: &[f32], params: &SearchParams) -> Result<Vec<SearchHit>>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
