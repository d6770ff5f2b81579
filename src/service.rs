//! The document service: idempotent ingestion and similarity search.
//!
//! [`DocumentService`] ties the [`Chunker`], the [`Embedder`] (with its
//! shared [`EmbeddingCache`]), and a [`VectorStore`] together. One service
//! instance is constructed by the host and passed to whatever needs it;
//! [`DocumentService::close`] stops its background tasks.
//!
//! # Upsert
//!
//! ```text
//! validate ─▶ documentId = H(source:path) ─▶ lock(documentId)
//!    ─▶ stored hash == content hash? ── yes ─▶ unchanged
//!    │ no
//!    ▼
//! split ─▶ embed every chunk (cache first) ─▶ swap chunk set ─▶ created | updated
//! ```
//!
//! All embeddings are obtained before the store is touched, so a provider
//! failure leaves the previous version of the document fully intact.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use semantic_store_core::chunk::Chunker;
use semantic_store_core::embedding::EmbeddingProvider;
use semantic_store_core::models::{
    content_hash, document_id, ChunkMetadata, ChunkRecord, Document, DocumentInput, Filters,
    SearchHit, StoreStats, UpsertResult, UpsertStatus,
};
use semantic_store_core::search::{SearchParams, MAX_TOP_K};
use semantic_store_core::store::memory::InMemoryVectorStore;
use semantic_store_core::store::VectorStore;
use semantic_store_core::{Result, StoreError};

use crate::cache::{CacheStats, EmbeddingCache, MaintenanceHandle};
use crate::config::{validate as validate_config, Config, StoreConfig};
use crate::counters::CounterSink;
use crate::embedder::{truncate_chars, Embedder};
use crate::embedding::{test_connection, ProviderOverride};

static SOURCE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("source name regex"));

/// Characters of the query echoed into logs.
const QUERY_LOG_CHARS: usize = 50;

/// Caller-facing search options. Unset fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f32>,
    #[serde(default)]
    pub filters: Filters,
}

impl SearchOptions {
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    fn into_params(self) -> Result<SearchParams> {
        let mut params = SearchParams::default().with_filters(self.filters);
        if let Some(top_k) = self.top_k {
            if !(1..=MAX_TOP_K).contains(&top_k) {
                return Err(StoreError::validation(
                    "topK",
                    format!("must be between 1 and {}", MAX_TOP_K),
                ));
            }
            params = params.with_top_k(top_k);
        }
        if let Some(min_score) = self.min_score {
            if !(0.0..=1.0).contains(&min_score) {
                return Err(StoreError::validation("minScore", "must be between 0 and 1"));
            }
            params = params.with_min_score(min_score);
        }
        Ok(params)
    }
}

pub struct DocumentService {
    config: Config,
    store: Arc<dyn VectorStore>,
    chunker: Chunker,
    embedder: Embedder,
    cache: Arc<EmbeddingCache>,
    doc_locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl DocumentService {
    /// Build a service using the backend named in `config.store`.
    ///
    /// Must be called from within a tokio runtime when the cache is
    /// enabled, since it starts the cache maintenance tasks.
    pub fn new(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        sink: Option<Arc<dyn CounterSink>>,
    ) -> anyhow::Result<Self> {
        let store = open_store(&config.store);
        Self::with_store(config, store, provider, sink)
    }

    pub fn with_store(
        config: Config,
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        sink: Option<Arc<dyn CounterSink>>,
    ) -> anyhow::Result<Self> {
        validate_config(&config)?;

        let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap);
        let cache = Arc::new(EmbeddingCache::from_config(&config.cache));

        let (embedder, maintenance) = if config.cache.enabled {
            let handle = cache.spawn_maintenance(
                config.cache.sweep_interval(),
                config.cache.flush_interval(),
                sink,
            );
            (
                Embedder::new(provider, Some(Arc::clone(&cache)), &config.embedding),
                Some(handle),
            )
        } else {
            (Embedder::new(provider, None, &config.embedding), None)
        };

        info!(
            chunk_size = chunker.chunk_size(),
            chunk_overlap = chunker.chunk_overlap(),
            backend = %config.store.backend,
            provider = embedder.provider().model_name(),
            cache_enabled = config.cache.enabled,
            cache_size = config.cache.max_size,
            cache_ttl_secs = config.cache.ttl_secs,
            "Document service started"
        );

        Ok(Self {
            config,
            store,
            chunker,
            embedder,
            cache,
            doc_locks: Arc::new(Mutex::new(HashMap::new())),
            maintenance: Mutex::new(maintenance),
        })
    }

    /// Stop background tasks and flush pending cache counters.
    pub async fn close(&self) {
        let handle = self.maintenance.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            debug!("Document service closed");
        }
    }

    /// Ingest `text` as the content of the document identified by
    /// `input.source` and `input.path`.
    pub async fn upsert(
        &self,
        input: DocumentInput,
        text: &str,
        provider_override: Option<&ProviderOverride>,
    ) -> Result<UpsertResult> {
        validate_input(&input, text)?;

        let document_id = document_id(&input.source, &input.path);
        let hash = match input.hash.as_deref().map(str::trim) {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => content_hash(text),
        };

        let _guard = self.lock_document(&document_id).await;

        let existing = self.store.get_document(&document_id).await?;
        if let Some(doc) = &existing {
            if doc.content_hash == hash {
                info!(
                    document_id = %document_id,
                    status = %UpsertStatus::Unchanged,
                    chunk_count = doc.chunk_count,
                    "Document upserted"
                );
                return Ok(UpsertResult {
                    document_id,
                    chunk_count: doc.chunk_count,
                    status: UpsertStatus::Unchanged,
                });
            }
        }

        let chunks = self.chunker.split(text);
        if chunks.is_empty() {
            return Err(StoreError::NoChunksProduced { document_id });
        }

        let embedder = self.embedder_for(provider_override)?;
        let vectors = embedder
            .embed_all(&chunks)
            .await
            .map_err(|e| e.for_document(&document_id))?;

        let now = Utc::now();
        let status = if existing.is_some() {
            UpsertStatus::Updated
        } else {
            UpsertStatus::Created
        };
        let doc = Document {
            document_id: document_id.clone(),
            source: input.source,
            path: input.path,
            title: input.title,
            content_hash: hash,
            tags: input.tags,
            chunk_count: chunks.len(),
            created_at: existing.map(|d| d.created_at).unwrap_or(now),
            updated_at: now,
            extra: input.extra,
        };

        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(chunk_index, (text, embedding))| ChunkRecord {
                document_id: document_id.clone(),
                chunk_index,
                embedding,
                text,
                metadata: ChunkMetadata::for_chunk(&doc, chunk_index),
            })
            .collect();
        let chunk_count = records.len();

        self.store.replace_document(doc, records).await?;

        info!(
            document_id = %document_id,
            status = %status,
            chunk_count,
            "Document upserted"
        );

        Ok(UpsertResult {
            document_id,
            chunk_count,
            status,
        })
    }

    /// Rank stored chunks against `query`.
    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
        provider_override: Option<&ProviderOverride>,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(StoreError::validation("query", "must not be empty"));
        }
        let params = options.into_params()?;

        let embedder = self.embedder_for(provider_override)?;
        let vector = embedder.embed_one(query).await?;
        let hits = self.store.search(&vector, &params).await?;

        info!(
            query = truncate_chars(query, QUERY_LOG_CHARS),
            top_k = params.top_k,
            min_score = params.min_score,
            results = hits.len(),
            "Search completed"
        );
        Ok(hits)
    }

    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no document has this id.
    pub async fn get(&self, document_id: &str) -> Result<Document> {
        self.store
            .get_document(document_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                document_id: document_id.to_string(),
            })
    }

    /// Chunk records of a document in index order. Empty if unknown.
    pub async fn chunks(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        self.store.document_chunks(document_id).await
    }

    /// Remove a document and all of its chunks. Returns `false` if the id
    /// was unknown.
    pub async fn delete(&self, document_id: &str) -> Result<bool> {
        let _guard = self.lock_document(document_id).await;
        let removed = self.store.delete_document(document_id).await?;
        if removed {
            info!(document_id, "Document deleted");
        }
        Ok(removed)
    }

    pub async fn list(&self, filters: &Filters) -> Result<Vec<Document>> {
        self.store.list_documents(filters).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.store.health_check().await
    }

    /// Embed a probe through the configured provider and verify its
    /// output dimension.
    pub async fn test_provider(&self) -> Result<()> {
        test_connection(self.embedder.provider().as_ref()).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("Embedding cache cleared");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn embedder_for(&self, provider_override: Option<&ProviderOverride>) -> Result<Embedder> {
        let provider = match provider_override {
            Some(o) => o.resolve(&self.config.embedding)?,
            None => None,
        };
        Ok(match provider {
            Some(p) => {
                debug!(model = p.model_name(), "Using provider override");
                self.embedder.with_provider(p)
            }
            None => self.embedder.clone(),
        })
    }

    async fn lock_document(&self, document_id: &str) -> DocumentLock {
        let lock = {
            let mut locks = self.doc_locks.lock();
            Arc::clone(locks.entry(document_id.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        DocumentLock {
            locks: Arc::clone(&self.doc_locks),
            document_id: document_id.to_string(),
            guard: Some(guard),
        }
    }
}

/// Held for the duration of an upsert or delete on one document id.
struct DocumentLock {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    document_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        // Only the map holds it: nobody is waiting on this id.
        if locks
            .get(&self.document_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(&self.document_id);
        }
    }
}

fn open_store(config: &StoreConfig) -> Arc<dyn VectorStore> {
    match config.backend.as_str() {
        "memory" => {}
        other => warn!(
            backend = other,
            "Unknown store backend; falling back to memory"
        ),
    }
    Arc::new(InMemoryVectorStore::new())
}

fn validate_input(input: &DocumentInput, text: &str) -> Result<()> {
    if input.source.trim().is_empty() {
        return Err(StoreError::validation("source", "is required"));
    }
    if !SOURCE_NAME.is_match(&input.source) {
        return Err(StoreError::validation(
            "source",
            "may only contain letters, digits, '_' and '-'",
        ));
    }
    if input.path.trim().is_empty() {
        return Err(StoreError::validation("path", "is required"));
    }
    if input.title.trim().is_empty() {
        return Err(StoreError::validation("title", "is required"));
    }
    if text.trim().is_empty() {
        return Err(StoreError::validation("text", "must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_input() {
        let ok = DocumentInput::new("notes_2024", "/a.md", "A");
        assert!(validate_input(&ok, "text").is_ok());

        let cases = [
            (DocumentInput::new("", "/a", "A"), "text", "source"),
            (DocumentInput::new("bad source", "/a", "A"), "text", "source"),
            (DocumentInput::new("s", " ", "A"), "text", "path"),
            (DocumentInput::new("s", "/a", ""), "text", "title"),
            (DocumentInput::new("s", "/a", "A"), "  \n ", "text"),
        ];
        for (input, text, field) in cases {
            match validate_input(&input, text) {
                Err(StoreError::Validation { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected validation error on {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_search_options_defaults() {
        let params = SearchOptions::default().into_params().unwrap();
        assert_eq!(params.top_k, 5);
        assert_eq!(params.min_score, 0.0);
    }

    #[test]
    fn test_search_options_bounds() {
        assert!(SearchOptions::default().top_k(0).into_params().is_err());
        assert!(SearchOptions::default().top_k(21).into_params().is_err());
        assert!(SearchOptions::default().top_k(20).into_params().is_ok());
        assert!(SearchOptions::default().min_score(-0.1).into_params().is_err());
        assert!(SearchOptions::default().min_score(1.5).into_params().is_err());
        assert_eq!(
            SearchOptions::default()
                .min_score(0.7)
                .into_params()
                .unwrap()
                .min_score,
            0.7
        );
    }

    #[test]
    fn test_search_options_from_json() {
        let opts: SearchOptions = serde_json::from_str(
            r#"{"topK": 3, "filters": {"source": "s1", "tags": ["x"]}}"#,
        )
        .unwrap();
        assert_eq!(opts.top_k, Some(3));
        assert_eq!(opts.min_score, None);
        assert_eq!(opts.filters, Filters::default().source("s1").tag("x"));
    }
}
