//! Cached, batched embedding of chunk and query text.
//!
//! [`Embedder`] sits between the document service and an
//! [`EmbeddingProvider`]. Each input is truncated to `max_input_chars`
//! characters, looked up in the shared [`EmbeddingCache`], and only sent to
//! the provider on a miss. Chunk lists are processed in groups of
//! `batch_size` whose members run concurrently.

use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use semantic_store_core::embedding::EmbeddingProvider;
use semantic_store_core::{Result, StoreError};

use crate::cache::EmbeddingCache;
use crate::config::EmbeddingConfig;

#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Option<Arc<EmbeddingCache>>,
    batch_size: usize,
    max_input_chars: usize,
    timeout: Duration,
}

impl Embedder {
    /// Pass `None` for `cache` to call the provider for every input.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Option<Arc<EmbeddingCache>>,
        config: &EmbeddingConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            batch_size: config.batch_size.max(1),
            max_input_chars: config.max_input_chars.max(1),
            timeout: config.timeout(),
        }
    }

    /// Same cache and limits, different provider.
    pub fn with_provider(&self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            ..self.clone()
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let input = truncate_chars(text, self.max_input_chars);
        let provider = Arc::clone(&self.provider);
        let timeout = self.timeout;
        let compute = move |text: String| async move {
            let embedding = match tokio::time::timeout(timeout, provider.embed(&text)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(StoreError::provider(format!(
                        "embedding timed out after {}s",
                        timeout.as_secs_f32()
                    )));
                }
            };
            // Wrong-length vectors never reach the cache or the store.
            let expected = provider.dims();
            if expected > 0 && embedding.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
            Ok(embedding)
        };

        match &self.cache {
            Some(cache) => cache.get_or_compute(input, compute).await,
            None => compute(input.to_string()).await,
        }
    }

    /// Embed `texts` in order. A failure carries the index of the
    /// offending input.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());

        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let offset = batch_no * self.batch_size;
            let calls = batch.iter().enumerate().map(|(i, text)| async move {
                self.embed_one(text)
                    .await
                    .map_err(|e| e.for_chunk(offset + i))
            });
            let vectors = try_join_all(calls).await?;
            debug!(
                batch = batch_no,
                size = vectors.len(),
                model = self.provider.model_name(),
                "Embedded batch"
            );
            out.extend(vectors);
        }

        Ok(out)
    }
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct LengthProvider {
        seen: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl EmbeddingProvider for LengthProvider {
        fn model_name(&self) -> &str {
            "length"
        }

        fn dims(&self) -> usize {
            1
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.seen.lock().push(text.to_string());
            if self.fail_on.as_deref() == Some(text) {
                return Err(StoreError::provider("boom"));
            }
            Ok(vec![text.chars().count() as f32])
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn model_name(&self) -> &str {
            "slow"
        }

        fn dims(&self) -> usize {
            1
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![1.0])
        }
    }

    fn config(batch_size: usize, max_input_chars: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size,
            max_input_chars,
            timeout_secs: 5,
            ..Default::default()
        }
    }

    fn cache() -> Arc<EmbeddingCache> {
        Arc::new(EmbeddingCache::new(100, Duration::from_secs(60)))
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
    }

    #[tokio::test]
    async fn test_embed_all_keeps_order_across_batches() {
        let provider = Arc::new(LengthProvider::default());
        let embedder = Embedder::new(provider.clone(), Some(cache()), &config(2, 100));
        let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let vectors = embedder.embed_all(&texts).await.unwrap();
        let lens: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lens, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(provider.seen.lock().len(), 5);
    }

    #[tokio::test]
    async fn test_cache_shared_between_inputs() {
        let provider = Arc::new(LengthProvider::default());
        let shared = cache();
        let embedder = Embedder::new(provider.clone(), Some(shared.clone()), &config(10, 100));

        let texts = vec!["same".to_string(), "other".to_string()];
        embedder.embed_all(&texts).await.unwrap();
        embedder.embed_one("same").await.unwrap();

        assert_eq!(provider.seen.lock().len(), 2);
        assert_eq!(shared.stats().hit_count, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_calls_provider_every_time() {
        let provider = Arc::new(LengthProvider::default());
        let embedder = Embedder::new(provider.clone(), None, &config(10, 100));
        embedder.embed_one("x").await.unwrap();
        embedder.embed_one("x").await.unwrap();
        assert_eq!(provider.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_input_truncated_before_embedding() {
        let provider = Arc::new(LengthProvider::default());
        let embedder = Embedder::new(provider.clone(), Some(cache()), &config(10, 4));
        let v = embedder.embed_one("abcdefgh").await.unwrap();
        assert_eq!(v, vec![4.0]);
        assert_eq!(provider.seen.lock()[0], "abcd");

        // Both inputs truncate to the same text and share one cache entry.
        embedder.embed_one("abcdXYZ").await.unwrap();
        assert_eq!(provider.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_reports_chunk_index() {
        let provider = Arc::new(LengthProvider {
            fail_on: Some("c".to_string()),
            ..Default::default()
        });
        let embedder = Embedder::new(provider, Some(cache()), &config(2, 100));
        let texts: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();

        let err = embedder.embed_all(&texts).await.unwrap_err();
        match err {
            StoreError::ProviderUnavailable { chunk_index, .. } => assert_eq!(chunk_index, Some(2)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    struct WrongDims;

    #[async_trait]
    impl EmbeddingProvider for WrongDims {
        fn model_name(&self) -> &str {
            "wrong-dims"
        }

        fn dims(&self) -> usize {
            4
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected_and_not_cached() {
        let shared = cache();
        let embedder = Embedder::new(Arc::new(WrongDims), Some(shared.clone()), &config(10, 100));

        let err = embedder.embed_one("short vector").await.unwrap_err();
        assert_eq!(
            err,
            StoreError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        );
        assert!(shared.is_empty());

        let uncached = Embedder::new(Arc::new(WrongDims), None, &config(10, 100));
        assert!(uncached.embed_one("short vector").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_provider_unavailable() {
        let embedder = Embedder::new(Arc::new(SlowProvider), Some(cache()), &config(10, 100));
        let err = embedder.embed_one("q").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(err.is_retryable());
    }
}
