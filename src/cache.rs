//! Content-addressed embedding cache with LRU eviction and lazy TTL expiry.
//!
//! Entries are keyed by the SHA-256 of the exact text that is embedded.
//! A read that finds an entry older than the TTL drops it and counts a
//! miss; a background sweeper (see [`EmbeddingCache::spawn_maintenance`])
//! removes expired entries nobody reads again.
//!
//! # Counters
//!
//! Hits, misses, and capacity evictions are counted locally (reported by
//! [`EmbeddingCache::stats`]) and mirrored into a pending-delta buffer.
//! The flusher task swaps that buffer to zero and hands the deltas to a
//! [`CounterSink`]. A failed write drops those deltas.
//!
//! # Concurrent misses
//!
//! [`EmbeddingCache::get_or_compute`] keeps one shared future per key
//! while a computation is in flight, so concurrent callers for the same
//! text wait on a single provider call. Only the caller that started the
//! computation records a miss. If that caller is dropped before the
//! computation finishes, the slot is cleared and the next caller starts over.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use semantic_store_core::models::content_hash;
use semantic_store_core::Result;

use crate::config::CacheConfig;
use crate::counters::{CounterDeltas, CounterSink};

type PendingEmbedding = Shared<BoxFuture<'static, Result<Vec<f32>>>>;

struct Entry {
    embedding: Vec<f32>,
    inserted_at: Instant,
}

struct Inner {
    entries: LruCache<String, Entry>,
    in_flight: HashMap<String, PendingEmbedding>,
    counters: CounterDeltas,
    pending: CounterDeltas,
}

impl Inner {
    /// Fresh entry for `key`, promoting it to most recently used.
    /// Expired entries are removed. Does not touch the counters.
    fn lookup(&mut self, key: &str, ttl: Duration) -> Option<Vec<f32>> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if now.duration_since(entry.inserted_at) <= ttl {
            return Some(entry.embedding.clone());
        }
        self.entries.pop(key);
        None
    }

    fn store(&mut self, key: String, embedding: Vec<f32>) {
        if !self.entries.contains(&key)
            && self.entries.len() >= self.entries.cap().get()
            && self.entries.pop_lru().is_some()
        {
            self.counters.evictions += 1;
            self.pending.evictions += 1;
        }
        self.entries.put(
            key,
            Entry {
                embedding,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove the in-flight slot for `key` if it still holds `pending`.
    fn retire(&mut self, key: &str, pending: &PendingEmbedding) -> bool {
        let ours = self
            .in_flight
            .get(key)
            .is_some_and(|current| current.ptr_eq(pending));
        if ours {
            self.in_flight.remove(key);
        }
        ours
    }

    fn record_hit(&mut self) {
        self.counters.hits += 1;
        self.pending.hits += 1;
    }

    fn record_miss(&mut self) {
        self.counters.misses += 1;
        self.pending.misses += 1;
    }
}

/// Held by the caller that started a computation. Clears the in-flight
/// slot if that caller is dropped mid-await.
struct InFlightGuard<'a> {
    inner: &'a Mutex<Inner>,
    key: String,
    pending: PendingEmbedding,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.inner.lock().retire(&self.key, &self.pending);
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    /// `hits / (hits + misses)`, or `0.0` before any lookup.
    pub hit_rate: f64,
    /// Entry time-to-live in milliseconds.
    pub ttl: u64,
}

pub struct EmbeddingCache {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl EmbeddingCache {
    /// A `max_size` of zero is treated as one.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(cap),
                in_flight: HashMap::new(),
                counters: CounterDeltas::default(),
                pending: CounterDeltas::default(),
            }),
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_size, config.ttl())
    }

    /// Cache key for `text`.
    pub fn key(text: &str) -> String {
        content_hash(text)
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = Self::key(text);
        let mut inner = self.inner.lock();
        let found = inner.lookup(&key, self.ttl);
        if found.is_some() {
            inner.record_hit();
        } else {
            inner.record_miss();
        }
        found
    }

    /// Store `embedding` for `text`, evicting the least recently used entry
    /// when the cache is full and `text` is not already present.
    pub fn insert(&self, text: &str, embedding: Vec<f32>) {
        self.inner.lock().store(Self::key(text), embedding);
    }

    /// Return the cached embedding for `text`, or run `compute` and cache
    /// its result.
    ///
    /// Errors from `compute` are returned to every waiting caller and are
    /// not cached.
    pub async fn get_or_compute<F, Fut>(&self, text: &str, compute: F) -> Result<Vec<f32>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Vec<f32>>> + Send + 'static,
    {
        let key = Self::key(text);

        let (pending, _starter) = {
            let mut inner = self.inner.lock();
            if let Some(embedding) = inner.lookup(&key, self.ttl) {
                inner.record_hit();
                return Ok(embedding);
            }
            if let Some(existing) = inner.in_flight.get(&key).cloned() {
                (existing, None)
            } else {
                inner.record_miss();
                let fut = compute(text.to_string()).boxed().shared();
                inner.in_flight.insert(key.clone(), fut.clone());
                let guard = InFlightGuard {
                    inner: &self.inner,
                    key: key.clone(),
                    pending: fut.clone(),
                };
                (fut, Some(guard))
            }
        };

        let result = pending.clone().await;

        // Whoever finishes first retires the in-flight slot and caches the
        // result. A starter dropped before completion is handled by its guard.
        {
            let mut inner = self.inner.lock();
            if inner.retire(&key, &pending) {
                if let Ok(embedding) = &result {
                    inner.store(key, embedding.clone());
                }
            }
        }
        result
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.inserted_at) > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        expired.len()
    }

    /// Drop all entries and reset the local counters.
    ///
    /// Pending deltas are kept so activity already counted still reaches
    /// the sink.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.counters = CounterDeltas::default();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let c = inner.counters;
        let lookups = c.hits + c.misses;
        CacheStats {
            size: inner.entries.len(),
            max_size: inner.entries.cap().get(),
            hit_count: c.hits,
            miss_count: c.misses,
            eviction_count: c.evictions,
            hit_rate: if lookups > 0 {
                c.hits as f64 / lookups as f64
            } else {
                0.0
            },
            ttl: self.ttl.as_millis() as u64,
        }
    }

    /// Swap the pending deltas with zero and return what was there.
    pub fn take_pending(&self) -> CounterDeltas {
        std::mem::take(&mut self.inner.lock().pending)
    }

    /// Push pending deltas to `sink`. Returns `true` if anything was
    /// written. Failures are logged and the deltas are lost.
    pub async fn flush_to(&self, sink: &dyn CounterSink) -> bool {
        let deltas = self.take_pending();
        if deltas.is_empty() {
            return false;
        }
        match sink.increment_counters(deltas).await {
            Ok(()) => {
                debug!(
                    hits = deltas.hits,
                    misses = deltas.misses,
                    evictions = deltas.evictions,
                    "Flushed embedding cache counters"
                );
                true
            }
            Err(e) => {
                warn!(
                    error = %e,
                    hits = deltas.hits,
                    misses = deltas.misses,
                    evictions = deltas.evictions,
                    "Failed to flush embedding cache counters; deltas dropped"
                );
                false
            }
        }
    }

    /// Start the periodic sweeper and, when a sink is given, the counter
    /// flusher on the current tokio runtime.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        sweep_interval: Duration,
        flush_interval: Duration,
        sink: Option<Arc<dyn CounterSink>>,
    ) -> MaintenanceHandle {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let cache = Arc::clone(self);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired();
                        if removed > 0 {
                            info!(removed, "Swept expired embedding cache entries");
                        }
                    }
                }
            }
        }));

        if let Some(sink) = sink.clone() {
            let cache = Arc::clone(self);
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(flush_interval.max(Duration::from_millis(1)));
                ticker.tick().await;
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            cache.flush_to(sink.as_ref()).await;
                        }
                    }
                }
            }));
        }

        MaintenanceHandle {
            cancel,
            tasks,
            cache: Arc::clone(self),
            sink,
        }
    }
}

/// Owns the background sweeper and flusher tasks.
///
/// Dropping the handle stops the tasks without a final flush; call
/// [`shutdown`](MaintenanceHandle::shutdown) to flush remaining deltas.
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    cache: Arc<EmbeddingCache>,
    sink: Option<Arc<dyn CounterSink>>,
}

impl MaintenanceHandle {
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
        if let Some(sink) = self.sink.take() {
            self.cache.flush_to(sink.as_ref()).await;
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semantic_store_core::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<CounterDeltas>>,
    }

    #[async_trait::async_trait]
    impl CounterSink for RecordingSink {
        async fn increment_counters(&self, deltas: CounterDeltas) -> anyhow::Result<()> {
            self.received.lock().push(deltas);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait::async_trait]
    impl CounterSink for FailingSink {
        async fn increment_counters(&self, _deltas: CounterDeltas) -> anyhow::Result<()> {
            anyhow::bail!("database is locked")
        }
    }

    #[test]
    fn test_get_counts_hits_and_misses() {
        let cache = EmbeddingCache::new(10, TTL);
        assert!(cache.get("alpha").is_none());
        cache.insert("alpha", vec![1.0, 2.0]);
        assert_eq!(cache.get("alpha"), Some(vec![1.0, 2.0]));

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.max_size, 10);
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.ttl, 60_000);
    }

    #[test]
    fn test_empty_cache_hit_rate_is_zero() {
        let cache = EmbeddingCache::new(1, TTL);
        assert_eq!(cache.stats().hit_rate, 0.0);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache = EmbeddingCache::new(3, TTL);
        for text in ["a", "b", "c", "d"] {
            cache.insert(text, vec![1.0]);
        }

        let stats = cache.stats();
        assert_eq!(stats.eviction_count, 1);
        assert_eq!(stats.size, 3);

        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats().miss_count, 1);
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn test_read_refreshes_recency() {
        let cache = EmbeddingCache::new(2, TTL);
        cache.insert("a", vec![1.0]);
        cache.insert("b", vec![2.0]);
        assert!(cache.get("a").is_some());
        cache.insert("c", vec![3.0]);

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = EmbeddingCache::new(2, TTL);
        cache.insert("a", vec![1.0]);
        cache.insert("b", vec![2.0]);
        cache.insert("a", vec![9.0]);
        assert_eq!(cache.stats().eviction_count, 0);
        assert_eq!(cache.get("a"), Some(vec![9.0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss() {
        let cache = EmbeddingCache::new(10, TTL);
        cache.insert("a", vec![1.0]);

        tokio::time::advance(TTL).await;
        assert!(cache.get("a").is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get("a").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.size, 0);
        assert_eq!(stats.eviction_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = EmbeddingCache::new(10, TTL);
        cache.insert("old1", vec![1.0]);
        cache.insert("old2", vec![1.0]);
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.insert("young", vec![1.0]);
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(cache.sweep_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.sweep_expired(), 0);
    }

    #[tokio::test]
    async fn test_get_or_compute_caches_result() {
        let cache = EmbeddingCache::new(10, TTL);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let v = cache
                .get_or_compute("hello", move |text| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![text.len() as f32])
                })
                .await
                .unwrap();
            assert_eq!(v, vec![5.0]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_computation() {
        let cache = EmbeddingCache::new(10, TTL);
        let calls = Arc::new(AtomicUsize::new(0));

        let compute = |calls: Arc<AtomicUsize>| {
            move |_text: String| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, StoreError>(vec![0.5f32, 0.5])
            }
        };

        let (a, b) = tokio::join!(
            cache.get_or_compute("same", compute(calls.clone())),
            cache.get_or_compute("same", compute(calls.clone())),
        );

        assert_eq!(a.unwrap(), vec![0.5, 0.5]);
        assert_eq!(b.unwrap(), vec![0.5, 0.5]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_count, 0);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_dropped_starter_clears_in_flight_slot() {
        let cache = EmbeddingCache::new(10, TTL);

        for i in 0..100 {
            let text = format!("text {i}");
            let call =
                cache.get_or_compute(&text, |_| futures::future::pending::<Result<Vec<f32>>>());
            assert!(call.now_or_never().is_none());
        }
        assert_eq!(cache.in_flight_len(), 0);
        assert_eq!(cache.stats().miss_count, 100);

        // The next caller starts a fresh computation and counts its own miss.
        let v = cache
            .get_or_compute("text 0", |_| async { Ok(vec![2.0]) })
            .await
            .unwrap();
        assert_eq!(v, vec![2.0]);
        assert_eq!(cache.stats().miss_count, 101);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_failed_computation_is_not_cached() {
        let cache = EmbeddingCache::new(10, TTL);

        let err = cache
            .get_or_compute("x", |_| async { Err(StoreError::provider("down")) })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(cache.is_empty());

        let v = cache
            .get_or_compute("x", |_| async { Ok(vec![1.0]) })
            .await
            .unwrap();
        assert_eq!(v, vec![1.0]);
        assert_eq!(cache.stats().miss_count, 2);
    }

    #[test]
    fn test_clear_resets_counters_but_keeps_pending() {
        let cache = EmbeddingCache::new(10, TTL);
        cache.insert("a", vec![1.0]);
        cache.get("a");
        cache.get("b");

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.hit_count, 0);
        assert_eq!(stats.miss_count, 0);

        let pending = cache.take_pending();
        assert_eq!(pending.hits, 1);
        assert_eq!(pending.misses, 1);
        assert!(cache.take_pending().is_empty());
    }

    #[tokio::test]
    async fn test_failed_flush_drops_deltas() {
        let cache = EmbeddingCache::new(10, TTL);
        cache.get("a");
        assert!(!cache.flush_to(&FailingSink).await);
        assert!(cache.take_pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_sweeps_and_flushes() {
        let cache = Arc::new(EmbeddingCache::new(10, Duration::from_secs(5)));
        let sink = Arc::new(RecordingSink::default());

        let handle = cache.spawn_maintenance(
            Duration::from_secs(10),
            Duration::from_secs(10),
            Some(sink.clone() as Arc<dyn CounterSink>),
        );

        cache.insert("a", vec![1.0]);
        cache.get("a");
        cache.get("missing");

        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(cache.is_empty());
        {
            let received = sink.received.lock();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].hits, 1);
            assert_eq!(received[0].misses, 1);
        }

        cache.get("late");
        handle.shutdown().await;

        let received = sink.received.lock();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flusher_skips_empty_intervals() {
        let cache = Arc::new(EmbeddingCache::new(10, TTL));
        let sink = Arc::new(RecordingSink::default());
        let handle = cache.spawn_maintenance(
            Duration::from_secs(3600),
            Duration::from_secs(1),
            Some(sink.clone() as Arc<dyn CounterSink>),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.shutdown().await;
        assert!(sink.received.lock().is_empty());
    }
}
