//! Durable cache counters shared across processes.
//!
//! Each process running an [`EmbeddingCache`](crate::cache::EmbeddingCache)
//! periodically hands its accumulated hit/miss/eviction deltas to a
//! [`CounterSink`]. The bundled [`SqliteCounterSink`] adds them onto a
//! single row so that several processes pointing at the same database file
//! report combined totals.
//!
//! Delivery is best-effort: the cache zeroes its pending deltas before the
//! write, so a failed write loses that interval's counts.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::CountersConfig;

/// Counter increments accumulated since the last flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterDeltas {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CounterDeltas {
    pub fn is_empty(&self) -> bool {
        self.hits == 0 && self.misses == 0 && self.evictions == 0
    }
}

/// Aggregated totals as stored in the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterTotals {
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    /// Unix seconds of the last increment; `0` when nothing was recorded.
    pub updated_at: i64,
}

/// Destination for periodic counter flushes.
#[async_trait]
pub trait CounterSink: Send + Sync {
    async fn increment_counters(&self, deltas: CounterDeltas) -> Result<()>;
}

/// SQLite-backed [`CounterSink`].
#[derive(Clone)]
pub struct SqliteCounterSink {
    pool: SqlitePool,
    stats_id: String,
}

impl SqliteCounterSink {
    /// Open (creating if needed) the database at `path` and ensure the
    /// counters table exists.
    pub async fn connect(path: &Path, stats_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create counter directory: {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open counter database: {}", path.display()))?;

        let sink = Self {
            pool,
            stats_id: stats_id.to_string(),
        };
        sink.migrate().await?;
        Ok(sink)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embedding_cache_stats (
                id TEXT PRIMARY KEY,
                hit_count INTEGER NOT NULL DEFAULT 0,
                miss_count INTEGER NOT NULL DEFAULT 0,
                eviction_count INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn stats_id(&self) -> &str {
        &self.stats_id
    }

    /// Read the aggregated totals for this sink's stats id.
    pub async fn load_totals(&self) -> Result<CounterTotals> {
        let row: Option<(i64, i64, i64, i64)> = sqlx::query_as(
            "SELECT hit_count, miss_count, eviction_count, updated_at
             FROM embedding_cache_stats WHERE id = ?",
        )
        .bind(&self.stats_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((hits, misses, evictions, updated_at)) => CounterTotals {
                hit_count: hits.max(0) as u64,
                miss_count: misses.max(0) as u64,
                eviction_count: evictions.max(0) as u64,
                updated_at,
            },
            None => CounterTotals::default(),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Open the sink named by `[counters]`, if one is configured.
pub async fn connect_configured(config: &CountersConfig) -> Result<Option<SqliteCounterSink>> {
    match &config.path {
        Some(path) => Ok(Some(SqliteCounterSink::connect(path, &config.stats_id).await?)),
        None => Ok(None),
    }
}

#[async_trait]
impl CounterSink for SqliteCounterSink {
    async fn increment_counters(&self, deltas: CounterDeltas) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO embedding_cache_stats (id, hit_count, miss_count, eviction_count, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                hit_count = hit_count + excluded.hit_count,
                miss_count = miss_count + excluded.miss_count,
                eviction_count = eviction_count + excluded.eviction_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.stats_id)
        .bind(deltas.hits as i64)
        .bind(deltas.misses as i64)
        .bind(deltas.evictions as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to increment cache counters")?;
        Ok(())
    }
}
