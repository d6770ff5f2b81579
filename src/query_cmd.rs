//! `sstore query`: ingest a directory into a fresh store and search it.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use semantic_store_core::models::{Filters, SearchHit, UpsertStatus};

use crate::config::Config;
use crate::counters::{connect_configured, CounterSink};
use crate::embedder::truncate_chars;
use crate::embedding::{create_provider, ProviderOverride};
use crate::fs_ingest::{scan_directory, DEFAULT_INCLUDES};
use crate::service::{DocumentService, SearchOptions};

const EXCERPT_CHARS: usize = 200;

/// Arguments for [`run_query`].
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub query: String,
    pub dir: PathBuf,
    /// Source name assigned to every ingested file.
    pub source: String,
    /// Tags assigned to every ingested file.
    pub tags: Vec<String>,
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
    pub filter_source: Option<String>,
    pub filter_tags: Vec<String>,
    /// Ollama host overriding the configured provider.
    pub host: Option<String>,
    pub json: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Upsert every matching file under `args.dir`. Per-file failures are
/// reported and counted, not returned.
pub async fn ingest_directory(
    service: &DocumentService,
    args: &QueryArgs,
    provider_override: Option<&ProviderOverride>,
) -> Result<IngestSummary> {
    let files = scan_directory(&args.dir, DEFAULT_INCLUDES)?;
    let mut summary = IngestSummary::default();

    for file in &files {
        let text = match file.read_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %file.relative, error = %e, "Skipping unreadable file");
                summary.skipped += 1;
                continue;
            }
        };
        if text.trim().is_empty() {
            summary.skipped += 1;
            continue;
        }

        let input = file.to_input(&args.source, &args.tags);
        match service.upsert(input, &text, provider_override).await {
            Ok(result) => match result.status {
                UpsertStatus::Created => summary.created += 1,
                UpsertStatus::Updated => summary.updated += 1,
                UpsertStatus::Unchanged => summary.unchanged += 1,
            },
            Err(e) => {
                eprintln!("Warning: failed to ingest {}: {}", file.relative, e);
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

pub async fn run_query(config: &Config, args: QueryArgs) -> Result<()> {
    let provider = create_provider(&config.embedding)?;
    let sink = connect_configured(&config.counters)
        .await?
        .map(|s| Arc::new(s) as Arc<dyn CounterSink>);
    let service = DocumentService::new(config.clone(), provider, sink)?;
    let provider_override = args.host.clone().map(ProviderOverride::Host);

    let outcome = search_and_report(&service, &args, provider_override.as_ref()).await;
    service.close().await;
    outcome
}

async fn search_and_report(
    service: &DocumentService,
    args: &QueryArgs,
    provider_override: Option<&ProviderOverride>,
) -> Result<()> {
    let summary = ingest_directory(service, args, provider_override).await?;
    eprintln!(
        "Ingested {} files ({} created, {} updated, {} unchanged, {} skipped, {} failed)",
        summary.created + summary.updated + summary.unchanged,
        summary.created,
        summary.updated,
        summary.unchanged,
        summary.skipped,
        summary.failed
    );

    let mut filters = Filters::default();
    if let Some(source) = &args.filter_source {
        filters = filters.source(source);
    }
    for tag in &args.filter_tags {
        filters = filters.tag(tag);
    }
    let options = SearchOptions {
        top_k: args.top_k,
        min_score: args.min_score,
        filters,
    };

    let hits = service
        .search(&args.query, options, provider_override)
        .await?;
    let stats = service.stats().await?;
    let cache = service.cache_stats();

    if args.json {
        let out = serde_json::json!({
            "results": hits,
            "store": stats,
            "cache": cache,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_hits(&hits);
        println!(
            "Store: {} documents, {} chunks ({:.2} per document)",
            stats.document_count, stats.chunk_count, stats.avg_chunks_per_document
        );
        println!(
            "Cache: {}/{} entries, {} hits, {} misses, {} evictions, hit rate {:.1}%",
            cache.size,
            cache.max_size,
            cache.hit_count,
            cache.miss_count,
            cache.eviction_count,
            cache.hit_rate * 100.0
        );
    }

    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results.");
        println!();
        return;
    }

    for (i, hit) in hits.iter().enumerate() {
        let meta = &hit.metadata;
        println!("{}. [{:.2}] {} / {}", i + 1, hit.score, meta.source, meta.title);
        println!("    path: {}", meta.path);
        println!("    chunk: {}", meta.chunk_index);
        if !meta.tags.is_empty() {
            let tags: Vec<&str> = meta.tags.iter().map(String::as_str).collect();
            println!("    tags: {}", tags.join(", "));
        }
        let excerpt = hit.text.replace('\n', " ");
        println!(
            "    excerpt: \"{}\"",
            truncate_chars(excerpt.trim(), EXCERPT_CHARS)
        );
        println!("    id: {}", meta.document_id);
        println!();
    }
}
