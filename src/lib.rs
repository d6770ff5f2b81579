//! # Semantic Store
//!
//! An in-process semantic document store: text is split into overlapping
//! chunks, each chunk is embedded through a pluggable provider with a
//! shared content-addressed cache in front of it, and queries are answered
//! with exact top-K cosine ranking over every stored chunk.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────┐   ┌────────────────┐   ┌──────────┐
//! │ DocumentSvc  │──▶│ Chunker │──▶│ Embedder+Cache │──▶│ Provider │
//! │ upsert/search│   └─────────┘   └───────┬────────┘   └──────────┘
//! └──────┬───────┘                         │ counters
//!        ▼                                 ▼
//! ┌──────────────┐                  ┌──────────────┐
//! │ VectorStore  │                  │ CounterSink  │
//! │ (in-memory)  │                  │  (SQLite)    │
//! └──────────────┘                  └──────────────┘
//! ```
//!
//! Runtime-free pieces (models, chunking, ranking, the store trait) live in
//! the `semantic-store-core` crate and are re-exported here as [`store_core`].
//!
//! ## Quick Start
//!
//! ```bash
//! sstore init                                   # create the counter database
//! sstore query "retry policy" --dir ./docs      # ingest a directory and search it
//! sstore counters                               # cross-process cache totals
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`service`] | Document upsert, search, and lifecycle |
//! | [`embedder`] | Truncation, batching, and caching around a provider |
//! | [`cache`] | LRU + TTL embedding cache |
//! | [`counters`] | Durable cross-process cache counters |
//! | [`embedding`] | Ollama, OpenAI, and disabled providers |
//! | [`fs_ingest`] | Directory scanning for the CLI |
//! | [`query_cmd`] | The `query` command |

pub mod cache;
pub mod config;
pub mod counters;
pub mod embedder;
pub mod embedding;
pub mod fs_ingest;
pub mod query_cmd;
pub mod service;

pub use semantic_store_core as store_core;
pub use semantic_store_core::{Result, StoreError};
