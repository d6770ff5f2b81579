//! # Semantic Store Core
//!
//! Runtime-free logic for Semantic Store: data models, chunking, the
//! vector store abstraction, similarity ranking, the embedding provider
//! trait, and the typed error enum.
//!
//! This crate depends on no async runtime, HTTP client, or database
//! driver. Caching, concrete providers, and the document service live in
//! the `semantic-store` application crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod search;
pub mod store;

pub use error::{Result, StoreError};
