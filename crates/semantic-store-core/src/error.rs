//! Error kinds surfaced by the document store and its collaborators.

use thiserror::Error;

/// Result alias used across the store.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced while ingesting, embedding, or searching documents.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// Missing or malformed caller input. Raised before any provider call.
    #[error("validation error on `{field}`: {message}")]
    Validation { field: String, message: String },

    /// Non-empty text that the chunker reduced to nothing.
    #[error("text produced no chunks for document {document_id}")]
    NoChunksProduced { document_id: String },

    /// The embedding provider failed or timed out.
    #[error("embedding provider unavailable{}: {message}", describe_location(.document_id, .chunk_index))]
    ProviderUnavailable {
        document_id: Option<String>,
        chunk_index: Option<usize>,
        message: String,
    },

    /// Two vectors of different lengths were compared.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("document not found: {document_id}")]
    NotFound { document_id: String },
}

impl StoreError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        StoreError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// A provider failure with no document context yet attached.
    pub fn provider(message: impl Into<String>) -> Self {
        StoreError::ProviderUnavailable {
            document_id: None,
            chunk_index: None,
            message: message.into(),
        }
    }

    /// Attach the document being ingested to a provider failure.
    ///
    /// Other variants pass through untouched.
    pub fn for_document(self, id: &str) -> Self {
        match self {
            StoreError::ProviderUnavailable {
                chunk_index,
                message,
                ..
            } => StoreError::ProviderUnavailable {
                document_id: Some(id.to_string()),
                chunk_index,
                message,
            },
            other => other,
        }
    }

    /// Attach the chunk index to a provider failure.
    pub fn for_chunk(self, index: usize) -> Self {
        match self {
            StoreError::ProviderUnavailable {
                document_id,
                message,
                ..
            } => StoreError::ProviderUnavailable {
                document_id,
                chunk_index: Some(index),
                message,
            },
            other => other,
        }
    }

    /// Only provider outages are worth retrying at a higher layer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::ProviderUnavailable { .. })
    }
}

fn describe_location(document_id: &Option<String>, chunk_index: &Option<usize>) -> String {
    match (document_id, chunk_index) {
        (Some(doc), Some(idx)) => format!(" (document {}, chunk {})", doc, idx),
        (Some(doc), None) => format!(" (document {})", doc),
        (None, Some(idx)) => format!(" (chunk {})", idx),
        (None, None) => String::new(),
    }
}
