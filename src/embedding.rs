//! Concrete embedding providers.
//!
//! Implements the [`EmbeddingProvider`] trait from the core crate for:
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embeddings` endpoint.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API, batching inputs.
//! - **[`DisabledProvider`]**: fails every call; used when embeddings are not configured.
//!
//! # Provider Selection
//!
//! [`create_provider`] builds the provider named by `embedding.provider`.
//! Individual operations may swap in a different Ollama host through
//! [`ProviderOverride`].
//!
//! # Retry Strategy
//!
//! Both HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Every failure surfaces as [`StoreError::ProviderUnavailable`].

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use semantic_store_core::embedding::{cosine_similarity, EmbeddingProvider};
use semantic_store_core::{Result, StoreError};

use crate::config::EmbeddingConfig;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

// ============ Disabled Provider ============

/// Provider used when `embedding.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(StoreError::provider("embedding provider is disabled"))
    }
}

// ============ Shared HTTP plumbing ============

fn build_client(config: &EmbeddingConfig) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.timeout())
        .build()?)
}

/// POST `body` as JSON, retrying transient failures.
async fn post_json_with_retry(
    client: &reqwest::Client,
    label: &str,
    url: &str,
    api_key: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(provider = label, attempt, ?delay, "Retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        StoreError::provider(format!("{} returned invalid JSON: {}", label, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let err =
                    StoreError::provider(format!("{} API error {}: {}", label, status, body_text));

                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(provider = label, %status, attempt, "Transient embedding API error");
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                warn!(provider = label, url, attempt, error = %e, "Embedding request failed");
                last_err = Some(StoreError::provider(format!(
                    "{} connection error ({}): {}",
                    label, url, e
                )));
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| StoreError::provider(format!("{} embedding failed after retries", label))))
}

fn json_to_vector(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Ollama Provider ============

/// Embedding provider backed by an Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .as_deref()
            .and_then(normalize_host)
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Self::with_url(config, url)
    }

    /// Build a provider against `url`, taking model and retry settings
    /// from `config`.
    pub fn with_url(config: &EmbeddingConfig, url: String) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;

        Ok(Self {
            client: build_client(config)?,
            model,
            dims,
            url,
            max_retries: config.max_retries,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });
        let endpoint = format!("{}/api/embeddings", self.url);
        let json = post_json_with_retry(
            &self.client,
            "Ollama",
            &endpoint,
            None,
            &body,
            self.max_retries,
        )
        .await?;
        parse_ollama_response(&json)
    }
}

/// Extract `embedding` from an `/api/embeddings` response.
fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| StoreError::provider("Invalid Ollama response: missing embedding"))?;
    if embedding.is_empty() {
        return Err(StoreError::provider("Invalid Ollama response: empty embedding"));
    }
    Ok(json_to_vector(embedding))
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client: build_client(config)?,
            model,
            dims,
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::provider("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            "OpenAI",
            OPENAI_EMBEDDINGS_URL,
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;
        let embeddings = parse_openai_response(&json)?;
        if embeddings.len() != texts.len() {
            return Err(StoreError::provider(format!(
                "OpenAI returned {} embeddings for {} inputs",
                embeddings.len(),
                texts.len()
            )));
        }
        Ok(embeddings)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| StoreError::provider("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| StoreError::provider("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, json_to_vector(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Selection ============

/// Create the provider named by `config.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Per-call replacement for the configured provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOverride {
    /// Use an Ollama instance at this host instead.
    Host(String),
}

impl ProviderOverride {
    /// Build the overriding provider, or `None` when the override is
    /// blank and the default provider should be used.
    pub fn resolve(
        &self,
        config: &EmbeddingConfig,
    ) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
        match self {
            ProviderOverride::Host(raw) => {
                let Some(url) = normalize_host(raw) else {
                    return Ok(None);
                };
                let provider = OllamaProvider::with_url(config, url)
                    .map_err(|e| StoreError::provider(format!("{:#}", e)))?;
                Ok(Some(Arc::new(provider)))
            }
        }
    }
}

/// Normalise a user-supplied host into a base URL.
///
/// Trims whitespace, adds `http://` when no scheme is present, and strips
/// trailing slashes. Returns `None` for a blank host.
pub fn normalize_host(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    let normalized = with_scheme.trim_end_matches('/');
    if normalized.ends_with("://") {
        return None;
    }
    Some(normalized.to_string())
}

/// Embed a probe string and check the returned dimension.
pub async fn test_connection(provider: &dyn EmbeddingProvider) -> Result<()> {
    let vector = provider.embed("test").await?;
    if vector.len() != provider.dims() {
        return Err(StoreError::DimensionMismatch {
            expected: provider.dims(),
            actual: vector.len(),
        });
    }
    Ok(())
}
