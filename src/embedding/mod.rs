//! Embedding backend abstraction and implementations.
//!
//! Defines the [`EmbeddingBackend`] trait and two concrete backends:
//! - **[`HttpEmbeddingBackend`]** — calls an OpenAI-style `/v1/embeddings`
//!   endpoint.
//! - **[`OllamaEmbeddingBackend`]** — calls a local Ollama instance's
//!   `/api/embed` endpoint; used as the secondary (local) fallback model.
//!
//! Backends perform a single network attempt per call. Retry with
//! exponential backoff and fallback between backends is the job of
//! [`generator::EmbeddingGenerator`], which also owns the cache.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`] / [`cosine_distance`] — similarity math shared
//!   by the store and the retriever's MMR re-ranking
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 encoding for
//!   SQLite BLOB storage

pub mod cache;
pub mod generator;

use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingBackendConfig;
use crate::error::RagError;

/// A model that turns a batch of texts into fixed-length vectors.
///
/// Implementations preserve input order and length: the `i`-th output
/// vector embeds the `i`-th input text.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-004"`). Part of the cache
    /// key, so two backends with the same name must produce the same
    /// vector space.
    fn model_name(&self) -> &str;

    /// Embedding vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts in one call. A failure fails the whole
    /// batch; partial results are never returned.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;
}

/// Build a backend from its configuration.
///
/// # Errors
///
/// Returns [`RagError::Configuration`] for unknown providers or missing
/// settings (model name, API key environment variable).
pub fn create_backend(
    config: &EmbeddingBackendConfig,
    timeout_secs: u64,
) -> Result<Box<dyn EmbeddingBackend>, RagError> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(HttpEmbeddingBackend::new(config, timeout_secs)?)),
        "ollama" => Ok(Box::new(OllamaEmbeddingBackend::new(config, timeout_secs)?)),
        other => Err(RagError::Configuration(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ OpenAI-style HTTP backend ============

/// Embedding backend for OpenAI-compatible `/v1/embeddings` endpoints.
pub struct HttpEmbeddingBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl HttpEmbeddingBackend {
    pub fn new(config: &EmbeddingBackendConfig, timeout_secs: u64) -> Result<Self, RagError> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::Configuration("embedding.model required for openai provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            RagError::Configuration("embedding.dims required for openai provider".to_string())
        })?;
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RagError::Configuration(format!("{} environment variable not set", config.api_key_env))
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RagError::TransientRetrieval(format!(
                "Embedding API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response.json().await?;
        parse_openai_embeddings(&json)
    }
}

fn parse_openai_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, RagError> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        RagError::TransientRetrieval("Invalid embedding response: missing data array".to_string())
    })?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                RagError::TransientRetrieval(
                    "Invalid embedding response: missing embedding".to_string(),
                )
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Ollama backend ============

/// Embedding backend for a local Ollama instance (`POST /api/embed`).
///
/// Used as the secondary fallback model: it keeps retrieval working
/// offline when the primary API is unreachable.
pub struct OllamaEmbeddingBackend {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbeddingBackend {
    pub fn new(config: &EmbeddingBackendConfig, timeout_secs: u64) -> Result<Self, RagError> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::Configuration("embedding.model required for ollama provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            RagError::Configuration("embedding.dims required for ollama provider".to_string())
        })?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbeddingBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RagError::TransientRetrieval(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RagError::TransientRetrieval(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response.json().await?;
        parse_ollama_embeddings(&json)
    }
}

fn parse_ollama_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, RagError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RagError::TransientRetrieval(
                "Invalid Ollama response: missing embeddings array".to_string(),
            )
        })?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| {
                RagError::TransientRetrieval(
                    "Invalid Ollama response: embedding is not an array".to_string(),
                )
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance: `1 - cosine_similarity`. Smaller means more similar.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}
