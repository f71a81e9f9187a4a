//! Error taxonomy for the RAG pipeline.
//!
//! The variants map to how each failure is recovered:
//! - [`RagError::Configuration`] is fatal and surfaced immediately.
//! - [`RagError::TransientRetrieval`] is swallowed inside the retriever,
//!   which degrades to an empty result set.
//! - [`RagError::ModelUnavailable`] drives the chain's model-fallback
//!   state machine and is fatal only once every candidate model failed.
//! - [`RagError::Generation`] is not retried; the chain turns it into a
//!   user-readable `QueryResult` with the raw error attached.

use thiserror::Error;

/// Errors that can occur during retrieval-augmented generation.
#[derive(Error, Debug)]
pub enum RagError {
    /// No usable model or credential is configured. Fatal, never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Embedding or index-query failure within a single request.
    /// The retriever recovers by returning an empty result set.
    #[error("Transient retrieval error: {0}")]
    TransientRetrieval(String),

    /// The generation model was not found or is unsupported.
    /// Recovered by trying the next fallback model.
    #[error("Model '{model}' unavailable: {detail}")]
    ModelUnavailable { model: String, detail: String },

    /// Any other generation failure. Not retried.
    #[error("Generation error: {0}")]
    Generation(String),

    /// Vector store failure (fatal for add/search/clear).
    #[error("Vector store error: {0}")]
    Store(String),

    /// Embedding cache I/O failure. Callers treat this as a cache miss.
    #[error("Embedding cache error: {0}")]
    Cache(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Whether this error belongs to the "model not found" class that the
    /// chain's fallback machine is allowed to recover from.
    pub fn is_model_unavailable(&self) -> bool {
        matches!(self, RagError::ModelUnavailable { .. })
    }
}
