//! Batched embedding generation with caching, retry, and fallback.
//!
//! [`EmbeddingGenerator`] sits between callers and the raw
//! [`EmbeddingBackend`]s: every text is first looked up in the persistent
//! cache, misses are batched to the primary backend with exponential
//! backoff, and if every retry fails the whole batch is retried once on
//! the secondary (local) backend. Newly computed vectors are persisted to
//! the cache before being returned, and results always come back in input
//! order regardless of how hits and misses interleaved.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::EmbeddingConfig;
use crate::error::RagError;

use super::cache::EmbeddingCache;
use super::{create_backend, EmbeddingBackend};

/// Embedding pipeline: cache, batching, retry, fallback.
pub struct EmbeddingGenerator {
    primary: Option<Box<dyn EmbeddingBackend>>,
    fallback: Option<Box<dyn EmbeddingBackend>>,
    cache: Option<EmbeddingCache>,
    batch_size: usize,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl EmbeddingGenerator {
    /// Assemble the generator from explicit parts (dependency injection;
    /// tests pass fake backends here).
    pub fn new(
        primary: Option<Box<dyn EmbeddingBackend>>,
        fallback: Option<Box<dyn EmbeddingBackend>>,
        cache: Option<EmbeddingCache>,
        batch_size: usize,
        max_retries: u32,
        retry_base_delay: Duration,
    ) -> Result<Self, RagError> {
        if primary.is_none() && fallback.is_none() {
            return Err(RagError::Configuration(
                "No embedding model available".to_string(),
            ));
        }
        Ok(Self {
            primary,
            fallback,
            cache,
            batch_size: batch_size.max(1),
            max_retries: max_retries.max(1),
            retry_base_delay,
        })
    }

    /// Build the generator from configuration.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, RagError> {
        let primary = if config.is_enabled() {
            Some(create_backend(&config.primary(), config.timeout_secs)?)
        } else {
            None
        };
        let fallback = config
            .fallback
            .as_ref()
            .map(|f| create_backend(f, config.timeout_secs))
            .transpose()?;
        let cache = if config.use_cache {
            Some(EmbeddingCache::new(config.cache_dir.clone())?)
        } else {
            None
        };

        Self::new(
            primary,
            fallback,
            cache,
            config.batch_size,
            config.max_retries,
            Duration::from_secs_f64(config.retry_base_delay_secs),
        )
    }

    /// Embed a sequence of texts, preserving input order and length.
    ///
    /// Each output slot is `Some(vector)` on success or `None` when that
    /// text could not be embedded. Individual failures are marked, not
    /// fatal; the only fatal case is having no backend at all, which
    /// [`Self::new`] already rejects.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>, RagError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_indices: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache_lookup(text) {
                Some(vector) => results[i] = Some(vector),
                None => miss_indices.push(i),
            }
        }

        for batch in miss_indices.chunks(self.batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();

            match self.generate_with_retry(&batch_texts).await {
                Ok((vectors, model_name)) => {
                    for (&i, vector) in batch.iter().zip(vectors.into_iter()) {
                        if let Some(cache) = &self.cache {
                            cache.store(&EmbeddingCache::key(&model_name, &texts[i]), &vector);
                        }
                        results[i] = Some(vector);
                    }
                }
                Err(e) => {
                    // Leave the batch marked as failed and keep going.
                    error!("Error generating embeddings: {}", e);
                }
            }
        }

        let embedded = results.iter().filter(|r| r.is_some()).count();
        info!("Generated embeddings for {}/{} texts", embedded, texts.len());
        Ok(results)
    }

    /// Embed a single query text (single-element batch).
    pub async fn embed_query(&self, text: &str) -> Result<Option<Vec<f32>>, RagError> {
        let mut results = self.embed(&[text.to_string()]).await?;
        Ok(results.pop().flatten())
    }

    /// Model identifier of the backend queries are embedded with.
    pub fn model_name(&self) -> &str {
        self.primary
            .as_deref()
            .or(self.fallback.as_deref())
            .map(|b| b.model_name())
            .unwrap_or("disabled")
    }

    fn cache_lookup(&self, text: &str) -> Option<Vec<f32>> {
        let cache = self.cache.as_ref()?;
        // Vectors may have been produced by either backend; entries are
        // keyed per model, so check both spaces in preference order.
        for backend in [self.primary.as_deref(), self.fallback.as_deref()]
            .into_iter()
            .flatten()
        {
            if let Some(vector) = cache.load(&EmbeddingCache::key(backend.model_name(), text)) {
                return Some(vector);
            }
        }
        None
    }

    /// Run one batch through the primary backend with exponential backoff,
    /// then once through the fallback backend if every attempt failed.
    /// Returns the vectors together with the producing model's name.
    async fn generate_with_retry(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Vec<f32>>, String), RagError> {
        let (first, second) = match (&self.primary, &self.fallback) {
            (Some(p), f) => (p.as_ref(), f.as_deref()),
            (None, Some(f)) => (f.as_ref(), None),
            (None, None) => {
                return Err(RagError::Configuration(
                    "No embedding model available".to_string(),
                ))
            }
        };

        let mut last_err: Option<RagError> = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = self.retry_base_delay.mul_f64(f64::powi(2.0, attempt as i32 - 1));
                tokio::time::sleep(delay).await;
            }
            match first.embed_batch(texts).await {
                Ok(vectors) => return Ok((vectors, first.model_name().to_string())),
                Err(e) => {
                    warn!(
                        "Embedding attempt {}/{} on '{}' failed: {}",
                        attempt + 1,
                        self.max_retries,
                        first.model_name(),
                        e
                    );
                    last_err = Some(e);
                }
            }
        }

        if let Some(fb) = second {
            info!("Falling back to secondary embedding model '{}'", fb.model_name());
            match fb.embed_batch(texts).await {
                Ok(vectors) => return Ok((vectors, fb.model_name().to_string())),
                Err(e) => {
                    warn!("Fallback embedding model '{}' failed: {}", fb.model_name(), e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| RagError::TransientRetrieval("Embedding failed".to_string())))
    }
}
