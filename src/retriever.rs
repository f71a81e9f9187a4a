//! Document retrieval: query preprocessing, similarity search, relevance
//! filtering, MMR re-ranking, and context assembly.
//!
//! `retrieve` never raises to the caller: preprocessing that empties the
//! query, embedding failures, and index failures all degrade to an empty
//! result set with an error logged, which the orchestrator treats the
//! same as a genuinely empty corpus.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::RetrievalConfig;
use crate::embedding::cosine_similarity;
use crate::embedding::generator::EmbeddingGenerator;
use crate::models::RetrievedDocument;
use crate::store::{SearchHit, VectorStore};

/// Sentinel context block for "nothing retrieved" so downstream code can
/// distinguish it from empty text.
pub const NO_CONTEXT_SENTINEL: &str = "No relevant documentation found.";

/// Handles document retrieval with similarity search and filtering.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embeddings: Arc<EmbeddingGenerator>,
    top_k: usize,
    relevance_threshold: f32,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embeddings: Arc<EmbeddingGenerator>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            top_k: config.top_k,
            relevance_threshold: config.relevance_threshold,
        }
    }

    /// Lowercase, collapse internal whitespace runs, and trim.
    pub fn preprocess_query(query: &str) -> String {
        query
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Retrieve relevant documents for a query, ordered by descending
    /// relevance (or MMR order when `use_mmr` is set).
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
        use_mmr: bool,
        diversity: f32,
    ) -> Vec<RetrievedDocument> {
        let processed = Self::preprocess_query(query);
        if processed.is_empty() {
            warn!("Empty query after preprocessing");
            return Vec::new();
        }

        let query_embedding = match self.embeddings.embed_query(&processed).await {
            Ok(Some(embedding)) => embedding,
            Ok(None) => {
                error!("Failed to generate query embedding");
                return Vec::new();
            }
            Err(e) => {
                error!("Error generating query embedding: {}", e);
                return Vec::new();
            }
        };

        let n_results = top_k.unwrap_or(self.top_k);

        // Fetch headroom so the threshold filter still has enough to keep.
        let results = if use_mmr {
            match self.store.search(&query_embedding, n_results * 3).await {
                Ok(hits) => {
                    let candidates = format_results(hits);
                    self.mmr_select(candidates, n_results, diversity).await
                }
                Err(e) => {
                    error!("Error retrieving documents: {}", e);
                    return Vec::new();
                }
            }
        } else {
            match self.store.search(&query_embedding, n_results * 2).await {
                Ok(hits) => format_results(hits),
                Err(e) => {
                    error!("Error retrieving documents: {}", e);
                    return Vec::new();
                }
            }
        };

        // Relevance filter runs after MMR selection, then truncate.
        let mut filtered: Vec<RetrievedDocument> = results
            .into_iter()
            .filter(|doc| doc.score >= self.relevance_threshold)
            .collect();
        filtered.truncate(n_results);

        info!("Retrieved {} documents for query", filtered.len());
        filtered
    }

    /// Greedy Maximum Marginal Relevance selection over the candidate
    /// pool: most relevant first, then repeatedly the candidate maximizing
    /// `diversity * relevance - (1 - diversity) * max_similarity_to_selected`.
    /// Ties break to the first candidate found in pool order.
    async fn mmr_select(
        &self,
        candidates: Vec<RetrievedDocument>,
        n_results: usize,
        diversity: f32,
    ) -> Vec<RetrievedDocument> {
        let mut remaining = candidates;
        let mut selected: Vec<RetrievedDocument> = Vec::new();

        if remaining.is_empty() {
            return selected;
        }
        selected.push(remaining.remove(0));

        while selected.len() < n_results && !remaining.is_empty() {
            let mut best_score = f32::NEG_INFINITY;
            let mut best_idx = 0usize;

            for (idx, candidate) in remaining.iter().enumerate() {
                let relevance = candidate.score;

                // Max cosine similarity between this candidate and every
                // already-selected document. Embeddings are fetched one at
                // a time so each text hits the cache individually.
                let mut max_similarity = 0.0f32;
                if let Some(candidate_embedding) = self.embedding_for(&candidate.text).await {
                    for picked in &selected {
                        if let Some(picked_embedding) = self.embedding_for(&picked.text).await {
                            let similarity =
                                cosine_similarity(&candidate_embedding, &picked_embedding);
                            max_similarity = max_similarity.max(similarity);
                        }
                    }
                }

                let mmr_score = diversity * relevance - (1.0 - diversity) * max_similarity;
                if mmr_score > best_score {
                    best_score = mmr_score;
                    best_idx = idx;
                }
            }

            selected.push(remaining.remove(best_idx));
        }

        selected
    }

    async fn embedding_for(&self, text: &str) -> Option<Vec<f32>> {
        self.embeddings.embed_query(text).await.ok().flatten()
    }

    /// Format the final document list into one context block for the
    /// prompt. Empty input yields [`NO_CONTEXT_SENTINEL`].
    pub fn format_context(docs: &[RetrievedDocument]) -> String {
        if docs.is_empty() {
            return NO_CONTEXT_SENTINEL.to_string();
        }

        let entries: Vec<String> = docs
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let title = if doc.metadata.title.is_empty() {
                    "Untitled"
                } else {
                    &doc.metadata.title
                };
                let source_url = if doc.metadata.source_url.is_empty() {
                    "Unknown"
                } else {
                    &doc.metadata.source_url
                };
                format!(
                    "[Document {}]\nSource: {} ({})\nRelevance Score: {:.2}\nContent:\n{}\n",
                    i + 1,
                    title,
                    source_url,
                    doc.score,
                    doc.text
                )
            })
            .collect();

        entries.join("\n---\n\n")
    }
}

/// Convert search hits into retrieved documents with the canonical
/// relevance score `1 - distance` (cosine distance).
fn format_results(hits: Vec<SearchHit>) -> Vec<RetrievedDocument> {
    hits.into_iter()
        .map(|hit| RetrievedDocument {
            score: 1.0 - hit.distance,
            id: hit.id,
            text: hit.text,
            metadata: hit.metadata,
            distance: hit.distance,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::embedding::EmbeddingBackend;
    use crate::error::RagError;
    use crate::models::{Chunk, ChunkMetadata};
    use crate::store::MemoryVectorStore;

    /// Backend that answers from a fixed text -> vector table.
    struct TableBackend {
        table: HashMap<String, Vec<f32>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingBackend for TableBackend {
        fn model_name(&self) -> &str {
            "table"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| self.table.get(t).cloned().unwrap_or_else(|| vec![0.0, 0.0]))
                .collect())
        }
    }

    fn embeddings_from(
        table: &[(&str, Vec<f32>)],
    ) -> (Arc<EmbeddingGenerator>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = TableBackend {
            table: table
                .iter()
                .map(|(t, v)| (t.to_string(), v.clone()))
                .collect(),
            calls: calls.clone(),
        };
        let gen = EmbeddingGenerator::new(
            Some(Box::new(backend)),
            None,
            None,
            100,
            1,
            Duration::from_millis(1),
        )
        .unwrap();
        (Arc::new(gen), calls)
    }

    fn chunk(text: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                title: text.to_uppercase(),
                source_url: format!("https://docs.test/{}", text),
                ..Default::default()
            },
            embedding: Some(embedding),
        }
    }

    async fn store_with(chunks: Vec<Chunk>) -> Arc<MemoryVectorStore> {
        let store = Arc::new(MemoryVectorStore::new());
        store.add(&chunks, true).await.unwrap();
        store
    }

    fn config(top_k: usize, threshold: f32) -> RetrievalConfig {
        RetrievalConfig {
            top_k,
            relevance_threshold: threshold,
            mmr_diversity: 0.5,
        }
    }

    #[test]
    fn preprocessing_normalizes_whitespace_and_case() {
        assert_eq!(
            Retriever::preprocess_query("  How   DO\tI  sort? "),
            "how do i sort?"
        );
        assert_eq!(Retriever::preprocess_query("   "), "");
    }

    #[tokio::test]
    async fn empty_query_short_circuits_without_embedding() {
        let (embeddings, calls) = embeddings_from(&[]);
        let store = store_with(vec![]).await;
        let retriever = Retriever::new(store, embeddings, &config(5, 0.5));

        let docs = retriever.retrieve("   ", None, false, 0.5).await;
        assert!(docs.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn relevance_threshold_keeps_boundary_score() {
        // Unit vectors at known angles from the query: similarities
        // 0.9, 0.5, 0.1 -> distances 0.1, 0.5, 0.9.
        let (embeddings, _) = embeddings_from(&[("query", vec![1.0, 0.0])]);
        let store = store_with(vec![
            chunk("high", vec![0.9, (1.0f32 - 0.81).sqrt()]),
            chunk("boundary", vec![0.5, (1.0f32 - 0.25).sqrt()]),
            chunk("low", vec![0.1, (1.0f32 - 0.01).sqrt()]),
        ])
        .await;
        let retriever = Retriever::new(store, embeddings, &config(5, 0.5));

        let docs = retriever.retrieve("query", None, false, 0.5).await;
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["high", "boundary"]);
        assert!((docs[0].score - 0.9).abs() < 1e-3);
        assert!((docs[1].score - 0.5).abs() < 1e-3);
        assert!(docs.iter().all(|d| d.score >= 0.5));
    }

    #[tokio::test]
    async fn results_are_ordered_by_descending_score() {
        let (embeddings, _) = embeddings_from(&[("query", vec![1.0, 0.0])]);
        let store = store_with(vec![
            chunk("second", vec![0.8, 0.6]),
            chunk("first", vec![1.0, 0.0]),
        ])
        .await;
        let retriever = Retriever::new(store, embeddings, &config(5, 0.0));

        let docs = retriever.retrieve("query", None, false, 0.5).await;
        assert_eq!(docs[0].text, "first");
        assert_eq!(docs[1].text, "second");
        assert!(docs[0].score >= docs[1].score);
        assert!((docs[0].score - (1.0 - docs[0].distance)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn top_k_override_truncates() {
        let (embeddings, _) = embeddings_from(&[("query", vec![1.0, 0.0])]);
        let store = store_with(vec![
            chunk("a", vec![1.0, 0.0]),
            chunk("b", vec![0.9, (1.0f32 - 0.81).sqrt()]),
            chunk("c", vec![0.8, 0.6]),
        ])
        .await;
        let retriever = Retriever::new(store, embeddings, &config(5, 0.0));

        let docs = retriever.retrieve("query", Some(2), false, 0.5).await;
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn mmr_full_diversity_weight_is_pure_relevance() {
        // diversity = 1.0 makes the similarity penalty vanish.
        let (embeddings, _) = embeddings_from(&[
            ("query", vec![1.0, 0.0]),
            ("a", vec![1.0, 0.0]),
            ("b", vec![0.95, 0.312]),
            ("c", vec![0.0, 1.0]),
        ]);
        let store = store_with(vec![
            chunk("a", vec![1.0, 0.0]),
            chunk("b", vec![0.95, 0.312]),
            chunk("c", vec![0.0, 1.0]),
        ])
        .await;
        let retriever = Retriever::new(store, embeddings, &config(3, -1.0));

        let docs = retriever.retrieve("query", None, true, 1.0).await;
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn mmr_zero_diversity_weight_minimizes_similarity_to_selected() {
        // After the most relevant pick, diversity = 0.0 selects whatever
        // is least similar to it, relevance notwithstanding.
        let (embeddings, _) = embeddings_from(&[
            ("query", vec![1.0, 0.0]),
            ("a", vec![1.0, 0.0]),
            ("b", vec![0.95, 0.312]),
            ("c", vec![0.0, 1.0]),
        ]);
        let store = store_with(vec![
            chunk("a", vec![1.0, 0.0]),
            chunk("b", vec![0.95, 0.312]),
            chunk("c", vec![0.0, 1.0]),
        ])
        .await;
        let retriever = Retriever::new(store, embeddings, &config(3, -1.0));

        let docs = retriever.retrieve("query", None, true, 0.0).await;
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn mmr_threshold_filter_runs_after_selection() {
        // "c" is diverse but irrelevant; it survives MMR selection and is
        // then dropped by the relevance filter.
        let (embeddings, _) = embeddings_from(&[
            ("query", vec![1.0, 0.0]),
            ("a", vec![1.0, 0.0]),
            ("b", vec![0.95, 0.312]),
            ("c", vec![0.0, 1.0]),
        ]);
        let store = store_with(vec![
            chunk("a", vec![1.0, 0.0]),
            chunk("b", vec![0.95, 0.312]),
            chunk("c", vec![0.0, 1.0]),
        ])
        .await;
        let retriever = Retriever::new(store, embeddings, &config(3, 0.5));

        let docs = retriever.retrieve("query", None, true, 0.0).await;
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn context_block_formats_numbered_entries() {
        let docs = vec![
            RetrievedDocument {
                id: "1".to_string(),
                text: "First chunk body.".to_string(),
                metadata: ChunkMetadata {
                    title: "Lists".to_string(),
                    source_url: "https://docs.test/lists".to_string(),
                    ..Default::default()
                },
                score: 0.874,
                distance: 0.126,
            },
            RetrievedDocument {
                id: "2".to_string(),
                text: "Second chunk body.".to_string(),
                metadata: ChunkMetadata::default(),
                score: 0.6,
                distance: 0.4,
            },
        ];

        let context = Retriever::format_context(&docs);
        assert!(context.contains("[Document 1]"));
        assert!(context.contains("[Document 2]"));
        assert!(context.contains("Source: Lists (https://docs.test/lists)"));
        assert!(context.contains("Relevance Score: 0.87"));
        assert!(context.contains("Source: Untitled (Unknown)"));
        assert!(context.contains("\n---\n\n"));
    }

    #[test]
    fn empty_context_is_the_sentinel_not_empty_string() {
        let context = Retriever::format_context(&[]);
        assert_eq!(context, NO_CONTEXT_SENTINEL);
        assert!(!context.is_empty());
    }
}
