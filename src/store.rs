//! Vector index adapter: a thin contract over a persistent cosine
//! similarity index.
//!
//! [`VectorStore`] is the seam the retriever talks to. Two
//! implementations:
//! - [`SqliteVectorStore`] — vectors stored as little-endian f32 BLOBs in
//!   SQLite (WAL mode); similarity is computed in Rust over all rows.
//! - [`MemoryVectorStore`] — brute-force in-memory store for tests and
//!   diagnostics.
//!
//! All operations are fatal on adapter errors except [`VectorStore::count`]
//! and [`VectorStore::is_indexed`], which degrade to `0`/`false` because
//! they back UI-level status checks.

use std::str::FromStr;
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, error, warn};

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::error::RagError;
use crate::models::{Chunk, ChunkMetadata};

/// One nearest-neighbor match, ordered by ascending distance.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

/// A stored document returned from [`VectorStore::sample`] diagnostics.
#[derive(Debug, Clone)]
pub struct SampleDoc {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Persistent similarity index over embedded chunks (cosine distance).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Add embedded chunks. Chunks without an embedding or with empty
    /// text are skipped with a warning. With `deduplicate`, duplicate
    /// text within this call is rejected keep-first (by content digest)
    /// before it reaches the index. Returns the number added.
    async fn add(&self, chunks: &[Chunk], deduplicate: bool) -> Result<usize, RagError>;

    /// Nearest-neighbor query: up to `k` hits, closest first.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, RagError>;

    /// Number of indexed documents. Degrades to `0` on error.
    async fn count(&self) -> usize;

    /// Whether the index holds any documents. Degrades to `false` on error.
    async fn is_indexed(&self) -> bool;

    /// Destroy and recreate an empty index with the same similarity
    /// configuration.
    async fn clear(&self) -> Result<(), RagError>;

    /// Fetch up to `n` stored documents for diagnostics.
    async fn sample(&self, n: usize) -> Result<Vec<SampleDoc>, RagError>;
}

/// Stable id for a chunk, derived from its text content.
pub fn chunk_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("chunk-{:x}", digest)[..22].to_string()
}

/// Keep-first dedup by content digest; also drops chunks that are empty
/// or missing an embedding.
fn usable_chunks(chunks: &[Chunk], deduplicate: bool) -> Vec<&Chunk> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::new();

    for (idx, chunk) in chunks.iter().enumerate() {
        if chunk.text.is_empty() {
            continue;
        }
        if chunk.embedding.is_none() {
            warn!("Skipping chunk {} - no embedding", idx);
            continue;
        }
        if deduplicate {
            let id = chunk_id(&chunk.text);
            if !seen.insert(id) {
                debug!("Skipping duplicate chunk {}", idx);
                continue;
            }
        }
        kept.push(chunk);
    }

    kept
}

// ============ SQLite implementation ============

/// SQLite-backed vector store.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (creating if missing) the index database at `path`.
    pub async fn open(path: &Path) -> Result<Self, RagError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RagError::Store(e.to_string()))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| RagError::Store(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| RagError::Store(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), RagError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RagError::Store(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add(&self, chunks: &[Chunk], deduplicate: bool) -> Result<usize, RagError> {
        let kept = usable_chunks(chunks, deduplicate);
        if kept.is_empty() {
            warn!("No chunks to add");
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RagError::Store(e.to_string()))?;

        let mut added = 0usize;
        for chunk in kept {
            let Some(embedding) = &chunk.embedding else {
                continue;
            };
            let metadata = serde_json::to_string(&chunk.metadata)?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO chunks (id, text, metadata, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(chunk_id(&chunk.text))
            .bind(&chunk.text)
            .bind(metadata)
            .bind(vec_to_blob(embedding))
            .execute(&mut *tx)
            .await
            .map_err(|e| RagError::Store(e.to_string()))?;
            added += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|e| RagError::Store(e.to_string()))?;

        debug!("Added {} documents to index", added);
        Ok(added)
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, RagError> {
        let rows = sqlx::query("SELECT id, text, metadata, embedding FROM chunks")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RagError::Store(e.to_string()))?;

        let mut hits: Vec<SearchHit> = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let stored = blob_to_vec(&blob);
            let metadata_json: String = row.get("metadata");
            let metadata: ChunkMetadata =
                serde_json::from_str(&metadata_json).unwrap_or_default();
            hits.push(SearchHit {
                id: row.get("id"),
                text: row.get("text"),
                metadata,
                distance: cosine_distance(vector, &stored),
            });
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> usize {
        match sqlx::query("SELECT COUNT(*) AS n FROM chunks")
            .fetch_one(&self.pool)
            .await
        {
            Ok(row) => {
                let n: i64 = row.get("n");
                n as usize
            }
            Err(e) => {
                error!("Error counting index: {}", e);
                0
            }
        }
    }

    async fn is_indexed(&self) -> bool {
        self.count().await > 0
    }

    async fn clear(&self) -> Result<(), RagError> {
        sqlx::query("DROP TABLE IF EXISTS chunks")
            .execute(&self.pool)
            .await
            .map_err(|e| RagError::Store(e.to_string()))?;
        self.init_schema().await
    }

    async fn sample(&self, n: usize) -> Result<Vec<SampleDoc>, RagError> {
        let rows = sqlx::query("SELECT id, text, metadata FROM chunks LIMIT ?")
            .bind(n as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RagError::Store(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| {
                let metadata_json: String = row.get("metadata");
                SampleDoc {
                    id: row.get("id"),
                    text: row.get("text"),
                    metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
                }
            })
            .collect())
    }
}

// ============ In-memory implementation ============

struct StoredChunk {
    id: String,
    text: String,
    metadata: ChunkMetadata,
    embedding: Vec<f32>,
}

/// In-memory store for tests and diagnostics. Brute-force cosine search
/// over all stored vectors.
#[derive(Default)]
pub struct MemoryVectorStore {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add(&self, chunks: &[Chunk], deduplicate: bool) -> Result<usize, RagError> {
        let kept = usable_chunks(chunks, deduplicate);
        let mut store = self
            .chunks
            .write()
            .map_err(|_| RagError::Store("poisoned lock".to_string()))?;

        let mut added = 0usize;
        for chunk in kept {
            let Some(embedding) = chunk.embedding.clone() else {
                continue;
            };
            let id = chunk_id(&chunk.text);
            if store.iter().any(|c| c.id == id) {
                continue;
            }
            store.push(StoredChunk {
                id,
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                embedding,
            });
            added += 1;
        }
        Ok(added)
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, RagError> {
        let store = self
            .chunks
            .read()
            .map_err(|_| RagError::Store("poisoned lock".to_string()))?;

        let mut hits: Vec<SearchHit> = store
            .iter()
            .map(|c| SearchHit {
                id: c.id.clone(),
                text: c.text.clone(),
                metadata: c.metadata.clone(),
                distance: cosine_distance(vector, &c.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    async fn is_indexed(&self) -> bool {
        self.count().await > 0
    }

    async fn clear(&self) -> Result<(), RagError> {
        let mut store = self
            .chunks
            .write()
            .map_err(|_| RagError::Store("poisoned lock".to_string()))?;
        store.clear();
        Ok(())
    }

    async fn sample(&self, n: usize) -> Result<Vec<SampleDoc>, RagError> {
        let store = self
            .chunks
            .read()
            .map_err(|_| RagError::Store("poisoned lock".to_string()))?;
        Ok(store
            .iter()
            .take(n)
            .map(|c| SampleDoc {
                id: c.id.clone(),
                text: c.text.clone(),
                metadata: c.metadata.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                title: format!("{} title", text),
                source_url: format!("https://docs.test/{}", text),
                ..Default::default()
            },
            embedding: Some(embedding),
        }
    }

    async fn sqlite_store() -> (tempfile::TempDir, SqliteVectorStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&tmp.path().join("index.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn add_and_search_orders_by_distance() {
        let (_tmp, store) = sqlite_store().await;
        let added = store
            .add(
                &[
                    chunk("far", vec![0.0, 1.0]),
                    chunk("near", vec![1.0, 0.1]),
                    chunk("exact", vec![1.0, 0.0]),
                ],
                true,
            )
            .await
            .unwrap();
        assert_eq!(added, 3);

        let hits = store.search(&[1.0, 0.0], 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].text, "exact");
        assert_eq!(hits[1].text, "near");
        assert_eq!(hits[2].text, "far");
        assert!(hits[0].distance <= hits[1].distance);
        assert!(hits[1].distance <= hits[2].distance);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn duplicate_text_is_kept_first() {
        let (_tmp, store) = sqlite_store().await;
        let added = store
            .add(
                &[
                    chunk("same text", vec![1.0, 0.0]),
                    chunk("same text", vec![0.0, 1.0]),
                ],
                true,
            )
            .await
            .unwrap();
        assert_eq!(added, 1);

        // The first embedding won.
        let hits = store.search(&[1.0, 0.0], 1).await.unwrap();
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn chunks_without_embeddings_are_skipped() {
        let (_tmp, store) = sqlite_store().await;
        let mut missing = chunk("no vector", vec![]);
        missing.embedding = None;

        let added = store
            .add(&[missing, chunk("ok", vec![1.0, 0.0])], true)
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn clear_recreates_an_empty_index() {
        let (_tmp, store) = sqlite_store().await;
        store
            .add(&[chunk("doc", vec![1.0, 0.0])], true)
            .await
            .unwrap();
        assert!(store.is_indexed().await);

        store.clear().await.unwrap();
        assert_eq!(store.count().await, 0);
        assert!(!store.is_indexed().await);

        // The fresh index accepts writes again.
        store
            .add(&[chunk("doc2", vec![0.0, 1.0])], true)
            .await
            .unwrap();
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn metadata_roundtrips() {
        let (_tmp, store) = sqlite_store().await;
        store
            .add(&[chunk("meta", vec![1.0, 0.0])], true)
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits[0].metadata.title, "meta title");
        assert_eq!(hits[0].metadata.source_url, "https://docs.test/meta");

        let samples = store.sample(5).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].metadata.title, "meta title");
    }

    #[tokio::test]
    async fn memory_store_matches_contract() {
        let store = MemoryVectorStore::new();
        assert_eq!(store.count().await, 0);
        assert!(!store.is_indexed().await);

        let added = store
            .add(
                &[
                    chunk("a", vec![1.0, 0.0]),
                    chunk("a", vec![0.0, 1.0]),
                    chunk("b", vec![0.0, 1.0]),
                ],
                true,
            )
            .await
            .unwrap();
        assert_eq!(added, 2);

        let hits = store.search(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits[0].text, "a");
        assert!(hits[0].distance < hits[1].distance);

        store.clear().await.unwrap();
        assert_eq!(store.count().await, 0);
    }
}
