//! Persistent embedding cache keyed by content digest.
//!
//! One JSON record per entry, stored in a flat directory as
//! `<digest>.json` with body `{"embedding": [...]}`. The digest is
//! SHA-256 over `model_name \0 text`, so vectors from different embedding
//! models can never be mixed in one entry. Entries persist across process
//! restarts and are only removed by clearing the directory.
//!
//! Writes go through a temp file in the same directory followed by a
//! rename, so concurrent writers cannot leave a partial entry behind and
//! concurrent readers never observe one.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::RagError;

#[derive(Serialize, Deserialize)]
struct CacheRecord {
    embedding: Vec<f32>,
}

/// Flat-directory embedding cache.
pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    /// Open (and create if missing) the cache directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RagError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| RagError::Cache(format!("Failed to create {}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    /// Stable content digest for a (model, text) pair.
    pub fn key(model: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Load a cached vector. Missing or corrupt entries are misses;
    /// corrupt entries are logged and left for the next store to replace.
    pub fn load(&self, key: &str) -> Option<Vec<f32>> {
        let path = self.entry_path(key);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CacheRecord>(&content) {
            Ok(record) => Some(record.embedding),
            Err(e) => {
                warn!("Corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Persist a vector under `key`. Failures are logged, not fatal: the
    /// vector was already computed and the caller can still use it.
    pub fn store(&self, key: &str, embedding: &[f32]) {
        if let Err(e) = self.store_atomic(key, embedding) {
            warn!("Error saving cache entry {}: {}", key, e);
        }
    }

    fn store_atomic(&self, key: &str, embedding: &[f32]) -> Result<(), RagError> {
        let record = CacheRecord {
            embedding: embedding.to_vec(),
        };
        let body = serde_json::to_vec(&record)?;

        // Temp file must live in the cache directory so the rename stays
        // on one filesystem and is atomic.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| RagError::Cache(e.to_string()))?;
        tmp.write_all(&body)
            .map_err(|e| RagError::Cache(e.to_string()))?;
        tmp.persist(self.entry_path(key))
            .map_err(|e| RagError::Cache(e.to_string()))?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_and_model_scoped() {
        let a = EmbeddingCache::key("model-a", "hello");
        let b = EmbeddingCache::key("model-a", "hello");
        let c = EmbeddingCache::key("model-b", "hello");
        let d = EmbeddingCache::key("model-a", "world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn store_then_load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cache = EmbeddingCache::new(tmp.path()).unwrap();
        let key = EmbeddingCache::key("m", "some text");

        assert!(cache.load(&key).is_none());
        cache.store(&key, &[0.25, -1.0, 3.5]);
        assert_eq!(cache.load(&key).unwrap(), vec![0.25f32, -1.0, 3.5]);
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cache = EmbeddingCache::new(tmp.path()).unwrap();
        let key = EmbeddingCache::key("m", "text");

        std::fs::write(tmp.path().join(format!("{}.json", key)), "not json").unwrap();
        assert!(cache.load(&key).is_none());

        // A later store replaces the corrupt entry.
        cache.store(&key, &[1.0]);
        assert_eq!(cache.load(&key).unwrap(), vec![1.0f32]);
    }

    #[test]
    fn entries_survive_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let key = EmbeddingCache::key("m", "persistent");
        {
            let cache = EmbeddingCache::new(tmp.path()).unwrap();
            cache.store(&key, &[9.0, 8.0]);
        }
        let reopened = EmbeddingCache::new(tmp.path()).unwrap();
        assert_eq!(reopened.load(&key).unwrap(), vec![9.0f32, 8.0]);
    }
}
