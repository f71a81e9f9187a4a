//! The `index` command: load pre-chunked documents from a JSON file,
//! embed the ones that arrived without vectors, and add everything to the
//! vector index with deduplication.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::embedding::generator::EmbeddingGenerator;
use crate::models::Chunk;
use crate::store::{SqliteVectorStore, VectorStore};

pub async fn run_index(config: &Config, input: &Path, clear: bool, dry_run: bool) -> Result<()> {
    let mut chunks = load_chunks(input)?;

    // Chunks that shipped with a vector are indexed as-is; the rest go
    // through the generator.
    let pending: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.embedding.is_none() && !c.text.trim().is_empty())
        .map(|(i, _)| i)
        .collect();

    if dry_run {
        println!("index (dry-run)");
        println!("  chunks in input: {}", chunks.len());
        println!("  chunks needing embeddings: {}", pending.len());
        return Ok(());
    }

    let store = SqliteVectorStore::open(&config.index.path).await?;

    if clear {
        store.clear().await?;
        println!("index — cleared existing collection");
    }

    let mut failed = 0usize;
    if !pending.is_empty() {
        // Batching, caching, retries, and the secondary model all live
        // inside the generator; a failed text comes back as None.
        let generator = EmbeddingGenerator::from_config(&config.embedding)
            .context("Failed to initialize embedding generator")?;
        let texts: Vec<String> = pending.iter().map(|&i| chunks[i].text.clone()).collect();
        let vectors = generator.embed(&texts).await?;
        for (&i, vector) in pending.iter().zip(vectors) {
            match vector {
                Some(v) => chunks[i].embedding = Some(v),
                None => failed += 1,
            }
        }
    }

    let added = store.add(&chunks, true).await?;

    println!("index");
    println!("  chunks in input: {}", chunks.len());
    println!("  embedding failures: {}", failed);
    println!("  added to index: {}", added);
    println!("  indexed total: {}", store.count().await);

    Ok(())
}

fn load_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read chunks file: {}", path.display()))?;

    let chunks: Vec<Chunk> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse chunks file: {}", path.display()))?;

    if chunks.is_empty() {
        bail!("Chunks file {} contains no chunks", path.display());
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, GenerationConfig, IndexConfig, RetrievalConfig};
    use std::io::Write;

    fn test_config(dir: &Path) -> Config {
        Config {
            index: IndexConfig {
                path: dir.join("index.sqlite"),
            },
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            generation: GenerationConfig {
                model: "m".to_string(),
                fallback_models: vec![],
                url: "https://example.test".to_string(),
                api_key_env: "UNUSED".to_string(),
                temperature: 0.3,
                max_history: 5,
                timeout_secs: 60,
            },
        }
    }

    fn write_chunks(dir: &Path, json: &str) -> std::path::PathBuf {
        let path = dir.join("chunks.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn indexes_pre_embedded_chunks_without_a_provider() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let input = write_chunks(
            dir.path(),
            r#"[
                {"text": "Lists hold items.", "metadata": {"title": "Lists"}, "embedding": [1.0, 0.0]},
                {"text": "Lists hold items.", "metadata": {"title": "Lists"}, "embedding": [1.0, 0.0]},
                {"text": "Tuples are fixed.", "metadata": {"title": "Tuples"}, "embedding": [0.0, 1.0]}
            ]"#,
        );

        run_index(&config, &input, false, false).await.unwrap();

        let store = SqliteVectorStore::open(&config.index.path).await.unwrap();
        assert_eq!(store.count().await, 2);
    }

    #[tokio::test]
    async fn clear_flag_drops_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let input = write_chunks(
            dir.path(),
            r#"[{"text": "First run.", "metadata": {}, "embedding": [1.0, 0.0]}]"#,
        );
        run_index(&config, &input, false, false).await.unwrap();

        let input2 = write_chunks(
            dir.path(),
            r#"[{"text": "Second run.", "metadata": {}, "embedding": [0.0, 1.0]}]"#,
        );
        run_index(&config, &input2, true, false).await.unwrap();

        let store = SqliteVectorStore::open(&config.index.path).await.unwrap();
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let input = write_chunks(
            dir.path(),
            r#"[{"text": "Body.", "metadata": {}, "embedding": [1.0, 0.0]}]"#,
        );

        run_index(&config, &input, false, true).await.unwrap();
        assert!(!config.index.path.exists());
    }

    #[tokio::test]
    async fn empty_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let input = write_chunks(dir.path(), "[]");

        assert!(run_index(&config, &input, false, false).await.is_err());
    }
}
