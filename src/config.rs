use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
}

/// Settings for one embedding backend (primary or fallback).
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingBackendConfig {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Secondary (local) model used when every retry on the primary fails.
    #[serde(default)]
    pub fallback: Option<EmbeddingBackendConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_base_delay_secs: default_retry_base_delay_secs(),
            timeout_secs: default_timeout_secs(),
            use_cache: default_use_cache(),
            cache_dir: default_cache_dir(),
            fallback: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_secs() -> f64 {
    1.0
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_use_cache() -> bool {
    true
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache/embeddings")
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// View of the primary backend settings in the shared backend shape.
    pub fn primary(&self) -> EmbeddingBackendConfig {
        EmbeddingBackendConfig {
            provider: self.provider.clone(),
            model: self.model.clone(),
            dims: self.dims,
            url: self.url.clone(),
            api_key_env: self.api_key_env.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f32,
    #[serde(default = "default_mmr_diversity")]
    pub mmr_diversity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            relevance_threshold: default_relevance_threshold(),
            mmr_diversity: default_mmr_diversity(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_relevance_threshold() -> f32 {
    0.5
}
fn default_mmr_diversity() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    pub model: String,
    /// Ordered alternatives tried when a model is not found. The preferred
    /// model is always tried first; duplicates are skipped.
    #[serde(default = "default_fallback_models")]
    pub fallback_models: Vec<String>,
    pub url: String,
    #[serde(default = "default_generation_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Conversation history cap in exchanges (user + assistant pairs).
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_fallback_models() -> Vec<String> {
    vec![
        "gemini-2.5-flash".to_string(),
        "gemini-2.0-flash".to_string(),
        "gemini-pro".to_string(),
        "gemini-1.5-pro".to_string(),
    ]
}
fn default_generation_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_history() -> usize {
    5
}
fn default_generation_timeout_secs() -> u64 {
    60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Feeds Duration::from_secs_f64, which panics on negative or NaN.
    if !config.embedding.retry_base_delay_secs.is_finite()
        || config.embedding.retry_base_delay_secs < 0.0
    {
        anyhow::bail!("embedding.retry_base_delay_secs must be a finite number >= 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if let Some(fallback) = &config.embedding.fallback {
        match fallback.provider.as_str() {
            "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown fallback embedding provider: '{}'. Must be openai or ollama.",
                other
            ),
        }
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if !(-1.0..=1.0).contains(&config.retrieval.relevance_threshold) {
        anyhow::bail!("retrieval.relevance_threshold must be in [-1.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.retrieval.mmr_diversity) {
        anyhow::bail!("retrieval.mmr_diversity must be in [0.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 1.0]");
    }

    if config.generation.max_history == 0 {
        anyhow::bail!("generation.max_history must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults_applied() {
        let f = write_config(
            r#"
[index]
path = "data/askdocs.sqlite"

[generation]
model = "gemini-2.5-flash"
url = "https://example.test/v1/chat/completions"
"#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.embedding.batch_size, 100);
        assert_eq!(cfg.embedding.max_retries, 3);
        assert!((cfg.embedding.retry_base_delay_secs - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert!((cfg.retrieval.relevance_threshold - 0.5).abs() < f32::EPSILON);
        assert!((cfg.retrieval.mmr_diversity - 0.5).abs() < f32::EPSILON);
        assert!((cfg.generation.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(cfg.generation.max_history, 5);
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn rejects_bad_diversity() {
        let f = write_config(
            r#"
[index]
path = "data/askdocs.sqlite"

[retrieval]
mmr_diversity = 1.5

[generation]
model = "m"
url = "https://example.test"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_negative_retry_delay() {
        let f = write_config(
            r#"
[index]
path = "data/askdocs.sqlite"

[embedding]
retry_base_delay_secs = -1.0

[generation]
model = "m"
url = "https://example.test"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_unknown_provider() {
        let f = write_config(
            r#"
[index]
path = "data/askdocs.sqlite"

[embedding]
provider = "quantum"

[generation]
model = "m"
url = "https://example.test"
"#,
        );
        assert!(load_config(f.path()).is_err());
    }
}
