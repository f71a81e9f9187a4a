//! Generation service boundary.
//!
//! [`GenerationService`] accepts an ordered sequence of role-tagged
//! messages and returns either one text result or a stream of text
//! fragments. [`HttpGenerationService`] is the concrete backend, speaking
//! the OpenAI-compatible `/chat/completions` shape; it classifies
//! "model not found" responses as [`RagError::ModelUnavailable`] so the
//! chain's fallback machine can recover from them.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::GenerationConfig;
use crate::error::RagError;
use crate::models::ChatMessage;

/// A text-generation model endpoint.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate one completion for the given messages.
    async fn generate(
        &self,
        model: &str,
        temperature: f32,
        messages: &[ChatMessage],
    ) -> Result<String, RagError>;

    /// Generate a completion as a lazy, finite, non-restartable sequence
    /// of text fragments. The default implementation degrades to one
    /// fragment holding the full non-streaming result.
    async fn generate_stream(
        &self,
        model: &str,
        temperature: f32,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<Result<String, RagError>>, RagError> {
        let text = self.generate(model, temperature, messages).await?;
        let (tx, rx) = mpsc::channel(1);
        // Receiver is returned before anything is consumed; a dropped
        // receiver just closes the channel.
        let _ = tx.send(Ok(text)).await;
        Ok(rx)
    }
}

/// Accumulate a fragment stream into one string, in arrival order.
/// An error fragment aborts accumulation and discards partial text.
pub async fn collect_stream(
    mut rx: mpsc::Receiver<Result<String, RagError>>,
) -> Result<String, RagError> {
    let mut answer = String::new();
    while let Some(fragment) = rx.recv().await {
        answer.push_str(&fragment?);
    }
    Ok(answer)
}

/// HTTP backend for OpenAI-compatible chat completion endpoints.
pub struct HttpGenerationService {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpGenerationService {
    /// Build the service from configuration. The API key is resolved from
    /// the configured environment variable; a missing credential is a
    /// fatal configuration error.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, RagError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RagError::Configuration(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn generate(
        &self,
        model: &str,
        temperature: f32,
        messages: &[ChatMessage],
    ) -> Result<String, RagError> {
        let body = serde_json::json!({
            "model": model,
            "temperature": temperature,
            "messages": messages,
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
            if status.as_u16() == 404 || body_text.to_lowercase().contains("not found") {
                return Err(RagError::ModelUnavailable {
                    model: model.to_string(),
                    detail: format!("{}: {}", status, body_text),
                });
            }
            return Err(RagError::Generation(format!(
                "Generation API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response.json().await?;
        parse_completion(&json)
    }
}

fn parse_completion(json: &serde_json::Value) -> Result<String, RagError> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            RagError::Generation("Invalid completion response: missing choices".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_completion_shape() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Lists hold items."}}]
        });
        assert_eq!(parse_completion(&json).unwrap(), "Lists hold items.");
    }

    #[test]
    fn missing_choices_is_a_generation_error() {
        let json = serde_json::json!({"choices": []});
        assert!(matches!(
            parse_completion(&json),
            Err(RagError::Generation(_))
        ));
    }

    #[tokio::test]
    async fn stream_accumulates_in_arrival_order() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok("Hello".to_string())).await.unwrap();
        tx.send(Ok(", ".to_string())).await.unwrap();
        tx.send(Ok("world".to_string())).await.unwrap();
        drop(tx);

        assert_eq!(collect_stream(rx).await.unwrap(), "Hello, world");
    }

    #[tokio::test]
    async fn stream_error_discards_partial_text() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok("partial".to_string())).await.unwrap();
        tx.send(Err(RagError::Generation("mid-stream failure".to_string())))
            .await
            .unwrap();
        drop(tx);

        assert!(collect_stream(rx).await.is_err());
    }
}
