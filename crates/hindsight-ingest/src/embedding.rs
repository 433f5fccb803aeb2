//! Ollama embedding client.
//!
//! Calls `POST {OLLAMA_URL}/api/embeddings` with one prompt per request
//! and returns the raw vector. Transient failures (timeouts, connection
//! errors, 5xx) are retried with capped exponential backoff; client
//! errors fail immediately. Requests are issued sequentially per job so
//! a local embedding service is never overwhelmed.

use crate::error::{Error, Result};
use hindsight_core::EMBEDDING_MODEL;
use serde::Deserialize;
use std::time::Duration;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum retry attempts after the initial request.
const MAX_RETRIES: u32 = 5;

/// Base backoff delay, doubled per attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Backoff ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(16);

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Client for the embedding endpoint.
#[derive(Clone)]
pub struct Embedder {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl Embedder {
    pub fn new(ollama_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/api/embeddings", ollama_url.trim_end_matches('/')),
            model: EMBEDDING_MODEL.to_string(),
        })
    }

    /// Embed one text, retrying transient failures.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let mut last_err: Option<Error> = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "embedding retry");
                tokio::time::sleep(delay).await;
            }

            match self.client.post(&self.url).json(&body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = response.json().await?;
                        if parsed.embedding.is_empty() {
                            return Err(Error::Embedding("empty embedding response".to_string()));
                        }
                        return Ok(parsed.embedding);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.is_server_error() || status.as_u16() == 429 {
                        last_err = Some(Error::EmbeddingUnavailable(format!(
                            "endpoint returned {status}: {body_text}"
                        )));
                        continue;
                    }
                    // Client error: retrying will not help.
                    return Err(Error::Embedding(format!(
                        "embedding endpoint returned {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(Error::EmbeddingUnavailable(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::EmbeddingUnavailable("embedding failed after retries".to_string())
        }))
    }
}

/// Exponential backoff: 500 ms, 1 s, 2 s, 4 s, 8 s, capped at 16 s.
fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE
        .saturating_mul(1u32 << (attempt - 1).min(6))
        .min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(2));
        assert_eq!(backoff_delay(5), Duration::from_secs(8));
        assert_eq!(backoff_delay(6), Duration::from_secs(16));
        assert_eq!(backoff_delay(10), Duration::from_secs(16));
    }

    #[test]
    fn url_is_normalised() {
        let e = Embedder::new("http://localhost:11434/").unwrap();
        assert_eq!(e.url, "http://localhost:11434/api/embeddings");
    }
}
