//! Remote HTTP embedding provider.
//!
//! POSTs `{text, model}` with a bearer token and expects `{embedding: [f32]}`
//! back. Transient failures (transport errors, 429, 5xx) are retried with
//! exponential backoff and jitter; everything else surfaces immediately.
//! The compressed vector is a seeded random projection of the full one.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{DualEmbedding, Embedding, EmbeddingProvider, Projection};
use crate::error::EmbeddingError;

/// Retry attempts per request
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff before jitter
const BACKOFF_BASE: Duration = Duration::from_millis(500);

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// HTTP embedding provider
pub struct RemoteEmbedder {
    client: reqwest::Client,
    url: String,
    key: String,
    model: String,
    full_dim: usize,
    projection: Projection,
}

impl RemoteEmbedder {
    /// Create a provider for the given endpoint.
    pub fn new(
        url: String,
        key: String,
        model: String,
        full_dim: usize,
        projection: Projection,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            key,
            model,
            full_dim,
            projection,
        }
    }

    async fn request_once(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.key)
            .json(&EmbedRequest {
                text,
                model: &self.model,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbedResponse = response.json().await?;
        if parsed.embedding.len() != self.full_dim {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.full_dim,
                got: parsed.embedding.len(),
            });
        }

        let mut embedding = Embedding::new(parsed.embedding);
        embedding.normalize();
        Ok(embedding)
    }

    async fn request_with_retry(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut last_error: Option<EmbeddingError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.request_once(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(e) if e.is_transient() || is_retryable_status(&e) => {
                    warn!(attempt, error = %e, "transient embedding failure");
                    last_error = Some(e);
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(EmbeddingError::Exhausted {
            attempts: MAX_ATTEMPTS,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

/// 429 is retryable even though 4xx is otherwise fatal
fn is_retryable_status(e: &EmbeddingError) -> bool {
    matches!(e, EmbeddingError::Provider { status: 429, .. })
}

/// Exponential backoff with uniform jitter
fn backoff(attempt: u32) -> Duration {
    let base = BACKOFF_BASE * 2u32.saturating_pow(attempt - 1);
    let jitter = rand::rng().random_range(0..=base.as_millis() as u64 / 2);
    base + Duration::from_millis(jitter)
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    async fn full(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".into()));
        }
        debug!(len = text.len(), "requesting full embedding");
        self.request_with_retry(text).await
    }

    async fn compressed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let full = self.full(text).await?;
        Ok(self.projection.project(&full))
    }

    async fn dual(&self, text: &str) -> Result<DualEmbedding, EmbeddingError> {
        let full = self.full(text).await?;
        let compressed = self.projection.project(&full);
        Ok(DualEmbedding { full, compressed })
    }

    fn full_dim(&self) -> usize {
        self.full_dim
    }

    fn compressed_dim(&self) -> usize {
        self.projection.compressed_dim()
    }
}

// ============================================================================
// TESTS
// ============================================================================
