//! Deterministic hash embedder.
//!
//! Test-time stand-in for the remote provider: each token is hashed into a
//! bucket of the output vector, so texts sharing vocabulary land near each
//! other under cosine similarity while unrelated texts stay close to
//! orthogonal. Stable across processes and platforms (FNV-1a, no RandomState).
//!
//! This is a *test-time* contract. Production never falls back to it; the
//! provider factory refuses to start without credentials unless
//! `ALLOW_MOCK_EMBED=1` is set.

use async_trait::async_trait;

use super::{DualEmbedding, Embedding, EmbeddingProvider};
use crate::error::EmbeddingError;

/// Salt separating the full and compressed bucket spaces
const COMPRESSED_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Deterministic bag-of-tokens embedder
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    full_dim: usize,
    compressed_dim: usize,
}

impl MockEmbedder {
    /// Create a mock embedder with the given output dimensions
    pub fn new(full_dim: usize, compressed_dim: usize) -> Self {
        Self {
            full_dim,
            compressed_dim,
        }
    }

    fn embed(&self, text: &str, dim: usize, salt: u64) -> Result<Embedding, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".into()));
        }

        let mut vector = vec![0.0f32; dim];
        for token in tokenize(text) {
            let h = fnv1a(token.as_bytes()) ^ salt;
            let bucket = (h % dim as u64) as usize;
            vector[bucket] += 1.0;
            // Second bucket per token smooths collisions in small dimensions
            let h2 = fnv1a(&h.to_le_bytes());
            vector[(h2 % dim as u64) as usize] += 0.5;
        }

        let mut embedding = Embedding::new(vector);
        embedding.normalize();
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn full(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.embed(text, self.full_dim, 0)
    }

    async fn compressed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.embed(text, self.compressed_dim, COMPRESSED_SALT)
    }

    async fn dual(&self, text: &str) -> Result<DualEmbedding, EmbeddingError> {
        Ok(DualEmbedding {
            full: self.full(text).await?,
            compressed: self.compressed(text).await?,
        })
    }

    fn full_dim(&self) -> usize {
        self.full_dim
    }

    fn compressed_dim(&self) -> usize {
        self.compressed_dim
    }
}

/// Lowercased alphanumeric tokens
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// FNV-1a, 64-bit
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder() -> MockEmbedder {
        MockEmbedder::new(64, 16)
    }

    #[tokio::test]
    async fn deterministic_across_calls() {
        let e = embedder();
        let a = e.full("the derivative of sin is cos").await.unwrap();
        let b = e.full("the derivative of sin is cos").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn output_is_unit_length() {
        let e = embedder();
        let v = e.full("hello world").await.unwrap();
        assert!(v.is_normalized());
        let c = e.compressed("hello world").await.unwrap();
        assert!(c.is_normalized());
        assert_eq!(c.dimensions(), 16);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher() {
        let e = embedder();
        let note = e.full("derivative of sin x is cos x").await.unwrap();
        let related = e.full("what is the derivative of sin x").await.unwrap();
        let unrelated = e.full("grocery shopping list bananas").await.unwrap();

        let close = note.cosine_similarity(&related);
        let far = note.cosine_similarity(&unrelated);
        assert!(close > far);
        assert!(close > 0.5);
    }

    #[tokio::test]
    async fn empty_text_rejected() {
        let e = embedder();
        assert!(e.full("   ").await.is_err());
    }

    #[tokio::test]
    async fn tokenization_ignores_punctuation_and_case() {
        let e = embedder();
        let a = e.full("Sin(x), Cos(x)").await.unwrap();
        let b = e.full("sin x cos x").await.unwrap();
        assert!(a.cosine_similarity(&b) > 0.99);
    }
}
