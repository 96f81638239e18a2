//! Dual-fidelity embeddings.
//!
//! Every memory carries two vectors: a full-precision embedding (dimension F)
//! used for module-side search, and a compressed embedding (dimension C) used
//! by the Central Memory Index for cheap cross-module routing. Both are unit
//! length; similarity is cosine everywhere.

mod mock;
mod projection;
mod remote;

pub use mock::MockEmbedder;
pub use projection::Projection;
pub use remote::RemoteEmbedder;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::CoreConfig;
use crate::error::{CoreError, EmbeddingError};

// ============================================================================
// EMBEDDING TYPE
// ============================================================================

/// A unit-normalised embedding vector
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// The embedding vector
    pub vector: Vec<f32>,
}

impl Embedding {
    /// Create a new embedding from a vector
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }

    /// Dimensions of the vector
    pub fn dimensions(&self) -> usize {
        self.vector.len()
    }

    /// Compute cosine similarity with another embedding
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.vector, &other.vector)
    }

    /// Normalize the vector to unit length in place
    pub fn normalize(&mut self) {
        let norm = self.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut self.vector {
                *x /= norm;
            }
        }
    }

    /// Check if the vector is unit length
    pub fn is_normalized(&self) -> bool {
        let norm = self.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        (norm - 1.0).abs() < 0.001
    }

    /// Convert to little-endian bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Create from little-endian bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Some(Self::new(vector))
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when either vector is zero or the dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Full + compressed vectors for one text, produced in a single call so the
/// write pipeline embeds exactly once.
#[derive(Debug, Clone)]
pub struct DualEmbedding {
    /// Full-precision vector (dimension F)
    pub full: Embedding,
    /// Compressed routing vector (dimension C)
    pub compressed: Embedding,
}

// ============================================================================
// PROVIDER CONTRACT
// ============================================================================

/// Produces full and compressed embeddings for arbitrary text.
///
/// Implementations must return unit-length vectors. Transient failures are
/// retried internally (3 attempts, exponential backoff with jitter); what
/// escapes this trait is either success or a failure the caller must surface.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Full-fidelity vector of dimension [`EmbeddingProvider::full_dim`]
    async fn full(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Compressed routing vector of dimension
    /// [`EmbeddingProvider::compressed_dim`]
    async fn compressed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Both vectors for one text
    async fn dual(&self, text: &str) -> Result<DualEmbedding, EmbeddingError>;

    /// Dimension F
    fn full_dim(&self) -> usize;

    /// Dimension C
    fn compressed_dim(&self) -> usize;
}

/// Build the provider selected by configuration.
///
/// A configured credential selects the remote HTTP provider; otherwise mock
/// mode must have been opted into explicitly, or startup fails. The
/// projection seed ties compressed vectors of this process to those already
/// persisted by earlier runs.
pub fn provider_from_config(
    config: &CoreConfig,
    projection_seed: u64,
) -> Result<Arc<dyn EmbeddingProvider>, CoreError> {
    if let (Some(url), Some(key)) = (&config.embedding_url, &config.embedding_key) {
        let projection = Projection::new(projection_seed, config.full_dim, config.compressed_dim);
        return Ok(Arc::new(RemoteEmbedder::new(
            url.clone(),
            key.clone(),
            config.embedding_model.clone(),
            config.full_dim,
            projection,
        )));
    }
    if config.mock_embedding() {
        return Ok(Arc::new(MockEmbedder::new(
            config.full_dim,
            config.compressed_dim,
        )));
    }
    Err(CoreError::from(EmbeddingError::MissingCredentials))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_vector() {
        let mut e = Embedding::new(vec![3.0, 4.0]);
        assert!(!e.is_normalized());
        e.normalize();
        assert!(e.is_normalized());
        assert!((e.vector[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn bytes_round_trip() {
        let e = Embedding::new(vec![0.25, -1.5, 3.75]);
        let restored = Embedding::from_bytes(&e.to_bytes()).unwrap();
        assert_eq!(e, restored);
    }

    #[test]
    fn from_bytes_rejects_ragged_input() {
        assert!(Embedding::from_bytes(&[1, 2, 3]).is_none());
    }

    #[test]
    fn cosine_of_orthogonal_is_zero() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert!((cosine_similarity(&a, &b)).abs() < 1e-6);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_dims_score_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
