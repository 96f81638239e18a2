//! Compressed-vector projection.
//!
//! When the provider emits a single vector size, the routing vector is a
//! deterministic random projection of the full embedding. The sign matrix is
//! seeded once at first startup and the seed persisted, so every process
//! projects identically for the lifetime of the index.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Embedding;

/// Seeded sign-matrix projection from dimension F to dimension C
pub struct Projection {
    /// C rows of F signs each, flattened
    signs: Vec<f32>,
    full_dim: usize,
    compressed_dim: usize,
}

impl Projection {
    /// Materialise the projection matrix for the given seed.
    pub fn new(seed: u64, full_dim: usize, compressed_dim: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let signs = (0..full_dim * compressed_dim)
            .map(|_| if rng.random::<bool>() { 1.0 } else { -1.0 })
            .collect();
        Self {
            signs,
            full_dim,
            compressed_dim,
        }
    }

    /// Dimension C of the output
    pub fn compressed_dim(&self) -> usize {
        self.compressed_dim
    }

    /// Project a full vector down to the compressed dimension and normalise.
    ///
    /// Panics are avoided by truncating or zero-padding a mismatched input;
    /// the adapter validates dimensions before anything reaches this point.
    pub fn project(&self, full: &Embedding) -> Embedding {
        let mut out = vec![0.0f32; self.compressed_dim];
        for (row, slot) in out.iter_mut().enumerate() {
            let base = row * self.full_dim;
            let mut acc = 0.0f32;
            for (col, v) in full.vector.iter().take(self.full_dim).enumerate() {
                acc += v * self.signs[base + col];
            }
            *slot = acc;
        }
        let mut embedding = Embedding::new(out);
        embedding.normalize();
        embedding
    }
}

impl std::fmt::Debug for Projection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projection")
            .field("full_dim", &self.full_dim)
            .field("compressed_dim", &self.compressed_dim)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
