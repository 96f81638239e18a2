//! Query routing.
//!
//! Scans the compressed index for the user, aggregates row hits to modules,
//! and returns the top modules with a confidence score. Cold users (no index
//! rows yet) fall back to every active module at confidence zero; the
//! orchestrator round-robins over that set so the same module is not always
//! the one sampled.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CmiHit, CmiIndex};
use crate::embedding::Embedding;
use crate::error::CmiError;

/// Reason string attached to index-driven selections
pub const ROUTE_REASON: &str = "top-N CMI cosine + importance";

/// Reason string attached to cold-user selections
pub const NO_INDEX_FALLBACK: &str = "no-index-fallback";

/// Index rows scanned per routing decision
const SCAN_ROWS: usize = 64;

// ============================================================================
// TYPES
// ============================================================================

/// Confidence weighting: `score * (base + importance_weight * importance)`.
///
/// The constants are tunables; the defaults weight cosine score at 0.7 with
/// up to 0.3 added by memory importance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterWeights {
    /// Weight of the raw cosine score
    pub base: f32,
    /// Weight of the importance contribution
    pub importance: f32,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self {
            base: 0.7,
            importance: 0.3,
        }
    }
}

/// One selected module with its routing confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRoute {
    /// Module id
    pub module_id: String,
    /// Routing confidence in [0,1]
    pub confidence: f32,
    /// Why this module was selected
    pub reason: String,
    /// Index rows that contributed
    pub hits: usize,
}

// ============================================================================
// ROUTER
// ============================================================================

/// CMI-driven module selection
pub struct Router {
    cmi: Arc<CmiIndex>,
    weights: RouterWeights,
}

impl Router {
    /// Router over the given index with default weights
    pub fn new(cmi: Arc<CmiIndex>) -> Self {
        Self {
            cmi,
            weights: RouterWeights::default(),
        }
    }

    /// Override the confidence weighting
    pub fn with_weights(mut self, weights: RouterWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Select up to `k_modules` modules for the query vector.
    ///
    /// `active` is the registry's current module set; a cold user gets the
    /// whole set back at confidence zero with the fallback reason.
    pub fn route(
        &self,
        user_id: &str,
        query: &Embedding,
        k_modules: usize,
        active: &[String],
    ) -> Result<Vec<ModuleRoute>, CmiError> {
        let rows = self.cmi.top_k(user_id, query, SCAN_ROWS)?;

        if rows.is_empty() {
            debug!(user_id, "no index rows; falling back to all active modules");
            return Ok(active
                .iter()
                .map(|module_id| ModuleRoute {
                    module_id: module_id.clone(),
                    confidence: 0.0,
                    reason: NO_INDEX_FALLBACK.to_string(),
                    hits: 0,
                })
                .collect());
        }

        let mut routes = self.aggregate(rows);
        routes.truncate(k_modules);
        Ok(routes)
    }

    /// Collapse scored rows into per-module confidence.
    fn aggregate(&self, rows: Vec<CmiHit>) -> Vec<ModuleRoute> {
        let mut per_module: Vec<(String, f32, usize)> = Vec::new();
        for hit in rows {
            let confidence =
                hit.score * (self.weights.base + self.weights.importance * hit.importance_score);
            match per_module.iter_mut().find(|(id, _, _)| *id == hit.module_id) {
                Some((_, best, hits)) => {
                    *best = best.max(confidence);
                    *hits += 1;
                }
                None => per_module.push((hit.module_id, confidence, 1)),
            }
        }

        // Confidence desc, then hit count desc, then lexicographic id
        per_module.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(&b.0))
        });

        per_module
            .into_iter()
            .map(|(module_id, confidence, hits)| ModuleRoute {
                module_id,
                confidence,
                reason: ROUTE_REASON.to_string(),
                hits,
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
