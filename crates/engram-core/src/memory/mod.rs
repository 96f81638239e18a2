//! Memory module - core types and data structures
//!
//! The record type shared by every module, search inputs and outputs, and
//! the per-module statistics surface.

mod record;

pub use record::{importance_score, keys, string_field, string_set, Memory, MemoryPatch, Metadata};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// SEARCH OPTIONS
// ============================================================================

/// Options for module-level and federated search
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    /// Maximum results returned after the merge
    pub limit: usize,
    /// Minimum cosine score a result must reach
    pub min_score: f32,
    /// Explicit module list; bypasses CMI routing when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modules: Option<Vec<String>>,
    /// Include the full embedding on each result
    pub include_embedding: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_score: 0.5,
            modules: None,
            include_embedding: false,
        }
    }
}

impl SearchOptions {
    /// Options with a custom result limit
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Stable cache-key fragment for this option set
    pub fn cache_key(&self) -> String {
        let modules = self
            .modules
            .as_ref()
            .map(|m| m.join(","))
            .unwrap_or_default();
        format!(
            "{}:{}:{}:{}",
            self.limit, self.min_score, self.include_embedding, modules
        )
    }
}

// ============================================================================
// SEARCH RESULTS
// ============================================================================

/// One scored result from one module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// The matched memory
    pub memory: Memory,
    /// Cosine score in [0,1]
    pub score: f32,
    /// Module that owns the memory; part of the result identity
    pub module: String,
}

/// Federated search response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedSearchResult {
    /// Merged, score-sorted results
    pub results: Vec<SearchHit>,
    /// True when at least one consulted module was elided (slow, failed,
    /// or unhealthy) - never masqueraded as a complete answer
    pub partial: bool,
    /// Modules that contributed results
    pub consulted: Vec<String>,
    /// Modules that were selected but elided, with the reason
    pub elided: Vec<ElidedModule>,
    /// The routing decision behind this response
    pub routing: Vec<crate::cmi::ModuleRoute>,
    /// Whether this response was served from cache
    pub from_cache: bool,
}

/// A selected module that did not contribute to the result set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElidedModule {
    /// Module id
    pub module: String,
    /// Why it was skipped ("timeout", "unhealthy", or an error string)
    pub reason: String,
}

// ============================================================================
// STORE RECEIPT
// ============================================================================

/// Outcome of a store operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreReceipt {
    /// Module-side id of the new memory
    pub id: String,
    /// Module that owns it
    pub module: String,
    /// False when CMI indexing failed and reconciliation was enqueued;
    /// the memory is still retrievable through direct module search
    pub indexed: bool,
}

// ============================================================================
// MODULE STATISTICS
// ============================================================================

/// Statistics for one module, scoped to one user
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStats {
    /// Number of memories this user has in the module
    pub total_memories: i64,
    /// Sum of access counts across those memories
    pub total_accesses: i64,
    /// Mean importance score of enriched memories
    pub average_importance: f32,
    /// Timestamp of the oldest memory
    pub oldest_memory: Option<DateTime<Utc>>,
    /// Timestamp of the newest memory
    pub newest_memory: Option<DateTime<Utc>>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_contract() {
        let opts = SearchOptions::default();
        assert_eq!(opts.limit, 10);
        assert_eq!(opts.min_score, 0.5);
        assert!(opts.modules.is_none());
        assert!(!opts.include_embedding);
    }

    #[test]
    fn cache_key_distinguishes_option_sets() {
        let a = SearchOptions::default();
        let b = SearchOptions {
            modules: Some(vec!["learning".into()]),
            ..SearchOptions::default()
        };
        assert_ne!(a.cache_key(), b.cache_key());
    }
}
