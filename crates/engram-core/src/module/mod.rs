//! Memory modules - the uniform contract
//!
//! Every domain store implements [`MemoryModule`]; the only per-module
//! variation is metadata enrichment. The shared pipeline (embed, insert,
//! index, invalidate) lives in [`BaseModule`] and calls out to a pure
//! [`Enricher`], so the six concrete modules are one enricher each rather
//! than six copies of the machinery.

mod base;
mod enrich;

pub mod communication;
pub mod creative;
pub mod learning;
pub mod personal;
pub mod technical;
pub mod work;

pub use base::{BaseModule, ModuleDeps};
pub use enrich::{Enricher, Enrichment};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embedding::Embedding;
use crate::error::ModuleError;
use crate::memory::{Memory, MemoryPatch, Metadata, ModuleStats, SearchHit, SearchOptions, StoreReceipt};
use crate::store::MetricsSnapshot;

// ============================================================================
// MODULE TYPE
// ============================================================================

/// Classification driving configuration defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    /// General-purpose domain store
    #[default]
    Standard,
    /// Narrow domain with versioned history
    Specialised,
    /// Externally fed store with encryption at rest
    External,
}

impl ModuleType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Standard => "standard",
            ModuleType::Specialised => "specialised",
            ModuleType::External => "external",
        }
    }

    /// Parse from string name, defaulting to standard
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "specialised" | "specialized" => ModuleType::Specialised,
            "external" => ModuleType::External,
            _ => ModuleType::Standard,
        }
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MODULE CONFIGURATION
// ============================================================================

/// Metadata handling hints for a module's table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMetadataSpec {
    /// Fields exposed to text search
    pub searchable_fields: Vec<String>,
    /// Fields a write must carry
    pub required_fields: Vec<String>,
    /// Fields worth a JSON index
    pub indexed_fields: Vec<String>,
}

/// Per-module configuration, stamped with type defaults at register time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    /// Stable module id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// What the module stores
    pub description: String,
    /// Backing table name
    pub table_name: String,
    /// Module classification
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    /// Per-user memory ceiling
    pub max_memory_size: i64,
    /// Days before a memory expires; -1 never
    pub retention_days: i64,
    /// Cap on results from one module search
    pub search_limit: usize,
    /// Keep version history on update
    pub enable_versioning: bool,
    /// Encrypt content at rest
    pub enable_encryption: bool,
    /// Free-form feature switches
    #[serde(default)]
    pub features: std::collections::BTreeMap<String, bool>,
    /// Metadata handling hints
    #[serde(default)]
    pub metadata: ModuleMetadataSpec,
}

impl ModuleConfig {
    /// Configuration for a module of the given type, with that type's
    /// documented defaults.
    pub fn for_type(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        module_type: ModuleType,
    ) -> Self {
        let id = id.into();
        let (max_memory_size, retention_days, search_limit, versioning, encryption) =
            match module_type {
                ModuleType::Standard => (10_000, 365, 50, false, false),
                ModuleType::Specialised => (5_000, 180, 30, true, false),
                ModuleType::External => (1_000, 90, 20, false, true),
            };
        Self {
            table_name: format!("memories_{id}"),
            id,
            name: name.into(),
            description: description.into(),
            module_type,
            max_memory_size,
            retention_days,
            search_limit,
            enable_versioning: versioning,
            enable_encryption: encryption,
            features: Default::default(),
            metadata: Default::default(),
        }
    }

    /// Shallow-merge a JSON patch over this configuration.
    ///
    /// Unknown keys are ignored; `id` is never patched.
    pub fn merged_with(&self, patch: &Value) -> Self {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let (Some(target), Some(source)) = (value.as_object_mut(), patch.as_object()) {
            for (key, patch_value) in source {
                if key == "id" {
                    continue;
                }
                target.insert(key.clone(), patch_value.clone());
            }
        }
        serde_json::from_value(value).unwrap_or_else(|_| self.clone())
    }
}

// ============================================================================
// DEPENDENCIES
// ============================================================================

/// Dependency declaration advertised to the loader
#[derive(Debug, Clone, Default)]
pub struct ModuleDependencies {
    /// Modules that must be live before this one loads
    pub requires: Vec<&'static str>,
    /// Modules connected when available, skipped otherwise
    pub optional: Vec<&'static str>,
}

// ============================================================================
// MODULE CONTRACT
// ============================================================================

/// The uniform module contract.
///
/// Ten caller-facing operations plus lifecycle hooks; the supervision and
/// reconciliation surfaces at the bottom are crate-internal seams the
/// orchestrator, supervisor, and reconciler drive.
#[async_trait]
pub trait MemoryModule: Send + Sync {
    /// Stable module id
    fn id(&self) -> &str;

    /// Current configuration
    fn config(&self) -> ModuleConfig;

    /// Dependency declaration for the loader
    fn dependencies(&self) -> ModuleDependencies {
        ModuleDependencies::default()
    }

    /// Prepare the module for traffic
    async fn initialize(&self) -> Result<(), ModuleError>;

    /// Stop accepting traffic and release resources
    async fn shutdown(&self) -> Result<(), ModuleError>;

    /// Liveness probe
    async fn health_check(&self) -> bool;

    /// Embed, enrich, insert, and index one memory
    async fn store(
        &self,
        user_id: &str,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<StoreReceipt, ModuleError>;

    /// Text search: embed the query, then search by embedding (cached)
    async fn search(
        &self,
        user_id: &str,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>, ModuleError>;

    /// Cosine search against a precomputed full-precision vector
    async fn search_by_embedding(
        &self,
        user_id: &str,
        vector: &Embedding,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>, ModuleError>;

    /// Fetch one memory, bumping its access counters
    async fn get(&self, user_id: &str, id: &str) -> Result<Option<Memory>, ModuleError>;

    /// Patch content and/or metadata; content changes re-embed and re-index
    async fn update(
        &self,
        user_id: &str,
        id: &str,
        patch: MemoryPatch,
    ) -> Result<bool, ModuleError>;

    /// Physically delete a memory and its index row. Idempotent: deleting
    /// an absent id is a success that reports `false`.
    async fn delete(&self, user_id: &str, id: &str) -> Result<bool, ModuleError>;

    /// Per-user statistics
    async fn stats(&self, user_id: &str) -> Result<ModuleStats, ModuleError>;

    /// Configuration changed in the registry
    async fn on_config_update(&self, config: ModuleConfig);

    /// The loader wired another module to this one
    async fn on_module_connect(&self, other_id: &str, other: Arc<dyn MemoryModule>);

    /// Best-effort broadcast event
    async fn on_event(&self, name: &str, payload: &Value);

    // ------------------------------------------------------------------
    // Supervision and reconciliation seams
    // ------------------------------------------------------------------

    /// Adapter counters for health classification
    fn metrics(&self) -> MetricsSnapshot;

    /// Total memories across all users (health metric)
    async fn total_memories(&self) -> i64;

    /// Asynchronous access-count bump for search hits (off the critical path)
    async fn mark_accessed(&self, user_id: &str, ids: &[String]);

    /// Whether a row exists (reconciliation probe)
    async fn contains(&self, user_id: &str, id: &str) -> Result<bool, ModuleError>;

    /// Page of `(user_id, memory_id)` references for the reconciliation sweep
    async fn row_refs(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(String, String)>, ModuleError>;

    /// Re-create the CMI row for an existing memory
    async fn reindex(&self, user_id: &str, id: &str) -> Result<bool, ModuleError>;

    /// Delete memories past the retention window, cascading their index rows
    async fn prune_expired(&self) -> Result<u64, ModuleError>;
}

// ============================================================================
// TESTS
// ============================================================================
