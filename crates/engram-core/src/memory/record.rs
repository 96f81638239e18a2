//! Memory record - the fundamental unit of storage
//!
//! Each memory is one text artefact owned by exactly one module, with a
//! schemaless metadata map, a full-precision embedding, and access counters.
//! The core never validates domain metadata; it only reads the small set of
//! tracked keys mirrored into the Central Memory Index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schemaless metadata mapping attached to every memory
pub type Metadata = serde_json::Map<String, Value>;

// ============================================================================
// TRACKED METADATA KEYS
// ============================================================================

/// Keys the core reads out of otherwise-opaque metadata
pub mod keys {
    /// Set of category strings, mirrored into the CMI
    pub const CATEGORIES: &str = "categories";
    /// Importance in [0,1], used as a routing tie-break
    pub const IMPORTANCE_SCORE: &str = "importanceScore";
    /// Short display title (<= 60 chars in the CMI)
    pub const TITLE: &str = "title";
    /// One-line summary (<= 120 chars in the CMI)
    pub const SUMMARY: &str = "summary";
    /// Set of keyword strings
    pub const KEYWORDS: &str = "keywords";
}

/// Read a string-array key from a metadata map
pub fn string_set(metadata: &Metadata, key: &str) -> Vec<String> {
    metadata
        .get(key)
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Read the importance score, clamped into [0,1]; 0.5 when absent
pub fn importance_score(metadata: &Metadata) -> f32 {
    metadata
        .get(keys::IMPORTANCE_SCORE)
        .and_then(Value::as_f64)
        .map(|v| v.clamp(0.0, 1.0) as f32)
        .unwrap_or(0.5)
}

/// Read a string key
pub fn string_field(metadata: &Metadata, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

// ============================================================================
// MEMORY
// ============================================================================

/// A stored memory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Unique identifier within the owning module (UUID v4)
    pub id: String,
    /// Opaque caller identity; every read and write is scoped by it
    pub user_id: String,
    /// The text content (<= 50 KB)
    pub content: String,
    /// Schemaless metadata; tracked keys are mirrored into the CMI
    pub metadata: Metadata,
    /// Full-precision embedding, included only when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Number of times this memory was returned or fetched
    pub access_count: u64,
    /// When the memory was last returned or fetched
    pub last_accessed: DateTime<Utc>,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When content or metadata last changed
    pub updated_at: DateTime<Utc>,
}

/// Patch applied by update: absent fields are left untouched.
///
/// A content change re-embeds and re-enriches; a metadata-only change
/// refreshes the tracked fields in the CMI copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryPatch {
    /// Replacement content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Metadata entries to merge over the existing map
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl MemoryPatch {
    /// A patch replacing only the content
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            metadata: None,
        }
    }

    /// A patch merging only metadata
    pub fn metadata(metadata: Metadata) -> Self {
        Self {
            content: None,
            metadata: Some(metadata),
        }
    }

    /// True when the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.metadata.is_none()
    }
}

// ============================================================================
// TESTS
// ============================================================================
