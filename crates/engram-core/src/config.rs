//! Runtime configuration.
//!
//! All knobs are read once at startup from the environment; the resulting
//! [`CoreConfig`] is an explicit dependency injected into every component.
//! A missing embedding credential is a fatal startup condition unless mock
//! mode is explicitly opted into with `ALLOW_MOCK_EMBED=1`.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CoreError, Result};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default full-fidelity embedding dimension
pub const DEFAULT_FULL_DIM: usize = 1536;

/// Default compressed (routing) embedding dimension
pub const DEFAULT_COMPRESSED_DIM: usize = 512;

/// Hard ceiling on memory content size
pub const MAX_CONTENT_BYTES: usize = 50 * 1024;

/// Cache entry time-to-live
pub const CACHE_TTL: Duration = Duration::from_secs(300);

// ============================================================================
// CONFIG
// ============================================================================

/// Process-wide configuration for the memory core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Embedding provider endpoint (`EMBEDDING_URL`)
    pub embedding_url: Option<String>,
    /// Bearer token for the provider (`EMBEDDING_KEY`)
    pub embedding_key: Option<String>,
    /// Model name sent with each request (`EMBEDDING_MODEL`)
    pub embedding_model: String,
    /// Deterministic hash embedder opt-in (`ALLOW_MOCK_EMBED=1`)
    pub allow_mock_embed: bool,
    /// Database location (`DATABASE_URL`); platform data dir when unset
    pub database_path: Option<PathBuf>,
    /// Optional external cache endpoint (`CACHE_URL`). The in-process LRU
    /// is used regardless; the variable is accepted for front-ends that
    /// wire their own cache.
    pub cache_url: Option<String>,
    /// Full embedding dimension F (`F_DIM`)
    pub full_dim: usize,
    /// Compressed embedding dimension C (`C_DIM`)
    pub compressed_dim: usize,
    /// Supervisor probe period (`HEALTH_PROBE_SECONDS`)
    pub health_probe_period: Duration,
    /// Default top-K modules consulted per query (`SEARCH_FANOUT`)
    pub search_fanout: usize,
    /// Orchestrator fan-out deadline (`SEARCH_DEADLINE_MS`)
    pub search_deadline: Duration,
    /// Soft deadline for a single store operation
    pub store_deadline: Duration,
    /// Soft deadline for one health probe
    pub probe_deadline: Duration,
    /// Reconciliation sweep period
    pub reconcile_period: Duration,
    /// Bound on concurrent embedding + adapter calls before fail-fast
    pub max_concurrency: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            embedding_url: None,
            embedding_key: None,
            embedding_model: "text-embedding-3-small".to_string(),
            allow_mock_embed: false,
            database_path: None,
            cache_url: None,
            full_dim: DEFAULT_FULL_DIM,
            compressed_dim: DEFAULT_COMPRESSED_DIM,
            health_probe_period: Duration::from_secs(60),
            search_fanout: 3,
            search_deadline: Duration::from_millis(2000),
            store_deadline: Duration::from_secs(5),
            probe_deadline: Duration::from_secs(3),
            reconcile_period: Duration::from_secs(15 * 60),
            max_concurrency: 32,
        }
    }
}

impl CoreConfig {
    /// Read configuration from the environment.
    ///
    /// Fails with [`CoreError::Config`] when no embedding credential is set
    /// and mock mode has not been opted into, or when a numeric variable
    /// does not parse.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        cfg.embedding_url = non_empty(std::env::var("EMBEDDING_URL").ok());
        cfg.embedding_key = non_empty(std::env::var("EMBEDDING_KEY").ok());
        if let Some(model) = non_empty(std::env::var("EMBEDDING_MODEL").ok()) {
            cfg.embedding_model = model;
        }
        cfg.allow_mock_embed = std::env::var("ALLOW_MOCK_EMBED").as_deref() == Ok("1");
        cfg.database_path = non_empty(std::env::var("DATABASE_URL").ok()).map(PathBuf::from);
        cfg.cache_url = non_empty(std::env::var("CACHE_URL").ok());

        if let Some(v) = non_empty(std::env::var("F_DIM").ok()) {
            cfg.full_dim = parse_var("F_DIM", &v)?;
        }
        if let Some(v) = non_empty(std::env::var("C_DIM").ok()) {
            cfg.compressed_dim = parse_var("C_DIM", &v)?;
        }
        if let Some(v) = non_empty(std::env::var("HEALTH_PROBE_SECONDS").ok()) {
            cfg.health_probe_period = Duration::from_secs(parse_var("HEALTH_PROBE_SECONDS", &v)?);
        }
        if let Some(v) = non_empty(std::env::var("SEARCH_FANOUT").ok()) {
            cfg.search_fanout = parse_var("SEARCH_FANOUT", &v)?;
        }
        if let Some(v) = non_empty(std::env::var("SEARCH_DEADLINE_MS").ok()) {
            cfg.search_deadline = Duration::from_millis(parse_var("SEARCH_DEADLINE_MS", &v)?);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check internal consistency; called by [`CoreConfig::from_env`].
    pub fn validate(&self) -> Result<()> {
        if self.embedding_key.is_none() && !self.allow_mock_embed {
            return Err(CoreError::Config(
                "EMBEDDING_KEY is not set and ALLOW_MOCK_EMBED is not enabled".to_string(),
            ));
        }
        if self.compressed_dim == 0 || self.full_dim == 0 {
            return Err(CoreError::Config("embedding dimensions must be non-zero".into()));
        }
        if self.compressed_dim > self.full_dim {
            return Err(CoreError::Config(format!(
                "C_DIM ({}) must not exceed F_DIM ({})",
                self.compressed_dim, self.full_dim
            )));
        }
        Ok(())
    }

    /// Whether the deterministic mock embedder is in effect.
    pub fn mock_embedding(&self) -> bool {
        self.embedding_key.is_none() && self.allow_mock_embed
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CoreError::Config(format!("{} is not a valid value for {}", value, name)))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.full_dim, 1536);
        assert_eq!(cfg.compressed_dim, 512);
        assert_eq!(cfg.search_fanout, 3);
        assert_eq!(cfg.search_deadline, Duration::from_millis(2000));
        assert_eq!(cfg.health_probe_period, Duration::from_secs(60));
    }

    #[test]
    fn missing_key_without_mock_is_fatal() {
        let cfg = CoreConfig::default();
        assert!(cfg.validate().is_err());

        let cfg = CoreConfig {
            allow_mock_embed: true,
            ..CoreConfig::default()
        };
        assert!(cfg.validate().is_ok());
        assert!(cfg.mock_embedding());
    }

    #[test]
    fn compressed_dim_may_not_exceed_full() {
        let cfg = CoreConfig {
            allow_mock_embed: true,
            full_dim: 64,
            compressed_dim: 128,
            ..CoreConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
