//! Failure injection and fixtures for end-to-end tests.

pub mod fixtures;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use engram_core::embedding::{DualEmbedding, Embedding, EmbeddingProvider, MockEmbedder};
use engram_core::error::{EmbeddingError, ModuleError};
use engram_core::memory::{
    Memory, MemoryPatch, Metadata, ModuleStats, SearchHit, SearchOptions, StoreReceipt,
};
use engram_core::module::{MemoryModule, ModuleConfig, ModuleDependencies};
use engram_core::store::MetricsSnapshot;

// ============================================================================
// FLAKY EMBEDDER
// ============================================================================

/// Mock embedder whose compressed output can be broken on demand.
///
/// While broken, compressed vectors come back with the wrong dimension, so
/// every CMI upsert fails exactly the way an unreachable index does - the
/// module row lands, the receipt reports `indexed = false`, and a
/// reconciliation task is queued. Flipping the switch back simulates
/// recovery.
pub struct FlakyEmbedder {
    inner: MockEmbedder,
    break_compressed: AtomicBool,
}

impl FlakyEmbedder {
    /// Healthy embedder with the given dimensions
    pub fn new(full_dim: usize, compressed_dim: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MockEmbedder::new(full_dim, compressed_dim),
            break_compressed: AtomicBool::new(false),
        })
    }

    /// Break or repair the compressed path
    pub fn set_broken(&self, broken: bool) {
        self.break_compressed.store(broken, Ordering::SeqCst);
    }

    fn broken(&self) -> bool {
        self.break_compressed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn full(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.inner.full(text).await
    }

    async fn compressed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let good = self.inner.compressed(text).await?;
        if self.broken() {
            // Wrong dimension: rejected at the CMI boundary
            Ok(Embedding::new(vec![0.5; good.dimensions() + 1]))
        } else {
            Ok(good)
        }
    }

    async fn dual(&self, text: &str) -> Result<DualEmbedding, EmbeddingError> {
        Ok(DualEmbedding {
            full: self.full(text).await?,
            compressed: self.compressed(text).await?,
        })
    }

    fn full_dim(&self) -> usize {
        self.inner.full_dim()
    }

    fn compressed_dim(&self) -> usize {
        self.inner.compressed_dim()
    }
}

// ============================================================================
// SLOW MODULE
// ============================================================================

/// Wrapper that injects latency into `search_by_embedding`, for deadline
/// and partial-result tests. Everything else delegates unchanged.
pub struct SlowModule {
    inner: Arc<dyn MemoryModule>,
    delay: Duration,
}

impl SlowModule {
    /// Wrap a module with a fixed search delay
    pub fn wrap(inner: Arc<dyn MemoryModule>, delay: Duration) -> Arc<Self> {
        Arc::new(Self { inner, delay })
    }
}

#[async_trait]
impl MemoryModule for SlowModule {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn config(&self) -> ModuleConfig {
        self.inner.config()
    }

    fn dependencies(&self) -> ModuleDependencies {
        self.inner.dependencies()
    }

    async fn initialize(&self) -> Result<(), ModuleError> {
        self.inner.initialize().await
    }

    async fn shutdown(&self) -> Result<(), ModuleError> {
        self.inner.shutdown().await
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }

    async fn store(
        &self,
        user_id: &str,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<StoreReceipt, ModuleError> {
        self.inner.store(user_id, content, metadata).await
    }

    async fn search(
        &self,
        user_id: &str,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>, ModuleError> {
        self.inner.search(user_id, query, opts).await
    }

    async fn search_by_embedding(
        &self,
        user_id: &str,
        vector: &Embedding,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>, ModuleError> {
        tokio::time::sleep(self.delay).await;
        self.inner.search_by_embedding(user_id, vector, opts).await
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<Memory>, ModuleError> {
        self.inner.get(user_id, id).await
    }

    async fn update(
        &self,
        user_id: &str,
        id: &str,
        patch: MemoryPatch,
    ) -> Result<bool, ModuleError> {
        self.inner.update(user_id, id, patch).await
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<bool, ModuleError> {
        self.inner.delete(user_id, id).await
    }

    async fn stats(&self, user_id: &str) -> Result<ModuleStats, ModuleError> {
        self.inner.stats(user_id).await
    }

    async fn on_config_update(&self, config: ModuleConfig) {
        self.inner.on_config_update(config).await
    }

    async fn on_module_connect(&self, other_id: &str, other: Arc<dyn MemoryModule>) {
        self.inner.on_module_connect(other_id, other).await
    }

    async fn on_event(&self, name: &str, payload: &Value) {
        self.inner.on_event(name, payload).await
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics()
    }

    async fn total_memories(&self) -> i64 {
        self.inner.total_memories().await
    }

    async fn mark_accessed(&self, user_id: &str, ids: &[String]) {
        self.inner.mark_accessed(user_id, ids).await
    }

    async fn contains(&self, user_id: &str, id: &str) -> Result<bool, ModuleError> {
        self.inner.contains(user_id, id).await
    }

    async fn row_refs(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(String, String)>, ModuleError> {
        self.inner.row_refs(limit, offset).await
    }

    async fn reindex(&self, user_id: &str, id: &str) -> Result<bool, ModuleError> {
        self.inner.reindex(user_id, id).await
    }

    async fn prune_expired(&self) -> Result<u64, ModuleError> {
        self.inner.prune_expired().await
    }
}
