//! Base module - the shared pipeline behind every memory module.
//!
//! Implements the whole uniform contract once: embed, enrich, insert, index,
//! invalidate on the write path; cache, embed, cosine search on the read
//! path. Concrete modules differ only in the [`Enricher`] they plug in.
//!
//! Index failures never lose writes: the module row is kept, the receipt
//! reports `indexed = false`, and a reconciliation task is queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::enrich::{Enricher, Enrichment};
use super::{MemoryModule, ModuleConfig, ModuleDependencies};
use crate::cache::{key_digest, MemoryCache};
use crate::cmi::CmiIndex;
use crate::config::MAX_CONTENT_BYTES;
use crate::embedding::{Embedding, EmbeddingProvider};
use crate::error::{CoreError, ModuleError, StoreError};
use crate::memory::{
    Memory, MemoryPatch, Metadata, ModuleStats, SearchHit, SearchOptions, StoreReceipt,
};
use crate::reconcile::{ReconcileQueue, ReconcileTask};
use crate::store::{Database, MetricsSnapshot, NewRow, SqliteVectorStore};

/// Rows examined per pruning pass
const PRUNE_BATCH: usize = 256;

/// Tracked metadata keys stripped before re-enrichment on content change
const TRACKED_KEYS: &[&str] = &[
    crate::memory::keys::TITLE,
    crate::memory::keys::SUMMARY,
    crate::memory::keys::KEYWORDS,
    crate::memory::keys::CATEGORIES,
    crate::memory::keys::IMPORTANCE_SCORE,
];

// ============================================================================
// SHARED DEPENDENCIES
// ============================================================================

/// Process-wide services injected into every module constructor
#[derive(Clone)]
pub struct ModuleDeps {
    /// Shared database handle
    pub db: Arc<Database>,
    /// Embedding provider
    pub embedder: Arc<dyn EmbeddingProvider>,
    /// Central Memory Index
    pub cmi: Arc<CmiIndex>,
    /// Best-effort cache
    pub cache: Arc<MemoryCache>,
    /// Queue for deferred index repair
    pub reconcile: Arc<ReconcileQueue>,
}

// ============================================================================
// BASE MODULE
// ============================================================================

/// The single [`MemoryModule`] implementation, parameterised by an enricher
pub struct BaseModule {
    enricher: Arc<dyn Enricher>,
    adapter: Arc<SqliteVectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    cmi: Arc<CmiIndex>,
    cache: Arc<MemoryCache>,
    reconcile: Arc<ReconcileQueue>,
    config: RwLock<ModuleConfig>,
    peers: Mutex<HashMap<String, Arc<dyn MemoryModule>>>,
    ready: AtomicBool,
}

impl BaseModule {
    /// Wire a module from the shared services and its enricher.
    pub fn new(
        deps: &ModuleDeps,
        enricher: Arc<dyn Enricher>,
        config: ModuleConfig,
    ) -> Result<Arc<Self>, CoreError> {
        let adapter = deps
            .db
            .adapter(&config.table_name, deps.embedder.full_dim())?;
        Ok(Arc::new(Self {
            enricher,
            adapter: Arc::new(adapter),
            embedder: Arc::clone(&deps.embedder),
            cmi: Arc::clone(&deps.cmi),
            cache: Arc::clone(&deps.cache),
            reconcile: Arc::clone(&deps.reconcile),
            config: RwLock::new(config),
            peers: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
        }))
    }

    fn module_id(&self) -> String {
        self.enricher.module_id().to_string()
    }

    fn wrap<E: Into<CoreError>>(&self, e: E) -> ModuleError {
        ModuleError::new(self.enricher.module_id(), e)
    }

    /// Run an adapter closure on the blocking pool.
    async fn with_adapter<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteVectorStore) -> Result<T, StoreError> + Send + 'static,
    {
        let adapter = Arc::clone(&self.adapter);
        tokio::task::spawn_blocking(move || f(&adapter))
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?
            .map_err(CoreError::from)
    }

    /// Run a CMI closure on the blocking pool.
    async fn with_cmi<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&CmiIndex) -> Result<T, crate::error::CmiError> + Send + 'static,
    {
        let cmi = Arc::clone(&self.cmi);
        tokio::task::spawn_blocking(move || f(&cmi))
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?
            .map_err(CoreError::from)
    }

    /// Drop every cached read this user has against this module, plus the
    /// user's federated result cache (which spans modules).
    fn invalidate_user(&self, user_id: &str) {
        self.cache
            .invalidate_prefix(&format!("{}:{}:", self.enricher.module_id(), user_id));
        self.cache
            .invalidate_prefix(&format!("federated:{user_id}:"));
    }

    fn strip_embedding(mut memory: Memory, opts: &SearchOptions) -> Memory {
        if !opts.include_embedding {
            memory.embedding = None;
        }
        memory
    }
}

#[async_trait]
impl MemoryModule for BaseModule {
    fn id(&self) -> &str {
        self.enricher.module_id()
    }

    fn config(&self) -> ModuleConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn dependencies(&self) -> ModuleDependencies {
        self.enricher.dependencies()
    }

    async fn initialize(&self) -> Result<(), ModuleError> {
        // Adapter table exists from construction; probe it once
        self.with_adapter(|a| a.total_count())
            .await
            .map_err(|e| self.wrap(e))?;
        self.ready.store(true, Ordering::SeqCst);
        debug!(module = self.enricher.module_id(), "module initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ModuleError> {
        self.ready.store(false, Ordering::SeqCst);
        if let Ok(mut peers) = self.peers.lock() {
            peers.clear();
        }
        debug!(module = self.enricher.module_id(), "module shut down");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && self.with_adapter(|a| a.total_count()).await.is_ok()
    }

    async fn store(
        &self,
        user_id: &str,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<StoreReceipt, ModuleError> {
        if content.len() > MAX_CONTENT_BYTES {
            return Err(self.wrap(CoreError::Invalid(format!(
                "content of {} bytes exceeds the {} byte limit",
                content.len(),
                MAX_CONTENT_BYTES
            ))));
        }

        let config = self.config();
        if config.max_memory_size >= 0 {
            let user = user_id.to_string();
            let count = self
                .with_adapter(move |a| a.stats(&user).map(|s| s.total_memories))
                .await
                .map_err(|e| self.wrap(e))?;
            if count >= config.max_memory_size {
                return Err(self.wrap(CoreError::Invalid(format!(
                    "module {} is at capacity ({}) for this user",
                    config.id, config.max_memory_size
                ))));
            }
        }

        // Embed once: full for the module table, compressed for the CMI
        let dual = self
            .embedder
            .dual(content)
            .await
            .map_err(|e| self.wrap(e))?;

        let supplied = metadata.unwrap_or_default();
        let enrichment = self.enricher.enrich(content, &supplied);
        let mut merged = enrichment.apply(&supplied);
        if let Some(analysis) = self.enricher.analyze(content) {
            merged.entry("analysis".to_string()).or_insert(analysis);
        }

        let row = NewRow {
            user_id: user_id.to_string(),
            content: content.to_string(),
            embedding: dual.full,
            metadata: merged.clone(),
        };
        let id = self
            .with_adapter(move |a| a.insert(row))
            .await
            .map_err(|e| self.wrap(e))?;

        // Index into the CMI; a failure keeps the row and defers the index
        let fields = Enrichment::cmi_fields(&merged);
        let module_id = self.module_id();
        let indexed = {
            let user = user_id.to_string();
            let memory_id = id.clone();
            let cvec = dual.compressed;
            let index_module = module_id.clone();
            match self
                .with_cmi(move |cmi| {
                    cmi.index_memory(&user, &index_module, &memory_id, &cvec, &fields)
                })
                .await
            {
                Ok(_) => true,
                Err(e) => {
                    warn!(
                        module = %module_id,
                        memory = %id,
                        error = %e,
                        "CMI indexing failed; memory kept, reconciliation queued"
                    );
                    self.reconcile.push(ReconcileTask::Reindex {
                        user_id: user_id.to_string(),
                        module_id: module_id.clone(),
                        memory_id: id.clone(),
                    });
                    false
                }
            }
        };

        self.invalidate_user(user_id);

        Ok(StoreReceipt {
            id,
            module: module_id,
            indexed,
        })
    }

    async fn search(
        &self,
        user_id: &str,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>, ModuleError> {
        let cache_key = format!(
            "{}:{}:search:{}:{}",
            self.enricher.module_id(),
            user_id,
            key_digest(query),
            opts.cache_key()
        );
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(hits) = serde_json::from_value::<Vec<SearchHit>>(cached) {
                debug!(module = self.enricher.module_id(), "search cache hit");
                return Ok(hits);
            }
        }

        let embedding = self
            .embedder
            .full(query)
            .await
            .map_err(|e| self.wrap(e))?;
        let hits = self.search_by_embedding(user_id, &embedding, opts).await?;

        if let Ok(value) = serde_json::to_value(&hits) {
            self.cache.set(cache_key, value);
        }
        Ok(hits)
    }

    async fn search_by_embedding(
        &self,
        user_id: &str,
        vector: &Embedding,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>, ModuleError> {
        let config = self.config();
        let limit = opts.limit.min(config.search_limit);
        let min_score = opts.min_score;
        let user = user_id.to_string();
        let query = vector.clone();

        let scored = self
            .with_adapter(move |a| a.top_k(&user, &query, limit, min_score, None))
            .await
            .map_err(|e| self.wrap(e))?;

        let module = self.module_id();
        Ok(scored
            .into_iter()
            .map(|(memory, score)| SearchHit {
                memory: Self::strip_embedding(memory, opts),
                score,
                module: module.clone(),
            })
            .collect())
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Option<Memory>, ModuleError> {
        let user = user_id.to_string();
        let memory_id = id.to_string();
        self.with_adapter(move |a| {
            // Bump counters first so the returned row reflects this access
            a.touch(&user, std::slice::from_ref(&memory_id))?;
            a.get(&user, &memory_id)
        })
        .await
        .map_err(|e| self.wrap(e))
    }

    async fn update(
        &self,
        user_id: &str,
        id: &str,
        patch: MemoryPatch,
    ) -> Result<bool, ModuleError> {
        let user = user_id.to_string();
        let memory_id = id.to_string();
        let Some(existing) = self
            .with_adapter(move |a| a.get(&user, &memory_id))
            .await
            .map_err(|e| self.wrap(e))?
        else {
            return Ok(false);
        };

        if patch.is_empty() {
            return Ok(true);
        }

        let module_id = self.module_id();

        if let Some(new_content) = patch.content {
            // Content changed: re-embed, re-derive tracked fields, re-index
            if new_content.len() > MAX_CONTENT_BYTES {
                return Err(self.wrap(CoreError::Invalid(format!(
                    "content of {} bytes exceeds the {} byte limit",
                    new_content.len(),
                    MAX_CONTENT_BYTES
                ))));
            }

            let mut metadata = existing.metadata;
            for key in TRACKED_KEYS {
                metadata.remove(*key);
            }
            if let Some(patch_meta) = patch.metadata {
                for (key, value) in patch_meta {
                    metadata.insert(key, value);
                }
            }

            let dual = self
                .embedder
                .dual(&new_content)
                .await
                .map_err(|e| self.wrap(e))?;
            metadata.remove("analysis");
            let mut merged = self.enricher.enrich(&new_content, &metadata).apply(&metadata);
            if let Some(analysis) = self.enricher.analyze(&new_content) {
                merged.entry("analysis".to_string()).or_insert(analysis);
            }
            let fields = Enrichment::cmi_fields(&merged);

            let updated = {
                let user = user_id.to_string();
                let memory_id = id.to_string();
                let content = new_content.clone();
                let full = dual.full.clone();
                let merged = merged.clone();
                self.with_adapter(move |a| {
                    a.update(&user, &memory_id, Some(&content), Some(&full), Some(&merged))
                })
                .await
                .map_err(|e| self.wrap(e))?
            };

            if updated {
                let user = user_id.to_string();
                let memory_id = id.to_string();
                let cvec = dual.compressed;
                let index_module = module_id.clone();
                if let Err(e) = self
                    .with_cmi(move |cmi| {
                        cmi.index_memory(&user, &index_module, &memory_id, &cvec, &fields)
                    })
                    .await
                {
                    warn!(module = %module_id, memory = %id, error = %e, "re-index failed");
                    self.reconcile.push(ReconcileTask::Reindex {
                        user_id: user_id.to_string(),
                        module_id,
                        memory_id: id.to_string(),
                    });
                }
                self.invalidate_user(user_id);
            }
            return Ok(updated);
        }

        // Metadata-only change: merge, refresh the CMI copy of tracked fields
        let mut metadata = existing.metadata;
        if let Some(patch_meta) = patch.metadata {
            for (key, value) in patch_meta {
                metadata.insert(key, value);
            }
        }
        let merged = self
            .enricher
            .enrich(&existing.content, &metadata)
            .apply(&metadata);
        let fields = Enrichment::cmi_fields(&merged);

        let updated = {
            let user = user_id.to_string();
            let memory_id = id.to_string();
            let merged = merged.clone();
            self.with_adapter(move |a| a.update(&user, &memory_id, None, None, Some(&merged)))
                .await
                .map_err(|e| self.wrap(e))?
        };

        if updated {
            let user = user_id.to_string();
            let memory_id = id.to_string();
            let index_module = module_id.clone();
            let refreshed = self
                .with_cmi(move |cmi| cmi.update_fields(&user, &index_module, &memory_id, &fields))
                .await;
            match refreshed {
                Ok(true) => {}
                Ok(false) => {
                    // No index row to refresh; repair it
                    self.reconcile.push(ReconcileTask::Reindex {
                        user_id: user_id.to_string(),
                        module_id,
                        memory_id: id.to_string(),
                    });
                }
                Err(e) => {
                    warn!(memory = %id, error = %e, "CMI field refresh failed");
                    self.reconcile.push(ReconcileTask::Reindex {
                        user_id: user_id.to_string(),
                        module_id,
                        memory_id: id.to_string(),
                    });
                }
            }
            self.invalidate_user(user_id);
        }
        Ok(updated)
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<bool, ModuleError> {
        let user = user_id.to_string();
        let memory_id = id.to_string();
        let existed = self
            .with_adapter(move |a| a.delete(&user, &memory_id))
            .await
            .map_err(|e| self.wrap(e))?;

        // Remove the index row regardless; an orphan may predate this call
        let module_id = self.module_id();
        let memory_id = id.to_string();
        let index_module = module_id.clone();
        if let Err(e) = self
            .with_cmi(move |cmi| cmi.delete_index(&index_module, &memory_id))
            .await
        {
            warn!(module = %module_id, memory = %id, error = %e, "index removal failed");
            self.reconcile.push(ReconcileTask::DropIndex {
                module_id,
                memory_id: id.to_string(),
            });
        }

        self.invalidate_user(user_id);
        Ok(existed)
    }

    async fn stats(&self, user_id: &str) -> Result<ModuleStats, ModuleError> {
        let user = user_id.to_string();
        self.with_adapter(move |a| a.stats(&user))
            .await
            .map_err(|e| self.wrap(e))
    }

    async fn on_config_update(&self, config: ModuleConfig) {
        debug!(module = self.enricher.module_id(), "configuration updated");
        if let Ok(mut current) = self.config.write() {
            *current = config;
        }
    }

    async fn on_module_connect(&self, other_id: &str, other: Arc<dyn MemoryModule>) {
        debug!(
            module = self.enricher.module_id(),
            peer = other_id,
            "module connected"
        );
        if let Ok(mut peers) = self.peers.lock() {
            peers.insert(other_id.to_string(), other);
        }
    }

    async fn on_event(&self, name: &str, payload: &Value) {
        debug!(
            module = self.enricher.module_id(),
            event = name,
            payload = %payload,
            "event received"
        );
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.adapter.metrics()
    }

    async fn total_memories(&self) -> i64 {
        self.with_adapter(|a| a.total_count()).await.unwrap_or(0)
    }

    async fn mark_accessed(&self, user_id: &str, ids: &[String]) {
        let user = user_id.to_string();
        let ids = ids.to_vec();
        if let Err(e) = self.with_adapter(move |a| a.touch(&user, &ids)).await {
            warn!(
                module = self.enricher.module_id(),
                error = %e,
                "access-count update failed"
            );
        }
    }

    async fn contains(&self, user_id: &str, id: &str) -> Result<bool, ModuleError> {
        let user = user_id.to_string();
        let memory_id = id.to_string();
        self.with_adapter(move |a| a.exists(&user, &memory_id))
            .await
            .map_err(|e| self.wrap(e))
    }

    async fn row_refs(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(String, String)>, ModuleError> {
        self.with_adapter(move |a| a.row_refs(limit, offset))
            .await
            .map_err(|e| self.wrap(e))
    }

    async fn reindex(&self, user_id: &str, id: &str) -> Result<bool, ModuleError> {
        let user = user_id.to_string();
        let memory_id = id.to_string();
        let Some(memory) = self
            .with_adapter(move |a| a.get(&user, &memory_id))
            .await
            .map_err(|e| self.wrap(e))?
        else {
            return Ok(false);
        };

        let cvec = self
            .embedder
            .compressed(&memory.content)
            .await
            .map_err(|e| self.wrap(e))?;
        let fields = Enrichment::cmi_fields(&memory.metadata);

        let user = user_id.to_string();
        let memory_id = id.to_string();
        let module_id = self.module_id();
        self.with_cmi(move |cmi| cmi.index_memory(&user, &module_id, &memory_id, &cvec, &fields))
            .await
            .map_err(|e| self.wrap(e))?;
        Ok(true)
    }

    async fn prune_expired(&self) -> Result<u64, ModuleError> {
        let config = self.config();
        if config.retention_days < 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - Duration::days(config.retention_days);

        let expired = self
            .with_adapter(move |a| a.refs_older_than(cutoff, PRUNE_BATCH))
            .await
            .map_err(|e| self.wrap(e))?;

        let mut pruned = 0u64;
        for (user_id, memory_id) in expired {
            if self.delete(&user_id, &memory_id).await? {
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(
                module = self.enricher.module_id(),
                pruned, "expired memories removed"
            );
        }
        Ok(pruned)
    }
}

// ============================================================================
// TESTS
// ============================================================================
