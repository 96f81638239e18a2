//! Federated search orchestrator.
//!
//! The read path: embed the query once (full + compressed), route via the
//! CMI over the compressed vector, fan out the full vector to the chosen
//! modules in parallel under a hard deadline, merge by score, cache. A slow
//! or failing module is elided and the response flagged `partial = true` -
//! degradation is reported, never masked as success.
//!
//! Also the federation entry points for store and delete, which delegate to
//! the owning module under the operation's soft deadline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::num::NonZeroUsize;
use std::time::Duration;

use futures::future::join_all;
use lru::LruCache;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::{key_digest, MemoryCache};
use crate::cmi::{CmiIndex, ModuleRoute, Router, NO_INDEX_FALLBACK};
use crate::config::CoreConfig;
use crate::embedding::{DualEmbedding, EmbeddingProvider};
use crate::error::{CoreError, Result};
use crate::memory::{
    ElidedModule, FederatedSearchResult, Metadata, SearchHit, SearchOptions, StoreReceipt,
};
use crate::registry::ModuleRegistry;

/// Query embeddings kept to avoid re-embedding repeated queries
const QUERY_CACHE_SIZE: usize = 100;

/// How long an over-capacity request may wait before the busy rejection
const QUEUE_WAIT: Duration = Duration::from_millis(250);

/// Modules sampled for a cold user out of the fallback set
const COLD_SAMPLE: usize = 2;

// ============================================================================
// SCORE CALIBRATION
// ============================================================================

/// Affine score adjustment applied to one module's results before merging.
///
/// Scores are comparable across modules because they share one embedding
/// model and metric; a module running a different model (future) gets a
/// calibration so its scores land on the common scale. Identity by default.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCalibration {
    /// Multiplier applied to the raw score
    pub scale: f32,
    /// Offset added after scaling
    pub offset: f32,
}

impl Default for ScoreCalibration {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
        }
    }
}

impl ScoreCalibration {
    fn apply(&self, score: f32) -> f32 {
        (self.scale * score + self.offset).clamp(0.0, 1.0)
    }

    fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Federated search over the live module set
pub struct Federation {
    registry: Arc<ModuleRegistry>,
    router: Arc<Router>,
    cmi: Arc<CmiIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Arc<MemoryCache>,
    semaphore: Arc<Semaphore>,
    query_cache: Mutex<LruCache<String, DualEmbedding>>,
    calibrations: std::sync::RwLock<std::collections::HashMap<String, ScoreCalibration>>,
    cold_cursor: AtomicUsize,
    config: CoreConfig,
}

impl Federation {
    /// Wire the orchestrator over the shared services.
    pub fn new(
        registry: Arc<ModuleRegistry>,
        cmi: Arc<CmiIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        cache: Arc<MemoryCache>,
        config: CoreConfig,
    ) -> Self {
        let router = Arc::new(Router::new(Arc::clone(&cmi)));
        Self {
            registry,
            router,
            cmi,
            embedder,
            cache,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("non-zero"),
            )),
            calibrations: std::sync::RwLock::new(std::collections::HashMap::new()),
            cold_cursor: AtomicUsize::new(0),
            config,
        }
    }

    /// Install a score calibration for one module (identity when unset).
    pub fn set_calibration(&self, module_id: impl Into<String>, calibration: ScoreCalibration) {
        if let Ok(mut calibrations) = self.calibrations.write() {
            let module_id = module_id.into();
            if calibration.is_identity() {
                calibrations.remove(&module_id);
            } else {
                calibrations.insert(module_id, calibration);
            }
        }
    }

    fn calibration_for(&self, module_id: &str) -> ScoreCalibration {
        self.calibrations
            .read()
            .ok()
            .and_then(|c| c.get(module_id).copied())
            .unwrap_or_default()
    }

    /// Bounded-concurrency gate: wait briefly for a permit, then fail fast.
    async fn permit(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        match tokio::time::timeout(
            QUEUE_WAIT,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(CoreError::Shutdown),
            Err(_) => Err(CoreError::Busy("request queue is full")),
        }
    }

    /// Embed a query, reusing the recent-query cache.
    async fn embed_query(&self, query: &str) -> Result<DualEmbedding> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(dual) = cache.get(query) {
                return Ok(dual.clone());
            }
        }
        let dual = self.embedder.dual(query).await?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query.to_string(), dual.clone());
        }
        Ok(dual)
    }

    /// The routing decision for a query, without executing the search.
    pub async fn route(&self, user_id: &str, query: &str, k_modules: usize) -> Result<Vec<ModuleRoute>> {
        let dual = self.embed_query(query).await?;
        self.route_compressed(user_id, &dual, k_modules).await
    }

    async fn route_compressed(
        &self,
        user_id: &str,
        dual: &DualEmbedding,
        k_modules: usize,
    ) -> Result<Vec<ModuleRoute>> {
        let active = self.registry.active_ids().await;
        let router = Arc::clone(&self.router);
        let user = user_id.to_string();
        let compressed = dual.compressed.clone();
        let routes = tokio::task::spawn_blocking(move || {
            router.route(&user, &compressed, k_modules, &active)
        })
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))??;

        // Cold user: the router returned every active module at confidence
        // zero; sample a rotating pair so one module is not always asked
        if routes.len() > COLD_SAMPLE && routes.iter().all(|r| r.reason == NO_INDEX_FALLBACK) {
            let start = self.cold_cursor.fetch_add(1, Ordering::Relaxed) % routes.len();
            let sampled = (0..COLD_SAMPLE)
                .map(|i| routes[(start + i) % routes.len()].clone())
                .collect();
            return Ok(sampled);
        }
        Ok(routes)
    }

    /// Federated search: route, fan out, merge.
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<FederatedSearchResult> {
        let _permit = self.permit().await?;

        let cache_key = format!(
            "federated:{user_id}:search:{}:{}",
            key_digest(query),
            opts.cache_key()
        );
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(mut result) = serde_json::from_value::<FederatedSearchResult>(cached) {
                result.from_cache = true;
                debug!(user = user_id, "federated search cache hit");
                return Ok(result);
            }
        }

        let dual = self.embed_query(query).await?;

        // Explicit module list bypasses routing entirely
        let routes = match &opts.modules {
            Some(explicit) => {
                let mut routes = Vec::with_capacity(explicit.len());
                for id in explicit {
                    if self.registry.get(id).await.is_none() {
                        return Err(CoreError::UnknownModule(id.clone()));
                    }
                    routes.push(ModuleRoute {
                        module_id: id.clone(),
                        confidence: 1.0,
                        reason: "explicit module list".to_string(),
                        hits: 0,
                    });
                }
                routes
            }
            None => {
                self.route_compressed(user_id, &dual, self.config.search_fanout)
                    .await?
            }
        };

        // Unhealthy modules stay out of the fan-out even when the CMI still
        // holds their rows
        let routable = self.registry.routable_ids().await;
        let mut elided: Vec<ElidedModule> = Vec::new();
        let mut chosen: Vec<ModuleRoute> = Vec::new();
        for route in routes.clone() {
            if routable.contains(&route.module_id) {
                chosen.push(route);
            } else {
                elided.push(ElidedModule {
                    module: route.module_id,
                    reason: "unhealthy".to_string(),
                });
            }
        }

        let module_opts = SearchOptions {
            modules: None,
            ..opts.clone()
        };

        let deadline = self.config.search_deadline;
        let fanout = chosen.iter().map(|route| {
            let module_id = route.module_id.clone();
            let registry = Arc::clone(&self.registry);
            let vector = dual.full.clone();
            let opts = module_opts.clone();
            let user = user_id.to_string();
            async move {
                let Some(instance) = registry.get(&module_id).await else {
                    return (module_id, Err("module disappeared".to_string()));
                };
                match tokio::time::timeout(
                    deadline,
                    instance.search_by_embedding(&user, &vector, &opts),
                )
                .await
                {
                    Ok(Ok(hits)) => (module_id, Ok(hits)),
                    Ok(Err(e)) => (module_id, Err(e.to_string())),
                    Err(_) => (module_id, Err("timeout".to_string())),
                }
            }
        });

        let mut results: Vec<SearchHit> = Vec::new();
        let mut consulted: Vec<String> = Vec::new();
        for (module_id, outcome) in join_all(fanout).await {
            match outcome {
                Ok(hits) => {
                    let calibration = self.calibration_for(&module_id);
                    consulted.push(module_id);
                    results.extend(hits.into_iter().map(|mut hit| {
                        hit.score = calibration.apply(hit.score);
                        hit
                    }));
                }
                Err(reason) => {
                    warn!(module = %module_id, %reason, "module elided from federated result");
                    elided.push(ElidedModule {
                        module: module_id,
                        reason,
                    });
                }
            }
        }

        // Scores are comparable across modules (same model, same metric);
        // merge by global score order
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(opts.limit);

        let response = FederatedSearchResult {
            partial: !elided.is_empty(),
            results,
            consulted,
            elided,
            routing: routes,
            from_cache: false,
        };

        // Partial responses are never cached; the next request should see
        // recovered modules immediately
        if !response.partial {
            if let Ok(value) = serde_json::to_value(&response) {
                self.cache.set(cache_key, value);
            }
        }

        self.touch_async(user_id, &response.results);
        Ok(response)
    }

    /// Best-effort asynchronous access-count update, off the critical path.
    fn touch_async(&self, user_id: &str, hits: &[SearchHit]) {
        if hits.is_empty() {
            return;
        }
        let registry = Arc::clone(&self.registry);
        let cmi = Arc::clone(&self.cmi);
        let user = user_id.to_string();
        let refs: Vec<(String, String)> = hits
            .iter()
            .map(|h| (h.module.clone(), h.memory.id.clone()))
            .collect();

        tokio::spawn(async move {
            let mut by_module: Vec<(String, Vec<String>)> = Vec::new();
            for (module, id) in &refs {
                match by_module.iter_mut().find(|(m, _)| m == module) {
                    Some((_, ids)) => ids.push(id.clone()),
                    None => by_module.push((module.clone(), vec![id.clone()])),
                }
            }
            for (module_id, ids) in by_module {
                if let Some(instance) = registry.get(&module_id).await {
                    instance.mark_accessed(&user, &ids).await;
                }
            }
            let touch_user = user.clone();
            let _ = tokio::task::spawn_blocking(move || cmi.touch(&touch_user, &refs)).await;
        });
    }

    /// Store through the owning module, under the store deadline.
    pub async fn store(
        &self,
        user_id: &str,
        module_id: &str,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<StoreReceipt> {
        let _permit = self.permit().await?;
        let module = self
            .registry
            .get(module_id)
            .await
            .ok_or_else(|| CoreError::UnknownModule(module_id.to_string()))?;

        tokio::time::timeout(
            self.config.store_deadline,
            module.store(user_id, content, metadata),
        )
        .await
        .map_err(|_| CoreError::DeadlineExceeded(self.config.store_deadline))?
        .map_err(CoreError::from)
    }

    /// Delete through the owning module. Idempotent: an absent id succeeds.
    pub async fn delete(&self, user_id: &str, module_id: &str, id: &str) -> Result<bool> {
        let _permit = self.permit().await?;
        let module = self
            .registry
            .get(module_id)
            .await
            .ok_or_else(|| CoreError::UnknownModule(module_id.to_string()))?;
        module.delete(user_id, id).await.map_err(CoreError::from)
    }
}

// ============================================================================
// TESTS
// ============================================================================
