//! Test environment builder.
//!
//! Each `TestEnv` owns an isolated temporary database, a deterministic
//! (failure-injectable) embedder, and whichever subset of the module
//! catalogue the test registers. Dropping the env deletes the database.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use engram_core::cache::MemoryCache;
use engram_core::cmi::CmiIndex;
use engram_core::config::CoreConfig;
use engram_core::embedding::EmbeddingProvider;
use engram_core::federation::Federation;
use engram_core::loader::{catalogue, ModuleLoader};
use engram_core::module::ModuleDeps;
use engram_core::reconcile::{ReconcileQueue, Reconciler};
use engram_core::registry::ModuleRegistry;
use engram_core::memory::SearchOptions;
use engram_core::store::Database;
use engram_core::supervisor::SupervisorConfig;

use crate::mocks::{FlakyEmbedder, SlowModule};

/// Full embedding dimension used by every test environment
pub const F_DIM: usize = 256;

/// Compressed embedding dimension used by every test environment
pub const C_DIM: usize = 64;

/// An isolated, fully wired memory core for one test
pub struct TestEnv {
    _temp: TempDir,
    /// Shared database handle
    pub db: Arc<Database>,
    /// Services injected into every module
    pub deps: ModuleDeps,
    /// Live module registry
    pub registry: Arc<ModuleRegistry>,
    /// Loader over the selected catalogue subset
    pub loader: ModuleLoader,
    /// Federated search orchestrator
    pub federation: Arc<Federation>,
    /// Central Memory Index
    pub cmi: Arc<CmiIndex>,
    /// Shared cache
    pub cache: Arc<MemoryCache>,
    /// Reconciliation task queue
    pub queue: Arc<ReconcileQueue>,
    /// Failure-injectable embedder
    pub embedder: Arc<FlakyEmbedder>,
    /// Effective configuration
    pub config: CoreConfig,
}

impl TestEnv {
    /// Environment with only the named modules registered.
    pub async fn with_modules(ids: &[&str]) -> Self {
        Self::customized(ids, |_| {}).await
    }

    /// Environment with the full six-module catalogue.
    pub async fn full() -> Self {
        Self::with_modules(&[
            "technical",
            "personal",
            "work",
            "learning",
            "communication",
            "creative",
        ])
        .await
    }

    /// Environment with a configuration tweak (deadlines, fan-out, ...).
    pub async fn customized(ids: &[&str], tweak: impl FnOnce(&mut CoreConfig)) -> Self {
        let temp = TempDir::new().expect("temp dir");
        let mut config = CoreConfig {
            allow_mock_embed: true,
            database_path: Some(temp.path().join("engram-test.db")),
            full_dim: F_DIM,
            compressed_dim: C_DIM,
            ..CoreConfig::default()
        };
        tweak(&mut config);

        let db = Arc::new(Database::open(config.database_path.clone()).expect("database"));
        let embedder = FlakyEmbedder::new(config.full_dim, config.compressed_dim);
        let provider: Arc<dyn EmbeddingProvider> = embedder.clone();
        let cmi = Arc::new(CmiIndex::new(&db, config.compressed_dim).expect("cmi"));
        let cache = Arc::new(MemoryCache::with_capacity(1024));
        let queue = Arc::new(ReconcileQueue::new());

        let deps = ModuleDeps {
            db: Arc::clone(&db),
            embedder: Arc::clone(&provider),
            cmi: Arc::clone(&cmi),
            cache: Arc::clone(&cache),
            reconcile: Arc::clone(&queue),
        };

        let supervisor = SupervisorConfig {
            period: config.health_probe_period,
            probe_deadline: config.probe_deadline,
            ..SupervisorConfig::default()
        };
        let registry = ModuleRegistry::new(Arc::clone(&db), supervisor);

        let selected = catalogue()
            .into_iter()
            .filter(|f| ids.contains(&f.id))
            .collect();
        let loader = ModuleLoader::with_factories(Arc::clone(&registry), deps.clone(), selected);
        let report = loader.load_all().await;
        assert!(
            report.failed.is_empty() && report.skipped.is_empty(),
            "test modules must load cleanly: {report:?}"
        );

        let federation = Arc::new(Federation::new(
            Arc::clone(&registry),
            Arc::clone(&cmi),
            Arc::clone(&provider),
            Arc::clone(&cache),
            config.clone(),
        ));

        Self {
            _temp: temp,
            db,
            deps,
            registry,
            loader,
            federation,
            cmi,
            cache,
            queue,
            embedder,
            config,
        }
    }

    /// A reconciliation worker over this environment.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.cmi),
            Arc::clone(&self.queue),
        )
    }

    /// Replace a registered module with a latency-injecting wrapper.
    pub async fn slow_down(&self, id: &str, delay: Duration) {
        let instance = self.registry.get(id).await.expect("module registered");
        self.registry.unregister(id).await.expect("unregister");
        self.registry
            .register(SlowModule::wrap(instance, delay), None)
            .await
            .expect("register slow wrapper");
    }

    /// Search options with a floor low enough for bag-of-tokens overlap.
    pub fn low_bar(&self) -> SearchOptions {
        SearchOptions {
            min_score: 0.05,
            ..SearchOptions::default()
        }
    }

    /// Stop background probes (call at the end of every test).
    pub fn stop(&self) {
        self.registry.stop_probes();
    }
}
