//! Service assembly.
//!
//! The process-wide services (database, embedder, cache, CMI, registry,
//! loader, orchestrator, reconciler) are explicit dependencies wired here in
//! a fixed order - adapter, embedder, cache, CMI, registry, loader - and
//! torn down in reverse. Nothing in the core reaches for a global.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::cache::MemoryCache;
use crate::cmi::CmiIndex;
use crate::config::CoreConfig;
use crate::embedding::{provider_from_config, EmbeddingProvider};
use crate::error::{CoreError, Result};
use crate::federation::Federation;
use crate::loader::{LoadReport, ModuleLoader};
use crate::module::ModuleDeps;
use crate::reconcile::{ReconcileQueue, Reconciler};
use crate::registry::ModuleRegistry;
use crate::store::Database;
use crate::supervisor::SupervisorConfig;

/// A fully wired federated memory core
pub struct MemoryService {
    config: CoreConfig,
    registry: Arc<ModuleRegistry>,
    loader: ModuleLoader,
    federation: Arc<Federation>,
    reconciler: Arc<Reconciler>,
    reconcile_handle: tokio::task::JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl MemoryService {
    /// Bring the whole core up and load every catalogue module.
    ///
    /// Fails fast on fatal configuration (missing embedding credentials
    /// without mock opt-in, mismatched dimensions).
    pub async fn start(config: CoreConfig) -> Result<(Self, LoadReport)> {
        config.validate()?;

        let db = Arc::new(Database::open(config.database_path.clone())?);
        let seed = db.projection_seed()?;
        let embedder: Arc<dyn EmbeddingProvider> = provider_from_config(&config, seed)?;

        if embedder.compressed_dim() != config.compressed_dim {
            return Err(CoreError::Config(format!(
                "provider compressed dimension {} does not match C_DIM {}",
                embedder.compressed_dim(),
                config.compressed_dim
            )));
        }

        let cache = Arc::new(MemoryCache::new());
        let cmi = Arc::new(CmiIndex::new(&db, config.compressed_dim)?);
        let reconcile_queue = Arc::new(ReconcileQueue::new());

        let supervisor = SupervisorConfig {
            period: config.health_probe_period,
            probe_deadline: config.probe_deadline,
            ..SupervisorConfig::default()
        };
        let registry = ModuleRegistry::new(Arc::clone(&db), supervisor);

        let deps = ModuleDeps {
            db,
            embedder: Arc::clone(&embedder),
            cmi: Arc::clone(&cmi),
            cache: Arc::clone(&cache),
            reconcile: Arc::clone(&reconcile_queue),
        };
        let loader = ModuleLoader::new(Arc::clone(&registry), deps);
        let report = loader.load_all().await;

        let federation = Arc::new(Federation::new(
            Arc::clone(&registry),
            Arc::clone(&cmi),
            embedder,
            cache,
            config.clone(),
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&registry),
            cmi,
            reconcile_queue,
        ));
        let reconcile_handle =
            Arc::clone(&reconciler).spawn(config.reconcile_period, shutdown_rx);

        info!(
            modules = report.loaded.len(),
            mock_embedding = config.mock_embedding(),
            "memory service started"
        );

        Ok((
            Self {
                config,
                registry,
                loader,
                federation,
                reconciler,
                reconcile_handle,
                shutdown,
            },
            report,
        ))
    }

    /// The federated search orchestrator
    pub fn federation(&self) -> &Arc<Federation> {
        &self.federation
    }

    /// The module registry
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// The module loader
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// The reconciliation worker (exposed so operators and tests can force
    /// a cycle instead of waiting out the period)
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Effective configuration
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Tear everything down in reverse construction order.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.reconcile_handle.abort();
        self.loader.unload_all().await;
        self.registry.stop_probes();
        info!("memory service stopped");
    }
}

// ============================================================================
// TESTS
// ============================================================================
