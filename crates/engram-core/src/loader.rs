//! Module loader - dependency-ordered lifecycle.
//!
//! Owns the static factory catalogue and the dependency graph. Modules load
//! in topological order; a cycle is refused (the cyclic subset is skipped and
//! logged, everything else proceeds), and a failed required dependency aborts
//! only its downstream subtree. The loader is the single place that hands one
//! module a reference to another - cross-module reads at query time go
//! through the CMI, keeping the graph a DAG.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, Result};
use crate::module::{
    communication, creative, learning, personal, technical, work, MemoryModule, ModuleDeps,
};
use crate::registry::ModuleRegistry;

// ============================================================================
// FACTORY CATALOGUE
// ============================================================================

/// Constructor entry for one module
pub struct ModuleFactory {
    /// Module id the factory produces
    pub id: &'static str,
    /// Ids that must be live before this module loads
    pub requires: &'static [&'static str],
    /// Ids connected when available, skipped otherwise
    pub optional: &'static [&'static str],
    build: Box<dyn Fn(&ModuleDeps) -> Result<Arc<dyn MemoryModule>> + Send + Sync>,
}

impl ModuleFactory {
    /// A factory from a plain constructor function.
    pub fn new(
        id: &'static str,
        requires: &'static [&'static str],
        optional: &'static [&'static str],
        build: impl Fn(&ModuleDeps) -> Result<Arc<dyn MemoryModule>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            requires,
            optional,
            build: Box::new(build),
        }
    }
}

/// The built-in six-module catalogue.
///
/// Communication and creative opportunistically connect to the personal
/// module (shared tone and mood context) but do not require it.
pub fn catalogue() -> Vec<ModuleFactory> {
    vec![
        ModuleFactory::new("technical", &[], &[], technical::module),
        ModuleFactory::new("personal", &[], &[], personal::module),
        ModuleFactory::new("work", &[], &[], work::module),
        ModuleFactory::new("learning", &[], &[], learning::module),
        ModuleFactory::new("communication", &[], &["personal"], communication::module),
        ModuleFactory::new("creative", &[], &["personal"], creative::module),
    ]
}

// ============================================================================
// LOAD STATE
// ============================================================================

/// Lifecycle state of one catalogue entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    /// Initialized and registered
    Loaded,
    /// Construction or initialization failed; terminal until retried
    Failed(String),
    /// Not attempted (cycle member or failed required dependency)
    Skipped(String),
}

/// Outcome of a `load_all` pass
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Modules now live, in load order
    pub loaded: Vec<String>,
    /// Modules that failed, with the reason
    pub failed: Vec<(String, String)>,
    /// Modules skipped, with the reason
    pub skipped: Vec<(String, String)>,
}

// ============================================================================
// LOADER
// ============================================================================

/// Instantiates, initializes, connects, reloads, and tears down modules
pub struct ModuleLoader {
    registry: Arc<ModuleRegistry>,
    deps: ModuleDeps,
    factories: Vec<ModuleFactory>,
    states: Mutex<HashMap<String, LoadState>>,
    load_order: Mutex<Vec<String>>,
}

impl ModuleLoader {
    /// Loader over the built-in catalogue.
    pub fn new(registry: Arc<ModuleRegistry>, deps: ModuleDeps) -> Self {
        Self::with_factories(registry, deps, catalogue())
    }

    /// Loader over a custom catalogue (tests, embedders with extra modules).
    pub fn with_factories(
        registry: Arc<ModuleRegistry>,
        deps: ModuleDeps,
        factories: Vec<ModuleFactory>,
    ) -> Self {
        Self {
            registry,
            deps,
            factories,
            states: Mutex::new(HashMap::new()),
            load_order: Mutex::new(Vec::new()),
        }
    }

    /// Current state of one catalogue entry
    pub fn state(&self, id: &str) -> Option<LoadState> {
        self.states.lock().ok()?.get(id).cloned()
    }

    fn set_state(&self, id: &str, state: LoadState) {
        if let Ok(mut states) = self.states.lock() {
            states.insert(id.to_string(), state);
        }
    }

    fn is_loaded(&self, id: &str) -> bool {
        self.state(id) == Some(LoadState::Loaded)
    }

    /// Load every module in dependency order.
    pub async fn load_all(&self) -> LoadReport {
        let mut report = LoadReport::default();
        let (order, cyclic) = self.topological_order();

        for id in &cyclic {
            let reason = "member of a dependency cycle".to_string();
            error!(module = %id, "refusing to load: dependency cycle");
            self.set_state(id, LoadState::Skipped(reason.clone()));
            report.skipped.push((id.clone(), reason));
        }

        for id in order {
            match self.load_in_order(&id).await {
                Ok(()) => report.loaded.push(id),
                Err(LoadOutcome::Failed(reason)) => report.failed.push((id, reason)),
                Err(LoadOutcome::Skipped(reason)) => report.skipped.push((id, reason)),
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "module load pass complete"
        );
        report
    }

    async fn load_in_order(&self, id: &str) -> std::result::Result<(), LoadOutcome> {
        let factory = self
            .factories
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| LoadOutcome::Failed("not in catalogue".into()))?;

        if let Some(missing) = factory.requires.iter().find(|dep| !self.is_loaded(dep)) {
            let reason = format!("required dependency {missing} is not loaded");
            warn!(module = %id, %missing, "skipping module");
            self.set_state(id, LoadState::Skipped(reason.clone()));
            return Err(LoadOutcome::Skipped(reason));
        }

        match self.construct_and_register(factory).await {
            Ok(()) => {
                self.set_state(id, LoadState::Loaded);
                if let Ok(mut order) = self.load_order.lock() {
                    order.push(id.to_string());
                }
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                error!(module = %id, error = %reason, "module failed to load");
                self.set_state(id, LoadState::Failed(reason.clone()));
                Err(LoadOutcome::Failed(reason))
            }
        }
    }

    async fn construct_and_register(&self, factory: &ModuleFactory) -> Result<()> {
        let instance = (factory.build)(&self.deps)?;

        // Contract validation: the instance must answer to the catalogue id
        if instance.id() != factory.id {
            return Err(CoreError::Config(format!(
                "factory {} built a module answering to {}",
                factory.id,
                instance.id()
            )));
        }

        instance
            .initialize()
            .await
            .map_err(|e| CoreError::Config(e.to_string()))?;
        self.registry.register(Arc::clone(&instance), None).await?;

        // Hand the module its dependencies; this is the only place a module
        // ever receives another module
        for dep in factory.requires.iter().chain(factory.optional) {
            if let Some(peer) = self.registry.get(dep).await {
                instance.on_module_connect(dep, peer).await;
                debug!(module = factory.id, peer = dep, "modules connected");
            }
        }
        Ok(())
    }

    /// Load a single module; its required dependencies must already be live.
    pub async fn load_one(&self, id: &str) -> Result<()> {
        if self.is_loaded(id) {
            return Ok(());
        }
        let factory = self
            .factories
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| CoreError::UnknownModule(id.to_string()))?;

        if let Some(missing) = factory.requires.iter().find(|dep| !self.is_loaded(dep)) {
            return Err(CoreError::Invalid(format!(
                "required dependency {missing} is not loaded"
            )));
        }

        match self.load_in_order(id).await {
            Ok(()) => Ok(()),
            Err(LoadOutcome::Failed(reason)) | Err(LoadOutcome::Skipped(reason)) => {
                Err(CoreError::Config(reason))
            }
        }
    }

    /// Unload a module. Refused while live dependents require it.
    pub async fn unload(&self, id: &str) -> Result<()> {
        let dependents: Vec<&str> = self
            .factories
            .iter()
            .filter(|f| f.requires.contains(&id) && self.is_loaded(f.id))
            .map(|f| f.id)
            .collect();
        if !dependents.is_empty() {
            return Err(CoreError::Invalid(format!(
                "cannot unload {id}: required by {}",
                dependents.join(", ")
            )));
        }

        let instance = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| CoreError::UnknownModule(id.to_string()))?;

        if let Err(e) = instance.shutdown().await {
            warn!(module = %id, error = %e, "shutdown reported an error");
        }
        self.registry.unregister(id).await?;

        if let Ok(mut states) = self.states.lock() {
            states.remove(id);
        }
        if let Ok(mut order) = self.load_order.lock() {
            order.retain(|loaded| loaded != id);
        }
        info!(module = %id, "module unloaded");
        Ok(())
    }

    /// Unload then load again (operator-driven recovery).
    pub async fn reload(&self, id: &str) -> Result<()> {
        if self.is_loaded(id) {
            self.unload(id).await?;
        }
        self.load_one(id).await
    }

    /// Unload everything in reverse load order (service shutdown).
    pub async fn unload_all(&self) {
        let order: Vec<String> = self
            .load_order
            .lock()
            .map(|o| o.iter().rev().cloned().collect())
            .unwrap_or_default();
        for id in order {
            if let Err(e) = self.unload(&id).await {
                warn!(module = %id, error = %e, "unload during shutdown failed");
            }
        }
    }

    /// Best-effort fan-out of an event to every live module. Returns how
    /// many modules received it.
    pub async fn broadcast(&self, event: &str, payload: &Value) -> usize {
        let modules = self.registry.list_active().await;
        let count = modules.len();
        for module in modules {
            module.on_event(event, payload).await;
        }
        debug!(event, count, "event broadcast");
        count
    }

    /// Kahn's algorithm over the catalogue. Returns `(order, cyclic_ids)`;
    /// edges to ids outside the catalogue are ignored (they surface later as
    /// unsatisfied requirements).
    fn topological_order(&self) -> (Vec<String>, Vec<String>) {
        let ids: Vec<&str> = self.factories.iter().map(|f| f.id).collect();
        let mut in_degree: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();

        for factory in &self.factories {
            for dep in factory.requires.iter().chain(factory.optional) {
                if ids.contains(dep) {
                    edges.entry(*dep).or_default().push(factory.id);
                    *in_degree.entry(factory.id).or_default() += 1;
                }
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort();

        let mut order = Vec::new();
        while let Some(id) = ready.pop() {
            order.push(id.to_string());
            for next in edges.get(id).into_iter().flatten() {
                let degree = in_degree.get_mut(next).expect("catalogue id");
                *degree -= 1;
                if *degree == 0 {
                    ready.push(next);
                    ready.sort();
                }
            }
        }

        let mut cyclic: Vec<String> = ids
            .iter()
            .filter(|id| !order.contains(&id.to_string()))
            .map(|id| id.to_string())
            .collect();
        cyclic.sort();
        (order, cyclic)
    }
}

enum LoadOutcome {
    Failed(String),
    Skipped(String),
}

// ============================================================================
// TESTS
// ============================================================================
