//! Module registry.
//!
//! The single source of truth for which modules exist right now. Read-heavy:
//! lookups take the reader side of an `RwLock`; registration and
//! unregistration take the writer side. Descriptors persist across restarts
//! so configuration patches survive a reload.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::error::{CoreError, Result, StoreError};
use crate::module::{MemoryModule, ModuleConfig, ModuleType};
use crate::store::Database;
use crate::supervisor::{spawn_probe, HealthStatus, ModuleHealth, SupervisorConfig};

// ============================================================================
// DESCRIPTOR
// ============================================================================

/// Registry view of one module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    /// Stable module id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// What the module stores
    pub description: String,
    /// Classification
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    /// Live configuration
    pub configuration: ModuleConfig,
    /// False once unregistered
    pub is_active: bool,
}

struct ModuleEntry {
    descriptor: ModuleDescriptor,
    instance: Arc<dyn MemoryModule>,
    health: ModuleHealth,
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Thread-safe module registry with persisted descriptors
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, ModuleEntry>>,
    probes: std::sync::Mutex<HashMap<String, tokio::task::JoinHandle<()>>>,
    db: Arc<Database>,
    supervisor: SupervisorConfig,
    shutdown: watch::Sender<bool>,
}

impl ModuleRegistry {
    /// Create a registry over the shared database.
    pub fn new(db: Arc<Database>, supervisor: SupervisorConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            modules: RwLock::new(HashMap::new()),
            probes: std::sync::Mutex::new(HashMap::new()),
            db,
            supervisor,
            shutdown,
        })
    }

    /// Upsert a module: resolve its configuration (persisted state wins over
    /// compiled defaults, an explicit patch wins over both), persist the
    /// descriptor, and start the supervisor loop for it.
    pub async fn register(
        self: &Arc<Self>,
        instance: Arc<dyn MemoryModule>,
        config_patch: Option<Value>,
    ) -> Result<()> {
        let compiled = instance.config();
        let id = compiled.id.clone();

        let mut config = match self.load_persisted_config(&id).await? {
            Some(persisted) => persisted,
            None => compiled.clone(),
        };
        if let Some(patch) = &config_patch {
            config = config.merged_with(patch);
        }

        let descriptor = ModuleDescriptor {
            id: id.clone(),
            name: config.name.clone(),
            description: config.description.clone(),
            module_type: config.module_type,
            configuration: config.clone(),
            is_active: true,
        };
        self.persist_descriptor(&descriptor).await?;

        if config != compiled {
            instance.on_config_update(config.clone()).await;
        }

        {
            let mut modules = self.modules.write().await;
            modules.insert(
                id.clone(),
                ModuleEntry {
                    descriptor,
                    instance,
                    health: ModuleHealth::initial(),
                },
            );
        }

        let probe = spawn_probe(
            Arc::downgrade(self),
            id.clone(),
            self.supervisor.clone(),
            self.shutdown.subscribe(),
        );
        if let Ok(mut probes) = self.probes.lock() {
            if let Some(old) = probes.insert(id.clone(), probe) {
                old.abort();
            }
        }

        info!(module = %id, "module registered");
        Ok(())
    }

    /// Mark a module inactive, stop its supervisor, and drop it from lookup.
    pub async fn unregister(&self, id: &str) -> Result<()> {
        let removed = {
            let mut modules = self.modules.write().await;
            modules.remove(id)
        };
        let Some(entry) = removed else {
            return Err(CoreError::UnknownModule(id.to_string()));
        };

        if let Ok(mut probes) = self.probes.lock() {
            if let Some(probe) = probes.remove(id) {
                probe.abort();
            }
        }

        let mut descriptor = entry.descriptor;
        descriptor.is_active = false;
        self.persist_descriptor(&descriptor).await?;

        info!(module = %id, "module unregistered");
        Ok(())
    }

    /// Live instance lookup
    pub async fn get(&self, id: &str) -> Option<Arc<dyn MemoryModule>> {
        let modules = self.modules.read().await;
        modules.get(id).map(|e| Arc::clone(&e.instance))
    }

    /// Descriptor lookup
    pub async fn descriptor(&self, id: &str) -> Option<ModuleDescriptor> {
        let modules = self.modules.read().await;
        modules.get(id).map(|e| e.descriptor.clone())
    }

    /// All live modules
    pub async fn list_active(&self) -> Vec<Arc<dyn MemoryModule>> {
        let modules = self.modules.read().await;
        modules.values().map(|e| Arc::clone(&e.instance)).collect()
    }

    /// Ids of all live modules, sorted for deterministic iteration
    pub async fn active_ids(&self) -> Vec<String> {
        let modules = self.modules.read().await;
        let mut ids: Vec<String> = modules.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Live modules of one type
    pub async fn list_by_type(&self, module_type: ModuleType) -> Vec<Arc<dyn MemoryModule>> {
        let modules = self.modules.read().await;
        modules
            .values()
            .filter(|e| e.descriptor.module_type == module_type)
            .map(|e| Arc::clone(&e.instance))
            .collect()
    }

    /// Apply a configuration patch, persist it, and notify the instance.
    pub async fn update_config(&self, id: &str, patch: &Value) -> Result<ModuleConfig> {
        let (instance, updated, descriptor) = {
            let mut modules = self.modules.write().await;
            let entry = modules
                .get_mut(id)
                .ok_or_else(|| CoreError::UnknownModule(id.to_string()))?;
            let updated = entry.descriptor.configuration.merged_with(patch);
            entry.descriptor.configuration = updated.clone();
            entry.descriptor.name = updated.name.clone();
            entry.descriptor.description = updated.description.clone();
            (
                Arc::clone(&entry.instance),
                updated,
                entry.descriptor.clone(),
            )
        };

        self.persist_descriptor(&descriptor).await?;
        instance.on_config_update(updated.clone()).await;
        debug!(module = %id, "configuration patched");
        Ok(updated)
    }

    /// Write a fresh health snapshot (supervisor only).
    pub async fn set_health(&self, id: &str, health: ModuleHealth) {
        let mut modules = self.modules.write().await;
        if let Some(entry) = modules.get_mut(id) {
            entry.health = health;
        }
    }

    /// Latest health snapshot for a module
    pub async fn health(&self, id: &str) -> Option<ModuleHealth> {
        let modules = self.modules.read().await;
        modules.get(id).map(|e| e.health.clone())
    }

    /// Ids the orchestrator may route to (everything not unhealthy)
    pub async fn routable_ids(&self) -> Vec<String> {
        let modules = self.modules.read().await;
        let mut ids: Vec<String> = modules
            .iter()
            .filter(|(_, e)| e.health.status != HealthStatus::Unhealthy)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Stop all supervisor loops (service shutdown).
    pub fn stop_probes(&self) {
        let _ = self.shutdown.send(true);
        if let Ok(mut probes) = self.probes.lock() {
            for (_, probe) in probes.drain() {
                probe.abort();
            }
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    async fn load_persisted_config(&self, id: &str) -> Result<Option<ModuleConfig>> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> std::result::Result<Option<String>, StoreError> {
            let conn = db.open_reader()?;
            conn.query_row(
                "SELECT configuration FROM module_registry WHERE id = ?1 AND is_active = 1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?
        .map_err(CoreError::from)
        .map(|raw| raw.and_then(|json| serde_json::from_str(&json).ok()))
    }

    async fn persist_descriptor(&self, descriptor: &ModuleDescriptor) -> Result<()> {
        let db = Arc::clone(&self.db);
        let descriptor = descriptor.clone();
        tokio::task::spawn_blocking(move || -> std::result::Result<(), StoreError> {
            let configuration = serde_json::to_string(&descriptor.configuration)
                .map_err(|e| StoreError::Init(e.to_string()))?;
            let now = Utc::now().to_rfc3339();
            let writer = db.writer();
            let conn = writer
                .lock()
                .map_err(|_| StoreError::LockPoisoned("writer"))?;
            conn.execute(
                "INSERT INTO module_registry
                    (id, name, description, module_type, configuration, is_active,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT (id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    module_type = excluded.module_type,
                    configuration = excluded.configuration,
                    is_active = excluded.is_active,
                    updated_at = excluded.updated_at",
                params![
                    descriptor.id,
                    descriptor.name,
                    descriptor.description,
                    descriptor.module_type.as_str(),
                    configuration,
                    descriptor.is_active as i64,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?
        .map_err(CoreError::from)
    }
}

// ============================================================================
// TESTS
// ============================================================================
