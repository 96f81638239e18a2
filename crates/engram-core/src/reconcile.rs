//! Reconciliation - background repair of the module <-> CMI correspondence.
//!
//! Cross-layer atomicity is deliberately not provided on the write path, so
//! two discrepancies can exist for a while: an index row whose memory is gone
//! (delete step two failed) and a memory with no index row (store step three
//! failed). Both converge here: failed steps enqueue explicit tasks, and a
//! periodic sweep catches anything the queue missed. Work per cycle is
//! bounded to keep tail latency flat.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cmi::CmiIndex;
use crate::registry::ModuleRegistry;

/// Queue entries drained per cycle
const QUEUE_BATCH: usize = 512;

/// Rows swept per module per side per cycle
const SCAN_LIMIT: usize = 256;

// ============================================================================
// TASK QUEUE
// ============================================================================

/// A deferred repair step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileTask {
    /// Memory exists but its index row is missing or stale
    Reindex {
        /// Owning user
        user_id: String,
        /// Owning module
        module_id: String,
        /// Memory id inside the module
        memory_id: String,
    },
    /// Index row points at a memory that no longer exists
    DropIndex {
        /// Owning module
        module_id: String,
        /// Memory id inside the module
        memory_id: String,
    },
}

/// In-memory queue of deferred repairs
#[derive(Default)]
pub struct ReconcileQueue {
    inner: Mutex<VecDeque<ReconcileTask>>,
}

impl ReconcileQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task, skipping exact duplicates already waiting.
    pub fn push(&self, task: ReconcileTask) {
        if let Ok(mut inner) = self.inner.lock() {
            if !inner.contains(&task) {
                inner.push_back(task);
            }
        }
    }

    /// Take up to `max` tasks off the front.
    pub fn drain(&self, max: usize) -> Vec<ReconcileTask> {
        match self.inner.lock() {
            Ok(mut inner) => {
                let take = max.min(inner.len());
                inner.drain(..take).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Tasks currently waiting
    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// WORKER
// ============================================================================

/// Outcome of one reconciliation cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Queued tasks processed
    pub tasks_processed: usize,
    /// Memories re-indexed into the CMI
    pub reindexed: usize,
    /// Orphaned index rows removed
    pub orphans_dropped: usize,
    /// Expired memories pruned by retention policy
    pub pruned: u64,
    /// Failures left for the next cycle
    pub errors: usize,
}

/// The background reconciliation worker
pub struct Reconciler {
    registry: Arc<ModuleRegistry>,
    cmi: Arc<CmiIndex>,
    queue: Arc<ReconcileQueue>,
}

impl Reconciler {
    /// Wire the worker over the live registry and index.
    pub fn new(
        registry: Arc<ModuleRegistry>,
        cmi: Arc<CmiIndex>,
        queue: Arc<ReconcileQueue>,
    ) -> Self {
        Self {
            registry,
            cmi,
            queue,
        }
    }

    /// Run one full cycle: drain the task queue, then sweep both directions
    /// for every active module.
    pub async fn run_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for task in self.queue.drain(QUEUE_BATCH) {
            report.tasks_processed += 1;
            match task {
                ReconcileTask::Reindex {
                    user_id,
                    module_id,
                    memory_id,
                } => match self.registry.get(&module_id).await {
                    Some(module) => match module.reindex(&user_id, &memory_id).await {
                        Ok(true) => report.reindexed += 1,
                        Ok(false) => {
                            // Memory vanished before we got here; make sure
                            // no index row lingers
                            if self.drop_index(&module_id, &memory_id).await {
                                report.orphans_dropped += 1;
                            }
                        }
                        Err(e) => {
                            warn!(module = %module_id, memory = %memory_id, error = %e, "reindex failed");
                            self.queue.push(ReconcileTask::Reindex {
                                user_id,
                                module_id,
                                memory_id,
                            });
                            report.errors += 1;
                        }
                    },
                    None => {
                        // Module unloaded; its index rows are unreachable
                        if self.drop_index(&module_id, &memory_id).await {
                            report.orphans_dropped += 1;
                        }
                    }
                },
                ReconcileTask::DropIndex {
                    module_id,
                    memory_id,
                } => {
                    if self.drop_index(&module_id, &memory_id).await {
                        report.orphans_dropped += 1;
                    }
                }
            }
        }

        for module_id in self.registry.active_ids().await {
            let Some(module) = self.registry.get(&module_id).await else {
                continue;
            };

            // Direction 1: index rows whose memory is gone
            match self.cmi_refs(&module_id).await {
                Ok(refs) => {
                    for (user_id, memory_id) in refs {
                        match module.contains(&user_id, &memory_id).await {
                            Ok(true) => {}
                            Ok(false) => {
                                if self.drop_index(&module_id, &memory_id).await {
                                    report.orphans_dropped += 1;
                                }
                            }
                            Err(e) => {
                                debug!(module = %module_id, error = %e, "contains probe failed");
                                report.errors += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(module = %module_id, error = %e, "CMI sweep failed");
                    report.errors += 1;
                }
            }

            // Direction 2: memories with no index row
            match module.row_refs(SCAN_LIMIT, 0).await {
                Ok(refs) => {
                    for (user_id, memory_id) in refs {
                        match self.index_exists(&user_id, &module_id, &memory_id).await {
                            Ok(true) => {}
                            Ok(false) => match module.reindex(&user_id, &memory_id).await {
                                Ok(true) => report.reindexed += 1,
                                Ok(false) => {}
                                Err(e) => {
                                    debug!(module = %module_id, memory = %memory_id, error = %e, "sweep reindex failed");
                                    report.errors += 1;
                                }
                            },
                            Err(e) => {
                                debug!(module = %module_id, error = %e, "index probe failed");
                                report.errors += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(module = %module_id, error = %e, "row sweep failed");
                    report.errors += 1;
                }
            }

            // Retention pruning rides the same cycle
            match module.prune_expired().await {
                Ok(pruned) => report.pruned += pruned,
                Err(e) => {
                    debug!(module = %module_id, error = %e, "pruning failed");
                    report.errors += 1;
                }
            }
        }

        if report.reindexed + report.orphans_dropped > 0 || report.pruned > 0 {
            info!(?report, "reconciliation cycle complete");
        }
        report
    }

    /// Spawn the periodic worker loop.
    pub fn spawn(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn drop_index(&self, module_id: &str, memory_id: &str) -> bool {
        let cmi = Arc::clone(&self.cmi);
        let module_id = module_id.to_string();
        let memory_id = memory_id.to_string();
        tokio::task::spawn_blocking(move || cmi.delete_index(&module_id, &memory_id))
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or(false)
    }

    async fn cmi_refs(
        &self,
        module_id: &str,
    ) -> Result<Vec<(String, String)>, crate::error::CmiError> {
        let cmi = Arc::clone(&self.cmi);
        let module_id = module_id.to_string();
        tokio::task::spawn_blocking(move || cmi.refs_for_module(&module_id, SCAN_LIMIT, 0))
            .await
            .map_err(|e| crate::error::CmiError::Init(e.to_string()))?
    }

    async fn index_exists(
        &self,
        user_id: &str,
        module_id: &str,
        memory_id: &str,
    ) -> Result<bool, crate::error::CmiError> {
        let cmi = Arc::clone(&self.cmi);
        let user_id = user_id.to_string();
        let module_id = module_id.to_string();
        let memory_id = memory_id.to_string();
        tokio::task::spawn_blocking(move || cmi.exists(&user_id, &module_id, &memory_id))
            .await
            .map_err(|e| crate::error::CmiError::Init(e.to_string()))?
    }
}

// ============================================================================
// TESTS
// ============================================================================
