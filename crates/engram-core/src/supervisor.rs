//! Module supervision.
//!
//! A per-module ticker probes `health_check()`, samples response time, and
//! reads the adapter's error counters. Classification follows fixed
//! thresholds; an unhealthy module stays registered but is hidden from
//! routing by the orchestrator until the next green tick. No automatic
//! restart is attempted - operators recover a wedged module with `reload`.

use std::sync::Weak;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::registry::ModuleRegistry;
use crate::store::MetricsSnapshot;

// ============================================================================
// HEALTH TYPES
// ============================================================================

/// Health classification of one module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Probe green, error rate and latency inside budget
    #[default]
    Healthy,
    /// Answering, but slow or error-prone
    Degraded,
    /// Probe failed or error rate above the ceiling; hidden from routing
    Unhealthy,
}

impl HealthStatus {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate metrics attached to a health snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    /// Mean operation latency
    pub average_response_time_ms: f64,
    /// Failed operations / total operations
    pub error_rate: f64,
    /// Memories across all users
    pub total_memories: i64,
}

/// Point-in-time health of one module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleHealth {
    /// Classification
    pub status: HealthStatus,
    /// When the last probe ran
    pub last_check: DateTime<Utc>,
    /// Metrics behind the classification
    pub metrics: HealthMetrics,
    /// Human-readable findings, empty when healthy
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub issues: Vec<String>,
}

impl ModuleHealth {
    /// Optimistic initial state before the first probe
    pub fn initial() -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_check: Utc::now(),
            metrics: HealthMetrics::default(),
            issues: Vec::new(),
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Supervisor thresholds
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Probe period
    pub period: Duration,
    /// Probe timeout; an overrun counts as a failed probe
    pub probe_deadline: Duration,
    /// Error rate above which a module is unhealthy
    pub error_rate_unhealthy: f64,
    /// Error rate above which a module is degraded
    pub error_rate_degraded: f64,
    /// p95 latency above which a module is degraded
    pub p95_degraded_ms: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            probe_deadline: Duration::from_secs(3),
            error_rate_unhealthy: 0.05,
            error_rate_degraded: 0.01,
            p95_degraded_ms: 1000.0,
        }
    }
}

/// Classify one probe outcome.
pub fn classify(
    probe_ok: bool,
    probe_ms: f64,
    metrics: &MetricsSnapshot,
    config: &SupervisorConfig,
) -> (HealthStatus, Vec<String>) {
    let mut issues = Vec::new();

    if !probe_ok {
        issues.push("health probe failed".to_string());
    }
    if metrics.error_rate > config.error_rate_unhealthy {
        issues.push(format!(
            "error rate {:.1}% above {:.1}% ceiling",
            metrics.error_rate * 100.0,
            config.error_rate_unhealthy * 100.0
        ));
    }
    if !probe_ok || metrics.error_rate > config.error_rate_unhealthy {
        return (HealthStatus::Unhealthy, issues);
    }

    let p95 = metrics.p95_response_ms.max(probe_ms);
    if p95 > config.p95_degraded_ms {
        issues.push(format!("p95 response time {p95:.0} ms above budget"));
    }
    if metrics.error_rate > config.error_rate_degraded {
        issues.push(format!(
            "error rate {:.1}% above degraded threshold",
            metrics.error_rate * 100.0
        ));
    }
    if issues.is_empty() {
        (HealthStatus::Healthy, issues)
    } else {
        (HealthStatus::Degraded, issues)
    }
}

// ============================================================================
// PROBE LOOP
// ============================================================================

/// Spawn the periodic probe for one module.
///
/// Holds only a weak registry reference; the loop ends when the registry is
/// dropped, the shutdown signal fires, or the module is unregistered.
pub(crate) fn spawn_probe(
    registry: Weak<ModuleRegistry>,
    module_id: String,
    config: SupervisorConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so freshly loaded
        // modules are not probed mid-registration
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }

            let Some(registry) = registry.upgrade() else {
                return;
            };
            let Some(instance) = registry.get(&module_id).await else {
                return;
            };

            let started = Instant::now();
            let probe_ok = tokio::time::timeout(config.probe_deadline, instance.health_check())
                .await
                .unwrap_or(false);
            let probe_ms = started.elapsed().as_secs_f64() * 1000.0;

            let metrics = instance.metrics();
            let total_memories = instance.total_memories().await;
            let (status, issues) = classify(probe_ok, probe_ms, &metrics, &config);

            let previous = registry.health(&module_id).await.map(|h| h.status);
            let health = ModuleHealth {
                status,
                last_check: Utc::now(),
                metrics: HealthMetrics {
                    average_response_time_ms: metrics.average_response_ms,
                    error_rate: metrics.error_rate,
                    total_memories,
                },
                issues: issues.clone(),
            };
            registry.set_health(&module_id, health).await;

            if previous != Some(status) {
                match status {
                    HealthStatus::Healthy => {
                        debug!(module = %module_id, "module recovered")
                    }
                    _ => warn!(module = %module_id, status = %status, ?issues, "module health changed"),
                }
                instance
                    .on_event(
                        "health.changed",
                        &json!({
                            "module": module_id,
                            "status": status.as_str(),
                            "issues": issues,
                        }),
                    )
                    .await;
            }
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================
