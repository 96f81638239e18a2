//! Service assembly, loader lifecycle, and configuration propagation.

use std::sync::Arc;

use engram_core::config::CoreConfig;
use engram_core::service::MemoryService;
use engram_e2e_tests::mocks::fixtures;
use engram_e2e_tests::TestEnv;
use serde_json::json;

#[tokio::test]
async fn service_starts_serves_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig {
        allow_mock_embed: true,
        database_path: Some(dir.path().join("service.db")),
        full_dim: 256,
        compressed_dim: 64,
        ..CoreConfig::default()
    };

    let (service, report) = MemoryService::start(config).await.unwrap();
    assert_eq!(report.loaded.len(), 6);

    let receipt = service
        .federation()
        .store("U1", "learning", fixtures::LEARNING_NOTES[0], None)
        .await
        .unwrap();
    assert!(receipt.indexed);

    let result = service
        .federation()
        .search(
            "U1",
            fixtures::CALCULUS_QUERY,
            &engram_core::memory::SearchOptions {
                min_score: 0.1,
                ..engram_core::memory::SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.results[0].memory.id, receipt.id);

    let registry = Arc::clone(service.registry());
    service.shutdown().await;
    assert!(registry.active_ids().await.is_empty());
}

#[tokio::test]
async fn unload_and_reload_round_trip() {
    let env = TestEnv::with_modules(&["learning", "work"]).await;

    env.loader.unload("work").await.unwrap();
    assert!(env.registry.get("work").await.is_none());
    assert_eq!(env.registry.active_ids().await, vec!["learning"]);

    env.loader.load_one("work").await.unwrap();
    assert!(env.registry.get("work").await.is_some());

    // A reloaded module serves traffic
    let receipt = env
        .federation
        .store("U1", "work", fixtures::WORK_NOTES[0], None)
        .await
        .unwrap();
    assert!(receipt.indexed);
    env.stop();
}

#[tokio::test]
async fn config_patch_reaches_the_live_module() {
    let env = TestEnv::with_modules(&["learning"]).await;

    let updated = env
        .registry
        .update_config("learning", &json!({"searchLimit": 2}))
        .await
        .unwrap();
    assert_eq!(updated.search_limit, 2);

    let module = env.registry.get("learning").await.unwrap();
    assert_eq!(module.config().search_limit, 2);

    // The cap now binds module-side results
    for note in fixtures::LEARNING_NOTES {
        env.federation
            .store("U1", "learning", note, None)
            .await
            .unwrap();
    }
    let hits = module
        .search("U1", "calculus derivative integration formula", &env.low_bar())
        .await
        .unwrap();
    assert!(hits.len() <= 2);
    env.stop();
}

#[tokio::test]
async fn broadcast_reaches_every_live_module() {
    let env = TestEnv::full().await;
    let reached = env
        .loader
        .broadcast("maintenance.window", &json!({"minutes": 10}))
        .await;
    assert_eq!(reached, 6);
    env.stop();
}

#[tokio::test]
async fn descriptors_reflect_type_defaults() {
    let env = TestEnv::full().await;

    let learning = env.registry.descriptor("learning").await.unwrap();
    assert_eq!(learning.configuration.max_memory_size, 10_000);
    assert_eq!(learning.configuration.retention_days, 365);

    let personal = env.registry.descriptor("personal").await.unwrap();
    assert_eq!(personal.configuration.max_memory_size, 5_000);
    assert!(personal.configuration.enable_versioning);

    let communication = env.registry.descriptor("communication").await.unwrap();
    assert_eq!(communication.configuration.search_limit, 20);
    assert!(communication.configuration.enable_encryption);
    env.stop();
}

#[tokio::test]
async fn health_snapshots_start_optimistic() {
    let env = TestEnv::with_modules(&["technical"]).await;
    let health = env.registry.health("technical").await.unwrap();
    assert_eq!(health.status, engram_core::supervisor::HealthStatus::Healthy);
    assert!(health.issues.is_empty());
    env.stop();
}
