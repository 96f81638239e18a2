//! Degraded-path behaviour: slow modules, index outages, reconciliation.

use std::time::Duration;

use engram_core::memory::SearchOptions;
use engram_core::supervisor::{HealthStatus, ModuleHealth};
use engram_e2e_tests::mocks::fixtures;
use engram_e2e_tests::TestEnv;

#[tokio::test]
async fn slow_module_is_elided_with_partial_flag() {
    let env = TestEnv::customized(&["learning", "work"], |config| {
        config.search_deadline = Duration::from_millis(200);
    })
    .await;

    env.federation
        .store("U1", "learning", fixtures::LEARNING_NOTES[0], None)
        .await
        .unwrap();
    env.federation
        .store("U1", "work", fixtures::WORK_NOTES[0], None)
        .await
        .unwrap();

    env.slow_down("work", Duration::from_secs(2)).await;

    let opts = SearchOptions {
        modules: Some(vec!["learning".to_string(), "work".to_string()]),
        min_score: 0.05,
        ..SearchOptions::default()
    };
    let result = env
        .federation
        .search("U1", fixtures::CALCULUS_QUERY, &opts)
        .await
        .unwrap();

    assert!(result.partial);
    assert!(result.consulted.contains(&"learning".to_string()));
    assert!(!result.consulted.contains(&"work".to_string()));
    let elided = result.elided.iter().find(|e| e.module == "work").unwrap();
    assert_eq!(elided.reason, "timeout");
    assert!(result.results.iter().all(|hit| hit.module == "learning"));
    env.stop();
}

#[tokio::test]
async fn index_outage_defers_then_reconciles() {
    let env = TestEnv::with_modules(&["learning"]).await;

    // Index unavailable during the write
    env.embedder.set_broken(true);
    let receipt = env
        .federation
        .store("U1", "learning", fixtures::LEARNING_NOTES[0], None)
        .await
        .unwrap();
    assert!(!receipt.indexed, "store must report the deferred index");
    assert_eq!(env.queue.len(), 1);
    assert!(!env.cmi.exists("U1", "learning", &receipt.id).unwrap());

    // The memory is still retrievable through direct module search
    let module = env.registry.get("learning").await.unwrap();
    let hits = module
        .search("U1", fixtures::CALCULUS_QUERY, &env.low_bar())
        .await
        .unwrap();
    assert_eq!(hits[0].memory.id, receipt.id);

    // Index recovers; one reconciliation cycle repairs the row
    env.embedder.set_broken(false);
    let report = env.reconciler().run_once().await;
    assert!(report.reindexed >= 1);
    assert!(env.cmi.exists("U1", "learning", &receipt.id).unwrap());
    assert!(env.queue.is_empty());

    // Routing now sees the memory
    let routes = env
        .federation
        .route("U1", fixtures::CALCULUS_QUERY, 3)
        .await
        .unwrap();
    assert_eq!(routes[0].module_id, "learning");
    assert!(routes[0].confidence > 0.0);
    env.stop();
}

#[tokio::test]
async fn orphaned_index_row_is_dropped() {
    let env = TestEnv::with_modules(&["work"]).await;
    let receipt = env
        .federation
        .store("U1", "work", fixtures::WORK_NOTES[0], None)
        .await
        .unwrap();
    assert!(env.cmi.exists("U1", "work", &receipt.id).unwrap());

    // Remove the module row behind the module's back
    let adapter = env
        .db
        .adapter("memories_work", env.config.full_dim)
        .unwrap();
    assert!(adapter.delete("U1", &receipt.id).unwrap());

    let report = env.reconciler().run_once().await;
    assert!(report.orphans_dropped >= 1);
    assert!(!env.cmi.exists("U1", "work", &receipt.id).unwrap());
    env.stop();
}

#[tokio::test]
async fn missing_index_row_is_restored_by_sweep() {
    let env = TestEnv::with_modules(&["creative"]).await;
    let receipt = env
        .federation
        .store("U1", "creative", fixtures::CREATIVE_DRAFTS[1], None)
        .await
        .unwrap();

    // Drop the index row directly; the queue knows nothing about it
    assert!(env.cmi.delete_index("creative", &receipt.id).unwrap());
    assert!(env.queue.is_empty());

    let report = env.reconciler().run_once().await;
    assert!(report.reindexed >= 1);
    assert!(env.cmi.exists("U1", "creative", &receipt.id).unwrap());
    env.stop();
}

#[tokio::test]
async fn every_module_unhealthy_yields_empty_partial_result() {
    let env = TestEnv::with_modules(&["learning", "work"]).await;
    env.federation
        .store("U1", "learning", fixtures::LEARNING_NOTES[0], None)
        .await
        .unwrap();

    for id in env.registry.active_ids().await {
        let mut sick = ModuleHealth::initial();
        sick.status = HealthStatus::Unhealthy;
        env.registry.set_health(&id, sick).await;
    }

    let result = env
        .federation
        .search("U1", fixtures::CALCULUS_QUERY, &env.low_bar())
        .await
        .unwrap();
    assert!(result.partial);
    assert!(result.results.is_empty());
    assert!(result.consulted.is_empty());
    env.stop();
}

#[tokio::test]
async fn recovery_restores_routing() {
    let env = TestEnv::with_modules(&["learning"]).await;
    env.federation
        .store("U1", "learning", fixtures::LEARNING_NOTES[0], None)
        .await
        .unwrap();

    let mut sick = ModuleHealth::initial();
    sick.status = HealthStatus::Unhealthy;
    env.registry.set_health("learning", sick).await;

    let degraded = env
        .federation
        .search("U1", fixtures::CALCULUS_QUERY, &env.low_bar())
        .await
        .unwrap();
    assert!(degraded.partial);

    // Next green tick
    env.registry
        .set_health("learning", ModuleHealth::initial())
        .await;
    let recovered = env
        .federation
        .search("U1", fixtures::CALCULUS_QUERY, &env.low_bar())
        .await
        .unwrap();
    assert!(!recovered.results.is_empty());
    env.stop();
}
