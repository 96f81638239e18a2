//! CMI routing behaviour across modules.

use engram_core::cmi::{NO_INDEX_FALLBACK, ROUTE_REASON};
use engram_core::memory::{MemoryPatch, SearchOptions};
use engram_e2e_tests::mocks::fixtures;
use engram_e2e_tests::TestEnv;

#[tokio::test]
async fn routing_prefers_the_relevant_module() {
    let env = TestEnv::with_modules(&["learning", "creative"]).await;

    env.federation
        .store("U1", "learning", fixtures::LEARNING_NOTES[1], None)
        .await
        .unwrap();
    env.federation
        .store("U1", "creative", fixtures::CREATIVE_DRAFTS[0], None)
        .await
        .unwrap();

    let routes = env
        .federation
        .route("U1", fixtures::INTEGRATION_QUERY, 3)
        .await
        .unwrap();

    assert_eq!(routes[0].module_id, "learning");
    assert_eq!(routes[0].reason, ROUTE_REASON);
    assert!(routes[0].confidence >= 0.4);

    if let Some(creative) = routes.iter().find(|r| r.module_id == "creative") {
        assert!(creative.confidence + 0.1 < routes[0].confidence);
    }
    env.stop();
}

#[tokio::test]
async fn fanout_of_one_consults_only_the_top_module() {
    let env = TestEnv::customized(&["learning", "creative"], |config| {
        config.search_fanout = 1;
    })
    .await;

    env.federation
        .store("U1", "learning", fixtures::LEARNING_NOTES[1], None)
        .await
        .unwrap();
    env.federation
        .store("U1", "creative", fixtures::CREATIVE_DRAFTS[0], None)
        .await
        .unwrap();

    let result = env
        .federation
        .search("U1", fixtures::INTEGRATION_QUERY, &env.low_bar())
        .await
        .unwrap();

    assert_eq!(result.consulted, vec!["learning"]);
    assert!(result
        .results
        .iter()
        .all(|hit| hit.module == "learning"));
    env.stop();
}

#[tokio::test]
async fn update_moves_routing_to_the_better_module() {
    let env = TestEnv::with_modules(&["personal", "technical"]).await;

    // A hiking note filed under technical, and a genuine journal entry
    let misfiled = env
        .federation
        .store("U1", "technical", "Hiking trip mountains gear checklist", None)
        .await
        .unwrap();
    env.federation
        .store("U1", "personal", fixtures::PERSONAL_NOTES[0], None)
        .await
        .unwrap();

    let query = "hiking trip in the mountains";
    let before = env.federation.route("U1", query, 2).await.unwrap();
    let technical_before = before
        .iter()
        .find(|r| r.module_id == "technical")
        .map(|r| r.confidence)
        .unwrap_or(0.0);

    // Rewrite the misfiled note to something unrelated; its compressed
    // vector follows the new content
    let module = env.registry.get("technical").await.unwrap();
    assert!(module
        .update(
            "U1",
            &misfiled.id,
            MemoryPatch::content(fixtures::TECHNICAL_NOTES[0]),
        )
        .await
        .unwrap());

    let after = env.federation.route("U1", query, 2).await.unwrap();
    assert_eq!(after[0].module_id, "personal");
    let technical_after = after
        .iter()
        .find(|r| r.module_id == "technical")
        .map(|r| r.confidence)
        .unwrap_or(0.0);
    assert!(technical_after < technical_before);
    env.stop();
}

#[tokio::test]
async fn cold_user_gets_round_robin_fallback() {
    let env = TestEnv::full().await;

    let routes = env.federation.route("brand-new-user", "anything", 3).await.unwrap();
    assert!(!routes.is_empty());
    assert!(routes.iter().all(|r| r.reason == NO_INDEX_FALLBACK));
    assert!(routes.iter().all(|r| r.confidence == 0.0));
    assert!(routes.len() <= 2);

    // The sampled window rotates across calls
    let again = env.federation.route("brand-new-user", "anything", 3).await.unwrap();
    assert_ne!(routes[0].module_id, again[0].module_id);
    env.stop();
}

#[tokio::test]
async fn explicit_module_list_bypasses_routing() {
    let env = TestEnv::with_modules(&["learning", "work"]).await;
    env.federation
        .store("U1", "work", fixtures::WORK_NOTES[0], None)
        .await
        .unwrap();

    let opts = SearchOptions {
        modules: Some(vec!["work".to_string()]),
        min_score: 0.05,
        ..SearchOptions::default()
    };
    let result = env
        .federation
        .search("U1", "falcon launch checklist", &opts)
        .await
        .unwrap();
    assert_eq!(result.consulted, vec!["work"]);
    assert!(result.routing.iter().all(|r| r.reason == "explicit module list"));
    env.stop();
}
