//! User isolation across every operation.

use engram_core::memory::MemoryPatch;
use engram_e2e_tests::mocks::fixtures;
use engram_e2e_tests::TestEnv;

#[tokio::test]
async fn search_never_crosses_users() {
    let env = TestEnv::full().await;
    env.federation
        .store("U1", "personal", fixtures::PERSONAL_NOTES[0], None)
        .await
        .unwrap();

    let mine = env
        .federation
        .search("U1", "hiking trip with family", &env.low_bar())
        .await
        .unwrap();
    assert!(!mine.results.is_empty());
    assert!(mine.results.iter().all(|hit| hit.memory.user_id == "U1"));

    let theirs = env
        .federation
        .search("U2", "hiking trip with family", &env.low_bar())
        .await
        .unwrap();
    assert!(theirs.results.is_empty());
    env.stop();
}

#[tokio::test]
async fn cache_keys_are_user_scoped() {
    let env = TestEnv::with_modules(&["learning"]).await;
    env.federation
        .store("U1", "learning", fixtures::LEARNING_NOTES[0], None)
        .await
        .unwrap();

    // U1 populates the cache for this query
    let first = env
        .federation
        .search("U1", fixtures::CALCULUS_QUERY, &env.low_bar())
        .await
        .unwrap();
    assert!(!first.from_cache);
    let warmed = env
        .federation
        .search("U1", fixtures::CALCULUS_QUERY, &env.low_bar())
        .await
        .unwrap();
    assert!(warmed.from_cache);

    // The same query from U2 must miss - distinct key space
    let other = env
        .federation
        .search("U2", fixtures::CALCULUS_QUERY, &env.low_bar())
        .await
        .unwrap();
    assert!(!other.from_cache);
    assert!(other.results.is_empty());
    env.stop();
}

#[tokio::test]
async fn get_update_delete_are_scoped() {
    let env = TestEnv::with_modules(&["work"]).await;
    let receipt = env
        .federation
        .store("U1", "work", fixtures::WORK_NOTES[1], None)
        .await
        .unwrap();
    let module = env.registry.get("work").await.unwrap();

    // Another user sees absence, not denial
    assert!(module.get("U2", &receipt.id).await.unwrap().is_none());
    assert!(!module
        .update("U2", &receipt.id, MemoryPatch::content("hijacked"))
        .await
        .unwrap());
    assert!(!module.delete("U2", &receipt.id).await.unwrap());

    // The owner's row is untouched
    let memory = module.get("U1", &receipt.id).await.unwrap().unwrap();
    assert_eq!(memory.content, fixtures::WORK_NOTES[1]);
    env.stop();
}

#[tokio::test]
async fn stats_are_per_user() {
    let env = TestEnv::with_modules(&["learning"]).await;
    for note in &fixtures::LEARNING_NOTES[..3] {
        env.federation
            .store("U1", "learning", note, None)
            .await
            .unwrap();
    }
    env.federation
        .store("U2", "learning", fixtures::LEARNING_NOTES[3], None)
        .await
        .unwrap();

    let module = env.registry.get("learning").await.unwrap();
    assert_eq!(module.stats("U1").await.unwrap().total_memories, 3);
    assert_eq!(module.stats("U2").await.unwrap().total_memories, 1);
    env.stop();
}

#[tokio::test]
async fn scores_respect_the_floor() {
    let env = TestEnv::full().await;
    for note in fixtures::LEARNING_NOTES {
        env.federation
            .store("U1", "learning", note, None)
            .await
            .unwrap();
    }

    let opts = engram_core::memory::SearchOptions {
        min_score: 0.3,
        ..engram_core::memory::SearchOptions::default()
    };
    let result = env
        .federation
        .search("U1", fixtures::CALCULUS_QUERY, &opts)
        .await
        .unwrap();
    assert!(result.results.iter().all(|hit| hit.score >= 0.3));
    env.stop();
}
