//! Store/search/update/delete through the federation surface.

use engram_core::error::{CoreError, ErrorKind};
use engram_core::memory::{MemoryPatch, SearchOptions};
use engram_core::MAX_CONTENT_BYTES;
use engram_e2e_tests::mocks::fixtures;
use engram_e2e_tests::TestEnv;

#[tokio::test]
async fn single_module_round_trip() {
    let env = TestEnv::with_modules(&["learning"]).await;

    let receipt = env
        .federation
        .store("U1", "learning", fixtures::LEARNING_NOTES[0], None)
        .await
        .unwrap();
    assert!(receipt.indexed);

    let result = env
        .federation
        .search(
            "U1",
            fixtures::CALCULUS_QUERY,
            &SearchOptions {
                limit: 3,
                min_score: 0.1,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();

    let top = &result.results[0];
    assert_eq!(top.memory.id, receipt.id);
    assert_eq!(top.module, "learning");
    assert!(top.score >= 0.7, "expected a strong match, got {}", top.score);
    env.stop();
}

#[tokio::test]
async fn store_then_get_preserves_content() {
    let env = TestEnv::with_modules(&["work"]).await;
    let receipt = env
        .federation
        .store("U1", "work", fixtures::WORK_NOTES[0], None)
        .await
        .unwrap();

    let module = env.registry.get("work").await.unwrap();
    let memory = module.get("U1", &receipt.id).await.unwrap().unwrap();
    assert_eq!(memory.content, fixtures::WORK_NOTES[0]);
    assert!(memory.updated_at >= memory.created_at);
    assert!(memory.last_accessed >= memory.created_at);
    env.stop();
}

#[tokio::test]
async fn update_changes_content_and_embedding() {
    let env = TestEnv::with_modules(&["learning"]).await;
    let module = env.registry.get("learning").await.unwrap();

    let receipt = env
        .federation
        .store("U1", "learning", fixtures::LEARNING_NOTES[2], None)
        .await
        .unwrap();
    let before = module.get("U1", &receipt.id).await.unwrap().unwrap();

    assert!(module
        .update(
            "U1",
            &receipt.id,
            MemoryPatch::content(fixtures::LEARNING_NOTES[3]),
        )
        .await
        .unwrap());

    let after = module.get("U1", &receipt.id).await.unwrap().unwrap();
    assert_eq!(after.content, fixtures::LEARNING_NOTES[3]);
    assert_ne!(before.embedding, after.embedding);
    assert!(after.updated_at >= before.updated_at);
    env.stop();
}

#[tokio::test]
async fn delete_is_idempotent() {
    let env = TestEnv::with_modules(&["creative"]).await;
    let receipt = env
        .federation
        .store("U1", "creative", fixtures::CREATIVE_DRAFTS[0], None)
        .await
        .unwrap();

    assert!(env
        .federation
        .delete("U1", "creative", &receipt.id)
        .await
        .unwrap());

    let module = env.registry.get("creative").await.unwrap();
    assert!(module.get("U1", &receipt.id).await.unwrap().is_none());

    // Second delete still succeeds
    assert!(!env
        .federation
        .delete("U1", "creative", &receipt.id)
        .await
        .unwrap());
    env.stop();
}

#[tokio::test]
async fn content_size_boundary() {
    let env = TestEnv::with_modules(&["technical"]).await;

    let exactly = fixtures::content_of_size(MAX_CONTENT_BYTES);
    assert!(env
        .federation
        .store("U1", "technical", &exactly, None)
        .await
        .is_ok());

    let over = fixtures::content_of_size(MAX_CONTENT_BYTES + 1);
    let err = env
        .federation
        .store("U1", "technical", &over, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    env.stop();
}

#[tokio::test]
async fn limit_zero_is_empty_not_error() {
    let env = TestEnv::with_modules(&["learning"]).await;
    env.federation
        .store("U1", "learning", fixtures::LEARNING_NOTES[0], None)
        .await
        .unwrap();

    let result = env
        .federation
        .search(
            "U1",
            fixtures::CALCULUS_QUERY,
            &SearchOptions {
                limit: 0,
                min_score: 0.0,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(result.results.is_empty());
    env.stop();
}

#[tokio::test]
async fn min_score_one_returns_only_exact_hits() {
    let env = TestEnv::with_modules(&["learning"]).await;
    env.federation
        .store("U1", "learning", fixtures::LEARNING_NOTES[0], None)
        .await
        .unwrap();

    let result = env
        .federation
        .search(
            "U1",
            fixtures::CALCULUS_QUERY,
            &SearchOptions {
                min_score: 1.0,
                ..SearchOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(result.results.iter().all(|hit| hit.score >= 1.0));
    env.stop();
}

#[tokio::test]
async fn repeated_search_is_deterministic() {
    let env = TestEnv::full().await;
    for note in fixtures::LEARNING_NOTES {
        env.federation
            .store("U1", "learning", note, None)
            .await
            .unwrap();
    }

    let opts = env.low_bar();
    let first = env
        .federation
        .search("U1", fixtures::INTEGRATION_QUERY, &opts)
        .await
        .unwrap();
    let second = env
        .federation
        .search("U1", fixtures::INTEGRATION_QUERY, &opts)
        .await
        .unwrap();

    let first_ids: Vec<&str> = first.results.iter().map(|h| h.memory.id.as_str()).collect();
    let second_ids: Vec<&str> = second.results.iter().map(|h| h.memory.id.as_str()).collect();
    assert_eq!(first_ids, second_ids);
    env.stop();
}

#[tokio::test]
async fn unknown_module_is_invalid() {
    let env = TestEnv::with_modules(&["learning"]).await;
    let err = env
        .federation
        .store("U1", "nonexistent", "anything", None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownModule(_)));
    assert_eq!(err.kind(), ErrorKind::Invalid);
    env.stop();
}
