//! End-to-end behavior of the engine on a small fixed catalog

mod common;

use common::{id, snapshot, TENANT};
use hybrid_recommender::{
    EngineConfig, ExplanationDetail, FactorizationVariant, HybridStrategy, InMemoryVectorIndex,
    RecommendationContext, RecommendationEngine, ScorerKind,
};
use std::sync::Arc;

fn ctx(user: u128) -> RecommendationContext {
    RecommendationContext::new(id(user), id(TENANT))
}

async fn trained(config: EngineConfig) -> RecommendationEngine {
    let engine = RecommendationEngine::new(config).unwrap();
    engine.train(snapshot()).await.unwrap();
    engine
}

#[tokio::test]
async fn test_recommends_unseen_items_for_known_user() {
    let engine = trained(EngineConfig::default()).await;

    let recs = engine.recommend(&ctx(1).with_limit(2)).await.unwrap();

    assert!(!recs.is_empty());
    assert!(recs.len() <= 2);
    for rec in &recs {
        assert!([id(13), id(14), id(15)].contains(&rec.item_id));
        assert!(rec.score > 0.0);
    }
    assert!(recs.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_item_similarity_never_returns_the_item() {
    let engine = trained(EngineConfig::default()).await;

    let similar = engine.get_item_similarity(id(11), 2).await.unwrap();

    assert!(similar.len() <= 2);
    assert!(similar.iter().all(|(item, _)| *item != id(11)));
}

#[tokio::test]
async fn test_training_is_deterministic() {
    let mut config = EngineConfig::default();
    config.collaborative.min_interactions = 1;

    let first = trained(config.clone()).await;
    let second = trained(config).await;

    for user in [1, 2, 3, 99] {
        let request = ctx(user).with_limit(5).with_explain(true);
        assert_eq!(
            first.recommend(&request).await.unwrap(),
            second.recommend(&request).await.unwrap()
        );
    }
}

#[tokio::test]
async fn test_explained_weights_sum_to_one() {
    let mut config = EngineConfig::default();
    config.collaborative.min_interactions = 1;
    let engine = trained(config).await;

    for user in [1, 2, 3, 99] {
        let explanation = engine.explain_recommendation(id(user), id(13)).await.unwrap();
        match explanation.detail {
            ExplanationDetail::Hybrid { weights, .. } => {
                assert!((weights.sum() - 1.0).abs() < 1e-6, "user {user}: {weights:?}");
            }
            other => panic!("unexpected detail: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_exclusions_and_bounds() {
    let engine = trained(EngineConfig::default()).await;

    for user in [1, 2, 3, 99] {
        for limit in [0, 1, 3, 10] {
            let request = ctx(user).with_limit(limit).excluding([id(13), id(15)]);
            let recs = engine.recommend(&request).await.unwrap();

            assert!(recs.len() <= limit);
            assert!(recs
                .iter()
                .all(|r| r.item_id != id(13) && r.item_id != id(15)));
        }
    }
}

#[tokio::test]
async fn test_new_user_gets_popular_items() {
    let engine = trained(EngineConfig::default()).await;

    let recs = engine.recommend(&ctx(99).with_limit(3)).await.unwrap();

    assert!(!recs.is_empty());
    assert!(recs.len() <= 3);
    assert!(recs.iter().all(|r| r.score > 0.0));
}

#[tokio::test]
async fn test_switching_strategy() {
    let mut config = EngineConfig::default();
    config.hybrid.strategy = HybridStrategy::Switching;
    let engine = trained(config).await;

    let recs = engine.recommend(&ctx(1)).await.unwrap();
    assert!(recs.iter().all(|r| r.item_id != id(11) && r.item_id != id(12)));

    let explanation = engine.explain_recommendation(id(1), id(13)).await.unwrap();
    assert_eq!(explanation.method, "switching");
}

#[tokio::test]
async fn test_implicit_factorization_variant() {
    let mut config = EngineConfig::default();
    config.hybrid.matrix_factorization = FactorizationVariant::Implicit;
    config.als.factors = 8;
    config.als.iterations = 10;
    let engine = RecommendationEngine::new(config).unwrap();

    let report = engine.train(snapshot()).await.unwrap();
    assert!(report.trained.contains(&ScorerKind::ImplicitAls));
    assert!(!report.trained.contains(&ScorerKind::Svd));

    let recs = engine.recommend(&ctx(1).with_limit(3)).await.unwrap();
    assert!(recs.iter().all(|r| r.item_id != id(11) && r.item_id != id(12)));
}

#[tokio::test]
async fn test_item_similarity_through_vector_index() {
    let index = Arc::new(InMemoryVectorIndex::new());
    let engine = RecommendationEngine::new(EngineConfig::default())
        .unwrap()
        .with_vector_index(index.clone());
    engine.train(snapshot()).await.unwrap();

    assert_eq!(index.len().await, 5);
    let similar = engine.get_item_similarity(id(13), 3).await.unwrap();
    assert!(!similar.is_empty());
    assert!(similar.len() <= 3);
    assert!(similar.iter().all(|(item, score)| *item != id(13) && *score > 0.0));
}
