//! Weighted hybrid tests

use super::fixtures::{id, scenario_snapshot, training_data};
use crate::collaborative::{ItemCollaborativeScorer, UserCollaborativeScorer};
use crate::config::{EngineConfig, HybridConfig};
use crate::content_based::ContentScorer;
use crate::matrix_factorization::SvdScorer;
use crate::recommendation::{HybridCombiner, WeightedHybrid};
use crate::scorer::{MethodWeights, Scorer, ScorerRegistry, ScoringMethod};
use crate::types::{ExplanationDetail, RecommendationContext};
use std::sync::Arc;

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.collaborative.min_interactions = 1;
    config.svd.factors = 8;
    config
}

fn hybrid_with(config: &EngineConfig, content_only: bool) -> WeightedHybrid {
    let snapshot = scenario_snapshot();
    let data = training_data(&snapshot);

    let mut registry = ScorerRegistry::new();
    registry.register(Arc::new(ContentScorer::train(&data, config).unwrap()));
    if !content_only {
        registry.register(Arc::new(UserCollaborativeScorer::train(&data, config).unwrap()));
        registry.register(Arc::new(ItemCollaborativeScorer::train(&data, config).unwrap()));
        registry.register(Arc::new(SvdScorer::train(&data, config).unwrap()));
    }

    WeightedHybrid::new(registry, Arc::clone(&data.catalog), config.hybrid.clone())
}

#[test]
fn test_weights_for_known_user_keep_base_split() {
    let hybrid = hybrid_with(&config(), false);
    let weights = hybrid.resolve_weights(&id(1));

    assert!((weights.sum() - 1.0).abs() < 1e-6);
    assert!((weights.collaborative - 0.4).abs() < 1e-6);
    assert!((weights.content - 0.3).abs() < 1e-6);
    assert!((weights.matrix_factorization - 0.3).abs() < 1e-6);
}

#[test]
fn test_weights_for_unknown_user_use_cold_start_split() {
    let hybrid = hybrid_with(&config(), false);
    assert_eq!(hybrid.resolve_weights(&id(99)), MethodWeights::cold_start());
}

#[test]
fn test_weights_with_single_method() {
    let hybrid = hybrid_with(&config(), true);
    for user in [id(1), id(99)] {
        let weights = hybrid.resolve_weights(&user);
        assert!((weights.sum() - 1.0).abs() < 1e-6);
        assert_eq!(weights.get(ScoringMethod::Content), 1.0);
    }
}

#[test]
fn test_static_weights_when_not_adaptive() {
    let mut config = config();
    config.hybrid = HybridConfig {
        adaptive_weights: false,
        weights: MethodWeights::new(2.0, 1.0, 1.0),
        ..HybridConfig::default()
    };
    let hybrid = hybrid_with(&config, false);

    let weights = hybrid.resolve_weights(&id(99));
    assert!((weights.collaborative - 0.5).abs() < 1e-6);
    assert!((weights.sum() - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_recommends_only_unseen_items() {
    let hybrid = hybrid_with(&config(), false);
    let ctx = RecommendationContext::new(id(1), id(0)).with_limit(2);

    let result = hybrid.recommend(&ctx).await;
    assert!(!result.all_failed);
    assert!(!result.items.is_empty());
    assert!(result.items.len() <= 2);
    assert!(result
        .items
        .iter()
        .all(|r| [id(13), id(14), id(15)].contains(&r.item_id)));
    assert!(result.items.iter().all(|r| r.score > 0.0));
    assert!(result.items.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(result.items[0]
        .reason
        .as_deref()
        .is_some_and(|r| r.starts_with("Hybrid recommendation (methods:")));
}

#[tokio::test]
async fn test_excluded_items_and_categories() {
    let hybrid = hybrid_with(&config(), false);
    let ctx = RecommendationContext::new(id(1), id(0))
        .excluding([id(13)])
        .excluding_categories(["cooking"]);

    let result = hybrid.recommend(&ctx).await;
    assert!(result
        .items
        .iter()
        .all(|r| r.item_id != id(13) && r.item_id != id(14) && r.item_id != id(15)));
}

#[tokio::test]
async fn test_explain_flag_attaches_component_scores() {
    let hybrid = hybrid_with(&config(), false);
    let ctx = RecommendationContext::new(id(1), id(0)).with_explain(true);

    let result = hybrid.recommend(&ctx).await;
    let metadata = result.items[0].metadata.as_ref().unwrap();
    assert!(metadata.contains_key("component_scores"));
    assert!(metadata.contains_key("weights"));
}

#[tokio::test]
async fn test_zero_limit() {
    let hybrid = hybrid_with(&config(), false);
    let result = hybrid
        .recommend(&RecommendationContext::new(id(1), id(0)).with_limit(0))
        .await;
    assert!(result.items.is_empty());
    assert!(!result.all_failed);
}

#[test]
fn test_explain_lists_every_method() {
    let hybrid = hybrid_with(&config(), false);

    let explanation = hybrid.explain(&id(1), &id(13));
    assert_eq!(explanation.method, "hybrid");
    match explanation.detail {
        ExplanationDetail::Hybrid {
            weights,
            components,
        } => {
            assert!((weights.sum() - 1.0).abs() < 1e-6);
            assert_eq!(components.len(), 3);
            assert!(components
                .iter()
                .all(|c| !matches!(c.explanation.detail, ExplanationDetail::InsufficientData)));
        }
        other => panic!("unexpected detail: {other:?}"),
    }
}

#[test]
fn test_explain_unknown_user_degrades_per_component() {
    let hybrid = hybrid_with(&config(), false);

    match hybrid.explain(&id(99), &id(13)).detail {
        ExplanationDetail::Hybrid { components, .. } => {
            assert!(components
                .iter()
                .all(|c| matches!(c.explanation.detail, ExplanationDetail::InsufficientData)));
        }
        other => panic!("unexpected detail: {other:?}"),
    }
}
