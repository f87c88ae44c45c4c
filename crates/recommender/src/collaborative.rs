//! Neighborhood collaborative filtering
//!
//! User-based: score unseen items by `similarity(u, v) * value(v, i)` summed over the
//! top-K users most similar to `u`. Item-based mirrors this over the items the user
//! interacted with and their nearest item neighbors.

use crate::catalog::{ItemCatalog, UserHistory};
use crate::cold_start::{PopularityFallback, COLD_START_REASON};
use crate::config::EngineConfig;
use crate::error::ScorerError;
use crate::interaction_matrix::InteractionMatrix;
use crate::scorer::{Scorer, ScorerKind, TrainingData, UserState};
use crate::similarity::{sparse_cosine, top_k, SimilarityMatrix};
use crate::types::{
    Explanation, ExplanationDetail, RecommendationContext, RecommendationItem,
    SimilarInteractedItem,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

const EXPLAIN_TOP: usize = 5;

/// State shared by both neighborhood variants
#[derive(Debug)]
struct Neighborhood {
    matrix: InteractionMatrix,
    similarity: SimilarityMatrix,
    catalog: Arc<ItemCatalog>,
    history: Arc<UserHistory>,
    fallback: PopularityFallback,
    k_neighbors: usize,
}

impl Neighborhood {
    fn build(
        data: &TrainingData<'_>,
        config: &EngineConfig,
        over_items: bool,
    ) -> Result<Self, ScorerError> {
        let matrix = InteractionMatrix::build(
            &data.snapshot.interactions,
            &data.snapshot.ratings,
            config.collaborative.min_interactions,
        )?;
        let k_neighbors = config.collaborative.k_neighbors;

        let similarity = if over_items {
            SimilarityMatrix::from_adjacency(
                matrix.cols(),
                matrix.rows(),
                matrix.items().ids().to_vec(),
                k_neighbors,
            )
        } else {
            SimilarityMatrix::from_adjacency(
                matrix.rows(),
                matrix.cols(),
                matrix.users().ids().to_vec(),
                k_neighbors,
            )
        };
        tracing::debug!(
            rows = similarity.len(),
            stored = similarity.nnz(),
            "Built neighbor lists"
        );

        let popularity: Vec<(Uuid, f32)> = matrix
            .items()
            .ids()
            .iter()
            .copied()
            .zip(matrix.item_popularity())
            .collect();
        let fallback = PopularityFallback::new(top_k(popularity, usize::MAX), COLD_START_REASON);

        Ok(Self {
            matrix,
            similarity,
            catalog: Arc::clone(&data.catalog),
            history: Arc::clone(&data.history),
            fallback,
            k_neighbors,
        })
    }

    fn user_state(&self, user_id: &Uuid) -> UserState {
        match self.matrix.users().index_of(user_id) {
            Some(u) => UserState::Warm {
                interactions: self.matrix.row(u).len(),
            },
            None => UserState::Cold,
        }
    }

    fn is_seen(&self, user_id: &Uuid, user_idx: usize, item_idx: usize) -> bool {
        if self.matrix.get(user_idx, item_idx).is_some() {
            return true;
        }
        self.matrix
            .items()
            .id_of(item_idx)
            .map_or(false, |item| self.history.has_seen(user_id, &item))
    }

    fn cold_start(&self, ctx: &RecommendationContext) -> Vec<RecommendationItem> {
        self.fallback
            .recommend(ctx, &self.catalog, self.history.seen(&ctx.user_id))
    }

    /// Turn accumulated per-item scores into a filtered, ranked list
    fn rank(
        &self,
        scores: HashMap<usize, f32>,
        ctx: &RecommendationContext,
        reason: &str,
    ) -> Vec<RecommendationItem> {
        let candidates: Vec<(Uuid, f32)> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0 && score.is_finite() && *score >= ctx.min_score)
            .filter_map(|(idx, score)| self.matrix.items().id_of(idx).map(|id| (id, score)))
            .filter(|(id, _)| ctx.admits(*id, self.catalog.category_of(id)))
            .collect();

        top_k(candidates, ctx.num_recommendations)
            .into_iter()
            .map(|(id, score)| RecommendationItem::new(id, score).with_reason(reason))
            .collect()
    }

    /// Cosine between two item columns, computed on demand
    fn column_similarity(&self, a: usize, b: usize) -> Option<f32> {
        sparse_cosine(self.matrix.col(a), self.matrix.col(b))
    }

    /// Every item with positive column similarity to `target`, best `k` first
    fn similar_items(&self, target: usize, k: usize) -> Vec<(Uuid, f32)> {
        let similar: Vec<(Uuid, f32)> = (0..self.matrix.num_items())
            .filter(|&j| j != target)
            .filter_map(|j| {
                let sim = self.column_similarity(target, j).filter(|s| *s > 0.0)?;
                self.matrix.items().id_of(j).map(|id| (id, sim))
            })
            .collect();

        top_k(similar, k)
    }
}

/// User-based neighborhood scorer
#[derive(Debug)]
pub struct UserCollaborativeScorer {
    model: Neighborhood,
}

impl Scorer for UserCollaborativeScorer {
    fn train(data: &TrainingData<'_>, config: &EngineConfig) -> Result<Self, ScorerError> {
        let model = Neighborhood::build(data, config, false)?;
        tracing::info!(
            users = model.matrix.num_users(),
            items = model.matrix.num_items(),
            "Trained user-based collaborative filter"
        );
        Ok(Self { model })
    }

    fn kind(&self) -> ScorerKind {
        ScorerKind::UserCollaborative
    }

    fn user_state(&self, user_id: &Uuid) -> UserState {
        self.model.user_state(user_id)
    }

    fn recommend(
        &self,
        ctx: &RecommendationContext,
    ) -> Result<Vec<RecommendationItem>, ScorerError> {
        let m = &self.model;
        let Some(u) = m.matrix.users().index_of(&ctx.user_id) else {
            return Ok(m.cold_start(ctx));
        };

        let mut scores: HashMap<usize, f32> = HashMap::new();
        for (v, sim) in m.similarity.neighbors(u, m.k_neighbors) {
            for &(i, value) in m.matrix.row(v) {
                if m.is_seen(&ctx.user_id, u, i) {
                    continue;
                }
                *scores.entry(i).or_insert(0.0) += sim * value;
            }
        }

        Ok(m.rank(scores, ctx, "Users with similar taste liked this item"))
    }

    fn item_similarity(
        &self,
        item_id: &Uuid,
        top_k_items: usize,
    ) -> Result<Vec<(Uuid, f32)>, ScorerError> {
        let m = &self.model;
        let target = m
            .matrix
            .items()
            .index_of(item_id)
            .ok_or(ScorerError::UnknownEntity(*item_id))?;

        Ok(m.similar_items(target, top_k_items))
    }

    fn explain(&self, user_id: &Uuid, item_id: &Uuid) -> Result<Explanation, ScorerError> {
        let m = &self.model;
        let u = m
            .matrix
            .users()
            .index_of(user_id)
            .ok_or(ScorerError::UnknownEntity(*user_id))?;
        let i = m
            .matrix
            .items()
            .index_of(item_id)
            .ok_or(ScorerError::UnknownEntity(*item_id))?;

        let contributors: Vec<(Uuid, f32)> = m
            .similarity
            .neighbors(u, m.k_neighbors)
            .into_iter()
            .filter(|(v, _)| m.matrix.get(*v, i).map_or(false, |value| value > 0.0))
            .filter_map(|(v, sim)| m.matrix.users().id_of(v).map(|id| (id, sim)))
            .collect();

        let count = contributors.len();
        let top: Vec<(Uuid, f32)> = contributors.into_iter().take(EXPLAIN_TOP).collect();

        Ok(Explanation {
            method: ScorerKind::UserCollaborative.as_str().to_string(),
            summary: format!("Recommended because {count} similar users also liked this item"),
            detail: ExplanationDetail::UserBased {
                similar_users_count: count,
                top_similar_users: top,
            },
        })
    }

    fn similarity_matrix(&self) -> Option<&SimilarityMatrix> {
        Some(&self.model.similarity)
    }
}

/// Item-based neighborhood scorer
#[derive(Debug)]
pub struct ItemCollaborativeScorer {
    model: Neighborhood,
}

impl Scorer for ItemCollaborativeScorer {
    fn train(data: &TrainingData<'_>, config: &EngineConfig) -> Result<Self, ScorerError> {
        let model = Neighborhood::build(data, config, true)?;
        tracing::info!(
            users = model.matrix.num_users(),
            items = model.matrix.num_items(),
            "Trained item-based collaborative filter"
        );
        Ok(Self { model })
    }

    fn kind(&self) -> ScorerKind {
        ScorerKind::ItemCollaborative
    }

    fn user_state(&self, user_id: &Uuid) -> UserState {
        self.model.user_state(user_id)
    }

    fn recommend(
        &self,
        ctx: &RecommendationContext,
    ) -> Result<Vec<RecommendationItem>, ScorerError> {
        let m = &self.model;
        let Some(u) = m.matrix.users().index_of(&ctx.user_id) else {
            return Ok(m.cold_start(ctx));
        };

        let mut scores: HashMap<usize, f32> = HashMap::new();
        for &(j, value) in m.matrix.row(u) {
            for (i, sim) in m.similarity.neighbors(j, m.k_neighbors) {
                if m.is_seen(&ctx.user_id, u, i) {
                    continue;
                }
                *scores.entry(i).or_insert(0.0) += sim * value;
            }
        }

        Ok(m.rank(scores, ctx, "Similar to items you interacted with"))
    }

    fn item_similarity(
        &self,
        item_id: &Uuid,
        top_k_items: usize,
    ) -> Result<Vec<(Uuid, f32)>, ScorerError> {
        let m = &self.model;
        let idx = m
            .matrix
            .items()
            .index_of(item_id)
            .ok_or(ScorerError::UnknownEntity(*item_id))?;

        // Stored lists are exact prefixes; longer requests are computed on demand
        if top_k_items > m.similarity.k() {
            return Ok(m.similar_items(idx, top_k_items));
        }

        Ok(m.similarity
            .neighbors(idx, top_k_items)
            .into_iter()
            .filter_map(|(j, sim)| m.matrix.items().id_of(j).map(|id| (id, sim)))
            .collect())
    }

    fn explain(&self, user_id: &Uuid, item_id: &Uuid) -> Result<Explanation, ScorerError> {
        let m = &self.model;
        let u = m
            .matrix
            .users()
            .index_of(user_id)
            .ok_or(ScorerError::UnknownEntity(*user_id))?;
        let target = m
            .matrix
            .items()
            .index_of(item_id)
            .ok_or(ScorerError::UnknownEntity(*item_id))?;

        let mut similar: Vec<SimilarInteractedItem> = m
            .matrix
            .row(u)
            .iter()
            .filter(|(j, _)| *j != target)
            .filter_map(|&(j, user_value)| {
                let similarity = m.column_similarity(target, j).filter(|s| *s > 0.0)?;
                let item_id = m.matrix.items().id_of(j)?;
                Some(SimilarInteractedItem {
                    item_id,
                    similarity,
                    user_value,
                })
            })
            .collect();
        similar.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });

        let count = similar.len();
        similar.truncate(EXPLAIN_TOP);

        Ok(Explanation {
            method: ScorerKind::ItemCollaborative.as_str().to_string(),
            summary: format!(
                "Recommended because it's similar to {count} items you've interacted with"
            ),
            detail: ExplanationDetail::ItemBased {
                similar_items_count: count,
                top_similar_items: similar,
            },
        })
    }

    fn similarity_matrix(&self) -> Option<&SimilarityMatrix> {
        Some(&self.model.similarity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{id, scenario_snapshot, training_data};

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.collaborative.min_interactions = 1;
        config
    }

    #[test]
    fn test_user_based_recommends_neighbor_items() {
        let snapshot = scenario_snapshot();
        let scorer = UserCollaborativeScorer::train(&training_data(&snapshot), &config()).unwrap();

        let ctx = RecommendationContext::new(id(1), id(0));
        let recs = scorer.recommend(&ctx).unwrap();

        // u2 is u1's only positive neighbor; i1 is already seen
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].item_id, id(13));
        assert!((recs[0].score - (20.0 / 41.0) * 5.0).abs() < 1e-4);
        assert_eq!(scorer.user_state(&id(1)), UserState::Warm { interactions: 2 });
    }

    #[test]
    fn test_user_based_cold_start_popularity() {
        let snapshot = scenario_snapshot();
        let scorer = UserCollaborativeScorer::train(&training_data(&snapshot), &config()).unwrap();

        let ctx = RecommendationContext::new(id(99), id(0)).with_limit(2);
        let recs = scorer.recommend(&ctx).unwrap();

        assert_eq!(scorer.user_state(&id(99)), UserState::Cold);
        assert_eq!(
            recs.iter().map(|r| r.item_id).collect::<Vec<_>>(),
            vec![id(13), id(11)]
        );
        assert_eq!(recs[0].reason.as_deref(), Some(COLD_START_REASON));
    }

    #[test]
    fn test_item_based_recommend_and_similarity() {
        let snapshot = scenario_snapshot();
        let scorer = ItemCollaborativeScorer::train(&training_data(&snapshot), &config()).unwrap();

        let recs = scorer
            .recommend(&RecommendationContext::new(id(1), id(0)))
            .unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].item_id, id(13));

        let similar = scorer.item_similarity(&id(11), 2).unwrap();
        assert_eq!(
            similar.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![id(12), id(13)]
        );
        assert!(similar.iter().all(|(i, _)| *i != id(11)));
    }

    #[test]
    fn test_explanations() {
        let snapshot = scenario_snapshot();
        let data = training_data(&snapshot);
        let user_based = UserCollaborativeScorer::train(&data, &config()).unwrap();
        let item_based = ItemCollaborativeScorer::train(&data, &config()).unwrap();

        let explanation = user_based.explain(&id(1), &id(13)).unwrap();
        assert_eq!(
            explanation.summary,
            "Recommended because 1 similar users also liked this item"
        );

        let explanation = item_based.explain(&id(1), &id(13)).unwrap();
        match explanation.detail {
            ExplanationDetail::ItemBased {
                similar_items_count,
                ref top_similar_items,
            } => {
                assert_eq!(similar_items_count, 1);
                assert_eq!(top_similar_items[0].item_id, id(11));
                assert_eq!(top_similar_items[0].user_value, 5.0);
            }
            other => panic!("unexpected detail: {other:?}"),
        }

        assert!(matches!(
            user_based.explain(&id(99), &id(13)),
            Err(ScorerError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_neighbor_lists_bounded_by_k() {
        let snapshot = scenario_snapshot();
        let mut config = config();
        config.collaborative.k_neighbors = 1;
        let scorer = ItemCollaborativeScorer::train(&training_data(&snapshot), &config).unwrap();

        let matrix = scorer.similarity_matrix().unwrap();
        assert_eq!(matrix.k(), 1);
        assert!(matrix.nnz() <= matrix.len());

        // Requests past the stored lists fall back to exact column cosine
        let similar = scorer.item_similarity(&id(11), 2).unwrap();
        assert_eq!(
            similar.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![id(12), id(13)]
        );
        let stored = scorer.item_similarity(&id(11), 1).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].0, id(12));
        assert!((stored[0].1 - similar[0].1).abs() < 1e-5);
    }

    #[test]
    fn test_min_interactions_leaves_nothing() {
        let snapshot = scenario_snapshot();
        let err = UserCollaborativeScorer::train(&training_data(&snapshot), &EngineConfig::default())
            .unwrap_err();
        assert!(matches!(err, ScorerError::InsufficientData(_)));
    }

    #[test]
    fn test_excluded_items_are_dropped() {
        let snapshot = scenario_snapshot();
        let scorer = UserCollaborativeScorer::train(&training_data(&snapshot), &config()).unwrap();
        let ctx = RecommendationContext::new(id(1), id(0)).excluding([id(13)]);
        assert!(scorer.recommend(&ctx).unwrap().is_empty());
    }
}
