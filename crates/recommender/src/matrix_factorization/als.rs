//! Implicit-feedback factorization with Alternating Least Squares (ALS)
//!
//! Each observed value becomes a binary preference (value > 0) with confidence
//! `1 + alpha * value`. Unobserved cells have preference 0 and confidence 1.

use super::{init_factors, solve_least_squares, LatentFactors};
use crate::catalog::{ItemCatalog, UserHistory};
use crate::cold_start::{PopularityFallback, COLD_START_REASON};
use crate::config::{AlsConfig, EngineConfig};
use crate::error::ScorerError;
use crate::interaction_matrix::InteractionMatrix;
use crate::scorer::{Scorer, ScorerKind, TrainingData, UserState};
use crate::similarity::top_k;
use crate::types::{Explanation, ExplanationDetail, RecommendationContext, RecommendationItem};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use uuid::Uuid;

const RECENT_INTERACTIONS: usize = 5;

#[derive(Debug)]
pub struct AlsScorer {
    factors: LatentFactors,
    matrix: InteractionMatrix,
    catalog: Arc<ItemCatalog>,
    history: Arc<UserHistory>,
    fallback: PopularityFallback,
}

/// One half-step: re-solve every row of `target` against the fixed `other` factors
///
/// `lines[r]` holds `(column, value)` pairs of row `r`.
fn solve_side(
    lines: &[&[(usize, f32)]],
    other: &Array2<f32>,
    target: &mut Array2<f32>,
    config: &AlsConfig,
) -> Result<(), ScorerError> {
    let k = other.ncols();
    let other64 = other.mapv(|v| v as f64);
    // Y^T Y, shared by every row
    let gram = other64.t().dot(&other64);
    let alpha = config.alpha as f64;

    for (row, line) in lines.iter().enumerate() {
        if line.is_empty() {
            continue;
        }

        let mut a = gram.clone();
        let mut b = Array1::<f64>::zeros(k);

        for &(col, value) in line.iter() {
            let y = other64.row(col);
            let confidence = 1.0 + alpha * value as f64;
            let preference = if value > 0.0 { 1.0 } else { 0.0 };

            // A += (c - 1) * y^T y
            for i in 0..k {
                for j in 0..k {
                    a[[i, j]] += (confidence - 1.0) * y[i] * y[j];
                }
            }

            // b += c * p * y
            for i in 0..k {
                b[i] += confidence * preference * y[i];
            }
        }

        // A += lambda * I
        for i in 0..k {
            a[[i, i]] += config.regularization as f64;
        }

        let x = solve_least_squares(&a, &b)?;
        target.row_mut(row).assign(&x.mapv(|v| v as f32));
    }

    Ok(())
}

/// Confidence-weighted squared error over the observed cells
fn compute_loss(matrix: &InteractionMatrix, factors: &LatentFactors, alpha: f32) -> f32 {
    let mut loss = 0.0;
    let mut count = 0;
    for (u, i, value) in matrix.triples() {
        let preference = if value > 0.0 { 1.0 } else { 0.0 };
        let prediction = factors.dot(u, i);
        loss += (1.0 + alpha * value) * (preference - prediction).powi(2);
        count += 1;
    }
    if count > 0 {
        loss / count as f32
    } else {
        0.0
    }
}

impl AlsScorer {
    fn is_seen(&self, user_id: &Uuid, u: usize, i: usize) -> bool {
        self.matrix.get(u, i).is_some()
            || self
                .factors
                .items
                .id_of(i)
                .map_or(false, |item| self.history.has_seen(user_id, &item))
    }
}

impl Scorer for AlsScorer {
    fn train(data: &TrainingData<'_>, config: &EngineConfig) -> Result<Self, ScorerError> {
        let matrix =
            InteractionMatrix::build(&data.snapshot.interactions, &data.snapshot.ratings, 1)?;
        let als = &config.als;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut factors = LatentFactors {
            users: matrix.users().clone(),
            items: matrix.items().clone(),
            user_factors: init_factors(&mut rng, matrix.num_users(), als.factors),
            item_factors: init_factors(&mut rng, matrix.num_items(), als.factors),
        };

        let user_lines: Vec<&[(usize, f32)]> =
            (0..matrix.num_users()).map(|u| matrix.row(u)).collect();
        let item_lines: Vec<&[(usize, f32)]> =
            (0..matrix.num_items()).map(|i| matrix.col(i)).collect();

        for iteration in 0..als.iterations {
            solve_side(
                &user_lines,
                &factors.item_factors,
                &mut factors.user_factors,
                als,
            )?;
            solve_side(
                &item_lines,
                &factors.user_factors,
                &mut factors.item_factors,
                als,
            )?;

            if iteration % 2 == 0 {
                let loss = compute_loss(&matrix, &factors, als.alpha);
                tracing::debug!("ALS iteration {}: loss = {:.4}", iteration, loss);
            }
        }

        let popularity: Vec<(Uuid, f32)> = (0..matrix.num_items())
            .filter_map(|i| {
                let total: f32 = matrix.col(i).iter().map(|(_, v)| v).sum();
                matrix.items().id_of(i).map(|id| (id, total))
            })
            .collect();

        tracing::info!(
            users = matrix.num_users(),
            items = matrix.num_items(),
            factors = als.factors,
            "Trained implicit ALS factorization"
        );

        Ok(Self {
            factors,
            matrix,
            catalog: Arc::clone(&data.catalog),
            history: Arc::clone(&data.history),
            fallback: PopularityFallback::new(top_k(popularity, usize::MAX), COLD_START_REASON),
        })
    }

    fn kind(&self) -> ScorerKind {
        ScorerKind::ImplicitAls
    }

    fn user_state(&self, user_id: &Uuid) -> UserState {
        match self.factors.users.index_of(user_id) {
            Some(u) => UserState::Warm {
                interactions: self.matrix.row(u).len(),
            },
            None => UserState::Cold,
        }
    }

    fn recommend(
        &self,
        ctx: &RecommendationContext,
    ) -> Result<Vec<RecommendationItem>, ScorerError> {
        let Some(u) = self.factors.users.index_of(&ctx.user_id) else {
            return Ok(self
                .fallback
                .recommend(ctx, &self.catalog, self.history.seen(&ctx.user_id)));
        };

        let scores = self.factors.item_factors.dot(&self.factors.user_factors.row(u));
        let candidates: Vec<(Uuid, f32)> = self
            .factors
            .items
            .ids()
            .iter()
            .zip(scores.iter())
            .enumerate()
            .filter(|(i, _)| !self.is_seen(&ctx.user_id, u, *i))
            .map(|(_, (id, score))| (*id, *score))
            .filter(|(_, score)| *score > 0.0 && score.is_finite() && *score >= ctx.min_score)
            .filter(|(id, _)| ctx.admits(*id, self.catalog.category_of(id)))
            .collect();

        Ok(top_k(candidates, ctx.num_recommendations)
            .into_iter()
            .map(|(id, score)| {
                RecommendationItem::new(id, score).with_reason("Matches your interaction patterns")
            })
            .collect())
    }

    fn item_similarity(
        &self,
        item_id: &Uuid,
        top_k_items: usize,
    ) -> Result<Vec<(Uuid, f32)>, ScorerError> {
        self.factors.similar_items(item_id, top_k_items)
    }

    fn explain(&self, user_id: &Uuid, item_id: &Uuid) -> Result<Explanation, ScorerError> {
        let u = self
            .factors
            .users
            .index_of(user_id)
            .ok_or(ScorerError::UnknownEntity(*user_id))?;
        let i = self
            .factors
            .items
            .index_of(item_id)
            .ok_or(ScorerError::UnknownEntity(*item_id))?;

        let score = self.factors.dot(u, i);

        Ok(Explanation {
            method: ScorerKind::ImplicitAls.as_str().to_string(),
            summary: format!("Recommended based on your interaction patterns (score {score:.3})"),
            detail: ExplanationDetail::ImplicitFactors {
                score,
                factors: self.factors.factors(),
                user_interaction_count: self.matrix.row(u).len(),
                recent_interactions: self.history.recent_items(user_id, RECENT_INTERACTIONS),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{id, scenario_snapshot, training_data};

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.als.factors = 4;
        config.als.iterations = 10;
        config.als.regularization = 0.1;
        config
    }

    #[test]
    fn test_fit_reconstructs_preferences() {
        let snapshot = scenario_snapshot();
        let scorer = AlsScorer::train(&training_data(&snapshot), &config()).unwrap();

        // observed pairs should score well above unobserved ones on average
        let u1 = scorer.factors.users.index_of(&id(1)).unwrap();
        let i1 = scorer.factors.items.index_of(&id(11)).unwrap();
        let i4 = scorer.factors.items.index_of(&id(14)).unwrap();
        assert!(scorer.factors.dot(u1, i1) > scorer.factors.dot(u1, i4));
    }

    #[test]
    fn test_recommend_filters_interacted() {
        let snapshot = scenario_snapshot();
        let scorer = AlsScorer::train(&training_data(&snapshot), &config()).unwrap();

        let recs = scorer
            .recommend(&RecommendationContext::new(id(1), id(0)))
            .unwrap();
        assert!(recs
            .iter()
            .all(|r| r.item_id != id(11) && r.item_id != id(12)));
        assert!(recs.iter().all(|r| r.score > 0.0));
    }

    #[test]
    fn test_deterministic_with_seed() {
        let snapshot = scenario_snapshot();
        let a = AlsScorer::train(&training_data(&snapshot), &config()).unwrap();
        let b = AlsScorer::train(&training_data(&snapshot), &config()).unwrap();
        assert_eq!(a.factors.user_factors, b.factors.user_factors);
        assert_eq!(a.factors.item_factors, b.factors.item_factors);
    }

    #[test]
    fn test_explain_and_similarity() {
        let snapshot = scenario_snapshot();
        let scorer = AlsScorer::train(&training_data(&snapshot), &config()).unwrap();

        let explanation = scorer.explain(&id(3), &id(11)).unwrap();
        match explanation.detail {
            ExplanationDetail::ImplicitFactors {
                factors,
                user_interaction_count,
                ref recent_interactions,
                ..
            } => {
                assert_eq!(factors, 4);
                assert_eq!(user_interaction_count, 2);
                assert_eq!(recent_interactions.len(), 2);
            }
            other => panic!("unexpected detail: {other:?}"),
        }

        let similar = scorer.item_similarity(&id(13), 10).unwrap();
        assert!(similar.iter().all(|(i, _)| *i != id(13)));
    }

    #[test]
    fn test_cold_user_gets_popular_items() {
        let snapshot = scenario_snapshot();
        let scorer = AlsScorer::train(&training_data(&snapshot), &config()).unwrap();
        let recs = scorer
            .recommend(&RecommendationContext::new(id(99), id(0)).with_limit(1))
            .unwrap();
        assert_eq!(recs[0].item_id, id(13));
        assert_eq!(recs[0].score, 10.0);
    }
}
