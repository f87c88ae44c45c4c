//! Explicit-feedback factorization trained with stochastic gradient descent
//!
//! Prediction is `mu + b_u + b_i + p_u . q_i`, clipped to the observed value range.

use super::{init_factors, LatentFactors};
use crate::catalog::{ItemCatalog, UserHistory};
use crate::cold_start::PopularityFallback;
use crate::config::EngineConfig;
use crate::error::ScorerError;
use crate::interaction_matrix::InteractionMatrix;
use crate::scorer::{Scorer, ScorerKind, TrainingData, UserState};
use crate::similarity::top_k;
use crate::types::{
    Explanation, ExplanationDetail, FactorContribution, RecommendationContext,
    RecommendationItem,
};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use uuid::Uuid;

const EXPLAIN_TOP_FACTORS: usize = 5;
/// Two-sided 95% normal quantile
const Z_95: f32 = 1.96;

#[derive(Debug)]
pub struct SvdScorer {
    factors: LatentFactors,
    global_mean: f32,
    user_bias: Array1<f32>,
    item_bias: Array1<f32>,
    /// Observed (min, max) value range
    range: (f32, f32),
    /// Root mean squared training residual
    residual_rmse: f32,
    seen: Vec<Vec<usize>>,
    catalog: Arc<ItemCatalog>,
    history: Arc<UserHistory>,
    fallback: PopularityFallback,
}

impl SvdScorer {
    fn predict_idx(&self, u: usize, i: usize) -> f32 {
        let raw = self.global_mean + self.user_bias[u] + self.item_bias[i] + self.factors.dot(u, i);
        raw.clamp(self.range.0, self.range.1)
    }

    /// Predicted value for a known (user, item) pair
    pub fn predict(&self, user_id: &Uuid, item_id: &Uuid) -> Result<f32, ScorerError> {
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
        Ok(self.predict_idx(u, i))
    }

    pub fn residual_rmse(&self) -> f32 {
        self.residual_rmse
    }

    fn is_seen(&self, user_id: &Uuid, u: usize, i: usize) -> bool {
        self.seen[u].binary_search(&i).is_ok()
            || self
                .factors
                .items
                .id_of(i)
                .map_or(false, |item| self.history.has_seen(user_id, &item))
    }
}

/// Popularity favoring items that are both well rated and often rated
fn rated_popularity(matrix: &InteractionMatrix) -> Vec<(Uuid, f32)> {
    let ranked: Vec<(Uuid, f32)> = (0..matrix.num_items())
        .filter_map(|i| {
            let col = matrix.col(i);
            if col.is_empty() {
                return None;
            }
            let n = col.len() as f32;
            let avg = col.iter().map(|(_, v)| v).sum::<f32>() / n;
            matrix.items().id_of(i).map(|id| (id, avg * (1.0 + n).ln()))
        })
        .collect();
    top_k(ranked, usize::MAX)
}

impl Scorer for SvdScorer {
    fn train(data: &TrainingData<'_>, config: &EngineConfig) -> Result<Self, ScorerError> {
        let matrix =
            InteractionMatrix::build(&data.snapshot.interactions, &data.snapshot.ratings, 1)?;
        let triples: Vec<(usize, usize, f32)> = matrix.triples().collect();

        let k = config.svd.factors;
        let lr = config.svd.learning_rate;
        let reg = config.svd.regularization;

        let global_mean = triples.iter().map(|t| t.2).sum::<f32>() / triples.len() as f32;
        let mut user_bias = Array1::<f32>::zeros(matrix.num_users());
        let mut item_bias = Array1::<f32>::zeros(matrix.num_items());

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut pu = init_factors(&mut rng, matrix.num_users(), k);
        let mut qi = init_factors(&mut rng, matrix.num_items(), k);

        for epoch in 0..config.svd.epochs {
            let mut squared_error = 0.0_f32;

            for &(u, i, r) in &triples {
                let dot = pu.row(u).dot(&qi.row(i));
                let err = r - (global_mean + user_bias[u] + item_bias[i] + dot);
                squared_error += err * err;

                user_bias[u] += lr * (err - reg * user_bias[u]);
                item_bias[i] += lr * (err - reg * item_bias[i]);

                for f in 0..k {
                    let puf = pu[[u, f]];
                    let qif = qi[[i, f]];
                    pu[[u, f]] += lr * (err * qif - reg * puf);
                    qi[[i, f]] += lr * (err * puf - reg * qif);
                }
            }

            if !squared_error.is_finite() {
                return Err(ScorerError::Numerical(format!(
                    "SGD diverged at epoch {epoch}"
                )));
            }
            tracing::debug!(
                "SVD epoch {}: rmse = {:.4}",
                epoch,
                (squared_error / triples.len() as f32).sqrt()
            );
        }

        let seen: Vec<Vec<usize>> = (0..matrix.num_users())
            .map(|u| matrix.row(u).iter().map(|(i, _)| *i).collect())
            .collect();

        let mut scorer = Self {
            factors: LatentFactors {
                users: matrix.users().clone(),
                items: matrix.items().clone(),
                user_factors: pu,
                item_factors: qi,
            },
            global_mean,
            user_bias,
            item_bias,
            range: matrix.value_range(),
            residual_rmse: 0.0,
            seen,
            catalog: Arc::clone(&data.catalog),
            history: Arc::clone(&data.history),
            fallback: PopularityFallback::new(
                rated_popularity(&matrix),
                "Popular highly-rated item (cold start)",
            ),
        };

        let residual: f32 = triples
            .iter()
            .map(|&(u, i, r)| (r - scorer.predict_idx(u, i)).powi(2))
            .sum();
        scorer.residual_rmse = (residual / triples.len() as f32).sqrt();

        tracing::info!(
            users = matrix.num_users(),
            items = matrix.num_items(),
            factors = k,
            rmse = scorer.residual_rmse,
            "Trained SVD factorization"
        );

        Ok(scorer)
    }

    fn kind(&self) -> ScorerKind {
        ScorerKind::Svd
    }

    fn user_state(&self, user_id: &Uuid) -> UserState {
        match self.factors.users.index_of(user_id) {
            Some(u) => UserState::Warm {
                interactions: self.seen[u].len(),
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

        let candidates: Vec<(Uuid, f32)> = self
            .factors
            .items
            .ids()
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.is_seen(&ctx.user_id, u, *i))
            .map(|(i, id)| (*id, self.predict_idx(u, i)))
            .filter(|(_, score)| *score > 0.0 && score.is_finite() && *score >= ctx.min_score)
            .filter(|(id, _)| ctx.admits(*id, self.catalog.category_of(id)))
            .collect();

        Ok(top_k(candidates, ctx.num_recommendations)
            .into_iter()
            .map(|(id, score)| {
                RecommendationItem::new(id, score)
                    .with_reason(format!("Predicted rating {score:.2}"))
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

        let predicted = self.predict_idx(u, i);
        let pu = self.factors.user_factors.row(u);
        let qi = self.factors.item_factors.row(i);

        let mut contributions: Vec<FactorContribution> = (0..self.factors.factors())
            .map(|f| FactorContribution {
                factor_index: f,
                contribution: pu[f] * qi[f],
                user_factor: pu[f],
                item_factor: qi[f],
            })
            .collect();
        contributions.sort_by(|a, b| {
            b.contribution
                .abs()
                .total_cmp(&a.contribution.abs())
                .then_with(|| a.factor_index.cmp(&b.factor_index))
        });
        contributions.truncate(EXPLAIN_TOP_FACTORS);

        let half_width = Z_95 * self.residual_rmse;
        let interval = (
            (predicted - half_width).max(self.range.0),
            (predicted + half_width).min(self.range.1),
        );

        Ok(Explanation {
            method: ScorerKind::Svd.as_str().to_string(),
            summary: format!("Predicted rating: {predicted:.2}"),
            detail: ExplanationDetail::Svd {
                predicted_rating: predicted,
                confidence: 1.0 / (1.0 + self.residual_rmse),
                confidence_interval: interval,
                top_factors: contributions,
            },
        })
    }
}
