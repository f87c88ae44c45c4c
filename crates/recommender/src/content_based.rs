//! Content-based filtering implementation
//!
//! A user's profile is the weighted mean of the feature rows of the items they
//! interacted with. Items are ranked by cosine similarity to that profile.

use crate::catalog::{ItemCatalog, UserHistory};
use crate::cold_start::{PopularityFallback, COLD_START_REASON};
use crate::config::EngineConfig;
use crate::error::ScorerError;
use crate::features::FeatureMatrix;
use crate::interaction_matrix::InteractionMatrix;
use crate::scorer::{Scorer, ScorerKind, TrainingData, UserState};
use crate::similarity::{cosine, top_k};
use crate::types::{
    Explanation, ExplanationDetail, MatchingFeature, RecommendationContext, RecommendationItem,
};
use ndarray::Array1;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

const MATCHING_FEATURES: usize = 5;

#[derive(Debug, Clone)]
struct UserProfile {
    vector: Array1<f32>,
    item_count: usize,
}

/// Content-based recommendation engine
#[derive(Debug)]
pub struct ContentScorer {
    features: Arc<FeatureMatrix>,
    profiles: HashMap<Uuid, UserProfile>,
    catalog: Arc<ItemCatalog>,
    history: Arc<UserHistory>,
    fallback: PopularityFallback,
}

impl ContentScorer {
    pub fn features(&self) -> &Arc<FeatureMatrix> {
        &self.features
    }

    pub fn has_profile(&self, user_id: &Uuid) -> bool {
        self.profiles.contains_key(user_id)
    }

    /// Weighted mean of interacted item rows; weight is the rating when present,
    /// otherwise the interaction value
    fn build_profiles(
        features: &FeatureMatrix,
        matrix: Option<&InteractionMatrix>,
    ) -> HashMap<Uuid, UserProfile> {
        let mut profiles = HashMap::new();
        let Some(matrix) = matrix else {
            return profiles;
        };

        for (u, user_id) in matrix.users().ids().iter().enumerate() {
            let mut sum = Array1::<f32>::zeros(features.dims());
            let mut total_weight = 0.0_f32;
            let mut item_count = 0;

            for &(i, weight) in matrix.row(u) {
                if weight <= 0.0 {
                    continue;
                }
                let Some(row) = matrix.items().id_of(i).and_then(|id| features.row(&id)) else {
                    continue;
                };
                sum.scaled_add(weight, &row);
                total_weight += weight;
                item_count += 1;
            }

            if item_count > 0 && total_weight > 0.0 {
                profiles.insert(
                    *user_id,
                    UserProfile {
                        vector: sum / total_weight,
                        item_count,
                    },
                );
            }
        }

        profiles
    }
}

impl Scorer for ContentScorer {
    fn train(data: &TrainingData<'_>, _config: &EngineConfig) -> Result<Self, ScorerError> {
        let features = data.features.as_ref().map_err(Clone::clone)?.clone();

        // No interactions only means every user is cold
        let matrix =
            InteractionMatrix::build(&data.snapshot.interactions, &data.snapshot.ratings, 1).ok();
        let profiles = Self::build_profiles(&features, matrix.as_ref());

        tracing::info!(
            items = features.num_items(),
            dims = features.dims(),
            profiles = profiles.len(),
            "Trained content-based scorer"
        );

        Ok(Self {
            features,
            profiles,
            catalog: Arc::clone(&data.catalog),
            history: Arc::clone(&data.history),
            fallback: PopularityFallback::new(data.catalog.by_popularity(), COLD_START_REASON),
        })
    }

    fn kind(&self) -> ScorerKind {
        ScorerKind::Content
    }

    fn user_state(&self, user_id: &Uuid) -> UserState {
        match self.profiles.get(user_id) {
            Some(profile) => UserState::Warm {
                interactions: profile.item_count,
            },
            None => UserState::Cold,
        }
    }

    fn recommend(
        &self,
        ctx: &RecommendationContext,
    ) -> Result<Vec<RecommendationItem>, ScorerError> {
        let Some(profile) = self.profiles.get(&ctx.user_id) else {
            return Ok(self
                .fallback
                .recommend(ctx, &self.catalog, self.history.seen(&ctx.user_id)));
        };

        let matrix = self.features.matrix();
        let candidates: Vec<(Uuid, f32)> = self
            .features
            .items()
            .ids()
            .iter()
            .enumerate()
            .filter(|(_, id)| !self.history.has_seen(&ctx.user_id, id))
            .filter_map(|(i, id)| {
                cosine(profile.vector.view(), matrix.row(i))
                    .filter(|s| *s > 0.0 && *s >= ctx.min_score)
                    .map(|s| (*id, s))
            })
            .filter(|(id, _)| ctx.admits(*id, self.catalog.category_of(id)))
            .collect();

        Ok(top_k(candidates, ctx.num_recommendations)
            .into_iter()
            .map(|(id, score)| {
                RecommendationItem::new(id, score).with_reason("Similar to items you liked")
            })
            .collect())
    }

    fn item_similarity(
        &self,
        item_id: &Uuid,
        top_k_items: usize,
    ) -> Result<Vec<(Uuid, f32)>, ScorerError> {
        let target = self
            .features
            .items()
            .index_of(item_id)
            .ok_or(ScorerError::UnknownEntity(*item_id))?;
        let matrix = self.features.matrix();
        let query = matrix.row(target);

        let similar: Vec<(Uuid, f32)> = self
            .features
            .items()
            .ids()
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != target)
            .filter_map(|(j, id)| {
                cosine(query, matrix.row(j))
                    .filter(|s| *s > 0.0)
                    .map(|s| (*id, s))
            })
            .collect();

        Ok(top_k(similar, top_k_items))
    }

    fn explain(&self, user_id: &Uuid, item_id: &Uuid) -> Result<Explanation, ScorerError> {
        let profile = self
            .profiles
            .get(user_id)
            .ok_or(ScorerError::UnknownEntity(*user_id))?;
        let item_vector = self
            .features
            .row(item_id)
            .ok_or(ScorerError::UnknownEntity(*item_id))?;

        let similarity = cosine(profile.vector.view(), item_vector).unwrap_or(0.0);

        // Closest dimensions among those the item actually has
        let mut dims: Vec<(usize, f32)> = item_vector
            .iter()
            .zip(profile.vector.iter())
            .enumerate()
            .filter(|(_, (item, _))| **item != 0.0)
            .map(|(d, (item, user))| (d, (item - user).abs()))
            .collect();
        if dims.is_empty() {
            dims = item_vector
                .iter()
                .zip(profile.vector.iter())
                .enumerate()
                .map(|(d, (item, user))| (d, (item - user).abs()))
                .collect();
        }
        dims.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let matching_features = dims
            .into_iter()
            .take(MATCHING_FEATURES)
            .map(|(index, _)| MatchingFeature {
                index,
                name: self
                    .features
                    .feature_name(index)
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect();

        let item = self.catalog.get(item_id);

        Ok(Explanation {
            method: ScorerKind::Content.as_str().to_string(),
            summary: format!("Content similarity: {similarity:.3}"),
            detail: ExplanationDetail::Content {
                similarity,
                item_category: item.and_then(|i| i.category.clone()),
                item_title: item.map(|i| i.title.clone()),
                matching_features,
            },
        })
    }
}
