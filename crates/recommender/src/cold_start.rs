//! Cold Start Handling
//!
//! Popularity rankings served to users a scorer knows nothing about.

use crate::catalog::ItemCatalog;
use crate::types::{RecommendationContext, RecommendationItem};
use std::collections::HashSet;
use uuid::Uuid;

pub const COLD_START_REASON: &str = "Popular item (cold start)";

/// Precomputed popularity ranking with the filters of a request applied at read time
#[derive(Debug, Clone, Default)]
pub struct PopularityFallback {
    ranking: Vec<(Uuid, f32)>,
    reason: &'static str,
}

impl PopularityFallback {
    /// `ranking` must already be sorted best first
    pub fn new(ranking: Vec<(Uuid, f32)>, reason: &'static str) -> Self {
        Self { ranking, reason }
    }

    pub fn is_empty(&self) -> bool {
        self.ranking.is_empty()
    }

    pub fn ranking(&self) -> &[(Uuid, f32)] {
        &self.ranking
    }

    /// Top items for `ctx`
    ///
    /// Steps:
    /// 1. Walk the ranking in order
    /// 2. Skip excluded, already seen and filtered-out categories
    /// 3. Stop at the score threshold or the requested count
    pub fn recommend(
        &self,
        ctx: &RecommendationContext,
        catalog: &ItemCatalog,
        seen: Option<&HashSet<Uuid>>,
    ) -> Vec<RecommendationItem> {
        let mut recommendations = Vec::with_capacity(ctx.num_recommendations);

        for &(item_id, score) in &self.ranking {
            if recommendations.len() >= ctx.num_recommendations {
                break;
            }
            // Ranking is descending, nothing below can pass
            if score < ctx.min_score {
                break;
            }
            if seen.map_or(false, |s| s.contains(&item_id)) {
                continue;
            }
            if !ctx.admits(item_id, catalog.category_of(&item_id)) {
                continue;
            }

            recommendations.push(RecommendationItem::new(item_id, score).with_reason(self.reason));
        }

        recommendations
    }
}
