//! Hybrid Recommendation Engine
//!
//! Combines collaborative, content-based and matrix factorization scorers into one
//! ranked list using per-user adaptive weights.

use crate::catalog::ItemCatalog;
use crate::config::{HybridConfig, HybridStrategy};
use crate::diversity::ApplyDiversityFilter;
use crate::error::ScorerError;
use crate::scorer::{MethodWeights, Scorer, ScorerRegistry, ScoringMethod};
use crate::similarity::by_score_desc;
use crate::types::{
    ComponentExplanation, Explanation, ExplanationDetail, RecommendationContext,
    RecommendationItem,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Output of a combiner run
#[derive(Debug, Clone, PartialEq)]
pub struct HybridResult {
    pub items: Vec<RecommendationItem>,
    /// Every scorer asked for this request failed; the list is empty and must not be cached
    pub all_failed: bool,
}

/// Strategy that turns trained scorers into one list per request
#[async_trait]
pub trait HybridCombiner: Send + Sync {
    fn strategy(&self) -> HybridStrategy;

    async fn recommend(&self, ctx: &RecommendationContext) -> HybridResult;

    fn explain(&self, user_id: &Uuid, item_id: &Uuid) -> Explanation;
}

/// Ask each scorer in turn until one succeeds
pub(crate) fn first_success(
    scorers: &[Arc<dyn Scorer>],
    ctx: &RecommendationContext,
) -> Result<Vec<RecommendationItem>, ScorerError> {
    let mut last_error = ScorerError::NotTrained;
    for scorer in scorers {
        match scorer.recommend(ctx) {
            Ok(items) => return Ok(items),
            Err(e) => {
                tracing::warn!(
                    scorer = scorer.kind().as_str(),
                    error = %e,
                    "Scorer failed, trying fallback"
                );
                last_error = e;
            }
        }
    }
    Err(last_error)
}

/// First explanation a slot can give, or an insufficient-data placeholder
pub(crate) fn explain_slot(
    scorers: &[Arc<dyn Scorer>],
    method: ScoringMethod,
    user_id: &Uuid,
    item_id: &Uuid,
) -> Explanation {
    for scorer in scorers {
        match scorer.explain(user_id, item_id) {
            Ok(explanation) => return explanation,
            Err(e) => {
                tracing::debug!(scorer = scorer.kind().as_str(), error = %e, "No explanation");
            }
        }
    }
    Explanation::insufficient_data(method.as_str())
}

/// Defensive filters, ranking, diversification and truncation shared by all combiners
pub(crate) fn finalize(
    mut candidates: Vec<RecommendationItem>,
    ctx: &RecommendationContext,
    catalog: &ItemCatalog,
    config: &HybridConfig,
) -> Vec<RecommendationItem> {
    candidates.retain(|item| {
        item.score.is_finite()
            && item.score >= ctx.min_score
            && ctx.admits(item.item_id, catalog.category_of(&item.item_id))
    });
    candidates.sort_by(|a, b| by_score_desc(&(a.item_id, a.score), &(b.item_id, b.score)));

    if ctx.diversify {
        ApplyDiversityFilter::execute(
            candidates,
            catalog,
            config.max_per_category,
            ctx.num_recommendations,
        )
    } else {
        candidates.truncate(ctx.num_recommendations);
        candidates
    }
}

#[derive(Debug, Default)]
struct MergedCandidate {
    score: f32,
    components: BTreeMap<ScoringMethod, f32>,
}

/// Weighted hybrid with adaptive per-user weights
///
/// Steps:
/// 1. Resolve weights from which methods know the user
/// 2. Fan out to every weighted method on the blocking pool
/// 3. Merge `score * weight` per item, tracking contributing methods
/// 4. Filter, rank, diversify and truncate
pub struct WeightedHybrid {
    registry: ScorerRegistry,
    catalog: Arc<ItemCatalog>,
    config: HybridConfig,
}

impl WeightedHybrid {
    pub fn new(registry: ScorerRegistry, catalog: Arc<ItemCatalog>, config: HybridConfig) -> Self {
        Self {
            registry,
            catalog,
            config,
        }
    }

    /// Weights for `user_id`; always sums to 1.0 unless no scorer is trained
    pub fn resolve_weights(&self, user_id: &Uuid) -> MethodWeights {
        let present: Vec<ScoringMethod> = ScoringMethod::ALL
            .into_iter()
            .filter(|m| self.registry.has_method(*m))
            .collect();
        if present.is_empty() {
            return MethodWeights::zero();
        }

        let equal_among = |methods: &[ScoringMethod]| {
            let mut weights = MethodWeights::zero();
            for m in methods {
                weights.set(*m, 1.0 / methods.len() as f32);
            }
            weights
        };

        let mut base = MethodWeights::zero();
        for m in &present {
            base.set(*m, self.config.weights.get(*m));
        }

        if !self.config.adaptive_weights {
            return base.normalized().unwrap_or_else(|| equal_among(&present));
        }

        let warm: Vec<ScoringMethod> = present
            .iter()
            .copied()
            .filter(|m| method_is_warm(&self.registry, *m, user_id))
            .collect();

        if warm.is_empty() {
            return if present.len() == ScoringMethod::ALL.len() {
                MethodWeights::cold_start()
            } else {
                equal_among(&present)
            };
        }

        let mut adapted = MethodWeights::zero();
        for m in &warm {
            adapted.set(*m, base.get(*m));
        }
        adapted.normalized().unwrap_or_else(|| equal_among(&warm))
    }

    fn merge(
        results: Vec<(ScoringMethod, f32, Vec<RecommendationItem>)>,
    ) -> HashMap<Uuid, MergedCandidate> {
        let mut merged: HashMap<Uuid, MergedCandidate> = HashMap::new();

        for (method, weight, items) in results {
            for item in items {
                merged
                    .entry(item.item_id)
                    .and_modify(|existing| {
                        existing.score += item.score * weight;
                        existing.components.insert(method, item.score);
                    })
                    .or_insert_with(|| MergedCandidate {
                        score: item.score * weight,
                        components: BTreeMap::from([(method, item.score)]),
                    });
            }
        }

        merged
    }

    fn generate_reason(candidate: &MergedCandidate) -> String {
        let methods: Vec<&str> = candidate.components.keys().map(|m| m.as_str()).collect();
        format!("Hybrid recommendation (methods: {})", methods.join(", "))
    }
}

#[async_trait]
impl HybridCombiner for WeightedHybrid {
    fn strategy(&self) -> HybridStrategy {
        HybridStrategy::Weighted
    }

    async fn recommend(&self, ctx: &RecommendationContext) -> HybridResult {
        if ctx.num_recommendations == 0 {
            return HybridResult {
                items: Vec::new(),
                all_failed: false,
            };
        }

        // Step 1: weight resolution
        let weights = self.resolve_weights(&ctx.user_id);

        // Step 2: fan-out, one blocking task per weighted method
        let mut sub_ctx = ctx.clone();
        sub_ctx.num_recommendations = ctx
            .num_recommendations
            .saturating_mul(self.config.candidate_pool_factor);
        let sub_ctx = Arc::new(sub_ctx);

        let mut handles = Vec::new();
        for method in ScoringMethod::ALL {
            let weight = weights.get(method);
            if weight <= 0.0 {
                continue;
            }
            let scorers = self.registry.for_method(method);
            if scorers.is_empty() {
                continue;
            }
            let sub_ctx = Arc::clone(&sub_ctx);
            handles.push((
                method,
                weight,
                tokio::task::spawn_blocking(move || first_success(&scorers, &sub_ctx)),
            ));
        }

        let attempted = handles.len();
        let mut results = Vec::with_capacity(attempted);
        for (method, weight, handle) in handles {
            match handle.await {
                Ok(Ok(items)) => results.push((method, weight, items)),
                Ok(Err(e)) => {
                    tracing::warn!(method = method.as_str(), error = %e, "Method failed, skipping");
                }
                Err(e) => {
                    tracing::warn!(method = method.as_str(), error = %e, "Scoring task panicked");
                }
            }
        }

        if attempted > 0 && results.is_empty() {
            tracing::warn!(user_id = %ctx.user_id, "Every recommendation method failed");
            return HybridResult {
                items: Vec::new(),
                all_failed: true,
            };
        }

        // Step 3: merge
        let merged = Self::merge(results);

        let candidates: Vec<RecommendationItem> = merged
            .into_iter()
            .map(|(item_id, candidate)| {
                let mut item = RecommendationItem::new(item_id, candidate.score)
                    .with_reason(Self::generate_reason(&candidate));
                if ctx.explain {
                    let components: serde_json::Map<String, serde_json::Value> = candidate
                        .components
                        .iter()
                        .map(|(m, s)| (m.as_str().to_string(), json!(s)))
                        .collect();
                    item.metadata = Some(BTreeMap::from([
                        ("component_scores".to_string(), serde_json::Value::Object(components)),
                        ("weights".to_string(), json!(weights)),
                    ]));
                }
                item
            })
            .collect();

        // Step 4: filter, rank, diversify, truncate
        HybridResult {
            items: finalize(candidates, ctx, &self.catalog, &self.config),
            all_failed: false,
        }
    }

    fn explain(&self, user_id: &Uuid, item_id: &Uuid) -> Explanation {
        let weights = self.resolve_weights(user_id);

        let components: Vec<ComponentExplanation> = ScoringMethod::ALL
            .into_iter()
            .filter(|m| self.registry.has_method(*m))
            .map(|method| ComponentExplanation {
                method,
                weight: weights.get(method),
                explanation: explain_slot(
                    &self.registry.for_method(method),
                    method,
                    user_id,
                    item_id,
                ),
            })
            .collect();

        let summary = components
            .iter()
            .filter(|c| c.weight > 0.0)
            .map(|c| format!("{} ({:.2})", c.method, c.weight))
            .collect::<Vec<_>>()
            .join(", ");

        Explanation {
            method: "hybrid".to_string(),
            summary: format!("Hybrid recommendation combining {summary}"),
            detail: ExplanationDetail::Hybrid {
                weights,
                components,
            },
        }
    }
}

/// Whether any scorer filling `method` holds a representation of the user
pub(crate) fn method_is_warm(
    registry: &ScorerRegistry,
    method: ScoringMethod,
    user_id: &Uuid,
) -> bool {
    registry
        .for_method(method)
        .iter()
        .any(|s| s.user_state(user_id).is_warm())
}
