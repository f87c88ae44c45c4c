//! Switching hybrid
//!
//! Picks exactly one method per request from how much the engine knows about the user.

use crate::catalog::{ItemCatalog, UserHistory};
use crate::config::{HybridConfig, HybridStrategy};
use crate::recommendation::{
    explain_slot, finalize, first_success, method_is_warm, HybridCombiner, HybridResult,
};
use crate::scorer::{Scorer, ScorerRegistry, ScoringMethod};
use crate::types::{Explanation, ExplanationDetail, RecommendationContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationMode {
    #[default]
    ColdStart,
    ContentOnly,
    Collaborative,
    MatrixFactorization,
}

impl RecommendationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationMode::ColdStart => "cold_start",
            RecommendationMode::ContentOnly => "content_only",
            RecommendationMode::Collaborative => "collaborative",
            RecommendationMode::MatrixFactorization => "matrix_factorization",
        }
    }

    /// Scoring method serving this mode; cold start borrows content popularity
    fn method(&self) -> ScoringMethod {
        match self {
            RecommendationMode::ColdStart | RecommendationMode::ContentOnly => {
                ScoringMethod::Content
            }
            RecommendationMode::Collaborative => ScoringMethod::Collaborative,
            RecommendationMode::MatrixFactorization => ScoringMethod::MatrixFactorization,
        }
    }
}

impl fmt::Display for RecommendationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode chosen for one user and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSelection {
    pub mode: RecommendationMode,
    pub reason: String,
}

/// Switching hybrid over the trained scorers
pub struct SwitchingHybrid {
    registry: ScorerRegistry,
    catalog: Arc<ItemCatalog>,
    history: Arc<UserHistory>,
    config: HybridConfig,
}

impl SwitchingHybrid {
    pub fn new(
        registry: ScorerRegistry,
        catalog: Arc<ItemCatalog>,
        history: Arc<UserHistory>,
        config: HybridConfig,
    ) -> Self {
        Self {
            registry,
            catalog,
            history,
            config,
        }
    }

    /// Rules, first match wins:
    /// 1. Enough interactions and a collaborative representation
    /// 2. A content profile
    /// 3. Latent factors
    /// 4. Popularity
    pub fn select_mode(&self, user_id: &Uuid) -> ModeSelection {
        let interactions = self.history.interaction_count(user_id);

        if interactions >= self.config.min_interactions_for_collaborative
            && method_is_warm(&self.registry, ScoringMethod::Collaborative, user_id)
        {
            return ModeSelection {
                mode: RecommendationMode::Collaborative,
                reason: format!(
                    "User has {interactions} interactions, enough for collaborative filtering"
                ),
            };
        }

        if method_is_warm(&self.registry, ScoringMethod::Content, user_id) {
            return ModeSelection {
                mode: RecommendationMode::ContentOnly,
                reason: format!("User has {interactions} interactions, using content profile"),
            };
        }

        if method_is_warm(&self.registry, ScoringMethod::MatrixFactorization, user_id) {
            return ModeSelection {
                mode: RecommendationMode::MatrixFactorization,
                reason: "User has learned latent factors".to_string(),
            };
        }

        ModeSelection {
            mode: RecommendationMode::ColdStart,
            reason: "New user, using popularity".to_string(),
        }
    }

    /// Scorers to try in order: the selected mode, then every other popularity source
    fn attempt_order(&self, mode: RecommendationMode) -> Vec<Arc<dyn Scorer>> {
        let mut order = self.registry.for_method(mode.method());
        for method in ScoringMethod::ALL {
            if method != mode.method() {
                order.extend(self.registry.for_method(method));
            }
        }
        order
    }
}

#[async_trait]
impl HybridCombiner for SwitchingHybrid {
    fn strategy(&self) -> HybridStrategy {
        HybridStrategy::Switching
    }

    async fn recommend(&self, ctx: &RecommendationContext) -> HybridResult {
        if ctx.num_recommendations == 0 || self.registry.is_empty() {
            return HybridResult {
                items: Vec::new(),
                all_failed: false,
            };
        }

        let selection = self.select_mode(&ctx.user_id);
        tracing::debug!(
            user_id = %ctx.user_id,
            mode = selection.mode.as_str(),
            "Selected recommendation mode"
        );

        let scorers = self.attempt_order(selection.mode);
        let mut sub_ctx = ctx.clone();
        sub_ctx.num_recommendations = ctx
            .num_recommendations
            .saturating_mul(self.config.candidate_pool_factor);

        let outcome =
            tokio::task::spawn_blocking(move || first_success(&scorers, &sub_ctx)).await;

        let mut candidates = match outcome {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                tracing::warn!(user_id = %ctx.user_id, error = %e, "Every recommendation method failed");
                return HybridResult {
                    items: Vec::new(),
                    all_failed: true,
                };
            }
            Err(e) => {
                tracing::warn!(user_id = %ctx.user_id, error = %e, "Scoring task panicked");
                return HybridResult {
                    items: Vec::new(),
                    all_failed: true,
                };
            }
        };

        if ctx.explain {
            for item in &mut candidates {
                item.metadata
                    .get_or_insert_with(BTreeMap::new)
                    .insert("mode".to_string(), json!(selection.mode));
            }
        }

        HybridResult {
            items: finalize(candidates, ctx, &self.catalog, &self.config),
            all_failed: false,
        }
    }

    fn explain(&self, user_id: &Uuid, item_id: &Uuid) -> Explanation {
        let selection = self.select_mode(user_id);
        let method = selection.mode.method();

        let method_explanation = match selection.mode {
            RecommendationMode::ColdStart => None,
            _ => Some(Box::new(explain_slot(
                &self.registry.for_method(method),
                method,
                user_id,
                item_id,
            ))),
        };

        Explanation {
            method: "switching".to_string(),
            summary: format!("Mode {}: {}", selection.mode, selection.reason),
            detail: ExplanationDetail::Switching {
                mode: selection.mode,
                reason: selection.reason,
                method_explanation,
            },
        }
    }
}
