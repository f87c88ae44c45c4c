//! Uniform contract shared by every scoring strategy

use crate::catalog::{ItemCatalog, UserHistory};
use crate::config::EngineConfig;
use crate::error::ScorerError;
use crate::features::FeatureMatrix;
use crate::similarity::SimilarityMatrix;
use crate::types::{Explanation, RecommendationContext, RecommendationItem, TrainingSnapshot};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Concrete scorer implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    UserCollaborative,
    ItemCollaborative,
    Content,
    Svd,
    ImplicitAls,
}

impl ScorerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScorerKind::UserCollaborative => "user_collaborative",
            ScorerKind::ItemCollaborative => "item_collaborative",
            ScorerKind::Content => "content",
            ScorerKind::Svd => "svd",
            ScorerKind::ImplicitAls => "implicit_als",
        }
    }

    pub fn method(&self) -> ScoringMethod {
        match self {
            ScorerKind::UserCollaborative | ScorerKind::ItemCollaborative => {
                ScoringMethod::Collaborative
            }
            ScorerKind::Content => ScoringMethod::Content,
            ScorerKind::Svd | ScorerKind::ImplicitAls => ScoringMethod::MatrixFactorization,
        }
    }
}

impl fmt::Display for ScorerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slot a scorer fills in the hybrid combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    Collaborative,
    Content,
    MatrixFactorization,
}

impl ScoringMethod {
    pub const ALL: [ScoringMethod; 3] = [
        ScoringMethod::Collaborative,
        ScoringMethod::Content,
        ScoringMethod::MatrixFactorization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMethod::Collaborative => "collaborative",
            ScoringMethod::Content => "content",
            ScoringMethod::MatrixFactorization => "matrix_factorization",
        }
    }
}

impl fmt::Display for ScoringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-method weights of the hybrid combination
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodWeights {
    pub collaborative: f32,
    pub content: f32,
    pub matrix_factorization: f32,
}

impl Default for MethodWeights {
    fn default() -> Self {
        Self::new(0.4, 0.3, 0.3)
    }
}

impl MethodWeights {
    pub fn new(collaborative: f32, content: f32, matrix_factorization: f32) -> Self {
        Self {
            collaborative,
            content,
            matrix_factorization,
        }
    }

    /// Split used when no method knows the user
    pub fn cold_start() -> Self {
        Self::new(0.33, 0.33, 0.34)
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn get(&self, method: ScoringMethod) -> f32 {
        match method {
            ScoringMethod::Collaborative => self.collaborative,
            ScoringMethod::Content => self.content,
            ScoringMethod::MatrixFactorization => self.matrix_factorization,
        }
    }

    pub fn set(&mut self, method: ScoringMethod, weight: f32) {
        match method {
            ScoringMethod::Collaborative => self.collaborative = weight,
            ScoringMethod::Content => self.content = weight,
            ScoringMethod::MatrixFactorization => self.matrix_factorization = weight,
        }
    }

    pub fn sum(&self) -> f32 {
        self.collaborative + self.content + self.matrix_factorization
    }

    /// Scale to sum 1.0, `None` when every weight is zero
    pub fn normalized(&self) -> Option<Self> {
        let total = self.sum();
        if !(total > 0.0) || !total.is_finite() {
            return None;
        }
        Some(Self::new(
            self.collaborative / total,
            self.content / total,
            self.matrix_factorization / total,
        ))
    }
}

/// Whether a scorer holds a trained representation of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Cold,
    Warm { interactions: usize },
}

impl UserState {
    pub fn is_warm(&self) -> bool {
        matches!(self, UserState::Warm { .. })
    }
}

/// Shared inputs for one training run
pub struct TrainingData<'a> {
    pub snapshot: &'a TrainingSnapshot,
    pub catalog: Arc<ItemCatalog>,
    pub history: Arc<UserHistory>,
    /// Feature extraction outcome, shared by every content-aware scorer
    pub features: Result<Arc<FeatureMatrix>, ScorerError>,
}

/// A trained scoring strategy
///
/// Implementations are immutable after `train` and are queried concurrently.
/// All methods are synchronous CPU work.
pub trait Scorer: Send + Sync + fmt::Debug {
    fn train(data: &TrainingData<'_>, config: &EngineConfig) -> Result<Self, ScorerError>
    where
        Self: Sized;

    fn kind(&self) -> ScorerKind;

    fn method(&self) -> ScoringMethod {
        self.kind().method()
    }

    fn user_state(&self, user_id: &Uuid) -> UserState;

    /// Ranked items the user has not interacted with; cold users get the
    /// scorer's popularity fallback
    fn recommend(&self, ctx: &RecommendationContext)
        -> Result<Vec<RecommendationItem>, ScorerError>;

    /// Nearest items, never including `item_id` itself
    fn item_similarity(&self, item_id: &Uuid, top_k: usize)
        -> Result<Vec<(Uuid, f32)>, ScorerError>;

    fn explain(&self, user_id: &Uuid, item_id: &Uuid) -> Result<Explanation, ScorerError>;

    /// Precomputed pairwise similarities, if the scorer keeps them
    fn similarity_matrix(&self) -> Option<&SimilarityMatrix> {
        None
    }
}

/// Trained scorers in registration order
#[derive(Debug, Clone, Default)]
pub struct ScorerRegistry {
    scorers: Vec<Arc<dyn Scorer>>,
}

impl ScorerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, scorer: Arc<dyn Scorer>) {
        self.scorers.push(scorer);
    }

    pub fn get(&self, kind: ScorerKind) -> Option<&Arc<dyn Scorer>> {
        self.scorers.iter().find(|s| s.kind() == kind)
    }

    /// Scorers filling `method`, primary first
    pub fn for_method(&self, method: ScoringMethod) -> Vec<Arc<dyn Scorer>> {
        self.scorers
            .iter()
            .filter(|s| s.method() == method)
            .cloned()
            .collect()
    }

    pub fn has_method(&self, method: ScoringMethod) -> bool {
        self.scorers.iter().any(|s| s.method() == method)
    }

    pub fn kinds(&self) -> Vec<ScorerKind> {
        self.scorers.iter().map(|s| s.kind()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Scorer>> {
        self.scorers.iter()
    }

    pub fn len(&self) -> usize {
        self.scorers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_normalize() {
        let weights = MethodWeights::new(0.4, 0.0, 0.3).normalized().unwrap();
        assert!((weights.sum() - 1.0).abs() < 1e-6);
        assert_eq!(weights.content, 0.0);
        assert!(MethodWeights::zero().normalized().is_none());
        assert!((MethodWeights::cold_start().sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_kind_methods() {
        assert_eq!(
            ScorerKind::ItemCollaborative.method(),
            ScoringMethod::Collaborative
        );
        assert_eq!(
            ScorerKind::ImplicitAls.method(),
            ScoringMethod::MatrixFactorization
        );
        assert_eq!(ScorerKind::Svd.to_string(), "svd");
    }
}
