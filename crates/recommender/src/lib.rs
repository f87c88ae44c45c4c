//! Hybrid Recommendation Engine
//!
//! Blends neighborhood collaborative filtering, latent factor models and
//! content similarity into one ranked list per user, with popularity-based
//! cold start, read-through caching and explanations for every result.

pub mod cache;
pub mod catalog;
pub mod cold_start;
pub mod collaborative;
pub mod config;
pub mod content_based;
pub mod diversity;
pub mod engine;
pub mod error;
pub mod features;
pub mod index;
pub mod interaction_matrix;
pub mod matrix_factorization;
pub mod observability;
pub mod recommendation;
pub mod scorer;
pub mod similarity;
pub mod source;
pub mod switching;
pub mod types;
pub mod vector_index;

// Re-export key types
pub use cache::{CacheBackend, InMemoryCache, RecommendationCache, RedisCache};
pub use catalog::{ItemCatalog, UserHistory};
pub use cold_start::PopularityFallback;
pub use collaborative::{ItemCollaborativeScorer, UserCollaborativeScorer};
pub use config::{EngineConfig, FactorizationVariant, HybridStrategy};
pub use content_based::ContentScorer;
pub use diversity::ApplyDiversityFilter;
pub use engine::{RecommendationEngine, TrainingReport};
pub use error::{
    CacheError, ConfigError, DataSourceError, RecommendationError, ScorerError, TrainingError,
    VectorIndexError,
};
pub use features::{build_features, FeatureMatrix};
pub use interaction_matrix::InteractionMatrix;
pub use matrix_factorization::{AlsScorer, LatentFactors, SvdScorer};
pub use observability::init_logging;
pub use recommendation::{HybridCombiner, HybridResult, WeightedHybrid};
pub use scorer::{MethodWeights, Scorer, ScorerKind, ScorerRegistry, ScoringMethod, UserState};
pub use similarity::SimilarityMatrix;
pub use source::{InMemoryDataSource, PostgresDataSource, TrainingDataSource};
pub use switching::{RecommendationMode, SwitchingHybrid};
pub use types::*;
pub use vector_index::{InMemoryVectorIndex, QdrantVectorIndex, VectorIndex};

#[cfg(test)]
mod tests;
