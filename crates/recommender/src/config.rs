use crate::error::ConfigError;
use crate::scorer::MethodWeights;
use crate::types::{RecommendationContext, DEFAULT_NUM_RECOMMENDATIONS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Hybrid recommender configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Neighborhood collaborative filtering
    pub collaborative: CollaborativeConfig,

    /// Explicit-feedback matrix factorization
    pub svd: SvdConfig,

    /// Implicit-feedback matrix factorization
    pub als: AlsConfig,

    /// Item feature extraction
    pub features: FeatureConfig,

    /// Score combination
    pub hybrid: HybridConfig,

    /// Result and similarity caching
    pub cache: CacheConfig,

    /// Optional external vector index
    pub vector: VectorConfig,

    /// Request limits
    pub limits: LimitsConfig,

    /// Log output
    pub logging: LogConfig,

    /// Seed for every randomized initialization
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CollaborativeConfig {
    /// Neighbors consulted per user or item (default: 50)
    pub k_neighbors: usize,

    /// Minimum observations per user and per item to enter the matrix (default: 5)
    pub min_interactions: usize,
}

impl Default for CollaborativeConfig {
    fn default() -> Self {
        Self {
            k_neighbors: 50,
            min_interactions: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SvdConfig {
    /// Latent factor width (default: 100)
    pub factors: usize,

    /// SGD passes over the observed ratings (default: 20)
    pub epochs: usize,

    pub learning_rate: f32,

    pub regularization: f32,
}

impl Default for SvdConfig {
    fn default() -> Self {
        Self {
            factors: 100,
            epochs: 20,
            learning_rate: 0.005,
            regularization: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlsConfig {
    /// Latent factor width (default: 100)
    pub factors: usize,

    /// Alternating passes (default: 50)
    pub iterations: usize,

    pub regularization: f32,

    /// Confidence scaling, c = 1 + alpha * value
    pub alpha: f32,
}

impl Default for AlsConfig {
    fn default() -> Self {
        Self {
            factors: 100,
            iterations: 50,
            regularization: 0.01,
            alpha: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericNormalization {
    ZScore,
    MinMax,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Block weight for TF-IDF columns (default: 0.6)
    pub text_weight: f32,

    /// Block weight for one-hot category columns (default: 0.3)
    pub categorical_weight: f32,

    /// Block weight for numeric columns (default: 0.1)
    pub numeric_weight: f32,

    /// Vocabulary cap (default: 5000)
    pub max_features: usize,

    /// Terms in fewer documents are dropped (default: 2)
    pub min_df: usize,

    /// Terms in a larger fraction of documents are dropped (default: 0.95)
    pub max_df: f32,

    pub ngram_min: usize,

    pub ngram_max: usize,

    /// Numeric block width, popularity included (default: 10)
    pub numeric_width: usize,

    pub normalization: NumericNormalization,

    /// Drop common English words before counting terms
    pub stop_words: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            text_weight: 0.6,
            categorical_weight: 0.3,
            numeric_weight: 0.1,
            max_features: 5000,
            min_df: 2,
            max_df: 0.95,
            ngram_min: 1,
            ngram_max: 2,
            numeric_width: 10,
            normalization: NumericNormalization::ZScore,
            stop_words: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HybridStrategy {
    Weighted,
    Switching,
}

impl HybridStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HybridStrategy::Weighted => "weighted",
            HybridStrategy::Switching => "switching",
        }
    }
}

/// Which factorization model fills the matrix factorization slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorizationVariant {
    Explicit,
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HybridConfig {
    pub strategy: HybridStrategy,

    /// Base weights before per-user adaptation (default: 0.4 / 0.3 / 0.3)
    pub weights: MethodWeights,

    /// Zero the weight of methods that know nothing about the user
    pub adaptive_weights: bool,

    /// Same-category cap when diversifying (default: 3)
    pub max_per_category: usize,

    /// Interactions needed before the switching strategy trusts collaborative filtering
    pub min_interactions_for_collaborative: usize,

    /// Sub-scorers are asked for this many times the requested count
    pub candidate_pool_factor: usize,

    pub matrix_factorization: FactorizationVariant,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            strategy: HybridStrategy::Weighted,
            weights: MethodWeights::default(),
            adaptive_weights: true,
            max_per_category: 3,
            min_interactions_for_collaborative: 10,
            candidate_pool_factor: 3,
            matrix_factorization: FactorizationVariant::Explicit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Redis connection URL; in-process cache when absent
    pub redis_url: Option<String>,

    /// Cache TTL for similarity matrices (seconds)
    pub similarity_ttl_sec: u64,

    /// Cache TTL for recommendation lists (seconds)
    pub recommendation_ttl_sec: u64,

    /// Namespace for every key written by the engine
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: None,
            similarity_ttl_sec: 86400,   // 24 hours
            recommendation_ttl_sec: 1800, // 30 minutes
            key_prefix: "recommender".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn similarity_ttl(&self) -> Duration {
        Duration::from_secs(self.similarity_ttl_sec)
    }

    pub fn recommendation_ttl(&self) -> Duration {
        Duration::from_secs(self.recommendation_ttl_sec)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Qdrant server URL; item similarity stays in-process when absent
    pub qdrant_url: Option<String>,

    pub collection_name: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            qdrant_url: None,
            collection_name: "item_features".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub default_num_recommendations: usize,

    /// Larger requests are clamped to this
    pub max_num_recommendations: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_num_recommendations: DEFAULT_NUM_RECOMMENDATIONS,
            max_num_recommendations: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,

    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            collaborative: CollaborativeConfig::default(),
            svd: SvdConfig::default(),
            als: AlsConfig::default(),
            features: FeatureConfig::default(),
            hybrid: HybridConfig::default(),
            cache: CacheConfig::default(),
            vector: VectorConfig::default(),
            limits: LimitsConfig::default(),
            logging: LogConfig::default(),
            seed: 42,
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, `config/recommender.*` and the environment
    ///
    /// Environment keys use the `RECOMMENDER__SECTION__KEY` form.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?)
            .add_source(config::File::with_name("config/recommender").required(false))
            .add_source(
                config::Environment::with_prefix("RECOMMENDER")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(msg: &str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg.to_string()))
        }

        if self.collaborative.k_neighbors == 0 {
            return invalid("collaborative.k_neighbors must be positive");
        }
        if self.svd.factors == 0 || self.als.factors == 0 {
            return invalid("factor counts must be positive");
        }
        if self.svd.epochs == 0 || self.als.iterations == 0 {
            return invalid("epochs and iterations must be positive");
        }
        if !(self.svd.learning_rate > 0.0) {
            return invalid("svd.learning_rate must be positive");
        }
        if self.svd.regularization < 0.0 || self.als.regularization < 0.0 {
            return invalid("regularization must not be negative");
        }
        if self.als.alpha < 0.0 {
            return invalid("als.alpha must not be negative");
        }

        let f = &self.features;
        if f.text_weight < 0.0 || f.categorical_weight < 0.0 || f.numeric_weight < 0.0 {
            return invalid("feature block weights must not be negative");
        }
        if f.text_weight + f.categorical_weight + f.numeric_weight <= 0.0 {
            return invalid("feature block weights must not all be zero");
        }
        if !(f.max_df > 0.0 && f.max_df <= 1.0) {
            return invalid("features.max_df must be in (0, 1]");
        }
        if f.min_df == 0 || f.max_features == 0 || f.numeric_width == 0 {
            return invalid("features.min_df, max_features and numeric_width must be positive");
        }
        if f.ngram_min == 0 || f.ngram_min > f.ngram_max {
            return invalid("features n-gram range is empty");
        }

        let w = &self.hybrid.weights;
        if w.collaborative < 0.0 || w.content < 0.0 || w.matrix_factorization < 0.0 {
            return invalid("hybrid weights must not be negative");
        }
        if w.sum() <= 0.0 {
            return invalid("hybrid weights must not sum to zero");
        }
        if self.hybrid.max_per_category == 0 || self.hybrid.candidate_pool_factor == 0 {
            return invalid("hybrid.max_per_category and candidate_pool_factor must be positive");
        }

        if self.limits.max_num_recommendations == 0 || self.limits.default_num_recommendations == 0
        {
            return invalid("limits must be positive");
        }
        if self.limits.default_num_recommendations > self.limits.max_num_recommendations {
            return invalid("limits.default_num_recommendations exceeds the maximum");
        }

        Ok(())
    }

    /// Context for `user_id` asking for the default list length
    pub fn context(&self, user_id: Uuid, tenant_id: Uuid) -> RecommendationContext {
        RecommendationContext::new(user_id, tenant_id)
            .with_limit(self.limits.default_num_recommendations)
    }

    /// Requested list length after applying limits
    pub fn clamp_num_recommendations(&self, requested: usize) -> usize {
        requested.min(self.limits.max_num_recommendations)
    }
}
