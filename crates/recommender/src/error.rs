use crate::scorer::ScorerKind;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, RecommendationError>;

/// Failure of a single scoring strategy. Never crosses the engine boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScorerError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(Uuid),

    #[error("Scorer not trained")]
    NotTrained,

    #[error("Numerical error: {0}")]
    Numerical(String),
}

impl ScorerError {
    pub fn insufficient(msg: impl Into<String>) -> Self {
        ScorerError::InsufficientData(msg.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("All scorers failed to train: {}", describe_failures(.0))]
    AllScorersFailed(Vec<(ScorerKind, ScorerError)>),

    #[error("Training data source error: {0}")]
    Source(#[from] DataSourceError),

    #[error("Training task failed: {0}")]
    TaskFailed(String),
}

fn describe_failures(failures: &[(ScorerKind, ScorerError)]) -> String {
    failures
        .iter()
        .map(|(kind, err)| format!("{kind}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum RecommendationError {
    #[error("Invalid context: {0}")]
    InvalidContext(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for RecommendationError {
    fn from(err: tokio::task::JoinError) -> Self {
        RecommendationError::Internal(format!("scoring task failed: {err}"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Decode error: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum VectorIndexError {
    #[error("Qdrant error: {0}")]
    Qdrant(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
