//! Training data providers
//!
//! The engine never writes to these stores; it reads one consistent snapshot per
//! training run.

use crate::error::DataSourceError;
use crate::types::{InteractionRecord, InteractionType, ItemRecord, RatingRecord, TrainingSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

#[async_trait]
pub trait TrainingDataSource: Send + Sync {
    /// Interaction log in chronological order
    async fn fetch_interactions(&self, tenant_id: Uuid)
        -> Result<Vec<InteractionRecord>, DataSourceError>;

    /// Ratings, oldest first so later entries win
    async fn fetch_ratings(&self, tenant_id: Uuid) -> Result<Vec<RatingRecord>, DataSourceError>;

    /// Active catalog items
    async fn fetch_items(&self, tenant_id: Uuid) -> Result<Vec<ItemRecord>, DataSourceError>;
}

/// Read the three collections concurrently
pub async fn load_snapshot(
    source: &dyn TrainingDataSource,
    tenant_id: Uuid,
) -> Result<TrainingSnapshot, DataSourceError> {
    let (interactions, ratings, items) = tokio::try_join!(
        source.fetch_interactions(tenant_id),
        source.fetch_ratings(tenant_id),
        source.fetch_items(tenant_id),
    )?;

    tracing::info!(
        tenant_id = %tenant_id,
        interactions = interactions.len(),
        ratings = ratings.len(),
        items = items.len(),
        "Loaded training snapshot"
    );

    Ok(TrainingSnapshot::new(tenant_id, interactions, ratings, items))
}

/// Fixed snapshot, mostly for tests and offline jobs
#[derive(Debug, Clone)]
pub struct InMemoryDataSource {
    snapshot: TrainingSnapshot,
}

impl InMemoryDataSource {
    pub fn new(snapshot: TrainingSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl TrainingDataSource for InMemoryDataSource {
    async fn fetch_interactions(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<InteractionRecord>, DataSourceError> {
        if tenant_id != self.snapshot.tenant_id {
            return Ok(Vec::new());
        }
        Ok(self.snapshot.interactions.clone())
    }

    async fn fetch_ratings(&self, tenant_id: Uuid) -> Result<Vec<RatingRecord>, DataSourceError> {
        if tenant_id != self.snapshot.tenant_id {
            return Ok(Vec::new());
        }
        Ok(self.snapshot.ratings.clone())
    }

    async fn fetch_items(&self, tenant_id: Uuid) -> Result<Vec<ItemRecord>, DataSourceError> {
        if tenant_id != self.snapshot.tenant_id {
            return Ok(Vec::new());
        }
        Ok(self.snapshot.items.clone())
    }
}

/// PostgreSQL tables `interactions`, `ratings` and `items`, scoped by `tenant_id`
#[derive(Debug, Clone)]
pub struct PostgresDataSource {
    pool: PgPool,
}

impl PostgresDataSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, DataSourceError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    fn item_from_row(row: &PgRow) -> Result<ItemRecord, DataSourceError> {
        let tags: Option<serde_json::Value> = row.try_get("tags")?;
        let features: Option<serde_json::Value> = row.try_get("content_features")?;

        let tags: BTreeSet<String> = match tags {
            Some(serde_json::Value::Array(values)) => values
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => BTreeSet::new(),
        };

        // Non-numeric content features are left to the text pipeline
        let numeric_features: BTreeMap<String, f32> = match features {
            Some(serde_json::Value::Object(map)) => map
                .into_iter()
                .filter_map(|(k, v)| v.as_f64().map(|n| (k, n as f32)))
                .collect(),
            _ => BTreeMap::new(),
        };

        let description: Option<String> = row.try_get("description")?;
        let popularity: Option<f64> = row.try_get("popularity_score")?;

        Ok(ItemRecord {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: description.unwrap_or_default(),
            category: row.try_get("category")?,
            tags,
            numeric_features,
            popularity_score: popularity.unwrap_or(0.0) as f32,
        })
    }
}

#[async_trait]
impl TrainingDataSource for PostgresDataSource {
    async fn fetch_interactions(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<InteractionRecord>, DataSourceError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, item_id, interaction_type, interaction_value, created_at
            FROM interactions
            WHERE tenant_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<InteractionRecord, DataSourceError> {
                let raw_type: String = row.try_get("interaction_type")?;
                let interaction_type: InteractionType =
                    raw_type.parse().map_err(DataSourceError::Decode)?;
                let value: Option<f64> = row.try_get("interaction_value")?;
                let timestamp: DateTime<Utc> = row.try_get("created_at")?;

                Ok(InteractionRecord {
                    user_id: row.try_get("user_id")?,
                    item_id: row.try_get("item_id")?,
                    interaction_type,
                    value: value.map_or(interaction_type.default_weight(), |v| v as f32),
                    timestamp,
                })
            })
            .collect()
    }

    async fn fetch_ratings(&self, tenant_id: Uuid) -> Result<Vec<RatingRecord>, DataSourceError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, item_id, rating, review
            FROM ratings
            WHERE tenant_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<RatingRecord, DataSourceError> {
                let rating: f64 = row.try_get("rating")?;
                Ok(RatingRecord {
                    user_id: row.try_get("user_id")?,
                    item_id: row.try_get("item_id")?,
                    rating: rating as f32,
                    review: row.try_get("review")?,
                })
            })
            .collect()
    }

    async fn fetch_items(&self, tenant_id: Uuid) -> Result<Vec<ItemRecord>, DataSourceError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, description, category, tags, content_features, popularity_score
            FROM items
            WHERE tenant_id = $1 AND is_active = TRUE
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::item_from_row).collect()
    }
}
