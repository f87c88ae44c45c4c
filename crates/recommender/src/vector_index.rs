//! Nearest-neighbor lookup over item feature vectors
//!
//! The engine pushes the content feature rows after each training run and asks the
//! index for item-to-item similarity before falling back to in-process scorers.

use crate::catalog::ItemCatalog;
use crate::error::VectorIndexError;
use crate::features::FeatureMatrix;
use crate::similarity::{cosine_slices, top_k};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, Condition, CreateCollectionBuilder, DeleteCollectionBuilder,
    Distance, Filter, PointStruct, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const UPSERT_BATCH: usize = 256;

/// One indexed item
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedItem {
    pub item_id: Uuid,
    pub vector: Vec<f32>,
    pub category: Option<String>,
}

impl IndexedItem {
    /// Feature rows paired with catalog categories, in feature index order
    pub fn from_features(features: &FeatureMatrix, catalog: &ItemCatalog) -> Vec<Self> {
        features
            .items()
            .ids()
            .iter()
            .enumerate()
            .map(|(i, id)| IndexedItem {
                item_id: *id,
                vector: features.matrix().row(i).to_vec(),
                category: catalog.category_of(id).map(str::to_string),
            })
            .collect()
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace the whole index content
    async fn rebuild(&self, items: Vec<IndexedItem>) -> Result<(), VectorIndexError>;

    /// Up to `top_k` items by descending cosine similarity to `query`
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        category: Option<&str>,
    ) -> Result<Vec<(Uuid, f32)>, VectorIndexError>;
}

/// Brute-force in-process index
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    items: RwLock<Vec<IndexedItem>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn rebuild(&self, items: Vec<IndexedItem>) -> Result<(), VectorIndexError> {
        *self.items.write().await = items;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        category: Option<&str>,
    ) -> Result<Vec<(Uuid, f32)>, VectorIndexError> {
        let items = self.items.read().await;
        if let Some(first) = items.first() {
            if first.vector.len() != query.len() {
                return Err(VectorIndexError::DimensionMismatch {
                    expected: first.vector.len(),
                    actual: query.len(),
                });
            }
        }

        let scored = items
            .iter()
            .filter(|item| category.map_or(true, |c| item.category.as_deref() == Some(c)))
            .filter_map(|item| cosine_slices(query, &item.vector).map(|s| (item.item_id, s)))
            .collect();

        Ok(top_k(scored, k))
    }
}

/// Qdrant-backed index; the collection is dropped and recreated on rebuild
pub struct QdrantVectorIndex {
    client: Qdrant,
    collection_name: String,
}

impl QdrantVectorIndex {
    pub fn new(qdrant_url: &str, collection_name: impl Into<String>) -> Result<Self, VectorIndexError> {
        let client = Qdrant::from_url(qdrant_url)
            .build()
            .map_err(|e| VectorIndexError::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            collection_name: collection_name.into(),
        })
    }

    async fn recreate_collection(&self, dimension: usize) -> Result<(), VectorIndexError> {
        let exists = self
            .client
            .collection_exists(&self.collection_name)
            .await
            .map_err(|e| VectorIndexError::Qdrant(e.to_string()))?;

        if exists {
            self.client
                .delete_collection(DeleteCollectionBuilder::new(&self.collection_name))
                .await
                .map_err(|e| VectorIndexError::Qdrant(e.to_string()))?;
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name).vectors_config(
                    VectorParamsBuilder::new(dimension as u64, Distance::Cosine),
                ),
            )
            .await
            .map_err(|e| VectorIndexError::Qdrant(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    #[instrument(skip(self, items), fields(collection = %self.collection_name, count = items.len()))]
    async fn rebuild(&self, items: Vec<IndexedItem>) -> Result<(), VectorIndexError> {
        let Some(dimension) = items.first().map(|i| i.vector.len()) else {
            return Ok(());
        };
        self.recreate_collection(dimension).await?;

        let points: Vec<PointStruct> = items
            .into_iter()
            .map(|item| {
                let payload = serde_json::Map::from_iter([
                    ("item_id".to_string(), json!(item.item_id.to_string())),
                    ("category".to_string(), json!(item.category)),
                ]);
                PointStruct::new(item.item_id.to_string(), item.vector, payload)
            })
            .collect();

        for batch in points.chunks(UPSERT_BATCH) {
            self.client
                .upsert_points(
                    UpsertPointsBuilder::new(&self.collection_name, batch.to_vec()).wait(true),
                )
                .await
                .map_err(|e| VectorIndexError::Qdrant(e.to_string()))?;
        }

        info!(dimension, "Rebuilt item vector collection");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        category: Option<&str>,
    ) -> Result<Vec<(Uuid, f32)>, VectorIndexError> {
        let mut request =
            SearchPointsBuilder::new(&self.collection_name, query.to_vec(), k as u64);
        if let Some(category) = category {
            request = request.filter(Filter::must([Condition::matches(
                "category",
                category.to_string(),
            )]));
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| VectorIndexError::Qdrant(e.to_string()))?;

        let results: Vec<(Uuid, f32)> = response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = match point.id?.point_id_options? {
                    PointIdOptions::Uuid(s) => Uuid::parse_str(&s).ok()?,
                    PointIdOptions::Num(_) => return None,
                };
                Some((id, point.score))
            })
            .collect();

        debug!(count = results.len(), "Vector search completed");
        Ok(top_k(results, k))
    }
}
