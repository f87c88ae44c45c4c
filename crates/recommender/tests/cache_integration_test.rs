//! Read-through caching as seen from the engine

mod common;

use async_trait::async_trait;
use common::{id, snapshot, snapshot_with, TENANT};
use hybrid_recommender::{
    CacheBackend, CacheError, EngineConfig, InMemoryCache, InteractionRecord, InteractionType,
    RecommendationCache, RecommendationContext, RecommendationEngine, TrainingSnapshot,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory backend counting recommendation list writes
#[derive(Default)]
struct CountingBackend {
    inner: InMemoryCache,
    list_writes: AtomicUsize,
}

impl CountingBackend {
    fn list_writes(&self) -> usize {
        self.list_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheBackend for CountingBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        if key.contains(":recs:") {
            self.list_writes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.inner.delete(keys).await
    }
}

struct DownBackend;

#[async_trait]
impl CacheBackend for DownBackend {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _keys: &[String]) -> Result<u64, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

async fn engine_with(backend: Arc<dyn CacheBackend>) -> RecommendationEngine {
    engine_trained_on(backend, snapshot()).await
}

/// Engine with its own cache front over `backend`, as a separate process would have
async fn engine_trained_on(
    backend: Arc<dyn CacheBackend>,
    snapshot: TrainingSnapshot,
) -> RecommendationEngine {
    let mut config = EngineConfig::default();
    config.collaborative.min_interactions = 1;
    let cache = Arc::new(RecommendationCache::new(backend, config.cache.clone()));
    let engine = RecommendationEngine::new(config).unwrap().with_cache(cache);
    engine.train(snapshot).await.unwrap();
    engine
}

#[tokio::test]
async fn test_second_call_is_served_from_cache() {
    let backend = Arc::new(CountingBackend::default());
    let engine = engine_with(backend.clone()).await;
    let ctx = RecommendationContext::new(id(1), id(TENANT)).with_limit(2);

    let first = engine.recommend(&ctx).await.unwrap();
    let second = engine.recommend(&ctx).await.unwrap();

    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
    assert_eq!(backend.list_writes(), 1);
}

#[tokio::test]
async fn test_different_parameters_use_different_entries() {
    let backend = Arc::new(CountingBackend::default());
    let engine = engine_with(backend.clone()).await;
    let ctx = RecommendationContext::new(id(1), id(TENANT));

    engine.recommend(&ctx).await.unwrap();
    engine.recommend(&ctx.clone().with_limit(3)).await.unwrap();
    engine
        .recommend(&ctx.clone().excluding_categories(["cooking"]))
        .await
        .unwrap();

    assert_eq!(backend.list_writes(), 3);
}

#[tokio::test]
async fn test_interaction_invalidates_user_lists() {
    let backend = Arc::new(CountingBackend::default());
    let engine = engine_with(backend.clone()).await;
    let ctx = RecommendationContext::new(id(1), id(TENANT));
    let other = RecommendationContext::new(id(2), id(TENANT));

    engine.recommend(&ctx).await.unwrap();
    engine.recommend(&other).await.unwrap();
    assert_eq!(backend.list_writes(), 2);

    engine
        .notify_interaction(
            id(TENANT),
            &InteractionRecord::new(id(1), id(15), InteractionType::Click),
        )
        .await;

    engine.recommend(&ctx).await.unwrap();
    engine.recommend(&other).await.unwrap();
    assert_eq!(backend.list_writes(), 3);
}

#[tokio::test]
async fn test_retraining_bypasses_previous_lists() {
    let backend = Arc::new(CountingBackend::default());
    let engine = engine_with(backend.clone()).await;
    let ctx = RecommendationContext::new(id(1), id(TENANT));

    engine.recommend(&ctx).await.unwrap();
    engine.train(snapshot()).await.unwrap();
    engine.recommend(&ctx).await.unwrap();

    assert_eq!(backend.list_writes(), 2);
}

#[tokio::test]
async fn test_unavailable_cache_does_not_fail_requests() {
    let engine = engine_with(Arc::new(DownBackend)).await;
    let ctx = RecommendationContext::new(id(1), id(TENANT)).with_limit(2);

    let recs = engine.recommend(&ctx).await.unwrap();
    assert!(!recs.is_empty());
    engine.invalidate_user(id(TENANT), id(1)).await;
}

#[tokio::test]
async fn test_engines_sharing_a_backend_never_serve_each_others_lists() {
    let backend = Arc::new(CountingBackend::default());
    let ctx = RecommendationContext::new(id(1), id(TENANT)).with_limit(2);

    let first = engine_trained_on(backend.clone(), snapshot()).await;
    let first_recs = first.recommend(&ctx).await.unwrap();
    assert!(first_recs.iter().any(|r| r.item_id == id(13)));

    // Same counter value, newer data: u1 has now rated i3 and i4
    let second = engine_trained_on(backend.clone(), snapshot_with(&[(1, 13, 5.0), (1, 14, 4.0)])).await;
    assert_eq!(second.model_version().await, first.model_version().await);

    let second_recs = second.recommend(&ctx).await.unwrap();
    assert_eq!(backend.list_writes(), 2);
    for rec in &second_recs {
        assert!(![id(11), id(12), id(13), id(14)].contains(&rec.item_id));
    }
}

#[tokio::test]
async fn test_retraining_keeps_cache_size_bounded() {
    let backend = Arc::new(InMemoryCache::new());
    let engine = engine_with(backend.clone()).await;
    let limits = [1, 2, 3, 4];

    let mut sizes = Vec::new();
    for _ in 0..5 {
        for limit in limits {
            let ctx = RecommendationContext::new(id(1), id(TENANT)).with_limit(limit);
            engine.recommend(&ctx).await.unwrap();
        }
        sizes.push(backend.len());
        engine.train(snapshot()).await.unwrap();
    }

    // Each round holds the similarity entries plus this model's four lists
    assert!(sizes.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(backend.len(), sizes[0] - limits.len());
}
