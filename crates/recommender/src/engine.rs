//! Recommendation engine
//!
//! Owns the current trained state and serves every public operation from it.
//! Training builds a complete new state off the async runtime and swaps it in
//! atomically; readers keep whatever state they cloned when their request began.

use crate::cache::RecommendationCache;
use crate::catalog::{ItemCatalog, UserHistory};
use crate::collaborative::{ItemCollaborativeScorer, UserCollaborativeScorer};
use crate::config::{EngineConfig, FactorizationVariant, HybridStrategy};
use crate::content_based::ContentScorer;
use crate::error::{ConfigError, RecommendationError, ScorerError, TrainingError};
use crate::features::{build_features, FeatureMatrix};
use crate::matrix_factorization::{AlsScorer, SvdScorer};
use crate::recommendation::{HybridCombiner, WeightedHybrid};
use crate::scorer::{Scorer, ScorerKind, ScorerRegistry, TrainingData};
use crate::similarity::SimilarityMatrix;
use crate::source::{load_snapshot, TrainingDataSource};
use crate::switching::SwitchingHybrid;
use crate::types::{
    Explanation, InteractionRecord, RatingRecord, RecommendationContext, RecommendationItem,
    TrainingSnapshot,
};
use crate::vector_index::{IndexedItem, QdrantVectorIndex, VectorIndex};
use anyhow::Context;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Lookup order for item-to-item similarity
const SIMILARITY_ORDER: [ScorerKind; 5] = [
    ScorerKind::Content,
    ScorerKind::ItemCollaborative,
    ScorerKind::UserCollaborative,
    ScorerKind::Svd,
    ScorerKind::ImplicitAls,
];

/// Outcome of one training run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    /// Per-engine training counter, 1 for the first run
    pub model_version: u64,
    /// Unique for every training run, across processes; scopes cached lists
    pub model_id: Uuid,
    pub tenant_id: Uuid,
    pub trained: Vec<ScorerKind>,
    /// Scorers skipped for this run and why
    pub degraded: Vec<(ScorerKind, String)>,
    pub num_items: usize,
    pub num_interactions: usize,
    pub num_ratings: usize,
    pub duration: Duration,
}

/// Everything derived from one snapshot; never mutated after construction
struct TrainedState {
    report: TrainingReport,
    registry: ScorerRegistry,
    combiner: Arc<dyn HybridCombiner>,
    features: Option<Arc<FeatureMatrix>>,
    catalog: Arc<ItemCatalog>,
}

fn train_scorer<S: Scorer + 'static>(
    kind: ScorerKind,
    data: &TrainingData<'_>,
    config: &EngineConfig,
    registry: &mut ScorerRegistry,
    failures: &mut Vec<(ScorerKind, ScorerError)>,
) {
    let started = Instant::now();
    match S::train(data, config) {
        Ok(scorer) => {
            info!(
                scorer = kind.as_str(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Scorer trained"
            );
            registry.register(Arc::new(scorer));
        }
        Err(e) => {
            warn!(scorer = kind.as_str(), error = %e, "Scorer degraded, skipping");
            failures.push((kind, e));
        }
    }
}

/// CPU-bound part of training
fn build_state(
    snapshot: TrainingSnapshot,
    config: &EngineConfig,
    model_version: u64,
    model_id: Uuid,
) -> Result<TrainedState, TrainingError> {
    let started = Instant::now();

    let catalog = Arc::new(ItemCatalog::new(&snapshot.items));
    let history = Arc::new(UserHistory::from_snapshot(&snapshot));
    let features = build_features(&snapshot.items, &config.features).map(Arc::new);
    if let Err(e) = &features {
        warn!(error = %e, "Feature extraction failed, content scoring disabled");
    }

    let data = TrainingData {
        snapshot: &snapshot,
        catalog: Arc::clone(&catalog),
        history: Arc::clone(&history),
        features: features.clone(),
    };

    let mut registry = ScorerRegistry::new();
    let mut failures = Vec::new();

    train_scorer::<UserCollaborativeScorer>(
        ScorerKind::UserCollaborative,
        &data,
        config,
        &mut registry,
        &mut failures,
    );
    train_scorer::<ItemCollaborativeScorer>(
        ScorerKind::ItemCollaborative,
        &data,
        config,
        &mut registry,
        &mut failures,
    );
    train_scorer::<ContentScorer>(
        ScorerKind::Content,
        &data,
        config,
        &mut registry,
        &mut failures,
    );
    match config.hybrid.matrix_factorization {
        FactorizationVariant::Explicit => train_scorer::<SvdScorer>(
            ScorerKind::Svd,
            &data,
            config,
            &mut registry,
            &mut failures,
        ),
        FactorizationVariant::Implicit => train_scorer::<AlsScorer>(
            ScorerKind::ImplicitAls,
            &data,
            config,
            &mut registry,
            &mut failures,
        ),
    }

    if registry.is_empty() {
        return Err(TrainingError::AllScorersFailed(failures));
    }

    let combiner: Arc<dyn HybridCombiner> = match config.hybrid.strategy {
        HybridStrategy::Weighted => Arc::new(WeightedHybrid::new(
            registry.clone(),
            Arc::clone(&catalog),
            config.hybrid.clone(),
        )),
        HybridStrategy::Switching => Arc::new(SwitchingHybrid::new(
            registry.clone(),
            Arc::clone(&catalog),
            Arc::clone(&history),
            config.hybrid.clone(),
        )),
    };

    let report = TrainingReport {
        model_version,
        model_id,
        tenant_id: snapshot.tenant_id,
        trained: registry.kinds(),
        degraded: failures
            .into_iter()
            .map(|(kind, e)| (kind, e.to_string()))
            .collect(),
        num_items: catalog.len(),
        num_interactions: snapshot.interactions.len(),
        num_ratings: snapshot.ratings.len(),
        duration: started.elapsed(),
    };

    Ok(TrainedState {
        report,
        registry,
        combiner,
        features: features.ok(),
        catalog,
    })
}

/// Hybrid recommendation engine for one tenant
pub struct RecommendationEngine {
    config: EngineConfig,
    state: RwLock<Option<Arc<TrainedState>>>,
    /// Serializes training runs
    train_lock: Mutex<()>,
    version: AtomicU64,
    cache: Option<Arc<RecommendationCache>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
}

impl RecommendationEngine {
    /// Engine with an in-process cache when caching is enabled and no vector index
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let cache = config.cache.enabled.then(|| {
            Arc::new(RecommendationCache::new(
                Arc::new(crate::cache::InMemoryCache::new()),
                config.cache.clone(),
            ))
        });

        Ok(Self {
            config,
            state: RwLock::new(None),
            train_lock: Mutex::new(()),
            version: AtomicU64::new(0),
            cache,
            vector_index: None,
        })
    }

    /// Engine wired to the Redis cache and Qdrant index named in `config`
    ///
    /// An unreachable Redis falls back to the in-process cache.
    pub async fn connect(config: EngineConfig) -> anyhow::Result<Self> {
        let mut engine = Self::new(config.clone()).context("Invalid engine configuration")?;

        if config.cache.enabled && config.cache.redis_url.is_some() {
            match RecommendationCache::connect(&config.cache).await {
                Ok(cache) => engine.cache = Some(Arc::new(cache)),
                Err(e) => warn!(error = %e, "Redis unavailable, using in-process cache"),
            }
        }

        if let Some(url) = &config.vector.qdrant_url {
            let index = QdrantVectorIndex::new(url, config.vector.collection_name.clone())
                .context("Failed to create Qdrant client")?;
            engine.vector_index = Some(Arc::new(index));
        }

        Ok(engine)
    }

    pub fn with_cache(mut self, cache: Arc<RecommendationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Request context with the configured default list length
    pub fn context(&self, user_id: Uuid, tenant_id: Uuid) -> RecommendationContext {
        self.config.context(user_id, tenant_id)
    }

    async fn current(&self) -> Option<Arc<TrainedState>> {
        self.state.read().await.clone()
    }

    pub async fn is_trained(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// Version of the serving model, 0 before the first training
    pub async fn model_version(&self) -> u64 {
        self.current()
            .await
            .map_or(0, |state| state.report.model_version)
    }

    pub async fn training_report(&self) -> Option<TrainingReport> {
        self.current().await.map(|state| state.report.clone())
    }

    /// Train every scorer on `snapshot` and swap in the result
    ///
    /// Steps:
    /// 1. Serialize against other training runs
    /// 2. Build the new state on the blocking pool
    /// 3. Swap it in, leaving in-flight readers on the previous state
    /// 4. Publish similarity matrices and feature vectors
    #[instrument(skip(self, snapshot), fields(tenant_id = %snapshot.tenant_id))]
    pub async fn train(&self, snapshot: TrainingSnapshot) -> Result<TrainingReport, TrainingError> {
        let _guard = self.train_lock.lock().await;

        let config = self.config.clone();
        let model_version = self.version.load(Ordering::SeqCst) + 1;
        let model_id = Uuid::new_v4();

        let state = tokio::task::spawn_blocking(move || {
            build_state(snapshot, &config, model_version, model_id)
        })
        .await
        .map_err(|e| TrainingError::TaskFailed(e.to_string()))??;

        self.version.store(model_version, Ordering::SeqCst);
        let report = state.report.clone();
        let state = Arc::new(state);
        let previous = self.state.write().await.replace(Arc::clone(&state));

        info!(
            model_version,
            model_id = %model_id,
            trained = ?report.trained,
            degraded = report.degraded.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Training complete"
        );

        self.publish(&state).await;
        if let (Some(cache), Some(previous)) = (&self.cache, previous) {
            cache.retire_model(previous.report.model_id).await;
        }
        Ok(report)
    }

    /// Fetch a snapshot from `source` and train on it
    pub async fn train_from_source(
        &self,
        source: &dyn TrainingDataSource,
        tenant_id: Uuid,
    ) -> Result<TrainingReport, TrainingError> {
        let snapshot = load_snapshot(source, tenant_id).await?;
        self.train(snapshot).await
    }

    async fn publish(&self, state: &TrainedState) {
        if let Some(cache) = &self.cache {
            for scorer in state.registry.iter() {
                if let Some(matrix) = scorer.similarity_matrix() {
                    cache
                        .put_similarity(state.report.tenant_id, scorer.kind(), matrix)
                        .await;
                }
            }
        }

        if let (Some(index), Some(features)) = (&self.vector_index, &state.features) {
            let items = IndexedItem::from_features(features, &state.catalog);
            if let Err(e) = index.rebuild(items).await {
                warn!(error = %e, "Vector index rebuild failed, using in-process similarity");
            }
        }
    }

    /// Ranked recommendations for `ctx`
    ///
    /// Served from cache when an identical request was answered by the current
    /// model within the TTL. Before the first training this returns an empty list.
    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id, tenant_id = %ctx.tenant_id))]
    pub async fn recommend(
        &self,
        ctx: &RecommendationContext,
    ) -> Result<Vec<RecommendationItem>, RecommendationError> {
        if !ctx.min_score.is_finite() {
            return Err(RecommendationError::InvalidContext(
                "min_score must be finite".to_string(),
            ));
        }

        let mut ctx = ctx.clone();
        ctx.num_recommendations = self.config.clamp_num_recommendations(ctx.num_recommendations);
        if ctx.num_recommendations == 0 {
            return Ok(Vec::new());
        }

        let Some(state) = self.current().await else {
            debug!("Engine not trained yet");
            return Ok(Vec::new());
        };

        if ctx.tenant_id != state.report.tenant_id {
            return Err(RecommendationError::InvalidContext(format!(
                "engine is trained for tenant {}",
                state.report.tenant_id
            )));
        }

        let key = match &self.cache {
            Some(cache) => match cache.recommendation_key(
                &ctx,
                state.combiner.strategy(),
                state.report.model_id,
            ) {
                Ok(key) => Some((cache, key)),
                Err(e) => {
                    warn!(error = %e, "Cache key generation failed");
                    None
                }
            },
            None => None,
        };

        if let Some((cache, key)) = &key {
            if let Some(items) = cache.get_recommendations(key).await {
                return Ok(items);
            }
        }

        let result = state.combiner.recommend(&ctx).await;

        if let Some((cache, key)) = &key {
            if !result.all_failed {
                cache.put_recommendations(&ctx, key, &result.items).await;
            }
        }

        Ok(result.items)
    }

    /// Up to `top_k` items most similar to `item_id`, never including it
    #[instrument(skip(self))]
    pub async fn get_item_similarity(
        &self,
        item_id: Uuid,
        top_k: usize,
    ) -> Result<Vec<(Uuid, f32)>, RecommendationError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let Some(state) = self.current().await else {
            return Ok(Vec::new());
        };

        if let (Some(index), Some(features)) = (&self.vector_index, &state.features) {
            if let Some(query) = features.row(&item_id) {
                match index.search(&query.to_vec(), top_k + 1, None).await {
                    Ok(hits) => {
                        let mut similar: Vec<(Uuid, f32)> = hits
                            .into_iter()
                            .filter(|(id, score)| *id != item_id && *score > 0.0)
                            .collect();
                        similar.truncate(top_k);
                        return Ok(similar);
                    }
                    Err(e) => warn!(error = %e, "Vector search failed, using in-process similarity"),
                }
            }
        }

        let similar = tokio::task::spawn_blocking(move || {
            for kind in SIMILARITY_ORDER {
                let Some(scorer) = state.registry.get(kind) else {
                    continue;
                };
                match scorer.item_similarity(&item_id, top_k) {
                    Ok(similar) => return similar,
                    Err(e) => debug!(scorer = kind.as_str(), error = %e, "No similarity"),
                }
            }
            Vec::new()
        })
        .await?;

        Ok(similar)
    }

    /// Why `item_id` would be recommended to `user_id`
    #[instrument(skip(self))]
    pub async fn explain_recommendation(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<Explanation, RecommendationError> {
        let Some(state) = self.current().await else {
            return Ok(Explanation::insufficient_data(self.config.hybrid.strategy.as_str()));
        };

        let combiner = Arc::clone(&state.combiner);
        let explanation =
            tokio::task::spawn_blocking(move || combiner.explain(&user_id, &item_id)).await?;
        Ok(explanation)
    }

    /// Pairwise cosine similarities kept by `kind`, read through the cache
    pub async fn similarity_matrix(&self, kind: ScorerKind) -> Option<SimilarityMatrix> {
        let state = self.current().await?;
        let tenant_id = state.report.tenant_id;

        if let Some(cache) = &self.cache {
            if let Some(matrix) = cache.get_similarity(tenant_id, kind).await {
                return Some(matrix);
            }
        }

        let matrix = state.registry.get(kind)?.similarity_matrix()?.clone();

        if let Some(cache) = &self.cache {
            cache.put_similarity(tenant_id, kind, &matrix).await;
        }
        Some(matrix)
    }

    /// Drop cached lists of a user after they interacted with something
    pub async fn notify_interaction(&self, tenant_id: Uuid, interaction: &InteractionRecord) {
        self.invalidate_user(tenant_id, interaction.user_id).await;
    }

    /// Drop cached lists of a user after they rated something
    pub async fn notify_rating(&self, tenant_id: Uuid, rating: &RatingRecord) {
        self.invalidate_user(tenant_id, rating.user_id).await;
    }

    pub async fn invalidate_user(&self, tenant_id: Uuid, user_id: Uuid) {
        if let Some(cache) = &self.cache {
            cache.invalidate_user(tenant_id, user_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{id, scenario_snapshot};

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.collaborative.min_interactions = 1;
        config.svd.factors = 8;
        config
    }

    #[tokio::test]
    async fn test_untrained_engine_is_empty() {
        let engine = RecommendationEngine::new(EngineConfig::default()).unwrap();

        assert!(!engine.is_trained().await);
        assert_eq!(engine.model_version().await, 0);
        let recs = engine
            .recommend(&RecommendationContext::new(id(1), id(0)))
            .await
            .unwrap();
        assert!(recs.is_empty());
        assert!(engine.get_item_similarity(id(11), 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_training_report() {
        let engine = RecommendationEngine::new(test_config()).unwrap();
        let report = engine.train(scenario_snapshot()).await.unwrap();

        assert_eq!(report.model_version, 1);
        assert_eq!(report.num_items, 5);
        assert_eq!(report.num_interactions, 6);
        assert!(report.trained.contains(&ScorerKind::UserCollaborative));
        assert!(report.trained.contains(&ScorerKind::Svd));
        assert!(!report.trained.contains(&ScorerKind::ImplicitAls));

        let again = engine.train(scenario_snapshot()).await.unwrap();
        assert_eq!(again.model_version, 2);
        assert_eq!(engine.model_version().await, 2);
        assert_ne!(again.model_id, report.model_id);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.collaborative.k_neighbors = 0;
        assert!(matches!(
            RecommendationEngine::new(config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_context_uses_configured_default() {
        let mut config = test_config();
        config.limits.default_num_recommendations = 1;
        let engine = RecommendationEngine::new(config).unwrap();
        engine.train(scenario_snapshot()).await.unwrap();

        let ctx = engine.context(id(99), id(0));
        assert_eq!(ctx.num_recommendations, 1);
        assert_eq!(engine.recommend(&ctx).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_default_thresholds_degrade_collaborative() {
        let engine = RecommendationEngine::new(EngineConfig::default()).unwrap();
        let report = engine.train(scenario_snapshot()).await.unwrap();

        assert!(report
            .degraded
            .iter()
            .any(|(kind, _)| *kind == ScorerKind::UserCollaborative));
        assert!(report.trained.contains(&ScorerKind::Content));
    }

    #[tokio::test]
    async fn test_empty_snapshot_fails_training() {
        let engine = RecommendationEngine::new(EngineConfig::default()).unwrap();
        let err = engine
            .train(TrainingSnapshot::new(id(0), vec![], vec![], vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, TrainingError::AllScorersFailed(_)));
        assert!(!engine.is_trained().await);
    }

    #[tokio::test]
    async fn test_wrong_tenant_is_rejected() {
        let engine = RecommendationEngine::new(test_config()).unwrap();
        engine.train(scenario_snapshot()).await.unwrap();

        let err = engine
            .recommend(&RecommendationContext::new(id(1), id(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, RecommendationError::InvalidContext(_)));
    }

    #[tokio::test]
    async fn test_similarity_matrix_read_through() {
        let engine = RecommendationEngine::new(test_config()).unwrap();
        engine.train(scenario_snapshot()).await.unwrap();

        let matrix = engine
            .similarity_matrix(ScorerKind::ItemCollaborative)
            .await
            .unwrap();
        assert_eq!(matrix.len(), 4);
        assert!(engine.similarity_matrix(ScorerKind::Content).await.is_none());
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        let mut config = test_config();
        config.limits.max_num_recommendations = 2;
        config.limits.default_num_recommendations = 2;
        let engine = RecommendationEngine::new(config).unwrap();
        engine.train(scenario_snapshot()).await.unwrap();

        let recs = engine
            .recommend(&RecommendationContext::new(id(99), id(0)).with_limit(50))
            .await
            .unwrap();
        assert!(recs.len() <= 2);
        assert!(!recs.is_empty());
    }
}
