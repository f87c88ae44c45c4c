//! Caching layer for recommendation lists and similarity matrices
//!
//! Values are stored as JSON bytes behind a [`CacheBackend`]: Redis when a URL is
//! configured, an in-process map otherwise. Cache failures never fail a request;
//! they are logged and treated as misses.

use crate::config::{CacheConfig, HybridStrategy};
use crate::error::CacheError;
use crate::scorer::ScorerKind;
use crate::similarity::SimilarityMatrix;
use crate::types::{RecommendationContext, RecommendationItem};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const PREFIX_RECOMMENDATIONS: &str = "recs";
const PREFIX_SIMILARITY: &str = "similarity";
const SIMILARITY_ALGORITHM: &str = "cosine";
/// Writes between sweeps of expired in-process entries
const SWEEP_EVERY: u64 = 128;

/// Byte-level key/value store with per-entry TTL
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;
}

/// Redis backend with a multiplexed connection manager
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    #[instrument(skip(redis_url))]
    pub async fn new(redis_url: &str) -> Result<Self, CacheError> {
        info!("Initializing Redis cache connection");

        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        // Test connection
        let mut conn = manager.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;

        info!("Redis cache initialized successfully");
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let count: u64 = conn.del(keys).await?;
        Ok(count)
    }
}

/// In-process backend; expired entries are dropped on read and swept every
/// `SWEEP_EVERY` writes
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, (Vec<u8>, Instant)>,
    writes: AtomicU64,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.1 > now {
                return Ok(Some(entry.0.clone()));
            }
        }
        self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));

        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!(purged, "Swept expired cache entries");
            }
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        Ok(keys
            .iter()
            .filter(|k| self.entries.remove(k.as_str()).is_some())
            .count() as u64)
    }
}

/// Request parameters that change the list but are not spelled out in the key
#[derive(Serialize)]
struct KeyParams<'a> {
    exclude_items: &'a BTreeSet<Uuid>,
    include_categories: &'a BTreeSet<String>,
    exclude_categories: &'a BTreeSet<String>,
    min_score: f32,
    diversify: bool,
    explain: bool,
}

/// Typed cache used by the engine
pub struct RecommendationCache {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    /// Recommendation keys written per (tenant, user), for invalidation
    user_keys: DashMap<(Uuid, Uuid), HashSet<String>>,
}

impl RecommendationCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            user_keys: DashMap::new(),
        }
    }

    /// Redis when `redis_url` is set, in-process otherwise
    pub async fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        let backend: Arc<dyn CacheBackend> = match &config.redis_url {
            Some(url) => Arc::new(RedisCache::new(url).await?),
            None => Arc::new(InMemoryCache::new()),
        };
        Ok(Self::new(backend, config.clone()))
    }

    /// `{prefix}:recs:{tenant}:{user}:{strategy}:{num}:{params_hash}:m{model_id}`
    ///
    /// `model_id` is unique per training run, so engines sharing one backend never
    /// read each other's lists.
    pub fn recommendation_key(
        &self,
        ctx: &RecommendationContext,
        strategy: HybridStrategy,
        model_id: Uuid,
    ) -> Result<String, CacheError> {
        let params = KeyParams {
            exclude_items: &ctx.exclude_items,
            include_categories: &ctx.include_categories,
            exclude_categories: &ctx.exclude_categories,
            min_score: ctx.min_score,
            diversify: ctx.diversify,
            explain: ctx.explain,
        };
        let json = serde_json::to_string(&params)?;

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        let hash_hex = hex::encode(hasher.finalize());

        Ok(format!(
            "{}:{}:{}:{}:{}:{}:{}{}",
            self.config.key_prefix,
            PREFIX_RECOMMENDATIONS,
            ctx.tenant_id,
            ctx.user_id,
            strategy.as_str(),
            ctx.num_recommendations,
            hash_hex,
            model_suffix(model_id)
        ))
    }

    /// `{prefix}:similarity:{tenant}:{kind}:{algorithm}`
    pub fn similarity_key(&self, tenant_id: Uuid, kind: ScorerKind) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.config.key_prefix,
            PREFIX_SIMILARITY,
            tenant_id,
            kind.as_str(),
            SIMILARITY_ALGORITHM
        )
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache serialization failed");
                return false;
            }
        };

        match self.backend.set(key, bytes, ttl).await {
            Ok(()) => {
                debug!(key = %key, ttl = ?ttl, "Cache set");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed");
                false
            }
        }
    }

    pub async fn get_recommendations(&self, key: &str) -> Option<Vec<RecommendationItem>> {
        self.read(key).await
    }

    pub async fn put_recommendations(
        &self,
        ctx: &RecommendationContext,
        key: &str,
        items: &[RecommendationItem],
    ) {
        if self
            .write(key, items, self.config.recommendation_ttl())
            .await
        {
            self.user_keys
                .entry((ctx.tenant_id, ctx.user_id))
                .or_default()
                .insert(key.to_string());
        }
    }

    pub async fn get_similarity(
        &self,
        tenant_id: Uuid,
        kind: ScorerKind,
    ) -> Option<SimilarityMatrix> {
        self.read(&self.similarity_key(tenant_id, kind)).await
    }

    pub async fn put_similarity(
        &self,
        tenant_id: Uuid,
        kind: ScorerKind,
        matrix: &SimilarityMatrix,
    ) {
        let key = self.similarity_key(tenant_id, kind);
        self.write(&key, matrix, self.config.similarity_ttl()).await;
    }

    /// Drop every cached list of `user_id` within `tenant_id`
    pub async fn invalidate_user(&self, tenant_id: Uuid, user_id: Uuid) {
        let Some((_, keys)) = self.user_keys.remove(&(tenant_id, user_id)) else {
            return;
        };
        let keys: Vec<String> = keys.into_iter().collect();

        match self.backend.delete(&keys).await {
            Ok(deleted) => debug!(user_id = %user_id, deleted, "Invalidated cached recommendations"),
            Err(e) => warn!(user_id = %user_id, error = %e, "Cache invalidation failed"),
        }
    }

    /// Forget and delete every list this process cached for `model_id`
    pub async fn retire_model(&self, model_id: Uuid) {
        let suffix = model_suffix(model_id);
        let mut retired = Vec::new();

        self.user_keys.retain(|_, keys| {
            keys.retain(|key| {
                if key.ends_with(&suffix) {
                    retired.push(key.clone());
                    false
                } else {
                    true
                }
            });
            !keys.is_empty()
        });

        if retired.is_empty() {
            return;
        }
        match self.backend.delete(&retired).await {
            Ok(deleted) => debug!(model_id = %model_id, deleted, "Retired cached recommendations"),
            Err(e) => warn!(model_id = %model_id, error = %e, "Retiring cached recommendations failed"),
        }
    }

    /// Users with at least one tracked list
    pub fn tracked_users(&self) -> usize {
        self.user_keys.len()
    }
}

fn model_suffix(model_id: Uuid) -> String {
    format!(":m{}", model_id.simple())
}
