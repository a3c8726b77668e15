use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::models::CacheStats;
use crate::services::keys::CacheKey;
use crate::services::store::CacheStore;

#[derive(Default)]
struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

impl CacheMetrics {
    fn snapshot(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }
}

/// Cache-aside front for read paths.
///
/// The cache is never a source of truth: store failures on read count as a miss
/// and failures on write or invalidation are logged and swallowed. A reader that
/// misses, loads from the source, and writes back after a concurrent mutation has
/// invalidated can leave a stale entry behind; the TTL bounds how long it lives.
pub struct CacheService {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
    metrics: CacheMetrics,
}

impl CacheService {
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self {
            store,
            default_ttl,
            metrics: CacheMetrics::default(),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Cache hit for {}", key);
                    Some(value)
                }
                Err(e) => {
                    warn!("Discarding undecodable cache entry {}: {}", key, e);
                    self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                    self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Ok(None) => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!("Cache read failed for {}, treating as miss: {}", key, e);
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        self.set_json_with_ttl(key, value, self.default_ttl).await
    }

    pub async fn set_json_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Skipping cache write for {}: {}", key, e);
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match self.store.set(key, &payload, ttl).await {
            Ok(()) => {
                self.metrics.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("Cache write failed for {}: {}", key, e);
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Reads through the cache, loading and populating on miss. Loader errors are
    /// returned unchanged and nothing is cached for them.
    pub async fn get_or_load<T, E, F, Fut>(&self, key: &str, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get_json::<T>(key).await {
            return Ok(cached);
        }

        let value = loader().await?;
        self.set_json(key, &value).await;
        Ok(value)
    }

    pub async fn invalidate_key(&self, key: &str) {
        match self.store.delete(key).await {
            Ok(()) => {
                self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("Cache invalidation failed for {}: {}", key, e);
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub async fn invalidate_prefix(&self, prefix: &str) {
        match self.store.delete_by_prefix(prefix).await {
            Ok(removed) => {
                self.metrics.invalidations.fetch_add(removed, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("Cache prefix invalidation failed for {}: {}", prefix, e);
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drops the entity entry and every cached list page for each `(selector, id)` pair.
    pub async fn invalidate_entity(&self, entity: &str, id: &str, related: &[(&str, String)]) {
        self.invalidate_key(&CacheKey::entity(entity, id)).await;

        for (selector, selector_id) in related {
            self.invalidate_prefix(&CacheKey::list_prefix(entity, selector, selector_id))
                .await;
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }
}
