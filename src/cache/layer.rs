use super::{CacheCodec, CacheKey, CacheStore, MemoryCache};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Typed front for a [`CacheStore`].
///
/// Backend failures are soft: reads that fail count as misses, writes and
/// deletes that fail are logged and dropped. An aggregate read therefore
/// never fails because the cache is down, it just gets computed uncached.
#[derive(Clone)]
pub struct AggregateCache {
    backend: Arc<dyn CacheStore>,
}

impl AggregateCache {
    pub fn new(backend: Arc<dyn CacheStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }

    pub async fn get<T: CacheCodec>(&self, key: &CacheKey) -> Option<T> {
        let rendered = key.to_string();
        match self.backend.get(&rendered).await {
            Ok(Some(value)) => {
                let decoded = T::decode(value);
                if decoded.is_none() {
                    log::warn!("cache: unexpected value type under {}, ignoring", rendered);
                }
                decoded
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("cache: get {} failed: {}", rendered, e);
                None
            }
        }
    }

    pub async fn set<T: CacheCodec>(&self, key: &CacheKey, value: T, ttl: Option<Duration>) {
        let rendered = key.to_string();
        if let Err(e) = self.backend.set(&rendered, value.encode(), ttl).await {
            log::warn!("cache: set {} failed: {}", rendered, e);
        }
    }

    pub async fn delete(&self, key: &CacheKey) {
        let rendered = key.to_string();
        if let Err(e) = self.backend.delete(&rendered).await {
            log::warn!("cache: delete {} failed: {}", rendered, e);
        }
    }

    /// Return the cached value, or compute, store and return it.
    ///
    /// Concurrent callers missing on the same key each run `compute`; the
    /// last write wins.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: CacheCodec + Clone + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        if let Some(value) = self.get::<T>(key).await {
            return Ok(value);
        }

        let value = compute().await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    pub async fn purge_expired(&self) -> u64 {
        match self.backend.purge_expired().await {
            Ok(purged) => purged,
            Err(e) => {
                log::warn!("cache: purge failed: {}", e);
                0
            }
        }
    }
}
