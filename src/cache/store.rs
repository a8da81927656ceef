use super::CachedValue;
use rocket_db_pools::sqlx;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a cache backend.
///
/// Callers going through [`super::AggregateCache`] never see these: a failing
/// backend degrades to uncached computation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cache value could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Key-value backend for aggregates and dedup locks.
///
/// `ttl = None` keeps the value until it is deleted. With a TTL, `get`
/// returns `None` once the entry has expired, deleted or not.
#[rocket::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, CacheError>;

    async fn set(
        &self,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Drop expired entries that the backend keeps around until read.
    async fn purge_expired(&self) -> Result<u64, CacheError> {
        Ok(0)
    }
}
