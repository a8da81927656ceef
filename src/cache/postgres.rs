//! Cache backend on the `cache_entries` table.
//!
//! Request handlers, the dispatcher and the warm-up CLI run in different
//! processes; this backend is what they share. Values are stored as JSONB
//! and expiry is an absolute timestamp filtered on read.

use super::{CacheError, CacheStore, CachedValue};
use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgPool, types::Json};
use std::time::Duration;

pub struct PgCache {
    pool: PgPool,
}

impl PgCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn expiry_from(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl?).ok()?;
    Utc::now().checked_add_signed(ttl)
}

#[rocket::async_trait]
impl CacheStore for PgCache {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, CacheError> {
        let row: Option<(Json<CachedValue>,)> = sqlx::query_as(
            r#"SELECT value FROM cache_entries
               WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())"#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(Json(value),)| value))
    }

    async fn set(
        &self,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        sqlx::query(
            r#"INSERT INTO cache_entries (key, value, expires_at)
               VALUES ($1, $2, $3)
               ON CONFLICT (key) DO UPDATE
               SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at"#,
        )
        .bind(key)
        .bind(Json(&value))
        .bind(expiry_from(ttl))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM cache_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= NOW()",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
