//! Runtime configuration read from the environment.

use std::env;
use std::time::Duration;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

/// Where aggregate values and dedup locks are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    /// Process-local map. Only valid when the dispatcher runs in the same process.
    Memory,
    /// `cache_entries` table, shared by every process on the database.
    Postgres,
}

impl CacheBackendKind {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => CacheBackendKind::Memory,
            "postgres" | "pg" => CacheBackendKind::Postgres,
            other => {
                log::warn!("unknown CACHE_BACKEND '{}', using postgres", other);
                CacheBackendKind::Postgres
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheBackendKind::Memory => "memory",
            CacheBackendKind::Postgres => "postgres",
        }
    }
}

/// How recompute tasks are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Enqueue and let the dispatcher run them, deduplicated.
    Async,
    /// Run immediately in the caller, no dedup lock.
    Sync,
}

impl QueueMode {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "sync" | "inline" => QueueMode::Sync,
            "async" => QueueMode::Async,
            other => {
                log::warn!("unknown TASK_QUEUE_MODE '{}', using async", other);
                QueueMode::Async
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueMode::Async => "async",
            QueueMode::Sync => "sync",
        }
    }
}

/// Cache, scheduler and dispatcher settings.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub cache_backend: CacheBackendKind,
    pub queue_mode: QueueMode,
    /// Expiry of the dedup lock, a safety net for lost unlocks.
    pub task_lock_expiry: Duration,
    pub recent_participants_ttl: Duration,
    pub top_threads_ttl: Duration,
    pub dispatcher_poll_interval: Duration,
    pub dispatcher_error_backoff: Duration,
    /// Period of the full `recent_threads` rebuild that expunges old threads.
    pub recent_threads_refresh: Duration,
    /// How long succeeded and failed jobs are kept in the queue.
    pub job_retention: Duration,
    pub warm_up_months: u32,
    pub slow_request_threshold: Duration,
}

impl ArchiveConfig {
    pub fn from_env() -> Self {
        Self {
            cache_backend: CacheBackendKind::parse(&env_string("CACHE_BACKEND", "postgres")),
            queue_mode: QueueMode::parse(&env_string("TASK_QUEUE_MODE", "async")),
            task_lock_expiry: env_duration_secs("TASK_LOCK_EXPIRY_SECS", 60 * 10),
            recent_participants_ttl: env_duration_secs("RECENT_PARTICIPANTS_TTL_SECS", 3600 * 6),
            top_threads_ttl: env_duration_secs("TOP_THREADS_TTL_SECS", 3600 * 12),
            dispatcher_poll_interval: env_duration_millis("DISPATCHER_POLL_INTERVAL_MS", 5_000),
            dispatcher_error_backoff: env_duration_millis("DISPATCHER_ERROR_BACKOFF_MS", 10_000),
            recent_threads_refresh: env_duration_secs("RECENT_THREADS_REFRESH_SECS", 3600 * 24),
            job_retention: env_duration_secs("JOB_RETENTION_SECS", 3600 * 24 * 7),
            warm_up_months: env_u32("WARM_UP_MONTHS", 1),
            slow_request_threshold: env_duration_millis("SLOW_REQUEST_MS", 1_000),
        }
    }

    /// In-process defaults with inline task execution, for tests and one-off tools.
    pub fn inline() -> Self {
        Self {
            cache_backend: CacheBackendKind::Memory,
            queue_mode: QueueMode::Sync,
            ..Self::defaults()
        }
    }

    fn defaults() -> Self {
        Self {
            cache_backend: CacheBackendKind::Postgres,
            queue_mode: QueueMode::Async,
            task_lock_expiry: Duration::from_secs(60 * 10),
            recent_participants_ttl: Duration::from_secs(3600 * 6),
            top_threads_ttl: Duration::from_secs(3600 * 12),
            dispatcher_poll_interval: Duration::from_secs(5),
            dispatcher_error_backoff: Duration::from_secs(10),
            recent_threads_refresh: Duration::from_secs(3600 * 24),
            job_retention: Duration::from_secs(3600 * 24 * 7),
            warm_up_months: 1,
            slow_request_threshold: Duration::from_secs(1),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self::defaults()
    }
}
