use crate::aggregates::Aggregates;
use crate::archive::Archive;
use crate::cache::{AggregateCache, CacheStore, MemoryCache, PgCache};
use crate::config::{ArchiveConfig, CacheBackendKind};
use crate::invalidation::Invalidator;
use crate::store::{ArchiveStore, MemoryArchiveStore, PgArchiveStore};
use crate::tasks::{MemoryJobQueue, PgJobQueue, Scheduler, TaskDispatcher, TaskQueue, TaskRunner};
use crate::warmup::WarmUp;
use rocket_db_pools::sqlx::PgPool;
use std::sync::Arc;

/// Everything the routes, the dispatcher and the CLI share, wired once.
#[derive(Clone)]
pub struct ArchiveServices {
    pub config: ArchiveConfig,
    pub store: Arc<dyn ArchiveStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub aggregates: Aggregates,
    pub scheduler: Scheduler,
    pub archive: Archive,
    pub warm_up: WarmUp,
}

impl ArchiveServices {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        cache: Arc<dyn CacheStore>,
        queue: Arc<dyn TaskQueue>,
        config: ArchiveConfig,
    ) -> Self {
        let cache = AggregateCache::new(cache);
        let aggregates = Aggregates::new(store.clone(), cache.clone(), &config);
        let scheduler = Scheduler::new(
            queue.clone(),
            cache,
            TaskRunner::new(aggregates.clone()),
            config.queue_mode,
            config.task_lock_expiry,
        );
        let invalidator = Invalidator::new(aggregates.clone(), scheduler.clone());

        Self {
            archive: Archive::new(store.clone(), invalidator),
            warm_up: WarmUp::new(aggregates.clone()),
            config,
            store,
            queue,
            aggregates,
            scheduler,
        }
    }

    /// Fully in-process services.
    pub fn in_memory(config: ArchiveConfig) -> Self {
        Self::new(
            Arc::new(MemoryArchiveStore::new()),
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryJobQueue::new()),
            config,
        )
    }

    /// Services on a Postgres pool. The cache backend follows the config.
    pub fn postgres(pool: PgPool, config: ArchiveConfig) -> Self {
        let cache: Arc<dyn CacheStore> = match config.cache_backend {
            CacheBackendKind::Postgres => Arc::new(PgCache::new(pool.clone())),
            CacheBackendKind::Memory => Arc::new(MemoryCache::new()),
        };
        Self::new(
            Arc::new(PgArchiveStore::new(pool.clone())),
            cache,
            Arc::new(PgJobQueue::new(pool)),
            config,
        )
    }

    pub fn dispatcher(&self) -> TaskDispatcher {
        TaskDispatcher::new(
            self.queue.clone(),
            self.aggregates.cache().clone(),
            TaskRunner::new(self.aggregates.clone()),
            self.store.clone(),
            &self.config,
        )
    }
}
