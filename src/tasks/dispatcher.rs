use super::{RecomputeTask, TaskError, TaskQueue, TaskRunner};
use crate::cache::AggregateCache;
use crate::config::ArchiveConfig;
use crate::store::ArchiveStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Background worker draining the recompute queue.
///
/// Besides queued jobs it runs a periodic maintenance pass: every list's
/// recent threads are rebuilt, which drops threads that aged out of the
/// window, then expired cache rows and old finished jobs are purged.
pub struct TaskDispatcher {
    queue: Arc<dyn TaskQueue>,
    cache: AggregateCache,
    runner: TaskRunner,
    store: Arc<dyn ArchiveStore>,
    poll_interval: Duration,
    error_backoff: Duration,
    refresh_interval: Duration,
    job_retention: Duration,
}

impl TaskDispatcher {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        cache: AggregateCache,
        runner: TaskRunner,
        store: Arc<dyn ArchiveStore>,
        config: &ArchiveConfig,
    ) -> Self {
        Self {
            queue,
            cache,
            runner,
            store,
            poll_interval: config.dispatcher_poll_interval,
            error_backoff: config.dispatcher_error_backoff,
            refresh_interval: config.recent_threads_refresh,
            job_retention: config.job_retention,
        }
    }

    /// Run until `shutdown` is cancelled. A job that already started is
    /// always finished first.
    pub async fn run(self, shutdown: CancellationToken) {
        log::info!("dispatcher: started");
        let mut last_refresh = Instant::now();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if last_refresh.elapsed() >= self.refresh_interval {
                self.maintenance().await;
                last_refresh = Instant::now();
            }

            let idle = match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => self.poll_interval,
                Err(e) => {
                    log::error!("dispatcher: failed to get job: {}", e);
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(idle) => {}
            }
        }

        log::info!("dispatcher: stopped");
    }

    /// Claim and run one job. Returns `false` when the queue is empty.
    pub async fn run_once(&self) -> Result<bool, TaskError> {
        let Some(job) = self.queue.claim_next().await? else {
            return Ok(false);
        };
        log::info!("dispatcher: claimed job {} ({})", job.id, job.task.lock_id());

        // Unlock before running: a change landing while the job runs must be
        // able to queue a fresh one.
        self.cache.delete(&job.task.lock_key()).await;

        let started = Instant::now();
        match self.runner.run(&job.task).await {
            Ok(()) => {
                self.queue.complete(job.id).await?;
                log::info!(
                    "dispatcher: job {} done in {:.2}ms",
                    job.id,
                    started.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                log::error!("dispatcher: job {} failed: {}", job.id, e);
                self.queue.fail(job.id, e.to_string()).await?;
            }
        }
        Ok(true)
    }

    /// Run jobs until the queue is empty. Returns how many ran.
    pub async fn drain(&self) -> Result<usize, TaskError> {
        let mut ran = 0;
        while self.run_once().await? {
            ran += 1;
        }
        Ok(ran)
    }

    async fn maintenance(&self) {
        match self.store.list_mailing_lists().await {
            Ok(lists) => {
                for list in lists {
                    let task = RecomputeTask::RebuildRecentThreads {
                        mailing_list: list.name.clone(),
                    };
                    if let Err(e) = self.runner.run(&task).await {
                        log::warn!("dispatcher: refreshing recent threads of {} failed: {}", list.name, e);
                    }
                }
            }
            Err(e) => log::error!("dispatcher: cannot list mailing lists for refresh: {}", e),
        }

        let purged = self.cache.purge_expired().await;
        if purged > 0 {
            log::info!("dispatcher: purged {} expired cache entries", purged);
        }

        match self.queue.purge_finished(self.job_retention).await {
            Ok(0) => {}
            Ok(removed) => log::info!("dispatcher: removed {} finished jobs", removed),
            Err(e) => log::error!("dispatcher: cannot purge finished jobs: {}", e),
        }
    }
}
