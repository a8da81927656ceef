use super::{RecomputeTask, TaskError, TaskQueue, TaskRunner};
use crate::cache::{AggregateCache, PendingJob};
use crate::config::QueueMode;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of [`Scheduler::delay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobHandle {
    /// A new job was queued.
    Enqueued(i64),
    /// An identical job is already pending; nothing was queued.
    Pending(i64),
    /// Sync mode: the task already ran.
    RanInline,
}

impl JobHandle {
    pub fn job_id(&self) -> Option<i64> {
        match self {
            JobHandle::Enqueued(id) | JobHandle::Pending(id) => Some(*id),
            JobHandle::RanInline => None,
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<dyn TaskQueue>,
    cache: AggregateCache,
    runner: TaskRunner,
    mode: QueueMode,
    lock_expiry: Duration,
}

impl Scheduler {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        cache: AggregateCache,
        runner: TaskRunner,
        mode: QueueMode,
        lock_expiry: Duration,
    ) -> Self {
        Self {
            queue,
            cache,
            runner,
            mode,
            lock_expiry,
        }
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    /// Submit a task unless an identical one is already pending.
    ///
    /// The dedup lock lives in the cache; if the cache is unreachable the
    /// lock is treated as absent and the task may be queued twice.
    pub async fn delay(&self, task: RecomputeTask) -> Result<JobHandle, TaskError> {
        if self.mode == QueueMode::Sync {
            self.runner.run(&task).await?;
            return Ok(JobHandle::RanInline);
        }

        let lock = task.lock_key();
        if let Some(PendingJob(job_id)) = self.cache.get::<PendingJob>(&lock).await {
            log::debug!("scheduler: {} already pending as job {}", task.lock_id(), job_id);
            return Ok(JobHandle::Pending(job_id));
        }

        let job_id = self.queue.enqueue(&task).await?;
        self.cache
            .set(&lock, PendingJob(job_id), Some(self.lock_expiry))
            .await;
        log::debug!("scheduler: queued {} as job {}", task.lock_id(), job_id);
        Ok(JobHandle::Enqueued(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::test_helpers::Fixture;
    use crate::tasks::MemoryJobQueue;

    fn scheduler(fx: &Fixture, queue: Arc<MemoryJobQueue>, mode: QueueMode) -> Scheduler {
        Scheduler::new(
            queue,
            fx.aggregates.cache().clone(),
            TaskRunner::new(fx.aggregates.clone()),
            mode,
            Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn identical_tasks_share_a_job_while_pending() {
        let fx = Fixture::new().await;
        let queue = Arc::new(MemoryJobQueue::new());
        let scheduler = scheduler(&fx, queue.clone(), QueueMode::Async);
        let task = RecomputeTask::RebuildPopularThreads { mailing_list: "dev@example.org".into() };

        let first = scheduler.delay(task.clone()).await.unwrap();
        let second = scheduler.delay(task).await.unwrap();

        assert!(matches!(first, JobHandle::Enqueued(_)));
        assert_eq!(second, JobHandle::Pending(first.job_id().unwrap()));
        assert_eq!(queue.jobs().len(), 1);
    }

    #[tokio::test]
    async fn different_arguments_are_not_collapsed() {
        let fx = Fixture::new().await;
        let queue = Arc::new(MemoryJobQueue::new());
        let scheduler = scheduler(&fx, queue.clone(), QueueMode::Async);

        scheduler
            .delay(RecomputeTask::RebuildThreadVotes { thread_id: 1 })
            .await
            .unwrap();
        scheduler
            .delay(RecomputeTask::RebuildThreadVotes { thread_id: 2 })
            .await
            .unwrap();

        assert_eq!(queue.jobs().len(), 2);
    }

    #[tokio::test]
    async fn sync_mode_runs_inline_without_dedup() {
        let fx = Fixture::new().await;
        let queue = Arc::new(MemoryJobQueue::new());
        let scheduler = scheduler(&fx, queue.clone(), QueueMode::Sync);
        let task = RecomputeTask::RebuildRecentThreads { mailing_list: "dev@example.org".into() };

        assert_eq!(scheduler.delay(task.clone()).await.unwrap(), JobHandle::RanInline);
        assert_eq!(scheduler.delay(task.clone()).await.unwrap(), JobHandle::RanInline);

        assert!(queue.jobs().is_empty());
        assert_eq!(fx.aggregates.cache().get::<PendingJob>(&task.lock_key()).await, None);
        assert_eq!(
            fx.aggregates
                .cache()
                .get::<Vec<i32>>(&crate::cache::CacheKey::recent_threads("dev@example.org"))
                .await,
            Some(vec![])
        );
    }
}
