use super::{RecomputeTask, TaskError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// A claimed job, ready to run.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub task: RecomputeTask,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, JsonSchema)]
pub struct JobStatusInfo {
    pub id: i64,
    #[serde(rename = "taskName")]
    pub task_name: String,
    #[serde(rename = "lockKey")]
    pub lock_key: String,
    pub payload: Value,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[rocket::async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &RecomputeTask) -> Result<i64, TaskError>;

    /// Claim the oldest queued job and mark it running.
    async fn claim_next(&self) -> Result<Option<Job>, TaskError>;

    async fn complete(&self, job_id: i64) -> Result<(), TaskError>;

    async fn fail(&self, job_id: i64, error: String) -> Result<(), TaskError>;

    /// Queued and running jobs, oldest first.
    async fn pending_jobs(&self) -> Result<Vec<JobStatusInfo>, TaskError>;

    /// Delete succeeded and failed jobs that finished more than `retention`
    /// ago. Returns how many were deleted.
    async fn purge_finished(&self, retention: Duration) -> Result<u64, TaskError>;
}

/// Job queue on the `recompute_jobs` table. Several dispatchers may claim
/// from it concurrently.
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[rocket::async_trait]
impl TaskQueue for PgJobQueue {
    async fn enqueue(&self, task: &RecomputeTask) -> Result<i64, TaskError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"INSERT INTO recompute_jobs (task_name, lock_key, payload)
               VALUES ($1, $2, $3)
               RETURNING id"#,
        )
        .bind(task.name())
        .bind(task.lock_id())
        .bind(serde_json::to_value(task)?)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn claim_next(&self) -> Result<Option<Job>, TaskError> {
        let mut tx = self.pool.begin().await?;

        let job: Option<(i64, Value)> = sqlx::query_as(
            r#"SELECT id, payload FROM recompute_jobs
               WHERE status = 'queued'
               ORDER BY created_at ASC, id ASC
               LIMIT 1
               FOR UPDATE SKIP LOCKED"#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id, payload)) = job else {
            return Ok(None);
        };

        sqlx::query("UPDATE recompute_jobs SET status = 'running', started_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        match serde_json::from_value::<RecomputeTask>(payload) {
            Ok(task) => Ok(Some(Job { id, task })),
            Err(e) => {
                // unreadable payloads would be claimed forever otherwise
                self.fail(id, format!("invalid payload: {}", e)).await?;
                Err(TaskError::Payload(e))
            }
        }
    }

    async fn complete(&self, job_id: i64) -> Result<(), TaskError> {
        sqlx::query(
            "UPDATE recompute_jobs SET status = 'succeeded', completed_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail(&self, job_id: i64, error: String) -> Result<(), TaskError> {
        sqlx::query(
            r#"UPDATE recompute_jobs
               SET status = 'failed', completed_at = NOW(), error_message = $1
               WHERE id = $2"#,
        )
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn pending_jobs(&self) -> Result<Vec<JobStatusInfo>, TaskError> {
        let jobs: Vec<JobStatusInfo> = sqlx::query_as(
            r#"SELECT id, task_name, lock_key, payload, status, created_at,
                      started_at, completed_at, error_message
               FROM recompute_jobs
               WHERE status IN ('queued', 'running')
               ORDER BY created_at ASC, id ASC"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn purge_finished(&self, retention: Duration) -> Result<u64, TaskError> {
        let result = sqlx::query(
            r#"DELETE FROM recompute_jobs
               WHERE status IN ('succeeded', 'failed')
                 AND completed_at <= NOW() - make_interval(secs => $1)"#,
        )
        .bind(retention.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// In-process job queue for tests and single-node setups.
#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<BTreeMap<i64, (RecomputeTask, JobStatusInfo)>>,
    next_id: AtomicI64,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every job not purged yet with its current status, oldest first.
    pub fn jobs(&self) -> Vec<JobStatusInfo> {
        self.jobs.lock().values().map(|(_, info)| info.clone()).collect()
    }

    fn set_status(&self, job_id: i64, status: JobStatus, error: Option<String>) {
        if let Some((_, info)) = self.jobs.lock().get_mut(&job_id) {
            info.status = status;
            info.completed_at = Some(Utc::now());
            info.error_message = error;
        }
    }
}

#[rocket::async_trait]
impl TaskQueue for MemoryJobQueue {
    async fn enqueue(&self, task: &RecomputeTask) -> Result<i64, TaskError> {
        let payload = serde_json::to_value(task)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut jobs = self.jobs.lock();
        let info = JobStatusInfo {
            id,
            task_name: task.name().to_string(),
            lock_key: task.lock_id(),
            payload,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        };
        jobs.insert(id, (task.clone(), info));
        Ok(id)
    }

    async fn claim_next(&self) -> Result<Option<Job>, TaskError> {
        let mut jobs = self.jobs.lock();
        let next = jobs
            .iter_mut()
            .find(|(_, (_, info))| info.status == JobStatus::Queued);

        Ok(next.map(|(&id, (task, info))| {
            info.status = JobStatus::Running;
            info.started_at = Some(Utc::now());
            Job {
                id,
                task: task.clone(),
            }
        }))
    }

    async fn complete(&self, job_id: i64) -> Result<(), TaskError> {
        self.set_status(job_id, JobStatus::Succeeded, None);
        Ok(())
    }

    async fn fail(&self, job_id: i64, error: String) -> Result<(), TaskError> {
        self.set_status(job_id, JobStatus::Failed, Some(error));
        Ok(())
    }

    async fn pending_jobs(&self) -> Result<Vec<JobStatusInfo>, TaskError> {
        Ok(self
            .jobs()
            .into_iter()
            .filter(|info| matches!(info.status, JobStatus::Queued | JobStatus::Running))
            .collect())
    }

    async fn purge_finished(&self, retention: Duration) -> Result<u64, TaskError> {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return Ok(0);
        };

        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, (_, info)| {
            let finished = matches!(info.status, JobStatus::Succeeded | JobStatus::Failed);
            !(finished && info.completed_at.is_some_and(|at| at <= cutoff))
        });
        Ok((before - jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_queue_claims_in_order() {
        let queue = MemoryJobQueue::new();
        let first = queue
            .enqueue(&RecomputeTask::RebuildThreadVotes { thread_id: 1 })
            .await
            .unwrap();
        let second = queue
            .enqueue(&RecomputeTask::RebuildEmailVotes { email_id: 2 })
            .await
            .unwrap();

        let job = queue.claim_next().await.unwrap().expect("queued job");
        assert_eq!(job.id, first);
        queue.complete(job.id).await.unwrap();

        let job = queue.claim_next().await.unwrap().expect("queued job");
        assert_eq!(job.id, second);
        assert_eq!(job.task, RecomputeTask::RebuildEmailVotes { email_id: 2 });
        queue.fail(job.id, "boom".into()).await.unwrap();

        assert!(queue.claim_next().await.unwrap().is_none());
        let statuses: Vec<JobStatus> = queue.jobs().iter().map(|j| j.status).collect();
        assert_eq!(statuses, vec![JobStatus::Succeeded, JobStatus::Failed]);
    }

    #[tokio::test]
    async fn pending_jobs_lists_queued_and_running() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue(&RecomputeTask::CheckOrphans { email_id: 1 })
            .await
            .unwrap();
        queue
            .enqueue(&RecomputeTask::CheckOrphans { email_id: 2 })
            .await
            .unwrap();
        queue.claim_next().await.unwrap();

        let pending = queue.pending_jobs().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].status, JobStatus::Running);
        assert_eq!(pending[1].lock_key, "check_orphans:2");
    }

    #[tokio::test]
    async fn purge_drops_only_finished_jobs_past_retention() {
        let queue = MemoryJobQueue::new();
        for email_id in 1..=3 {
            queue
                .enqueue(&RecomputeTask::CheckOrphans { email_id })
                .await
                .unwrap();
        }
        let done = queue.claim_next().await.unwrap().expect("queued job");
        queue.complete(done.id).await.unwrap();
        let broken = queue.claim_next().await.unwrap().expect("queued job");
        queue.fail(broken.id, "boom".into()).await.unwrap();

        assert_eq!(queue.purge_finished(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(queue.jobs().len(), 3);

        assert_eq!(queue.purge_finished(Duration::ZERO).await.unwrap(), 2);
        let left = queue.jobs();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].status, JobStatus::Queued);

        let next = queue
            .enqueue(&RecomputeTask::CheckOrphans { email_id: 4 })
            .await
            .unwrap();
        assert_eq!(next, 4, "ids are not reused after a purge");
    }
}
