//! Recompute tasks and their scheduling.
//!
//! A mutation that makes cached aggregates stale enqueues a
//! [`RecomputeTask`]. Identical tasks are collapsed while one is pending:
//! the scheduler keeps a dedup lock in the cache holding the job id, and the
//! dispatcher drops it when the job starts.
//!
//! ## Module Structure
//!
//! - `queue`: job queue trait with Postgres and in-process implementations
//! - `runner`: executes a task against the aggregates
//! - `scheduler`: deduplicating `delay`, or inline execution in sync mode
//! - `dispatcher`: background loop claiming and running queued jobs

mod dispatcher;
mod queue;
mod runner;
mod scheduler;

pub use dispatcher::TaskDispatcher;
pub use queue::{Job, JobStatus, JobStatusInfo, MemoryJobQueue, PgJobQueue, TaskQueue};
pub use runner::TaskRunner;
pub use scheduler::{JobHandle, Scheduler};

use crate::cache::CacheKey;
use crate::store::StoreError;
use rocket_db_pools::sqlx;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("queue error: {0}")]
    Queue(#[from] sqlx::Error),
    #[error("invalid task payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A recompute job. Serialized as the job payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum RecomputeTask {
    /// Rebuild the recent threads list and its count.
    RebuildRecentThreads { mailing_list: String },
    /// Refresh the list aggregates touched by an email dated in `year`/`month`.
    RebuildListAfterEmail {
        mailing_list: String,
        year: i32,
        month: u32,
    },
    RebuildThreadAfterEmail { thread_id: i32 },
    RebuildPopularThreads { mailing_list: String },
    RebuildThreadVotes { thread_id: i32 },
    RebuildEmailVotes { email_id: i32 },
    /// Re-attach replies that arrived before the email they answer.
    CheckOrphans { email_id: i32 },
}

impl RecomputeTask {
    pub fn name(&self) -> &'static str {
        match self {
            RecomputeTask::RebuildRecentThreads { .. } => "rebuild_cache_recent_threads",
            RecomputeTask::RebuildListAfterEmail { .. } => "rebuild_mailinglist_cache_new_email",
            RecomputeTask::RebuildThreadAfterEmail { .. } => "rebuild_thread_cache_new_email",
            RecomputeTask::RebuildPopularThreads { .. } => "rebuild_cache_popular_threads",
            RecomputeTask::RebuildThreadVotes { .. } => "rebuild_thread_cache_votes",
            RecomputeTask::RebuildEmailVotes { .. } => "rebuild_email_cache_votes",
            RecomputeTask::CheckOrphans { .. } => "check_orphans",
        }
    }

    /// `<task name>:<args joined by ':'>`, unique per task and arguments.
    pub fn lock_id(&self) -> String {
        let name = self.name();
        match self {
            RecomputeTask::RebuildRecentThreads { mailing_list }
            | RecomputeTask::RebuildPopularThreads { mailing_list } => {
                format!("{name}:{mailing_list}")
            }
            RecomputeTask::RebuildListAfterEmail {
                mailing_list,
                year,
                month,
            } => format!("{name}:{mailing_list}:{year}:{month}"),
            RecomputeTask::RebuildThreadAfterEmail { thread_id }
            | RecomputeTask::RebuildThreadVotes { thread_id } => format!("{name}:{thread_id}"),
            RecomputeTask::RebuildEmailVotes { email_id } | RecomputeTask::CheckOrphans { email_id } => {
                format!("{name}:{email_id}")
            }
        }
    }

    pub fn lock_key(&self) -> CacheKey {
        CacheKey::TaskLock(self.lock_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_include_every_argument() {
        let task = RecomputeTask::RebuildListAfterEmail {
            mailing_list: "dev@example.org".into(),
            year: 2024,
            month: 3,
        };
        assert_eq!(
            task.lock_key().to_string(),
            "task:status:rebuild_mailinglist_cache_new_email:dev@example.org:2024:3"
        );

        let other_month = RecomputeTask::RebuildListAfterEmail {
            mailing_list: "dev@example.org".into(),
            year: 2024,
            month: 4,
        };
        assert_ne!(task.lock_key(), other_month.lock_key());
    }

    #[test]
    fn same_argument_different_task_gets_different_locks() {
        let votes = RecomputeTask::RebuildThreadVotes { thread_id: 7 };
        let emails = RecomputeTask::RebuildThreadAfterEmail { thread_id: 7 };
        assert_eq!(votes.lock_id(), "rebuild_thread_cache_votes:7");
        assert_ne!(votes.lock_id(), emails.lock_id());
    }

    #[test]
    fn payload_is_tagged_by_task() {
        let task = RecomputeTask::CheckOrphans { email_id: 12 };
        let payload = serde_json::to_value(&task).unwrap();
        assert_eq!(payload, serde_json::json!({ "task": "check_orphans", "email_id": 12 }));
        assert_eq!(serde_json::from_value::<RecomputeTask>(payload).unwrap(), task);
    }
}
