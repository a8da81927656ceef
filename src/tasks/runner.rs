use super::{RecomputeTask, TaskError};
use crate::aggregates::Aggregates;
use crate::cache::CacheKey;

/// Executes recompute tasks.
///
/// A task whose subject no longer exists (list, thread or email deleted
/// while it was queued) finishes successfully without doing anything.
#[derive(Clone)]
pub struct TaskRunner {
    aggregates: Aggregates,
}

impl TaskRunner {
    pub fn new(aggregates: Aggregates) -> Self {
        Self { aggregates }
    }

    pub async fn run(&self, task: &RecomputeTask) -> Result<(), TaskError> {
        log::debug!("tasks: running {}", task.lock_id());
        match task {
            RecomputeTask::RebuildRecentThreads { mailing_list } => {
                self.rebuild_recent_threads(mailing_list).await
            }
            RecomputeTask::RebuildListAfterEmail {
                mailing_list,
                year,
                month,
            } => self.rebuild_list_after_email(mailing_list, *year, *month).await,
            RecomputeTask::RebuildThreadAfterEmail { thread_id } => {
                self.rebuild_thread_after_email(*thread_id).await
            }
            RecomputeTask::RebuildPopularThreads { mailing_list } => {
                self.rebuild_popular_threads(mailing_list).await
            }
            RecomputeTask::RebuildThreadVotes { thread_id } => self.rebuild_thread_votes(*thread_id).await,
            RecomputeTask::RebuildEmailVotes { email_id } => self.rebuild_email_votes(*email_id).await,
            RecomputeTask::CheckOrphans { email_id } => self.check_orphans(*email_id).await,
        }
    }

    async fn list_exists(&self, name: &str) -> Result<bool, TaskError> {
        let exists = self.aggregates.store().get_mailing_list(name).await?.is_some();
        if !exists {
            log::debug!("tasks: mailing list {} is gone, nothing to do", name);
        }
        Ok(exists)
    }

    async fn rebuild_recent_threads(&self, list: &str) -> Result<(), TaskError> {
        if !self.list_exists(list).await? {
            return Ok(());
        }
        let ids = self.aggregates.rebuild_recent_threads(list).await?;
        log::debug!("tasks: {} has {} recent threads", list, ids.len());
        Ok(())
    }

    async fn rebuild_list_after_email(&self, list: &str, year: i32, month: u32) -> Result<(), TaskError> {
        if !self.list_exists(list).await? {
            return Ok(());
        }
        let cache = self.aggregates.cache();

        cache.delete(&CacheKey::recent_participants_count(list)).await;
        self.aggregates.recent_participants_count(list).await?;

        cache.delete(&CacheKey::participants_for_month(list, year, month)).await;
        self.aggregates.participants_count_for_month(list, year, month).await?;

        cache.delete(&CacheKey::top_threads(list)).await;
        self.aggregates.top_threads(list).await?;

        cache.delete(&CacheKey::top_posters(list)).await;
        self.aggregates.top_posters(list).await?;
        Ok(())
    }

    async fn rebuild_thread_after_email(&self, thread_id: i32) -> Result<(), TaskError> {
        if self.aggregates.store().get_thread(thread_id).await?.is_none() {
            log::debug!("tasks: thread {} is gone, nothing to do", thread_id);
            return Ok(());
        }
        let cache = self.aggregates.cache();
        cache.delete(&CacheKey::ThreadEmailsCount(thread_id)).await;
        cache.delete(&CacheKey::ThreadParticipantsCount(thread_id)).await;

        self.aggregates.thread_emails_count(thread_id).await?;
        self.aggregates.thread_participants_count(thread_id).await?;
        Ok(())
    }

    async fn rebuild_popular_threads(&self, list: &str) -> Result<(), TaskError> {
        if !self.list_exists(list).await? {
            return Ok(());
        }
        self.aggregates.cache().delete(&CacheKey::popular_threads(list)).await;
        self.aggregates.popular_threads(list).await?;
        Ok(())
    }

    async fn rebuild_thread_votes(&self, thread_id: i32) -> Result<(), TaskError> {
        if self.aggregates.store().get_thread(thread_id).await?.is_none() {
            log::debug!("tasks: thread {} is gone, nothing to do", thread_id);
            return Ok(());
        }
        let cache = self.aggregates.cache();
        cache.delete(&CacheKey::ThreadVotes(thread_id)).await;
        cache.delete(&CacheKey::ThreadVotesTotal(thread_id)).await;

        self.aggregates.thread_votes(thread_id).await?;
        self.aggregates.thread_votes_total(thread_id).await?;
        Ok(())
    }

    async fn rebuild_email_votes(&self, email_id: i32) -> Result<(), TaskError> {
        if self.aggregates.store().get_email(email_id).await?.is_none() {
            log::debug!("tasks: email {} is gone, nothing to do", email_id);
            return Ok(());
        }
        self.aggregates.cache().delete(&CacheKey::EmailVotes(email_id)).await;
        self.aggregates.email_votes(email_id).await?;
        Ok(())
    }

    async fn check_orphans(&self, email_id: i32) -> Result<(), TaskError> {
        let store = self.aggregates.store();
        let Some(email) = store.get_email(email_id).await? else {
            log::debug!("tasks: email {} is gone, nothing to do", email_id);
            return Ok(());
        };

        for orphan in store.orphans_of(&email).await? {
            log::debug!("tasks: attaching email {} to parent {}", orphan.id, email.id);
            store.set_parent(orphan.id, email.id).await?;
        }
        Ok(())
    }
}
