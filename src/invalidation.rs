//! Cache invalidation triggered by archive mutations.
//!
//! Every mutation of the archive emits a [`ChangeEvent`] that the
//! [`Invalidator`] turns into key deletions, incremental cache updates and
//! recompute tasks.
//!
//! Deleting stale keys happens in both import modes. Incremental upkeep
//! (moving a thread to the front of the recent list, eager re-reads,
//! scheduling recomputes) only happens in [`ImportMode::Live`]; a batch
//! import schedules its rebuilds once at the end instead.

use crate::aggregates::Aggregates;
use crate::cache::CacheKey;
use crate::models::{Email, Thread};
use crate::tasks::{RecomputeTask, Scheduler, TaskError};
use chrono::Datelike;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Regular traffic: keep the cache up to date as changes land.
    #[default]
    Live,
    /// Bulk import: skip incremental cache maintenance.
    Batch,
}

impl ImportMode {
    pub fn is_live(self) -> bool {
        self == ImportMode::Live
    }
}

#[derive(Debug, Clone)]
pub enum ChangeEvent {
    EmailAdded(Email),
    EmailDeleted(Email),
    ThreadCreated(Thread),
    ThreadDeleted(Thread),
    /// Emitted before a vote on the email is written.
    VoteChanging(Email),
    /// Emitted after a vote on the email was written or removed.
    VoteChanged(Email),
}

#[derive(Clone)]
pub struct Invalidator {
    aggregates: Aggregates,
    scheduler: Scheduler,
}

impl Invalidator {
    pub fn new(aggregates: Aggregates, scheduler: Scheduler) -> Self {
        Self {
            aggregates,
            scheduler,
        }
    }

    pub fn aggregates(&self) -> &Aggregates {
        &self.aggregates
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub async fn handle(&self, event: &ChangeEvent, mode: ImportMode) -> Result<(), TaskError> {
        match event {
            ChangeEvent::EmailAdded(email) => self.on_email_added(email, mode).await,
            ChangeEvent::EmailDeleted(email) => self.on_email_deleted(email, mode).await,
            ChangeEvent::ThreadCreated(thread) => self.on_thread_changed(thread, mode).await,
            ChangeEvent::ThreadDeleted(thread) => self.on_thread_deleted(thread, mode).await,
            ChangeEvent::VoteChanging(email) => {
                self.on_vote_changing(email).await;
                Ok(())
            }
            ChangeEvent::VoteChanged(email) => self.on_vote_changed(email, mode).await,
        }
    }

    async fn on_email_added(&self, email: &Email, mode: ImportMode) -> Result<(), TaskError> {
        if mode.is_live() {
            let list = email.mailing_list.as_str();
            let cache = self.aggregates.cache();

            // The list is only appended to; the periodic rebuild drops
            // threads that left the window.
            let mut ids = self.aggregates.recent_thread_ids(list).await?;
            ids.retain(|id| *id != email.thread_id);
            ids.insert(0, email.thread_id);
            let count = ids.len() as i64;
            cache.set(&CacheKey::recent_threads(list), ids, None).await;
            cache.set(&CacheKey::recent_threads_count(list), count, None).await;

            self.scheduler
                .delay(list_rebuild_for(email))
                .await?;
            self.scheduler
                .delay(RecomputeTask::RebuildThreadAfterEmail {
                    thread_id: email.thread_id,
                })
                .await?;
        }

        self.scheduler
            .delay(RecomputeTask::CheckOrphans { email_id: email.id })
            .await?;
        Ok(())
    }

    async fn on_email_deleted(&self, email: &Email, mode: ImportMode) -> Result<(), TaskError> {
        let cache = self.aggregates.cache();
        cache.delete(&CacheKey::EmailVotes(email.id)).await;
        cache.delete(&CacheKey::ThreadEmailsCount(email.thread_id)).await;
        cache.delete(&CacheKey::ThreadParticipantsCount(email.thread_id)).await;
        cache.delete(&CacheKey::ThreadSubject(email.thread_id)).await;

        if mode.is_live() {
            self.scheduler.delay(list_rebuild_for(email)).await?;
        }
        Ok(())
    }

    async fn on_thread_changed(&self, thread: &Thread, mode: ImportMode) -> Result<(), TaskError> {
        let list = thread.mailing_list.as_str();
        self.aggregates.cache().delete(&CacheKey::recent_threads(list)).await;

        if mode.is_live() {
            self.aggregates.recent_threads(list).await?;
        }
        Ok(())
    }

    async fn on_thread_deleted(&self, thread: &Thread, mode: ImportMode) -> Result<(), TaskError> {
        let cache = self.aggregates.cache();
        for key in [
            CacheKey::ThreadParticipantsCount(thread.id),
            CacheKey::ThreadEmailsCount(thread.id),
            CacheKey::ThreadSubject(thread.id),
            CacheKey::ThreadVotes(thread.id),
            CacheKey::ThreadVotesTotal(thread.id),
        ] {
            cache.delete(&key).await;
        }

        self.on_thread_changed(thread, mode).await?;
        if mode.is_live() {
            self.scheduler
                .delay(RecomputeTask::RebuildRecentThreads {
                    mailing_list: thread.mailing_list.clone(),
                })
                .await?;
        }
        Ok(())
    }

    async fn on_vote_changing(&self, email: &Email) {
        let cache = self.aggregates.cache();
        cache.delete(&CacheKey::ThreadVotes(email.thread_id)).await;
        cache.delete(&CacheKey::ThreadVotesTotal(email.thread_id)).await;
        cache.delete(&CacheKey::EmailVotes(email.id)).await;
    }

    async fn on_vote_changed(&self, email: &Email, mode: ImportMode) -> Result<(), TaskError> {
        if !mode.is_live() {
            return Ok(());
        }
        self.scheduler
            .delay(RecomputeTask::RebuildPopularThreads {
                mailing_list: email.mailing_list.clone(),
            })
            .await?;
        self.scheduler
            .delay(RecomputeTask::RebuildThreadVotes {
                thread_id: email.thread_id,
            })
            .await?;
        self.scheduler
            .delay(RecomputeTask::RebuildEmailVotes { email_id: email.id })
            .await?;
        Ok(())
    }
}

/// List-level recompute for the month the email is dated in.
fn list_rebuild_for(email: &Email) -> RecomputeTask {
    RecomputeTask::RebuildListAfterEmail {
        mailing_list: email.mailing_list.clone(),
        year: email.date.year(),
        month: email.date.month(),
    }
}
