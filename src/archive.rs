//! Mutation API of the archive.
//!
//! Every write goes through [`Archive`] so that the matching
//! [`ChangeEvent`]s reach the invalidator. Bulk imports use a
//! [`BatchImport`] session, which defers cache rebuilds to
//! [`BatchImport::finish`].

use crate::invalidation::{ChangeEvent, ImportMode, Invalidator};
use crate::models::{Email, LastView, MailingList, NewEmail, Thread, User, Vote};
use crate::store::{ArchiveStore, StoreError};
use crate::tasks::{RecomputeTask, TaskError};
use chrono::{Datelike, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Clone)]
pub struct Archive {
    store: Arc<dyn ArchiveStore>,
    invalidator: Invalidator,
}

impl Archive {
    pub fn new(store: Arc<dyn ArchiveStore>, invalidator: Invalidator) -> Self {
        Self { store, invalidator }
    }

    pub async fn save_mailing_list(&self, list: MailingList) -> ArchiveResult<MailingList> {
        Ok(self.store.save_mailing_list(&list.with_default_list_id()).await?)
    }

    /// Fetch a list, creating it with default attributes on first use.
    pub async fn ensure_mailing_list(&self, name: &str) -> ArchiveResult<MailingList> {
        match self.store.get_mailing_list(name).await? {
            Some(list) => Ok(list),
            None => {
                log::info!("archive: creating mailing list {}", name);
                self.save_mailing_list(MailingList::new(name)).await
            }
        }
    }

    pub async fn create_user(&self, username: &str) -> ArchiveResult<User> {
        Ok(self.store.create_user(username).await?)
    }

    /// Store an email, creating its list and thread when needed.
    pub async fn add_email(&self, email: &NewEmail, mode: ImportMode) -> ArchiveResult<Email> {
        Ok(self.add_email_with_thread(email, mode).await?.0)
    }

    async fn add_email_with_thread(
        &self,
        email: &NewEmail,
        mode: ImportMode,
    ) -> ArchiveResult<(Email, Thread)> {
        let list = self.ensure_mailing_list(&email.mailing_list).await?;

        let thread = match self.store.find_thread(&list.name, &email.thread_key).await? {
            Some(thread) => thread,
            None => {
                let thread = self
                    .store
                    .create_thread(&list.name, &email.thread_key, email.date)
                    .await?;
                self.emit(ChangeEvent::ThreadCreated(thread.clone()), mode).await?;
                thread
            }
        };

        let stored = self.store.insert_email(thread.id, email).await?;
        self.emit(ChangeEvent::EmailAdded(stored.clone()), mode).await?;
        Ok((stored, thread))
    }

    pub async fn delete_email(&self, email_id: i32, mode: ImportMode) -> ArchiveResult<Option<Email>> {
        let deleted = self.store.delete_email(email_id).await?;
        if let Some(email) = &deleted {
            self.emit(ChangeEvent::EmailDeleted(email.clone()), mode).await?;
        }
        Ok(deleted)
    }

    pub async fn delete_thread(&self, thread_id: i32, mode: ImportMode) -> ArchiveResult<Option<Thread>> {
        let deleted = self.store.delete_thread(thread_id).await?;
        if let Some(thread) = &deleted {
            self.emit(ChangeEvent::ThreadDeleted(thread.clone()), mode).await?;
        }
        Ok(deleted)
    }

    /// Cast or update a user's vote on an email.
    pub async fn vote(
        &self,
        email_id: i32,
        user_id: i32,
        value: i16,
        mode: ImportMode,
    ) -> ArchiveResult<Vote> {
        if value != 1 && value != -1 {
            return Err(StoreError::InvalidVote(value).into());
        }
        let email = self.existing_email(email_id).await?;

        self.emit(ChangeEvent::VoteChanging(email.clone()), mode).await?;
        let vote = self.store.upsert_vote(email_id, user_id, value).await?;
        self.emit(ChangeEvent::VoteChanged(email), mode).await?;
        Ok(vote)
    }

    pub async fn retract_vote(
        &self,
        email_id: i32,
        user_id: i32,
        mode: ImportMode,
    ) -> ArchiveResult<Option<Vote>> {
        let email = self.existing_email(email_id).await?;

        self.emit(ChangeEvent::VoteChanging(email.clone()), mode).await?;
        let removed = self.store.delete_vote(email_id, user_id).await?;
        if removed.is_some() {
            self.emit(ChangeEvent::VoteChanged(email), mode).await?;
        }
        Ok(removed)
    }

    /// Mark the thread as seen by the user now.
    pub async fn record_view(&self, thread_id: i32, user_id: i32) -> ArchiveResult<LastView> {
        Ok(self.store.touch_last_view(thread_id, user_id, Utc::now()).await?)
    }

    pub fn begin_batch(&self) -> BatchImport<'_> {
        BatchImport {
            archive: self,
            lists: BTreeSet::new(),
            months: BTreeSet::new(),
            threads: BTreeSet::new(),
            emails: 0,
        }
    }

    async fn existing_email(&self, email_id: i32) -> ArchiveResult<Email> {
        self.store
            .get_email(email_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("email {}", email_id)).into())
    }

    async fn emit(&self, event: ChangeEvent, mode: ImportMode) -> ArchiveResult<()> {
        Ok(self.invalidator.handle(&event, mode).await?)
    }
}

/// What a finished batch import scheduled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub emails: usize,
    pub lists: usize,
    pub months: usize,
    pub threads: usize,
}

/// Bulk import session.
///
/// Emails go in with [`ImportMode::Batch`]; the session remembers which
/// lists, months and threads were touched and [`finish`](Self::finish)
/// schedules one rebuild for each.
pub struct BatchImport<'a> {
    archive: &'a Archive,
    lists: BTreeSet<String>,
    months: BTreeSet<(String, i32, u32)>,
    threads: BTreeSet<i32>,
    emails: usize,
}

impl BatchImport<'_> {
    pub async fn add_email(&mut self, email: &NewEmail) -> ArchiveResult<Email> {
        let (stored, thread) = self
            .archive
            .add_email_with_thread(email, ImportMode::Batch)
            .await?;

        self.lists.insert(thread.mailing_list.clone());
        self.months.insert((
            stored.mailing_list.clone(),
            stored.date.year(),
            stored.date.month(),
        ));
        self.threads.insert(thread.id);
        self.emails += 1;
        Ok(stored)
    }

    pub async fn finish(self) -> ArchiveResult<BatchSummary> {
        let scheduler = self.archive.invalidator.scheduler();

        for list in &self.lists {
            scheduler
                .delay(RecomputeTask::RebuildRecentThreads {
                    mailing_list: list.clone(),
                })
                .await?;
        }
        for (list, year, month) in &self.months {
            scheduler
                .delay(RecomputeTask::RebuildListAfterEmail {
                    mailing_list: list.clone(),
                    year: *year,
                    month: *month,
                })
                .await?;
        }
        for thread_id in &self.threads {
            scheduler
                .delay(RecomputeTask::RebuildThreadAfterEmail {
                    thread_id: *thread_id,
                })
                .await?;
        }

        let summary = BatchSummary {
            emails: self.emails,
            lists: self.lists.len(),
            months: self.months.len(),
            threads: self.threads.len(),
        };
        log::info!(
            "archive: batch import of {} emails finished, rebuilding {} lists, {} months, {} threads",
            summary.emails,
            summary.lists,
            summary.months,
            summary.threads
        );
        Ok(summary)
    }
}
