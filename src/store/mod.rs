//! Entity store for the archive.
//!
//! The aggregates, triggers and recompute tasks only talk to the archive
//! through [`ArchiveStore`]: filtered reads, counts and sums over the
//! entity graph plus the mutations the archive API performs.
//!
//! - `postgres`: production store on the migrated schema
//! - `memory`: in-process store with the same semantics, used by tests and
//!   single-node development

pub mod memory;
pub mod postgres;

use crate::aggregates::DateWindow;
use crate::models::{Email, LastView, MailingList, NewEmail, Thread, TopPoster, User, Vote, VoteTally};
use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx;
use thiserror::Error;

pub use memory::MemoryArchiveStore;
pub use postgres::PgArchiveStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("invalid vote value {0}, expected -1 or 1")]
    InvalidVote(i16),
    #[error("invalid month {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },
    #[error("cannot warm up {months} months, at most {max}")]
    MonthRange { months: u32, max: u32 },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(db_err.message().to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[rocket::async_trait]
pub trait ArchiveStore: Send + Sync {
    // ----- mailing lists -----

    /// Insert or update a list by name.
    async fn save_mailing_list(&self, list: &MailingList) -> StoreResult<MailingList>;

    async fn get_mailing_list(&self, name: &str) -> StoreResult<Option<MailingList>>;

    /// All lists ordered by name.
    async fn list_mailing_lists(&self) -> StoreResult<Vec<MailingList>>;

    // ----- users -----

    async fn create_user(&self, username: &str) -> StoreResult<User>;

    // ----- threads -----

    async fn create_thread(
        &self,
        list: &str,
        thread_key: &str,
        date_active: DateTime<Utc>,
    ) -> StoreResult<Thread>;

    async fn find_thread(&self, list: &str, thread_key: &str) -> StoreResult<Option<Thread>>;

    async fn get_thread(&self, id: i32) -> StoreResult<Option<Thread>>;

    /// Threads with the given ids, in no particular order; unknown ids are skipped.
    async fn get_threads(&self, ids: &[i32]) -> StoreResult<Vec<Thread>>;

    /// Delete a thread with its emails, their votes and the thread's last views.
    async fn delete_thread(&self, id: i32) -> StoreResult<Option<Thread>>;

    /// Threads started before `window.end` and active since `window.begin`,
    /// most recently active first. Threads without a starting email are skipped.
    async fn threads_between(&self, list: &str, window: &DateWindow) -> StoreResult<Vec<Thread>>;

    /// `(thread id, email count)` for each known id.
    async fn thread_email_counts(&self, ids: &[i32]) -> StoreResult<Vec<(i32, i64)>>;

    /// `(thread id, vote sum)` for each known id, zero when unvoted.
    async fn thread_vote_sums(&self, ids: &[i32]) -> StoreResult<Vec<(i32, i64)>>;

    async fn thread_participants_count(&self, thread_id: i32) -> StoreResult<i64>;

    async fn thread_emails_count(&self, thread_id: i32) -> StoreResult<i64>;

    /// Emails of a thread, oldest first.
    async fn thread_emails(&self, thread_id: i32) -> StoreResult<Vec<Email>>;

    /// Number of thread emails dated strictly after `after`.
    async fn thread_emails_after(&self, thread_id: i32, after: DateTime<Utc>) -> StoreResult<i64>;

    async fn thread_votes(&self, thread_id: i32) -> StoreResult<VoteTally>;

    // ----- emails -----

    /// Insert an email into an existing thread. Advances the thread's
    /// `date_active` and sets its starting email when it has none.
    async fn insert_email(&self, thread_id: i32, email: &NewEmail) -> StoreResult<Email>;

    async fn get_email(&self, id: i32) -> StoreResult<Option<Email>>;

    async fn delete_email(&self, id: i32) -> StoreResult<Option<Email>>;

    /// Parentless emails of the same list replying to `email`.
    async fn orphans_of(&self, email: &Email) -> StoreResult<Vec<Email>>;

    async fn set_parent(&self, email_id: i32, parent_id: i32) -> StoreResult<()>;

    /// Distinct senders of list emails dated within the window.
    async fn participants_count_between(&self, list: &str, window: &DateWindow) -> StoreResult<i64>;

    /// Message count per `(address, name)` within the window, highest first,
    /// ties ordered by address then name.
    async fn poster_counts_between(
        &self,
        list: &str,
        window: &DateWindow,
    ) -> StoreResult<Vec<TopPoster>>;

    async fn email_votes(&self, email_id: i32) -> StoreResult<VoteTally>;

    // ----- votes -----

    /// Create or update the `(email, user)` vote.
    async fn upsert_vote(&self, email_id: i32, user_id: i32, value: i16) -> StoreResult<Vote>;

    async fn find_vote(&self, email_id: i32, user_id: i32) -> StoreResult<Option<Vote>>;

    async fn delete_vote(&self, email_id: i32, user_id: i32) -> StoreResult<Option<Vote>>;

    // ----- last views -----

    /// Every view row of `(thread, user)`, oldest first.
    async fn last_views(&self, thread_id: i32, user_id: i32) -> StoreResult<Vec<LastView>>;

    async fn delete_last_view(&self, id: i32) -> StoreResult<()>;

    /// Move the newest view of `(thread, user)` to `at`, creating it if needed.
    async fn touch_last_view(
        &self,
        thread_id: i32,
        user_id: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<LastView>;
}
