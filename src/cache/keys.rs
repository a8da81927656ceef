//! Typed cache keys.
//!
//! Every aggregate lives under a key of the form `<Entity>:<id>:<metric>`.
//! Building keys through [`CacheKey`] keeps the writers (aggregates,
//! invalidation triggers, recompute tasks) in agreement on the spelling.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    RecentParticipantsCount { list: String },
    RecentThreads { list: String },
    RecentThreadsCount { list: String },
    ParticipantsForMonth { list: String, year: i32, month: u32 },
    TopPosters { list: String },
    TopThreads { list: String },
    PopularThreads { list: String },
    ThreadParticipantsCount(i32),
    ThreadEmailsCount(i32),
    ThreadSubject(i32),
    ThreadVotes(i32),
    ThreadVotesTotal(i32),
    EmailVotes(i32),
    /// Dedup lock of a pending recompute task, holding its job id.
    TaskLock(String),
}

impl CacheKey {
    pub fn recent_participants_count(list: &str) -> Self {
        CacheKey::RecentParticipantsCount { list: list.to_string() }
    }

    pub fn recent_threads(list: &str) -> Self {
        CacheKey::RecentThreads { list: list.to_string() }
    }

    pub fn recent_threads_count(list: &str) -> Self {
        CacheKey::RecentThreadsCount { list: list.to_string() }
    }

    pub fn participants_for_month(list: &str, year: i32, month: u32) -> Self {
        CacheKey::ParticipantsForMonth {
            list: list.to_string(),
            year,
            month,
        }
    }

    pub fn top_posters(list: &str) -> Self {
        CacheKey::TopPosters { list: list.to_string() }
    }

    pub fn top_threads(list: &str) -> Self {
        CacheKey::TopThreads { list: list.to_string() }
    }

    pub fn popular_threads(list: &str) -> Self {
        CacheKey::PopularThreads { list: list.to_string() }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::RecentParticipantsCount { list } => {
                write!(f, "MailingList:{list}:recent_participants_count")
            }
            CacheKey::RecentThreads { list } => write!(f, "MailingList:{list}:recent_threads"),
            // Kept as the `_count` sibling of the recent_threads key.
            CacheKey::RecentThreadsCount { list } => {
                write!(f, "MailingList:{list}:recent_threads_count")
            }
            CacheKey::ParticipantsForMonth { list, year, month } => {
                write!(f, "MailingList:{list}:p_count_for:{year}:{month}")
            }
            CacheKey::TopPosters { list } => write!(f, "MailingList:{list}:top_posters"),
            CacheKey::TopThreads { list } => write!(f, "MailingList:{list}:top_threads"),
            CacheKey::PopularThreads { list } => write!(f, "MailingList:{list}:popular_threads"),
            CacheKey::ThreadParticipantsCount(id) => write!(f, "Thread:{id}:participants_count"),
            CacheKey::ThreadEmailsCount(id) => write!(f, "Thread:{id}:emails_count"),
            CacheKey::ThreadSubject(id) => write!(f, "Thread:{id}:subject"),
            CacheKey::ThreadVotes(id) => write!(f, "Thread:{id}:votes"),
            CacheKey::ThreadVotesTotal(id) => write!(f, "Thread:{id}:votes_total"),
            CacheKey::EmailVotes(id) => write!(f, "Email:{id}:votes"),
            CacheKey::TaskLock(lock) => write!(f, "task:status:{lock}"),
        }
    }
}
