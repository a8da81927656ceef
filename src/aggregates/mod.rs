//! Derived aggregates over the entity store.
//!
//! Each aggregate is a deterministic function of the store, read through
//! the cache under its [`CacheKey`](crate::cache::CacheKey). List-level
//! aggregates live in `mailing_list`, thread and email ones in `thread`.

mod mailing_list;
mod thread;
mod window;

pub use window::{DateWindow, month_window, previous_months, recent_window};

use crate::cache::AggregateCache;
use crate::config::ArchiveConfig;
use crate::models::Thread;
use crate::store::{ArchiveStore, StoreResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Number of threads kept by the top and popular thread rankings.
pub const THREAD_RANKING_SIZE: usize = 20;
/// Number of senders kept by the top posters ranking.
pub const TOP_POSTERS_SIZE: usize = 5;

#[derive(Clone)]
pub struct Aggregates {
    store: Arc<dyn ArchiveStore>,
    cache: AggregateCache,
    recent_participants_ttl: Duration,
    top_threads_ttl: Duration,
}

impl Aggregates {
    pub fn new(store: Arc<dyn ArchiveStore>, cache: AggregateCache, config: &ArchiveConfig) -> Self {
        Self {
            store,
            cache,
            recent_participants_ttl: config.recent_participants_ttl,
            top_threads_ttl: config.top_threads_ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn ArchiveStore> {
        &self.store
    }

    pub fn cache(&self) -> &AggregateCache {
        &self.cache
    }

    /// Load threads by id, keeping the order of `ids`. Ids of threads that
    /// no longer exist are skipped.
    async fn threads_in_order(&self, ids: &[i32]) -> StoreResult<Vec<Thread>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut by_id: HashMap<i32, Thread> = self
            .store
            .get_threads(ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use crate::models::{Email, MailingList, NewEmail};
    use crate::store::MemoryArchiveStore;
    use chrono::{DateTime, Utc};

    pub const LIST: &str = "dev@example.org";

    pub struct Fixture {
        pub store: Arc<MemoryArchiveStore>,
        pub aggregates: Aggregates,
    }

    impl Fixture {
        pub async fn new() -> Self {
            let store = Arc::new(MemoryArchiveStore::new());
            store.save_mailing_list(&MailingList::new(LIST)).await.unwrap();
            let aggregates = Aggregates::new(
                store.clone(),
                AggregateCache::in_memory(),
                &ArchiveConfig::inline(),
            );
            Self { store, aggregates }
        }

        pub async fn email(
            &self,
            thread_key: &str,
            message_id: &str,
            sender: &str,
            date: DateTime<Utc>,
        ) -> Email {
            let thread = match self.store.find_thread(LIST, thread_key).await.unwrap() {
                Some(thread) => thread,
                None => self.store.create_thread(LIST, thread_key, date).await.unwrap(),
            };
            let email = NewEmail {
                mailing_list: LIST.to_string(),
                thread_key: thread_key.to_string(),
                message_id: message_id.to_string(),
                sender_address: sender.to_string(),
                sender_name: sender.split('@').next().unwrap_or_default().to_string(),
                subject: format!("Re: {}", thread_key),
                content: String::new(),
                date,
                in_reply_to: None,
                parent_id: None,
            };
            self.store.insert_email(thread.id, &email).await.unwrap()
        }
    }
}
