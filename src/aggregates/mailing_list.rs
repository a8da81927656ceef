use super::{
    Aggregates, THREAD_RANKING_SIZE, TOP_POSTERS_SIZE, month_window, recent_window,
};
use crate::cache::CacheKey;
use crate::models::{ListOverview, MailingList, MonthSummary, Thread, ThreadSummary, TopPoster};
use crate::store::{StoreError, StoreResult};
use chrono::Utc;
use std::collections::HashMap;

impl Aggregates {
    /// Distinct senders over the recent window.
    pub async fn recent_participants_count(&self, list: &str) -> StoreResult<i64> {
        let window = recent_window(Utc::now());
        self.cache
            .get_or_set(
                &CacheKey::recent_participants_count(list),
                Some(self.recent_participants_ttl),
                move || async move { self.store.participants_count_between(list, &window).await },
            )
            .await
    }

    /// Threads of the recent window, most recently active first.
    ///
    /// Only the ids are cached. The entry has no TTL: new emails move their
    /// thread to the front and a periodic rebuild drops threads that aged out.
    pub async fn recent_threads(&self, list: &str) -> StoreResult<Vec<Thread>> {
        let key = CacheKey::recent_threads(list);
        if let Some(ids) = self.cache.get::<Vec<i32>>(&key).await {
            return self.threads_in_order(&ids).await;
        }

        let threads = self
            .store
            .threads_between(list, &recent_window(Utc::now()))
            .await?;
        let ids: Vec<i32> = threads.iter().map(|t| t.id).collect();
        self.cache.set(&key, ids, None).await;
        Ok(threads)
    }

    pub async fn recent_thread_ids(&self, list: &str) -> StoreResult<Vec<i32>> {
        let key = CacheKey::recent_threads(list);
        if let Some(ids) = self.cache.get::<Vec<i32>>(&key).await {
            return Ok(ids);
        }
        Ok(self.recent_threads(list).await?.iter().map(|t| t.id).collect())
    }

    pub async fn recent_threads_count(&self, list: &str) -> StoreResult<i64> {
        let window = recent_window(Utc::now());
        self.cache
            .get_or_set(&CacheKey::recent_threads_count(list), None, move || async move {
                let threads = self.store.threads_between(list, &window).await;
                threads.map(|threads| threads.len() as i64)
            })
            .await
    }

    /// Recompute the recent threads and their count from the store,
    /// replacing whatever was cached.
    pub async fn rebuild_recent_threads(&self, list: &str) -> StoreResult<Vec<i32>> {
        let key = CacheKey::recent_threads(list);
        let count_key = CacheKey::recent_threads_count(list);
        self.cache.delete(&key).await;
        self.cache.delete(&count_key).await;

        let ids: Vec<i32> = self
            .store
            .threads_between(list, &recent_window(Utc::now()))
            .await?
            .iter()
            .map(|t| t.id)
            .collect();
        self.cache.set(&key, ids.clone(), None).await;
        self.cache.set(&count_key, ids.len() as i64, None).await;
        Ok(ids)
    }

    /// The five most active senders over the recent window.
    pub async fn top_posters(&self, list: &str) -> StoreResult<Vec<TopPoster>> {
        let window = recent_window(Utc::now());
        self.cache
            .get_or_set(&CacheKey::top_posters(list), None, move || async move {
                let posters = self.store.poster_counts_between(list, &window).await;
                posters.map(|mut posters| {
                    posters.truncate(TOP_POSTERS_SIZE);
                    posters
                })
            })
            .await
    }

    /// Recent threads with the most emails.
    pub async fn top_threads(&self, list: &str) -> StoreResult<Vec<Thread>> {
        let key = CacheKey::top_threads(list);
        if let Some(ids) = self.cache.get::<Vec<i32>>(&key).await {
            return self.threads_in_order(&ids).await;
        }

        let mut threads = self.recent_threads(list).await?;
        let ids: Vec<i32> = threads.iter().map(|t| t.id).collect();
        let counts: HashMap<i32, i64> = self
            .store
            .thread_email_counts(&ids)
            .await?
            .into_iter()
            .collect();

        // stable: equal counts keep the recent order
        threads.sort_by_key(|t| std::cmp::Reverse(counts.get(&t.id).copied().unwrap_or(0)));
        threads.truncate(THREAD_RANKING_SIZE);

        let ids: Vec<i32> = threads.iter().map(|t| t.id).collect();
        self.cache.set(&key, ids, Some(self.top_threads_ttl)).await;
        Ok(threads)
    }

    /// Recent threads with the highest positive vote sum.
    ///
    /// Every sum computed on the way is cached as the thread's `votes_total`.
    pub async fn popular_threads(&self, list: &str) -> StoreResult<Vec<Thread>> {
        let key = CacheKey::popular_threads(list);
        if let Some(ids) = self.cache.get::<Vec<i32>>(&key).await {
            return self.threads_in_order(&ids).await;
        }

        let mut threads = self.recent_threads(list).await?;
        let ids: Vec<i32> = threads.iter().map(|t| t.id).collect();
        let sums: HashMap<i32, i64> = self
            .store
            .thread_vote_sums(&ids)
            .await?
            .into_iter()
            .collect();
        let sum_of = |thread: &Thread| sums.get(&thread.id).copied().unwrap_or(0);

        threads.sort_by_key(|t| std::cmp::Reverse(sum_of(t)));
        threads.truncate(THREAD_RANKING_SIZE);
        for thread in &threads {
            self.cache
                .set(&CacheKey::ThreadVotesTotal(thread.id), sum_of(thread), None)
                .await;
        }
        threads.retain(|t| sum_of(t) > 0);

        let ids: Vec<i32> = threads.iter().map(|t| t.id).collect();
        self.cache.set(&key, ids, None).await;
        Ok(threads)
    }

    /// Distinct senders in a calendar month. Past months do not change, so
    /// the value is kept until invalidated.
    pub async fn participants_count_for_month(
        &self,
        list: &str,
        year: i32,
        month: u32,
    ) -> StoreResult<i64> {
        let window = month_window(year, month).ok_or(StoreError::InvalidMonth { year, month })?;
        self.cache
            .get_or_set(
                &CacheKey::participants_for_month(list, year, month),
                None,
                move || async move { self.store.participants_count_between(list, &window).await },
            )
            .await
    }

    /// Threads active during a calendar month. Not cached.
    pub async fn threads_for_month(&self, list: &str, year: i32, month: u32) -> StoreResult<Vec<Thread>> {
        let window = month_window(year, month).ok_or(StoreError::InvalidMonth { year, month })?;
        self.store.threads_between(list, &window).await
    }

    pub async fn list_overview(&self, list: &MailingList) -> StoreResult<ListOverview> {
        let name = list.name.as_str();
        Ok(ListOverview {
            list: list.clone(),
            is_new: list.is_new(),
            recent_participants_count: self.recent_participants_count(name).await?,
            recent_threads_count: self.recent_threads_count(name).await?,
            top_posters: self.top_posters(name).await?,
            top_threads: self.thread_summaries(&self.top_threads(name).await?).await?,
            popular_threads: self.thread_summaries(&self.popular_threads(name).await?).await?,
        })
    }

    pub async fn month_summary(&self, list: &str, year: i32, month: u32) -> StoreResult<MonthSummary> {
        let participants_count = self.participants_count_for_month(list, year, month).await?;
        let threads = self.threads_for_month(list, year, month).await?;
        Ok(MonthSummary {
            mailing_list: list.to_string(),
            year,
            month,
            participants_count,
            threads: self.thread_summaries(&threads).await?,
        })
    }

    async fn thread_summaries(&self, threads: &[Thread]) -> StoreResult<Vec<ThreadSummary>> {
        let mut summaries = Vec::with_capacity(threads.len());
        for thread in threads {
            summaries.push(self.thread_summary(thread).await?);
        }
        Ok(summaries)
    }
}
