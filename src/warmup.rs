//! Cache warm-up.
//!
//! Primes the aggregates readers hit first: the recent aggregates of each
//! list, every recent thread, and the threads of the trailing months.

use crate::aggregates::{Aggregates, previous_months};
use crate::models::{MailingList, Thread};
use crate::store::{StoreError, StoreResult};
use chrono::Utc;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Upper bound on the trailing months a single run may warm.
pub const MAX_WARM_UP_MONTHS: u32 = 1200;

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct WarmUpReport {
    pub lists: Vec<String>,
    #[serde(rename = "threadsWarmed")]
    pub threads_warmed: usize,
    #[serde(rename = "monthsWarmed")]
    pub months_warmed: usize,
}

#[derive(Clone)]
pub struct WarmUp {
    aggregates: Aggregates,
}

impl WarmUp {
    pub fn new(aggregates: Aggregates) -> Self {
        Self { aggregates }
    }

    /// Warm the named lists, or every list ordered by name when `lists` is
    /// empty, plus the `months` calendar months before the current one.
    pub async fn warm_up(&self, lists: &[String], months: u32) -> StoreResult<WarmUpReport> {
        if months > MAX_WARM_UP_MONTHS {
            return Err(StoreError::MonthRange {
                months,
                max: MAX_WARM_UP_MONTHS,
            });
        }
        let store = self.aggregates.store();
        let targets: Vec<MailingList> = if lists.is_empty() {
            store.list_mailing_lists().await?
        } else {
            let mut targets = Vec::with_capacity(lists.len());
            for name in lists {
                let list = store
                    .get_mailing_list(name)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("mailing list {}", name)))?;
                targets.push(list);
            }
            targets
        };

        let mut report = WarmUpReport::default();
        for list in &targets {
            log::info!("warm-up: warming up cache for {}", list.name);
            self.warm_up_list(&list.name, months, &mut report).await?;
            report.lists.push(list.name.clone());
        }

        log::info!(
            "warm-up: {} lists, {} threads, {} months",
            report.lists.len(),
            report.threads_warmed,
            report.months_warmed
        );
        Ok(report)
    }

    async fn warm_up_list(&self, list: &str, months: u32, report: &mut WarmUpReport) -> StoreResult<()> {
        let aggregates = &self.aggregates;

        aggregates.rebuild_recent_threads(list).await?;
        aggregates.recent_participants_count(list).await?;
        aggregates.top_threads(list).await?;
        aggregates.top_posters(list).await?;
        aggregates.popular_threads(list).await?;
        for thread in aggregates.recent_threads(list).await? {
            self.warm_up_thread(&thread).await?;
            report.threads_warmed += 1;
        }

        for (year, month) in previous_months(Utc::now(), months) {
            aggregates.participants_count_for_month(list, year, month).await?;
            for thread in aggregates.threads_for_month(list, year, month).await? {
                self.warm_up_thread(&thread).await?;
                report.threads_warmed += 1;
            }
            report.months_warmed += 1;
        }
        Ok(())
    }

    async fn warm_up_thread(&self, thread: &Thread) -> StoreResult<()> {
        let aggregates = &self.aggregates;
        aggregates.thread_subject(thread).await?;
        aggregates.thread_emails_count(thread.id).await?;
        aggregates.thread_participants_count(thread.id).await?;
        aggregates.thread_votes_total(thread.id).await?;
        for email in aggregates.store().thread_emails(thread.id).await? {
            aggregates.email_votes(email.id).await?;
        }
        aggregates.thread_votes(thread.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::test_helpers::{Fixture, LIST};
    use crate::cache::CacheKey;
    use crate::models::TopPoster;
    use chrono::{Datelike, Duration};

    #[tokio::test]
    async fn empty_list_warms_to_empty_aggregates() {
        let fx = Fixture::new().await;
        let report = WarmUp::new(fx.aggregates.clone())
            .warm_up(&[LIST.to_string()], 1)
            .await
            .unwrap();

        assert_eq!(report.lists, vec![LIST.to_string()]);
        assert_eq!(report.threads_warmed, 0);
        assert_eq!(report.months_warmed, 1);

        let cache = fx.aggregates.cache();
        assert_eq!(cache.get::<Vec<i32>>(&CacheKey::recent_threads(LIST)).await, Some(vec![]));
        assert_eq!(
            cache.get::<Vec<TopPoster>>(&CacheKey::top_posters(LIST)).await,
            Some(vec![])
        );
    }

    #[tokio::test]
    async fn unknown_list_is_an_error() {
        let fx = Fixture::new().await;
        let err = WarmUp::new(fx.aggregates.clone())
            .warm_up(&["nope@example.org".to_string()], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn month_count_is_capped() {
        let fx = Fixture::new().await;
        let warm_up = WarmUp::new(fx.aggregates.clone());

        let err = warm_up.warm_up(&[], u32::MAX).await.unwrap_err();
        assert!(matches!(err, StoreError::MonthRange { months: u32::MAX, max: MAX_WARM_UP_MONTHS }));
        let err = warm_up.warm_up(&[], MAX_WARM_UP_MONTHS + 1).await.unwrap_err();
        assert!(matches!(err, StoreError::MonthRange { .. }));
        assert_eq!(
            fx.aggregates.cache().get::<Vec<i32>>(&CacheKey::recent_threads(LIST)).await,
            None
        );

        let report = warm_up.warm_up(&[], MAX_WARM_UP_MONTHS).await.unwrap();
        assert_eq!(report.months_warmed, MAX_WARM_UP_MONTHS as usize);
    }

    #[tokio::test]
    async fn warms_recent_and_previous_month_threads() {
        let fx = Fixture::new().await;
        let now = Utc::now();
        let recent = fx.email("recent", "<r>", "a@example.org", now - Duration::hours(1)).await;

        let (year, month) = previous_months(now, 2)[1];
        let old_date = chrono::TimeZone::with_ymd_and_hms(&Utc, year, month, 15, 12, 0, 0).unwrap();
        let old = fx.email("old", "<o>", "b@example.org", old_date).await;

        let report = WarmUp::new(fx.aggregates.clone()).warm_up(&[], 2).await.unwrap();
        assert_eq!(report.months_warmed, 2);
        assert!(report.threads_warmed >= 2);

        let cache = fx.aggregates.cache();
        assert_eq!(
            cache.get::<i64>(&CacheKey::ThreadEmailsCount(recent.thread_id)).await,
            Some(1)
        );
        assert_eq!(
            cache.get::<String>(&CacheKey::ThreadSubject(old.thread_id)).await,
            Some(old.subject.clone())
        );
        assert_eq!(
            cache
                .get::<i64>(&CacheKey::participants_for_month(LIST, old_date.year(), old_date.month()))
                .await,
            Some(1)
        );
    }
}
