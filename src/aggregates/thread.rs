use super::Aggregates;
use crate::cache::CacheKey;
use crate::models::{LastView, Thread, ThreadSummary, UnreadStatus, VoteTally};
use crate::store::StoreResult;

impl Aggregates {
    pub async fn thread_participants_count(&self, thread_id: i32) -> StoreResult<i64> {
        self.cache
            .get_or_set(&CacheKey::ThreadParticipantsCount(thread_id), None, move || async move {
                self.store.thread_participants_count(thread_id).await
            })
            .await
    }

    pub async fn thread_emails_count(&self, thread_id: i32) -> StoreResult<i64> {
        self.cache
            .get_or_set(&CacheKey::ThreadEmailsCount(thread_id), None, move || async move {
                self.store.thread_emails_count(thread_id).await
            })
            .await
    }

    /// Subject of the starting email. A thread without one reads as an empty
    /// subject, which is not cached.
    pub async fn thread_subject(&self, thread: &Thread) -> StoreResult<String> {
        let Some(email_id) = thread.starting_email_id else {
            return Ok(String::new());
        };
        self.cache
            .get_or_set(&CacheKey::ThreadSubject(thread.id), None, move || async move {
                let email = self.store.get_email(email_id).await;
                email.map(|email| email.map(|e| e.subject).unwrap_or_default())
            })
            .await
    }

    pub async fn thread_votes(&self, thread_id: i32) -> StoreResult<VoteTally> {
        self.cache
            .get_or_set(&CacheKey::ThreadVotes(thread_id), None, move || async move {
                self.store.thread_votes(thread_id).await
            })
            .await
    }

    /// Sum of every vote on the thread's emails, zero without votes.
    pub async fn thread_votes_total(&self, thread_id: i32) -> StoreResult<i64> {
        self.cache
            .get_or_set(&CacheKey::ThreadVotesTotal(thread_id), None, move || async move {
                self.thread_votes(thread_id).await.map(|tally| tally.total())
            })
            .await
    }

    pub async fn email_votes(&self, email_id: i32) -> StoreResult<VoteTally> {
        self.cache
            .get_or_set(&CacheKey::EmailVotes(email_id), None, move || async move {
                self.store.email_votes(email_id).await
            })
            .await
    }

    /// The user's view of the thread. Duplicate rows left by older data are
    /// deleted, keeping the newest.
    pub async fn last_view(&self, thread_id: i32, user_id: i32) -> StoreResult<Option<LastView>> {
        let mut views = self.store.last_views(thread_id, user_id).await?;
        let Some(newest) = views.pop() else {
            return Ok(None);
        };
        for duplicate in views {
            log::debug!(
                "aggregates: removing duplicate last view {} of thread {} for user {}",
                duplicate.id,
                thread_id,
                user_id
            );
            self.store.delete_last_view(duplicate.id).await?;
        }
        Ok(Some(newest))
    }

    pub async fn is_unread_by(&self, thread: &Thread, user_id: i32) -> StoreResult<bool> {
        Ok(match self.last_view(thread.id, user_id).await? {
            Some(view) => thread.date_active > view.view_date,
            None => true,
        })
    }

    /// Emails the user has not seen yet. Without a recorded view every email
    /// counts as unread.
    pub async fn num_unread(&self, thread: &Thread, user_id: i32) -> StoreResult<i64> {
        match self.last_view(thread.id, user_id).await? {
            None => self.thread_emails_count(thread.id).await,
            Some(view) if thread.date_active <= view.view_date => Ok(0),
            Some(view) => self.store.thread_emails_after(thread.id, view.view_date).await,
        }
    }

    pub async fn unread_status(&self, thread: &Thread, user_id: i32) -> StoreResult<UnreadStatus> {
        let num_unread = self.num_unread(thread, user_id).await?;
        Ok(UnreadStatus {
            thread_id: thread.id,
            user_id,
            unread: num_unread > 0,
            num_unread,
        })
    }

    pub async fn thread_summary(&self, thread: &Thread) -> StoreResult<ThreadSummary> {
        Ok(ThreadSummary {
            id: thread.id,
            thread_id: thread.thread_id.clone(),
            mailing_list: thread.mailing_list.clone(),
            subject: self.thread_subject(thread).await?,
            date_active: thread.date_active,
            emails_count: self.thread_emails_count(thread.id).await?,
            participants_count: self.thread_participants_count(thread.id).await?,
            votes_total: self.thread_votes_total(thread.id).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_helpers::Fixture;
    use crate::cache::CacheKey;
    use crate::models::VoteTally;
    use crate::store::ArchiveStore;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn votes_total_sums_likes_and_dislikes() {
        let fx = Fixture::new().await;
        let now = Utc::now();
        let first = fx.email("t", "<1>", "a@example.org", now).await;
        let second = fx.email("t", "<2>", "b@example.org", now).await;
        let users = [
            fx.store.create_user("u1").await.unwrap(),
            fx.store.create_user("u2").await.unwrap(),
            fx.store.create_user("u3").await.unwrap(),
        ];
        fx.store.upsert_vote(first.id, users[0].id, 1).await.unwrap();
        fx.store.upsert_vote(second.id, users[1].id, 1).await.unwrap();
        fx.store.upsert_vote(second.id, users[2].id, -1).await.unwrap();

        let aggregates = &fx.aggregates;
        assert_eq!(aggregates.thread_votes_total(first.thread_id).await.unwrap(), 1);
        assert_eq!(
            aggregates.thread_votes(first.thread_id).await.unwrap(),
            VoteTally { likes: 2, dislikes: 1 }
        );
        assert_eq!(
            aggregates.email_votes(second.id).await.unwrap(),
            VoteTally { likes: 1, dislikes: 1 }
        );
    }

    #[tokio::test]
    async fn votes_total_is_zero_without_votes() {
        let fx = Fixture::new().await;
        let email = fx.email("t", "<1>", "a@example.org", Utc::now()).await;
        assert_eq!(fx.aggregates.thread_votes_total(email.thread_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn subject_comes_from_the_starting_email() {
        let fx = Fixture::new().await;
        let now = Utc::now();
        let first = fx.email("t", "<1>", "a@example.org", now).await;
        fx.email("t", "<2>", "b@example.org", now + Duration::minutes(5)).await;
        let thread = fx.store.get_thread(first.thread_id).await.unwrap().unwrap();

        assert_eq!(fx.aggregates.thread_subject(&thread).await.unwrap(), first.subject);
        assert_eq!(
            fx.aggregates
                .cache()
                .get::<String>(&CacheKey::ThreadSubject(thread.id))
                .await,
            Some(first.subject.clone())
        );
    }

    #[tokio::test]
    async fn missing_starting_email_is_not_cached() {
        let fx = Fixture::new().await;
        let first = fx.email("t", "<1>", "a@example.org", Utc::now()).await;
        fx.store.delete_email(first.id).await.unwrap();
        let thread = fx.store.get_thread(first.thread_id).await.unwrap().unwrap();
        assert_eq!(thread.starting_email_id, None);

        assert_eq!(fx.aggregates.thread_subject(&thread).await.unwrap(), "");
        assert_eq!(
            fx.aggregates
                .cache()
                .get::<String>(&CacheKey::ThreadSubject(thread.id))
                .await,
            None
        );
    }

    #[tokio::test]
    async fn num_unread_follows_the_last_view() {
        let fx = Fixture::new().await;
        let start = Utc::now() - Duration::days(2);
        let first = fx.email("t", "<1>", "a@example.org", start).await;
        fx.email("t", "<2>", "b@example.org", start + Duration::hours(1)).await;
        fx.email("t", "<3>", "c@example.org", start + Duration::hours(2)).await;
        let user = fx.store.create_user("reader").await.unwrap();
        let thread = fx.store.get_thread(first.thread_id).await.unwrap().unwrap();

        // never viewed: everything is unread
        assert_eq!(fx.aggregates.num_unread(&thread, user.id).await.unwrap(), 3);
        assert!(fx.aggregates.is_unread_by(&thread, user.id).await.unwrap());

        fx.store
            .touch_last_view(thread.id, user.id, start + Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(fx.aggregates.num_unread(&thread, user.id).await.unwrap(), 2);

        fx.store
            .touch_last_view(thread.id, user.id, thread.date_active)
            .await
            .unwrap();
        assert_eq!(fx.aggregates.num_unread(&thread, user.id).await.unwrap(), 0);
        assert!(!fx.aggregates.is_unread_by(&thread, user.id).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_last_views_are_repaired_keeping_the_newest() {
        let fx = Fixture::new().await;
        let start = Utc::now() - Duration::days(1);
        let email = fx.email("t", "<1>", "a@example.org", start).await;
        let user = fx.store.create_user("reader").await.unwrap();
        fx.store.insert_last_view(email.thread_id, user.id, start - Duration::hours(1));
        let newest = fx.store.insert_last_view(email.thread_id, user.id, start + Duration::hours(1));

        let view = fx.aggregates.last_view(email.thread_id, user.id).await.unwrap();
        assert_eq!(view, Some(newest.clone()));
        assert_eq!(
            fx.store.last_views(email.thread_id, user.id).await.unwrap(),
            vec![newest]
        );
    }
}
