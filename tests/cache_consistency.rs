use archive_server::aggregates::recent_window;
use archive_server::cache::{CacheKey, MemoryCache};
use archive_server::config::{ArchiveConfig, QueueMode};
use archive_server::invalidation::ImportMode;
use archive_server::models::{Email, NewEmail, TopPoster, VoteTally};
use archive_server::services::ArchiveServices;
use archive_server::store::{ArchiveStore, MemoryArchiveStore};
use archive_server::tasks::{JobHandle, JobStatus, MemoryJobQueue, RecomputeTask};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

const LIST: &str = "devel@lists.example.org";

struct Harness {
    store: Arc<MemoryArchiveStore>,
    queue: Arc<MemoryJobQueue>,
    services: ArchiveServices,
}

fn harness(mode: QueueMode) -> Harness {
    let store = Arc::new(MemoryArchiveStore::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let config = ArchiveConfig {
        queue_mode: mode,
        ..ArchiveConfig::inline()
    };
    let services = ArchiveServices::new(
        store.clone(),
        Arc::new(MemoryCache::new()),
        queue.clone(),
        config,
    );
    Harness {
        store,
        queue,
        services,
    }
}

fn new_email(thread_key: &str, message_id: &str, sender: &str, date: DateTime<Utc>) -> NewEmail {
    NewEmail {
        mailing_list: LIST.to_string(),
        thread_key: thread_key.to_string(),
        message_id: message_id.to_string(),
        sender_address: sender.to_string(),
        sender_name: sender.split('@').next().unwrap_or_default().to_string(),
        subject: format!("[devel] {thread_key}"),
        content: "body".to_string(),
        date,
        in_reply_to: None,
        parent_id: None,
    }
}

impl Harness {
    async fn add(&self, email: NewEmail, mode: ImportMode) -> Email {
        self.services
            .archive
            .add_email(&email, mode)
            .await
            .expect("email stored")
    }

    async fn drain(&self) -> usize {
        self.services
            .dispatcher()
            .drain()
            .await
            .expect("queue drained")
    }

    async fn cached_recent_threads(&self) -> Option<Vec<i32>> {
        self.services
            .aggregates
            .cache()
            .get::<Vec<i32>>(&CacheKey::recent_threads(LIST))
            .await
    }
}

#[tokio::test]
async fn cold_recent_threads_match_the_store_query() {
    let h = harness(QueueMode::Async);
    let now = Utc::now();
    h.add(new_email("a", "<a1>", "ann@example.org", now - Duration::days(2)), ImportMode::Batch)
        .await;
    h.add(new_email("b", "<b1>", "bob@example.org", now - Duration::hours(3)), ImportMode::Batch)
        .await;
    h.add(new_email("old", "<o1>", "ann@example.org", now - Duration::days(60)), ImportMode::Batch)
        .await;

    assert_eq!(h.cached_recent_threads().await, None);

    let from_cache: Vec<i32> = h
        .services
        .aggregates
        .recent_threads(LIST)
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    let from_store: Vec<i32> = h
        .store
        .threads_between(LIST, &recent_window(Utc::now()))
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();

    assert_eq!(from_cache.len(), 2);
    assert_eq!(from_cache, from_store);
}

#[tokio::test]
async fn live_email_puts_its_thread_first_in_recent_threads() {
    let h = harness(QueueMode::Async);
    let now = Utc::now();
    let fresh = h
        .add(new_email("fresh", "<f1>", "ann@example.org", now - Duration::hours(5)), ImportMode::Batch)
        .await;
    let stale = h
        .add(new_email("stale", "<s1>", "bob@example.org", now - Duration::days(45)), ImportMode::Batch)
        .await;

    h.services.aggregates.rebuild_recent_threads(LIST).await.unwrap();
    assert_eq!(h.cached_recent_threads().await, Some(vec![fresh.thread_id]));

    h.add(new_email("stale", "<s2>", "cat@example.org", now), ImportMode::Live)
        .await;

    assert_eq!(
        h.cached_recent_threads().await,
        Some(vec![stale.thread_id, fresh.thread_id])
    );
    assert_eq!(
        h.services
            .aggregates
            .cache()
            .get::<i64>(&CacheKey::recent_threads_count(LIST))
            .await,
        Some(2)
    );
}

#[tokio::test]
async fn retracting_the_last_like_drops_the_thread_from_popular() {
    let h = harness(QueueMode::Async);
    let email = h
        .add(new_email("vote", "<v1>", "ann@example.org", Utc::now()), ImportMode::Live)
        .await;
    let user = h.services.archive.create_user("dave").await.unwrap();

    h.services
        .archive
        .vote(email.id, user.id, 1, ImportMode::Live)
        .await
        .unwrap();
    h.drain().await;
    let popular = h.services.aggregates.popular_threads(LIST).await.unwrap();
    assert!(popular.iter().any(|t| t.id == email.thread_id));

    h.services
        .archive
        .retract_vote(email.id, user.id, ImportMode::Live)
        .await
        .unwrap();
    h.drain().await;
    let popular = h.services.aggregates.popular_threads(LIST).await.unwrap();
    assert!(popular.iter().all(|t| t.id != email.thread_id));
}

#[tokio::test]
async fn identical_delays_within_the_lock_ttl_share_a_job() {
    let h = harness(QueueMode::Async);
    let task = RecomputeTask::RebuildThreadVotes { thread_id: 7 };

    let first = h.services.scheduler.delay(task.clone()).await.unwrap();
    let second = h.services.scheduler.delay(task).await.unwrap();

    assert!(matches!(first, JobHandle::Enqueued(_)));
    assert_eq!(first.job_id(), second.job_id());
    assert_eq!(h.queue.jobs().len(), 1);
}

#[tokio::test]
async fn unread_counts_follow_the_last_view() {
    let h = harness(QueueMode::Async);
    let now = Utc::now();
    let first = h
        .add(new_email("t", "<1>", "ann@example.org", now - Duration::hours(3)), ImportMode::Batch)
        .await;
    h.add(new_email("t", "<2>", "bob@example.org", now - Duration::hours(2)), ImportMode::Batch)
        .await;
    h.add(new_email("t", "<3>", "cat@example.org", now - Duration::hours(1)), ImportMode::Batch)
        .await;
    let user = h.services.archive.create_user("erin").await.unwrap();
    let thread = h.store.get_thread(first.thread_id).await.unwrap().unwrap();
    let aggregates = &h.services.aggregates;

    assert_eq!(aggregates.num_unread(&thread, user.id).await.unwrap(), 3);
    assert!(aggregates.is_unread_by(&thread, user.id).await.unwrap());

    h.store
        .insert_last_view(thread.id, user.id, now - Duration::minutes(150));
    assert_eq!(aggregates.num_unread(&thread, user.id).await.unwrap(), 2);

    h.services.archive.record_view(thread.id, user.id).await.unwrap();
    assert_eq!(aggregates.num_unread(&thread, user.id).await.unwrap(), 0);
    assert!(!aggregates.is_unread_by(&thread, user.id).await.unwrap());
}

#[tokio::test]
async fn warming_up_an_empty_list_caches_empty_aggregates() {
    let h = harness(QueueMode::Async);
    h.services.archive.ensure_mailing_list(LIST).await.unwrap();

    let report = h
        .services
        .warm_up
        .warm_up(&[LIST.to_string()], 1)
        .await
        .unwrap();

    assert_eq!(report.lists, vec![LIST.to_string()]);
    assert_eq!(h.cached_recent_threads().await, Some(vec![]));
    assert_eq!(
        h.services
            .aggregates
            .cache()
            .get::<Vec<TopPoster>>(&CacheKey::top_posters(LIST))
            .await,
        Some(vec![])
    );
}

#[tokio::test]
async fn thread_vote_total_sums_likes_and_dislikes() {
    let h = harness(QueueMode::Async);
    let now = Utc::now();
    let first = h
        .add(new_email("t", "<1>", "ann@example.org", now - Duration::hours(2)), ImportMode::Live)
        .await;
    let second = h
        .add(new_email("t", "<2>", "bob@example.org", now - Duration::hours(1)), ImportMode::Live)
        .await;
    let archive = &h.services.archive;
    let u1 = archive.create_user("u1").await.unwrap();
    let u2 = archive.create_user("u2").await.unwrap();
    let u3 = archive.create_user("u3").await.unwrap();

    archive.vote(first.id, u1.id, 1, ImportMode::Live).await.unwrap();
    archive.vote(second.id, u2.id, 1, ImportMode::Live).await.unwrap();
    archive.vote(second.id, u3.id, -1, ImportMode::Live).await.unwrap();

    assert_eq!(
        h.services.aggregates.thread_votes_total(first.thread_id).await.unwrap(),
        1
    );
    h.drain().await;
    assert_eq!(
        h.services
            .aggregates
            .cache()
            .get::<i64>(&CacheKey::ThreadVotesTotal(first.thread_id))
            .await,
        Some(1)
    );
}

#[tokio::test]
async fn jobs_for_deleted_threads_still_succeed() {
    let h = harness(QueueMode::Async);
    let email = h
        .add(new_email("gone", "<g1>", "ann@example.org", Utc::now()), ImportMode::Live)
        .await;
    let user = h.services.archive.create_user("frank").await.unwrap();
    h.services
        .archive
        .vote(email.id, user.id, 1, ImportMode::Live)
        .await
        .unwrap();

    h.services
        .archive
        .delete_thread(email.thread_id, ImportMode::Live)
        .await
        .unwrap();

    assert!(h.drain().await > 0);
    assert!(h.queue.jobs().iter().all(|job| job.status == JobStatus::Succeeded));
    assert_eq!(h.cached_recent_threads().await, Some(vec![]));
}

#[tokio::test]
async fn batch_import_defers_rebuilds_until_finish() {
    let h = harness(QueueMode::Async);
    let now = Utc::now();
    let first = h
        .add(new_email("t", "<1>", "ann@example.org", now - Duration::hours(2)), ImportMode::Batch)
        .await;
    let aggregates = &h.services.aggregates;
    assert_eq!(aggregates.thread_emails_count(first.thread_id).await.unwrap(), 1);

    let mut batch = h.services.archive.begin_batch();
    batch
        .add_email(&new_email("t", "<2>", "bob@example.org", now - Duration::hours(1)))
        .await
        .unwrap();
    batch
        .add_email(&new_email("t", "<3>", "cat@example.org", now))
        .await
        .unwrap();

    assert_eq!(aggregates.thread_emails_count(first.thread_id).await.unwrap(), 1);
    assert!(h
        .queue
        .jobs()
        .iter()
        .all(|job| job.task_name == "check_orphans"));

    let summary = batch.finish().await.unwrap();
    assert_eq!(summary.emails, 2);
    assert_eq!(summary.threads, 1);
    h.drain().await;

    assert_eq!(aggregates.thread_emails_count(first.thread_id).await.unwrap(), 3);
    assert_eq!(h.cached_recent_threads().await, Some(vec![first.thread_id]));
}

#[tokio::test]
async fn duplicate_last_views_collapse_to_the_newest() {
    let h = harness(QueueMode::Async);
    let email = h
        .add(new_email("t", "<1>", "ann@example.org", Utc::now()), ImportMode::Batch)
        .await;
    let user = h.services.archive.create_user("gina").await.unwrap();
    let now = Utc::now();
    h.store.insert_last_view(email.thread_id, user.id, now - Duration::days(1));
    let newest = h.store.insert_last_view(email.thread_id, user.id, now);

    let view = h
        .services
        .aggregates
        .last_view(email.thread_id, user.id)
        .await
        .unwrap();

    assert_eq!(view, Some(newest));
    assert_eq!(h.store.last_views(email.thread_id, user.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sync_mode_recomputes_inline_without_queueing() {
    let h = harness(QueueMode::Sync);
    let email = h
        .add(new_email("t", "<1>", "ann@example.org", Utc::now()), ImportMode::Live)
        .await;
    let user = h.services.archive.create_user("hal").await.unwrap();

    h.services
        .archive
        .vote(email.id, user.id, -1, ImportMode::Live)
        .await
        .unwrap();

    assert!(h.queue.jobs().is_empty());
    assert_eq!(
        h.services
            .aggregates
            .cache()
            .get::<i64>(&CacheKey::ThreadVotesTotal(email.thread_id))
            .await,
        Some(-1)
    );
    assert_eq!(
        h.services.scheduler.delay(RecomputeTask::RebuildThreadVotes {
            thread_id: email.thread_id
        })
        .await
        .unwrap(),
        JobHandle::RanInline
    );
}

#[tokio::test]
async fn deleting_an_email_drops_its_keys_and_rebuilds_its_month() {
    use chrono::TimeZone;

    let h = harness(QueueMode::Async);
    let date = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
    let first = h
        .add(new_email("gc", "<gc1>", "ann@example.org", date), ImportMode::Live)
        .await;
    let reply = h
        .add(new_email("gc", "<gc2>", "bob@example.org", date + Duration::hours(1)), ImportMode::Live)
        .await;
    let user = h.services.archive.create_user("ivy").await.unwrap();
    h.services
        .archive
        .vote(reply.id, user.id, 1, ImportMode::Live)
        .await
        .unwrap();
    h.drain().await;

    let aggregates = &h.services.aggregates;
    let thread = h.store.get_thread(first.thread_id).await.unwrap().unwrap();
    aggregates.thread_summary(&thread).await.unwrap();
    aggregates.email_votes(reply.id).await.unwrap();

    let cache = aggregates.cache();
    assert_eq!(
        cache.get::<VoteTally>(&CacheKey::EmailVotes(reply.id)).await,
        Some(VoteTally { likes: 1, dislikes: 0 })
    );
    assert_eq!(cache.get::<i64>(&CacheKey::ThreadEmailsCount(thread.id)).await, Some(2));
    assert_eq!(
        cache.get::<i64>(&CacheKey::ThreadParticipantsCount(thread.id)).await,
        Some(2)
    );
    assert!(cache.get::<String>(&CacheKey::ThreadSubject(thread.id)).await.is_some());

    let deleted = h
        .services
        .archive
        .delete_email(reply.id, ImportMode::Live)
        .await
        .unwrap();
    assert_eq!(deleted.map(|e| e.id), Some(reply.id));

    assert_eq!(cache.get::<VoteTally>(&CacheKey::EmailVotes(reply.id)).await, None);
    assert_eq!(cache.get::<i64>(&CacheKey::ThreadEmailsCount(thread.id)).await, None);
    assert_eq!(cache.get::<i64>(&CacheKey::ThreadParticipantsCount(thread.id)).await, None);
    assert_eq!(cache.get::<String>(&CacheKey::ThreadSubject(thread.id)).await, None);
    let pending = h.services.queue.pending_jobs().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task_name, "rebuild_mailinglist_cache_new_email");
    assert_eq!(
        pending[0].lock_key,
        format!("rebuild_mailinglist_cache_new_email:{LIST}:2024:5")
    );

    assert_eq!(aggregates.thread_emails_count(thread.id).await.unwrap(), 1);
    assert_eq!(aggregates.email_votes(reply.id).await.unwrap().total(), 0);
}

#[tokio::test]
async fn subject_follows_a_replacement_starting_email() {
    let h = harness(QueueMode::Async);
    let now = Utc::now();
    let first = h
        .add(
            NewEmail {
                subject: "first".to_string(),
                ..new_email("s", "<s1>", "ann@example.org", now - Duration::hours(2))
            },
            ImportMode::Live,
        )
        .await;
    let aggregates = &h.services.aggregates;
    let thread = h.store.get_thread(first.thread_id).await.unwrap().unwrap();
    assert_eq!(aggregates.thread_summary(&thread).await.unwrap().subject, "first");

    h.services
        .archive
        .delete_email(first.id, ImportMode::Live)
        .await
        .unwrap();
    let thread = h.store.get_thread(first.thread_id).await.unwrap().unwrap();
    assert_eq!(thread.starting_email_id, None);
    assert_eq!(aggregates.thread_summary(&thread).await.unwrap().subject, "");

    let second = h
        .add(
            NewEmail {
                subject: "second".to_string(),
                ..new_email("s", "<s2>", "bob@example.org", now - Duration::hours(1))
            },
            ImportMode::Live,
        )
        .await;
    assert_eq!(second.thread_id, first.thread_id);
    let thread = h.store.get_thread(first.thread_id).await.unwrap().unwrap();
    assert_eq!(thread.starting_email_id, Some(second.id));
    assert_eq!(aggregates.thread_summary(&thread).await.unwrap().subject, "second");
}
