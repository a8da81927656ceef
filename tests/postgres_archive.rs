use archive_server::cache::CacheKey;
use archive_server::config::{ArchiveConfig, CacheBackendKind, QueueMode};
use archive_server::invalidation::ImportMode;
use archive_server::models::{ArchivePolicy, NewEmail, ThreadSummary};
use archive_server::routes::threads;
use archive_server::services::ArchiveServices;
use archive_server::tasks::{JobHandle, JobStatus, RecomputeTask};
use archive_server::test_support::{TestDatabase, TestDatabaseError, TestFixtures, TestRocketBuilder};
use chrono::{Duration, Utc};
use rocket::http::Status;
use rocket::routes;

const LIST: &str = "kernel@lists.example.org";

async fn provision(test_name: &str) -> Option<TestDatabase> {
    match TestDatabase::new().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::Container(err)) => {
            eprintln!("skipping {test_name}: no container runtime ({err})");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

fn postgres_config() -> ArchiveConfig {
    ArchiveConfig {
        cache_backend: CacheBackendKind::Postgres,
        queue_mode: QueueMode::Async,
        ..ArchiveConfig::default()
    }
}

#[tokio::test]
async fn live_email_flows_through_the_job_queue() {
    let Some(test_db) = provision("live_email_flows_through_the_job_queue").await else {
        return;
    };
    let services = ArchiveServices::postgres(test_db.pool_clone(), postgres_config());
    let email = services
        .archive
        .add_email(
            &NewEmail {
                mailing_list: LIST.to_string(),
                thread_key: "abc".to_string(),
                message_id: "<abc@example.org>".to_string(),
                sender_address: "linus@example.org".to_string(),
                sender_name: "Linus".to_string(),
                subject: "[PATCH] fix it".to_string(),
                content: "diff".to_string(),
                date: Utc::now() - Duration::minutes(10),
                in_reply_to: None,
                parent_id: None,
            },
            ImportMode::Live,
        )
        .await
        .expect("email stored");

    let cache = services.aggregates.cache();
    assert_eq!(
        cache.get::<Vec<i32>>(&CacheKey::recent_threads(LIST)).await,
        Some(vec![email.thread_id])
    );

    let pending = services.queue.pending_jobs().await.expect("pending jobs");
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|job| job.status == JobStatus::Queued));

    let ran = services.dispatcher().drain().await.expect("drain");
    assert_eq!(ran, 3);
    assert!(services.queue.pending_jobs().await.expect("pending jobs").is_empty());
    assert_eq!(
        cache.get::<i64>(&CacheKey::ThreadEmailsCount(email.thread_id)).await,
        Some(1)
    );
    assert_eq!(
        cache.get::<i64>(&CacheKey::recent_participants_count(LIST)).await,
        Some(1)
    );

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn pending_jobs_are_deduplicated_across_services() {
    let Some(test_db) = provision("pending_jobs_are_deduplicated_across_services").await else {
        return;
    };
    let web = ArchiveServices::postgres(test_db.pool_clone(), postgres_config());
    let worker = ArchiveServices::postgres(test_db.pool_clone(), postgres_config());
    let task = RecomputeTask::RebuildPopularThreads {
        mailing_list: LIST.to_string(),
    };

    let first = web.scheduler.delay(task.clone()).await.expect("first delay");
    let second = worker.scheduler.delay(task.clone()).await.expect("second delay");
    assert!(matches!(first, JobHandle::Enqueued(_)));
    assert_eq!(second, JobHandle::Pending(first.job_id().expect("job id")));

    assert!(worker.dispatcher().run_once().await.expect("run once"));
    let third = web.scheduler.delay(task).await.expect("third delay");
    assert!(matches!(third, JobHandle::Enqueued(id) if Some(id) != first.job_id()));

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn vote_totals_and_unread_counts_on_postgres() {
    let Some(test_db) = provision("vote_totals_and_unread_counts_on_postgres").await else {
        return;
    };
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);
    let now = Utc::now();

    fixtures
        .insert_mailing_list(LIST, ArchivePolicy::Public)
        .await
        .expect("list");
    let thread_id = fixtures
        .insert_thread(LIST, "votes", now - Duration::hours(1))
        .await
        .expect("thread");
    let first = fixtures
        .insert_email(LIST, thread_id, "<1@x>", "a@example.org", "votes", now - Duration::hours(2))
        .await
        .expect("email");
    let second = fixtures
        .insert_email(LIST, thread_id, "<2@x>", "b@example.org", "Re: votes", now - Duration::hours(1))
        .await
        .expect("email");
    let users = [
        fixtures.insert_user("u1").await.expect("user"),
        fixtures.insert_user("u2").await.expect("user"),
        fixtures.insert_user("u3").await.expect("user"),
    ];
    fixtures.insert_vote(first, users[0], 1).await.expect("vote");
    fixtures.insert_vote(second, users[1], 1).await.expect("vote");
    fixtures.insert_vote(second, users[2], -1).await.expect("vote");

    let services = ArchiveServices::postgres(pool.clone(), postgres_config());
    let aggregates = &services.aggregates;
    assert_eq!(aggregates.thread_votes_total(thread_id).await.expect("total"), 1);

    let popular = aggregates.popular_threads(LIST).await.expect("popular");
    assert_eq!(popular.iter().map(|t| t.id).collect::<Vec<_>>(), vec![thread_id]);

    let thread = services
        .store
        .get_thread(thread_id)
        .await
        .expect("thread lookup")
        .expect("thread exists");
    assert_eq!(aggregates.num_unread(&thread, users[0]).await.expect("unread"), 2);
    services
        .archive
        .record_view(thread_id, users[0])
        .await
        .expect("view");
    assert_eq!(aggregates.num_unread(&thread, users[0]).await.expect("unread"), 0);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn thread_routes_on_postgres() {
    let Some(test_db) = provision("thread_routes_on_postgres").await else {
        return;
    };
    let pool = test_db.pool_clone();
    let fixtures = TestFixtures::new(&pool);
    let now = Utc::now();

    fixtures
        .insert_mailing_list(LIST, ArchivePolicy::Public)
        .await
        .expect("list");
    let thread_id = fixtures
        .insert_thread(LIST, "routes", now - Duration::hours(1))
        .await
        .expect("thread");
    fixtures
        .insert_email(LIST, thread_id, "<r@x>", "a@example.org", "routes", now - Duration::hours(1))
        .await
        .expect("email");
    let user_id = fixtures.insert_user("viewer").await.expect("user");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool.clone(), postgres_config())
        .mount_api_routes(routes![threads::get_thread, threads::record_view])
        .async_client()
        .await;

    let summary: ThreadSummary = client
        .get(format!("/api/v1/threads/{thread_id}"))
        .dispatch()
        .await
        .into_json()
        .await
        .expect("thread summary");
    assert_eq!(summary.subject, "routes");
    assert_eq!(summary.emails_count, 1);

    let response = client
        .post(format!("/api/v1/threads/{thread_id}/views/{user_id}"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    drop(response);

    let response = client
        .post(format!("/api/v1/threads/{thread_id}/views/{}", user_id + 1000))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);

    drop(response);
    drop(client);
    test_db.close().await.expect("failed to drop test database");
}
