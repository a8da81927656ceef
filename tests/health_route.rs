use archive_server::config::{ArchiveConfig, QueueMode};
use archive_server::routes::health::{HealthResponse, health_check};
use archive_server::services::ArchiveServices;
use archive_server::test_support::TestRocketBuilder;
use rocket::http::Status;
use rocket::routes;

#[test]
fn health_endpoint_returns_ok() {
    let client = TestRocketBuilder::new()
        .mount_api_routes(routes![health_check])
        .blocking_client();

    let response = client.get("/api/v1/health").dispatch();
    assert_eq!(response.status(), Status::Ok);

    let payload: HealthResponse = response.into_json().expect("valid JSON payload");
    assert_eq!(payload.status, "ok");
    assert_eq!(payload.cache_backend, "memory");
    assert_eq!(payload.queue_mode, "sync");
}

#[test]
fn health_endpoint_reports_the_queue_mode() {
    let services = ArchiveServices::in_memory(ArchiveConfig {
        queue_mode: QueueMode::Async,
        ..ArchiveConfig::inline()
    });
    let client = TestRocketBuilder::new()
        .manage_services(services)
        .mount_api_routes(routes![health_check])
        .blocking_client();

    let payload: HealthResponse = client
        .get("/api/v1/health")
        .dispatch()
        .into_json()
        .expect("valid JSON payload");
    assert_eq!(payload.queue_mode, "async");
}
