//! Readiness endpoint of the archive API.

use crate::services::ArchiveServices;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

/// Readiness plus the cache and task settings the process runs with.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    pub status: String,
    /// `postgres` or `memory`.
    #[serde(rename = "cacheBackend")]
    pub cache_backend: String,
    /// `async` when recomputes go through the job queue, `sync` when they run inline.
    #[serde(rename = "queueMode")]
    pub queue_mode: String,
}

/// Report that the archive API is up and how it maintains its cache.
#[openapi(tag = "Health")]
#[get("/health")]
pub fn health_check(services: &State<ArchiveServices>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        cache_backend: services.config.cache_backend.as_str().to_string(),
        queue_mode: services.scheduler.mode().as_str().to_string(),
    })
}
