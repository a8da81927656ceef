//! Administrative endpoints for cache warm-up and recompute jobs.

use crate::error::ApiError;
use crate::models::DataResponse;
use crate::routes::helpers::resolve_visible_list;
use crate::services::ArchiveServices;
use crate::tasks::{JobHandle, JobStatusInfo, RecomputeTask};
use crate::warmup::WarmUpReport;
use chrono::{Datelike, Utc};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

/// Request body for a cache warm-up run.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WarmUpRequest {
    /// List names to warm; all lists when empty.
    #[serde(default)]
    pub lists: Vec<String>,
    /// Number of preceding calendar months to warm, at most 1200. Defaults to
    /// `WARM_UP_MONTHS`.
    #[serde(default)]
    pub months: Option<u32>,
}

/// Jobs created (or found pending) by a rebuild request.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RebuildResponse {
    /// Number of recompute tasks scheduled.
    pub scheduled: usize,
    /// Ids of the queued or already pending jobs. Empty in sync mode.
    #[serde(rename = "jobIds")]
    pub job_ids: Vec<i64>,
}

/// Prime the cache for the given lists and months.
#[openapi(tag = "Admin")]
#[post("/admin/cache/warm-up", data = "<request>")]
pub async fn warm_up_cache(
    request: Json<WarmUpRequest>,
    services: &State<ArchiveServices>,
) -> Result<Json<WarmUpReport>, ApiError> {
    let months = request.months.unwrap_or(services.config.warm_up_months);

    let report = services.warm_up.warm_up(&request.lists, months).await?;
    Ok(Json(report))
}

/// Schedule a rebuild of a list's recent threads, popular threads and
/// current month aggregates.
#[openapi(tag = "Admin")]
#[post("/admin/cache/rebuild/<name>")]
pub async fn rebuild_list(
    name: &str,
    services: &State<ArchiveServices>,
) -> Result<Json<RebuildResponse>, ApiError> {
    let list = resolve_visible_list(services, name).await?;
    let now = Utc::now();
    let tasks = [
        RecomputeTask::RebuildRecentThreads {
            mailing_list: list.name.clone(),
        },
        RecomputeTask::RebuildPopularThreads {
            mailing_list: list.name.clone(),
        },
        RecomputeTask::RebuildListAfterEmail {
            mailing_list: list.name.clone(),
            year: now.year(),
            month: now.month(),
        },
    ];

    let mut job_ids = Vec::new();
    for task in tasks.iter().cloned() {
        let handle: JobHandle = services.scheduler.delay(task).await?;
        job_ids.extend(handle.job_id());
    }
    log::info!("admin: scheduled rebuild of {} ({} jobs)", list.name, job_ids.len());

    Ok(Json(RebuildResponse {
        scheduled: tasks.len(),
        job_ids,
    }))
}

/// Queued and running recompute jobs, oldest first.
#[openapi(tag = "Admin")]
#[get("/admin/jobs")]
pub async fn list_jobs(
    services: &State<ArchiveServices>,
) -> Result<Json<DataResponse<Vec<JobStatusInfo>>>, ApiError> {
    let jobs = services.queue.pending_jobs().await?;
    Ok(Json(DataResponse { data: jobs }))
}
