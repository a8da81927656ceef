//! Thread summary and read-tracking endpoints.

use crate::error::ApiError;
use crate::models::{LastView, ThreadSummary, UnreadStatus};
use crate::routes::helpers::resolve_visible_thread;
use crate::services::ArchiveServices;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;

/// Cached counters, subject and vote total of a thread.
#[openapi(tag = "Threads")]
#[get("/threads/<thread_id>")]
pub async fn get_thread(
    thread_id: i32,
    services: &State<ArchiveServices>,
) -> Result<Json<ThreadSummary>, ApiError> {
    let thread = resolve_visible_thread(services, thread_id).await?;
    let summary = services.aggregates.thread_summary(&thread).await?;
    Ok(Json(summary))
}

/// Whether the thread has emails the user has not seen, and how many.
#[openapi(tag = "Threads")]
#[get("/threads/<thread_id>/unread?<user_id>")]
pub async fn get_unread_status(
    thread_id: i32,
    user_id: i32,
    services: &State<ArchiveServices>,
) -> Result<Json<UnreadStatus>, ApiError> {
    let thread = resolve_visible_thread(services, thread_id).await?;
    let status = services.aggregates.unread_status(&thread, user_id).await?;
    Ok(Json(status))
}

/// Mark the thread as read by the user.
#[openapi(tag = "Threads")]
#[post("/threads/<thread_id>/views/<user_id>")]
pub async fn record_view(
    thread_id: i32,
    user_id: i32,
    services: &State<ArchiveServices>,
) -> Result<Json<LastView>, ApiError> {
    resolve_visible_thread(services, thread_id).await?;
    let view = services.archive.record_view(thread_id, user_id).await?;
    Ok(Json(view))
}
