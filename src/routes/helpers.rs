//! Shared helper functions for Rocket route handlers.

use crate::error::ApiError;
use crate::models::{MailingList, Thread};
use crate::services::ArchiveServices;

/// Resolve a list name to a list readers may see.
///
/// Lists with the `never` archive policy answer [`ApiError::NotFound`]
/// exactly like unknown ones.
pub async fn resolve_visible_list(
    services: &ArchiveServices,
    name: &str,
) -> Result<MailingList, ApiError> {
    match services.store.get_mailing_list(name).await? {
        Some(list) if list.is_visible() => Ok(list),
        _ => Err(ApiError::NotFound(format!("Mailing list '{name}' not found"))),
    }
}

/// Fetch a thread whose list is visible.
pub async fn resolve_visible_thread(
    services: &ArchiveServices,
    thread_id: i32,
) -> Result<Thread, ApiError> {
    let thread = services
        .store
        .get_thread(thread_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Thread {thread_id} not found")))?;

    resolve_visible_list(services, &thread.mailing_list)
        .await
        .map_err(|_| ApiError::NotFound(format!("Thread {thread_id} not found")))?;
    Ok(thread)
}
