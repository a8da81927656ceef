//! Mailing list overview and monthly archive endpoints.

use crate::error::ApiError;
use crate::models::{DataResponse, ListOverview, MailingList, MonthSummary};
use crate::routes::helpers::resolve_visible_list;
use crate::services::ArchiveServices;
use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_okapi::openapi;

/// List every mailing list readers may see, ordered by name.
#[openapi(tag = "Mailing Lists")]
#[get("/lists")]
pub async fn list_mailing_lists(
    services: &State<ArchiveServices>,
) -> Result<Json<DataResponse<Vec<MailingList>>>, ApiError> {
    let lists = services
        .store
        .list_mailing_lists()
        .await?
        .into_iter()
        .filter(MailingList::is_visible)
        .collect();

    Ok(Json(DataResponse { data: lists }))
}

/// Recent activity of a list: participants, threads, top posters and the
/// top and popular thread rankings.
#[openapi(tag = "Mailing Lists")]
#[get("/lists/<name>/overview")]
pub async fn get_list_overview(
    name: &str,
    services: &State<ArchiveServices>,
) -> Result<Json<ListOverview>, ApiError> {
    let list = resolve_visible_list(services, name).await?;
    let overview = services.aggregates.list_overview(&list).await?;
    Ok(Json(overview))
}

/// Participants and threads of a calendar month.
#[openapi(tag = "Mailing Lists")]
#[get("/lists/<name>/months/<year>/<month>")]
pub async fn get_month_summary(
    name: &str,
    year: i32,
    month: u32,
    services: &State<ArchiveServices>,
) -> Result<Json<MonthSummary>, ApiError> {
    let list = resolve_visible_list(services, name).await?;
    let summary = services.aggregates.month_summary(&list.name, year, month).await?;
    Ok(Json(summary))
}
