//! Voting on emails.
//!
//! Votes go through the archive so the vote aggregates of the email, its
//! thread and the list's popular threads get invalidated.

use crate::error::ApiError;
use crate::invalidation::ImportMode;
use crate::models::{Vote, VoteTally};
use crate::services::ArchiveServices;
use rocket::serde::json::Json;
use rocket::{State, delete, put};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

/// Request body for casting a vote.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct VoteRequest {
    #[serde(rename = "userId")]
    pub user_id: i32,
    /// `1` for a like, `-1` for a dislike.
    pub value: i16,
}

/// The stored vote and the email's tally after the change.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct VoteResponse {
    pub vote: Vote,
    #[serde(rename = "emailVotes")]
    pub email_votes: VoteTally,
}

/// Cast or change a user's vote on an email.
#[openapi(tag = "Votes")]
#[put("/emails/<email_id>/votes", data = "<request>")]
pub async fn cast_vote(
    email_id: i32,
    request: Json<VoteRequest>,
    services: &State<ArchiveServices>,
) -> Result<Json<VoteResponse>, ApiError> {
    let vote = services
        .archive
        .vote(email_id, request.user_id, request.value, ImportMode::Live)
        .await?;
    let email_votes = services.aggregates.email_votes(email_id).await?;

    Ok(Json(VoteResponse { vote, email_votes }))
}

/// Retract a user's vote on an email.
#[openapi(tag = "Votes")]
#[delete("/emails/<email_id>/votes/<user_id>")]
pub async fn retract_vote(
    email_id: i32,
    user_id: i32,
    services: &State<ArchiveServices>,
) -> Result<Json<VoteResponse>, ApiError> {
    let vote = services
        .archive
        .retract_vote(email_id, user_id, ImportMode::Live)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No vote by user {user_id} on email {email_id}"))
        })?;
    let email_votes = services.aggregates.email_votes(email_id).await?;

    Ok(Json(VoteResponse { vote, email_votes }))
}
