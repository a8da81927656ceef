//! HTTP route handlers grouped by resource domain.
//!
//! Each submodule exposes typed Rocket handlers annotated with `#[openapi]`
//! so `rocket_okapi` can derive an OpenAPI document automatically. Handlers
//! read aggregates through the shared [`ArchiveServices`](crate::services::ArchiveServices)
//! and never touch the cache directly.

pub mod admin;
pub mod health;
pub(crate) mod helpers;
pub mod lists;
pub mod threads;
pub mod votes;
