//! Request handlers.

pub mod health;
pub mod jobs;
pub mod media;
pub mod pages;

pub use health::*;
pub use jobs::*;
pub use media::*;
pub use pages::*;

use axum::http::{header, HeaderMap};
use ppe_models::{JobId, JobRecord};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Parse a job id from the URL.
pub(crate) fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    JobId::parse(raw).ok_or_else(|| ApiError::bad_request("Invalid job id"))
}

/// Look up a job by its raw URL id.
pub(crate) async fn load_job(state: &AppState, raw_id: &str) -> ApiResult<JobRecord> {
    let id = parse_job_id(raw_id)?;
    state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| ApiError::not_found("Job not found"))
}

/// Whether the client asked for JSON rather than a page.
pub(crate) fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("application/json"))
        .unwrap_or(false)
}
