//! Video delivery: original upload, processed output and download.
//!
//! Files are resolved from the job record only. Range requests are handled
//! by `tower_http::services::ServeFile`, which browsers need for seeking.

use std::path::PathBuf;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue};
use axum::response::Response;
use ppe_models::{JobRecord, JobStatus};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use super::load_job;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Offers the processed video under a fixed download name.
pub const DOWNLOAD_DISPOSITION: &str = "attachment; filename=\"ppe_detection_output.mp4\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Original,
    Processed,
    Download,
}

impl MediaKind {
    fn path(self, job: &JobRecord) -> ApiResult<PathBuf> {
        let paths = job
            .paths
            .as_ref()
            .ok_or_else(|| ApiError::not_found("Job has no stored files"))?;

        match self {
            MediaKind::Original => Ok(paths.input.clone()),
            MediaKind::Processed | MediaKind::Download => match job.status {
                JobStatus::Completed => Ok(paths.final_output.clone()),
                JobStatus::Failed => Err(ApiError::conflict("Processing failed, no output available")),
                _ => Err(ApiError::conflict("Output is not ready yet")),
            },
        }
    }
}

/// GET /media/:id/original
pub async fn original_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    serve(&state, &id, MediaKind::Original, request).await
}

/// GET /media/:id/processed
pub async fn processed_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    serve(&state, &id, MediaKind::Processed, request).await
}

/// GET /media/:id/download
pub async fn download_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    serve(&state, &id, MediaKind::Download, request).await
}

async fn serve(
    state: &AppState,
    raw_id: &str,
    kind: MediaKind,
    request: Request,
) -> ApiResult<Response> {
    let job = load_job(state, raw_id).await?;
    let path = kind.path(&job)?;

    if !tokio::fs::try_exists(&path).await? {
        return Err(ApiError::not_found("Video file no longer exists"));
    }

    let response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    let mut response = response.map(Body::new);

    // 200 and 206; ServeFile's 416 and 304 pass through untouched
    if response.status().is_success() {
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if kind == MediaKind::Download {
            headers.insert(
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static(DOWNLOAD_DISPOSITION),
            );
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use ppe_models::{DetectionStats, JobId, JobPaths};

    fn job() -> JobRecord {
        let id = JobId::new();
        let paths = JobPaths::for_job(&id, "uploads", "outputs", "avi");
        JobRecord::new(id, "cam.avi", paths)
    }

    #[test]
    fn test_original_available_while_running() {
        let job = job();
        let path = MediaKind::Original.path(&job).unwrap();
        assert!(path.to_string_lossy().ends_with(".avi"));
    }

    #[test]
    fn test_output_conflicts_until_completed() {
        let mut job = job();
        let err = MediaKind::Processed.path(&job).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        job.fail("boom");
        let err = MediaKind::Download.path(&job).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        job.complete(DetectionStats::default());
        let path = MediaKind::Download.path(&job).unwrap();
        assert!(path.to_string_lossy().ends_with("_final.mp4"));
    }
}
