//! Upload and job status handlers.
//!
//! - `POST /api/jobs`: multipart upload, registers and queues a job
//! - `GET /api/jobs`, `GET /api/jobs/:id`: JSON status for polling
//! - `DELETE /api/jobs/:id`: removes a finished job and its files

use std::path::{Path as FsPath, PathBuf};

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use ppe_media::fs_utils::{move_file, remove_if_exists};
use ppe_models::{DetectionStats, JobId, JobPaths, JobRecord, JobStatus};
use ppe_worker::JobLogger;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::{load_job, wants_json};
use crate::error::{ApiError, ApiResult, HtmlError};
use crate::metrics;
use crate::state::AppState;

/// Multipart field carrying the video.
pub const UPLOAD_FIELD: &str = "video";

/// Accepted upload extensions.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

const MAX_FILENAME_CHARS: usize = 255;

// ============================================================================
// Types
// ============================================================================

/// Response to a JSON upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: String,
    pub status_url: String,
    pub page_url: String,
}

#[derive(Debug, Serialize)]
pub struct ProgressView {
    pub frames_processed: u64,
    pub total_frames: u64,
    /// 0-100, 0 while the frame count is unknown
    pub percent: u8,
}

#[derive(Debug, Serialize)]
pub struct MediaLinks {
    pub original: String,
    pub processed: String,
    pub download: String,
}

/// Job status as returned to API clients.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub original_filename: String,
    pub status: JobStatus,
    pub progress: ProgressView,
    /// Human-readable description of the current step
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DetectionStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub page_url: String,
    /// Present once the output is ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaLinks>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobView {
    fn from(job: &JobRecord) -> Self {
        let media = (job.status == JobStatus::Completed).then(|| MediaLinks {
            original: format!("/media/{}/original", job.id),
            processed: format!("/media/{}/processed", job.id),
            download: format!("/media/{}/download", job.id),
        });

        Self {
            job_id: job.id.to_string(),
            original_filename: job.original_filename.clone(),
            status: job.status,
            progress: ProgressView {
                frames_processed: job.progress.frames_processed,
                total_frames: job.progress.total_frames,
                percent: job.progress.percent(),
            },
            message: job.status_message(),
            stats: job.stats.clone(),
            error: job.error_message.clone(),
            page_url: format!("/jobs/{}", job.id),
            media,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

// ============================================================================
// Upload
// ============================================================================

/// Accept a video upload and queue it for detection.
///
/// POST /api/jobs
///
/// Browsers are redirected to the job page (303). Clients sending
/// `Accept: application/json` get `202` with the job id instead.
pub async fn upload_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let json = wants_json(&headers);

    match accept_upload(&state, multipart).await {
        Ok(job_id) if json => (
            StatusCode::ACCEPTED,
            Json(UploadResponse {
                status_url: format!("/api/jobs/{}", job_id),
                page_url: format!("/jobs/{}", job_id),
                job_id: job_id.to_string(),
            }),
        )
            .into_response(),
        Ok(job_id) => Redirect::to(&format!("/jobs/{}", job_id)).into_response(),
        Err(e) if json => e.into_response(),
        Err(e) => HtmlError(e).into_response(),
    }
}

async fn accept_upload(state: &AppState, mut multipart: Multipart) -> ApiResult<JobId> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().map(clean_filename).unwrap_or_default();
        if filename.is_empty() {
            metrics::record_upload_rejected("missing");
            return Err(ApiError::bad_request("No video file provided"));
        }

        let Some(extension) = upload_extension(&filename) else {
            metrics::record_upload_rejected("extension");
            return Err(ApiError::bad_request(format!(
                "Unsupported file type '{}'. Allowed: {}",
                filename,
                ALLOWED_EXTENSIONS.join(", ")
            )));
        };

        let job_id = JobId::new();
        let worker_config = state.worker_config();
        let paths = JobPaths::for_job(
            &job_id,
            &worker_config.upload_dir,
            &worker_config.output_dir,
            extension,
        );

        let bytes = save_field(&mut field, &paths.input, state.config.max_upload_bytes).await?;

        let logger = JobLogger::new(&job_id, "upload");
        state
            .registry
            .insert(JobRecord::new(job_id.clone(), filename.clone(), paths.clone()))
            .await;

        if let Err(e) = state.executor.submit(job_id.clone()) {
            logger.log_error(&format!("Failed to queue job: {}", e));
            state.registry.remove(&job_id).await;
            if let Err(cleanup) = remove_if_exists(&paths.input).await {
                warn!(job_id = %job_id, "Failed to remove rejected upload: {}", cleanup);
            }
            return Err(e.into());
        }

        metrics::record_upload(extension, bytes);
        logger.log_start(&format!("Queued {} ({} bytes)", filename, bytes));
        return Ok(job_id);
    }

    metrics::record_upload_rejected("missing");
    Err(ApiError::bad_request("No video file provided"))
}

/// Stream a multipart field to `dest` through a `.part` sibling.
///
/// Returns the number of bytes written. Empty and oversized files are
/// removed and rejected.
async fn save_field(field: &mut Field<'_>, dest: &FsPath, max_bytes: u64) -> ApiResult<u64> {
    let part = part_path(dest);

    match write_part(field, &part, max_bytes).await {
        Ok(0) => {
            let _ = remove_if_exists(&part).await;
            metrics::record_upload_rejected("empty");
            Err(ApiError::bad_request("The uploaded file is empty"))
        }
        Ok(written) => match move_file(&part, dest).await {
            Ok(()) => Ok(written),
            Err(e) => {
                let _ = remove_if_exists(&part).await;
                Err(e.into())
            }
        },
        Err(e) => {
            let _ = remove_if_exists(&part).await;
            if matches!(e, ApiError::PayloadTooLarge(_)) {
                metrics::record_upload_rejected("too_large");
            }
            Err(e)
        }
    }
}

async fn write_part(field: &mut Field<'_>, part: &FsPath, max_bytes: u64) -> ApiResult<u64> {
    if let Some(parent) = part.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(part).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(ApiError::payload_too_large(format!(
                "File exceeds the {} MB upload limit",
                max_bytes / (1024 * 1024)
            )));
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(written)
}

fn part_path(dest: &FsPath) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(e.body_text())
    } else {
        ApiError::bad_request(e.body_text())
    }
}

/// Final path component of a browser-supplied file name, trimmed.
fn clean_filename(raw: &str) -> String {
    raw.rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_FILENAME_CHARS)
        .collect()
}

/// Lowercase extension if it is one we accept.
pub fn upload_extension(filename: &str) -> Option<&'static str> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_lowercase();
    ALLOWED_EXTENSIONS.iter().copied().find(|allowed| *allowed == ext)
}

// ============================================================================
// Status
// ============================================================================

/// List all jobs, newest first.
///
/// GET /api/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobView>> {
    let jobs = state.registry.list().await;
    Json(jobs.iter().map(JobView::from).collect())
}

/// Get a single job.
///
/// GET /api/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let job = load_job(&state, &id).await?;
    Ok(Json(JobView::from(&job)))
}

/// Delete a finished job and its files.
///
/// DELETE /api/jobs/:id
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let job = load_job(&state, &id).await?;
    if !job.is_terminal() {
        return Err(ApiError::conflict("Job is still running"));
    }

    let logger = JobLogger::new(&job.id, "delete");
    if let Some(paths) = &job.paths {
        for path in paths.all() {
            remove_if_exists(path).await?;
        }
    }
    state.registry.remove(&job.id).await;
    logger.log_completion("Job and files deleted");

    Ok(StatusCode::NO_CONTENT)
}
