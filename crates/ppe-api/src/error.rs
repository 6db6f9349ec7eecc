//! API error types.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use ppe_media::MediaError;
use ppe_worker::WorkerError;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;

use crate::config::ApiConfig;
use crate::views;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        Self::PayloadTooLarge(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) | ApiError::Worker(WorkerError::JobNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Worker(WorkerError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Worker(_) | ApiError::Media(_) | ApiError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-facing message for the configured environment.
    pub fn detail(&self) -> String {
        self.detail_for(HIDE_INTERNAL_DETAILS.get().copied().unwrap_or(false))
    }

    /// Client-facing message. 500s lose their details when `hide_internal` is set.
    pub fn detail_for(&self, hide_internal: bool) -> String {
        if hide_internal && self.status_code() == StatusCode::INTERNAL_SERVER_ERROR {
            return "An internal error occurred".to_string();
        }
        self.to_string()
    }
}

static HIDE_INTERNAL_DETAILS: OnceLock<bool> = OnceLock::new();

/// Apply the environment from `config` to error responses. Only the first call takes effect.
pub fn init_error_details(config: &ApiConfig) {
    let _ = HIDE_INTERNAL_DETAILS.set(config.is_production());
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            detail: self.detail(),
        };

        (status, Json(body)).into_response()
    }
}

/// Error rendered as an HTML error card, for the browser-facing pages.
#[derive(Debug)]
pub struct HtmlError(pub ApiError);

impl From<ApiError> for HtmlError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for HtmlError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Page request failed");
        }
        (status, Html(views::error_page(status, &self.0.detail()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(WorkerError::ShuttingDown).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(MediaError::Cancelled).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_client_errors_keep_detail() {
        let err = ApiError::bad_request("Unsupported file type");
        assert_eq!(err.detail_for(true), "Bad request: Unsupported file type");
    }

    #[test]
    fn test_server_error_detail_hidden_in_production() {
        let err = ApiError::from(MediaError::internal("ffmpeg pipe closed"));
        assert_eq!(err.detail_for(true), "An internal error occurred");
        assert!(err.detail_for(false).contains("ffmpeg pipe closed"));
        assert_eq!(
            ApiError::from(WorkerError::ShuttingDown).detail_for(true),
            "Worker error: Worker is shutting down"
        );
    }
}
