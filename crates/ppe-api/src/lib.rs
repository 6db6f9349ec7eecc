//! Axum HTTP server for PPE video detection.
//!
//! This crate provides:
//! - Server-rendered upload, progress and results pages
//! - Multipart upload into the in-process job executor
//! - Range-capable playback and download of processed videos
//! - Rate limiting, security headers and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod views;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, HtmlError};
pub use routes::create_router;
pub use state::AppState;
