//! In-process job runner for PPE detection.
//!
//! This crate provides:
//! - The shared job registry
//! - The video processor (frame loop, H.264 encode, bookkeeping)
//! - A bounded-concurrency executor with graceful shutdown
//! - Retention of finished jobs and their files

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod registry;
pub mod retention;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{JobExecutor, JobHandler, SHUTDOWN_MESSAGE};
pub use logging::JobLogger;
pub use processor::VideoProcessor;
pub use registry::JobRegistry;
pub use retention::RetentionSweeper;
