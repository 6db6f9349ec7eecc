//! Shared data models for the PPE safety monitor.
//!
//! This crate provides Serde-serializable types for:
//! - Detection jobs and their on-disk layout
//! - Job status and frame progress
//! - Per-class detection statistics
//! - The PPE class vocabulary

pub mod job;
pub mod job_status;
pub mod ppe_class;
pub mod stats;

// Re-export common types
pub use job::{JobId, JobPaths, JobRecord};
pub use job_status::{JobProgress, JobStatus};
pub use ppe_class::{PpeClass, DEFAULT_CLASSES};
pub use stats::DetectionStats;
