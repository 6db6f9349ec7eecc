//! Job metrics. The recorder is installed by the host binary.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "ppe_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "ppe_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "ppe_jobs_failed_total";
    pub const JOBS_ACTIVE: &str = "ppe_jobs_active";
    pub const PROCESSING_DURATION_SECONDS: &str = "ppe_processing_duration_seconds";
    pub const ENCODE_DURATION_SECONDS: &str = "ppe_encode_duration_seconds";
    pub const RETENTION_REMOVED_TOTAL: &str = "ppe_retention_removed_total";
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

/// `reason` is a short label such as "timeout" or "error".
pub fn record_job_failed(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn set_jobs_active(count: usize) {
    gauge!(names::JOBS_ACTIVE).set(count as f64);
}

/// Frame loop duration (decode, detect, annotate, write).
pub fn record_processing_duration(duration_secs: f64) {
    histogram!(names::PROCESSING_DURATION_SECONDS).record(duration_secs);
}

pub fn record_encode_duration(duration_secs: f64) {
    histogram!(names::ENCODE_DURATION_SECONDS).record(duration_secs);
}

pub fn record_retention_removed(count: usize) {
    counter!(names::RETENTION_REMOVED_TOTAL).increment(count as u64);
}
