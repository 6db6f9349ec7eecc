//! Detection job identity and the per-job status record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::job_status::{JobProgress, JobStatus};
use crate::stats::DetectionStats;

/// Unique identifier for a detection job.
///
/// The same id names every file the job produces, so two uploads never share
/// storage paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Parse a user-supplied id, accepting only canonical UUIDs.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s)
            .ok()
            .map(|uuid| Self(uuid.hyphenated().to_string()))
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// On-disk locations used by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPaths {
    /// Saved upload
    pub input: PathBuf,
    /// Annotated intermediate file written by the frame loop
    pub temp_output: PathBuf,
    /// Browser-playable H.264 output
    pub final_output: PathBuf,
}

impl JobPaths {
    /// Derive the standard file layout for a job.
    ///
    /// `extension` is the lowercase extension of the uploaded file.
    pub fn for_job(
        id: &JobId,
        upload_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        extension: &str,
    ) -> Self {
        let upload_dir = upload_dir.into();
        let output_dir = output_dir.into();
        Self {
            input: upload_dir.join(format!("{}.{}", id, extension)),
            temp_output: output_dir.join(format!("{}_temp.mp4", id)),
            final_output: output_dir.join(format!("{}_final.mp4", id)),
        }
    }

    /// All paths, for cleanup.
    pub fn all(&self) -> [&PathBuf; 3] {
        [&self.input, &self.temp_output, &self.final_output]
    }
}

/// Status snapshot of one detection job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Name of the file as uploaded by the browser
    pub original_filename: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    /// Per-class counts, populated on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DetectionStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip)]
    pub paths: Option<JobPaths>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a queued job record.
    pub fn new(id: JobId, original_filename: impl Into<String>, paths: JobPaths) -> Self {
        let now = Utc::now();
        Self {
            id,
            original_filename: original_filename.into(),
            status: JobStatus::Queued,
            progress: JobProgress::default(),
            stats: None,
            error_message: None,
            paths: Some(paths),
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Update the status and bump the updated_at timestamp.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Record frame progress.
    pub fn set_progress(&mut self, frames_processed: u64, total_frames: u64) {
        self.progress = JobProgress {
            frames_processed,
            total_frames,
        };
        self.updated_at = Utc::now();
    }

    /// Mark job as completed with its final statistics.
    pub fn complete(&mut self, stats: DetectionStats) {
        self.status = JobStatus::Completed;
        if self.progress.total_frames > 0 {
            self.progress.frames_processed = self.progress.total_frames;
        }
        self.stats = Some(stats);
        self.error_message = None;
        self.updated_at = Utc::now();
    }

    /// Mark job as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Human-readable description of the current step.
    pub fn status_message(&self) -> String {
        match self.status {
            JobStatus::Queued => "Waiting for a free worker".to_string(),
            JobStatus::Processing if self.progress.total_frames > 0 => self.progress.message(),
            JobStatus::Processing => "Analyzing video for PPE compliance...".to_string(),
            JobStatus::Encoding => "Encoding output video...".to_string(),
            JobStatus::Completed => "Detection completed successfully!".to_string(),
            JobStatus::Failed => format!(
                "An error occurred during processing: {}",
                self.error_message.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        let id = JobId::new();
        let paths = JobPaths::for_job(&id, "uploads", "outputs", "mp4");
        JobRecord::new(id, "site.mp4", paths)
    }

    #[test]
    fn test_job_id_parse_rejects_garbage() {
        assert!(JobId::parse("../../etc/passwd").is_none());
        assert!(JobId::parse("").is_none());

        let id = JobId::new();
        assert_eq!(JobId::parse(id.as_str()), Some(id));
    }

    #[test]
    fn test_job_paths_layout() {
        let id = JobId::from_string("abc");
        let paths = JobPaths::for_job(&id, "uploads", "outputs", "mov");
        assert_eq!(paths.input, PathBuf::from("uploads/abc.mov"));
        assert_eq!(paths.temp_output, PathBuf::from("outputs/abc_temp.mp4"));
        assert_eq!(paths.final_output, PathBuf::from("outputs/abc_final.mp4"));
    }

    #[test]
    fn test_record_lifecycle() {
        let mut job = record();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(!job.is_terminal());

        job.set_status(JobStatus::Processing);
        job.set_progress(10, 40);
        assert_eq!(job.status_message(), "Processing frame 10 of 40");

        let mut stats = DetectionStats::default();
        stats.record_frame(["Helmet", "Person"]);
        job.complete(stats);

        assert!(job.is_terminal());
        assert_eq!(job.progress.frames_processed, 40);
        assert_eq!(job.stats.as_ref().map(|s| s.total()), Some(2));
    }

    #[test]
    fn test_record_failure_message() {
        let mut job = record();
        job.fail("decoder exploded");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.status_message(),
            "An error occurred during processing: decoder exploded"
        );
    }

    #[test]
    fn test_paths_not_serialized() {
        let job = record();
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("paths").is_none());
        assert_eq!(json["status"], "queued");
    }
}
