//! Job status and frame progress.

use serde::{Deserialize, Serialize};

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Upload saved, waiting for a worker slot
    #[default]
    Queued,
    /// Frame loop is running
    Processing,
    /// Frame loop done, H.264 encode in progress
    Encoding,
    /// Output is ready for playback and download
    Completed,
    /// Job failed with an error
    Failed,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Encoding => "encoding",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Frame-level progress of the detection loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Frames read, detected and written so far
    pub frames_processed: u64,
    /// Frame count reported by the container (0 when unknown)
    pub total_frames: u64,
}

impl JobProgress {
    /// Completed fraction in `[0, 1]`; 0 when the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.total_frames == 0 {
            return 0.0;
        }
        (self.frames_processed as f64 / self.total_frames as f64).clamp(0.0, 1.0)
    }

    /// Completed percentage, 0..=100.
    pub fn percent(&self) -> u8 {
        (self.fraction() * 100.0).round() as u8
    }

    pub fn message(&self) -> String {
        format!(
            "Processing frame {} of {}",
            self.frames_processed, self.total_frames
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Encoding.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::Encoding).unwrap();
        assert_eq!(json, "\"encoding\"");
        assert_eq!(JobStatus::Processing.to_string(), "processing");
    }

    #[test]
    fn test_progress_unknown_total() {
        let progress = JobProgress {
            frames_processed: 12,
            total_frames: 0,
        };
        assert_eq!(progress.fraction(), 0.0);
        assert_eq!(progress.percent(), 0);
    }

    #[test]
    fn test_progress_clamps_overshoot() {
        // Containers sometimes under-report nb_frames.
        let progress = JobProgress {
            frames_processed: 130,
            total_frames: 120,
        };
        assert_eq!(progress.percent(), 100);

        let half = JobProgress {
            frames_processed: 50,
            total_frames: 100,
        };
        assert_eq!(half.percent(), 50);
        assert_eq!(half.message(), "Processing frame 50 of 100");
    }
}
