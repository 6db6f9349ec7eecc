//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Processing timed out after {0} seconds")]
    Timeout(u64),

    #[error("Worker is shutting down")]
    ShuttingDown,

    #[error("Media error: {0}")]
    Media(#[from] ppe_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    /// Whether the job was stopped rather than failing on its own.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            WorkerError::Media(ppe_media::MediaError::Cancelled)
                | WorkerError::Timeout(_)
                | WorkerError::ShuttingDown
        )
    }

    /// Message shown to the user on the job page.
    ///
    /// Media errors carry the FFmpeg stderr tail.
    pub fn user_message(&self) -> String {
        match self {
            WorkerError::Media(e) => e.detailed(),
            other => other.to_string(),
        }
    }
}
