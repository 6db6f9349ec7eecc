//! Runs one detection job end to end.
//!
//! processing (frame loop on a blocking thread) → encoding (H.264) →
//! completed, or failed with the error shown to the user.

use std::sync::Arc;
use std::time::Instant;

use ppe_media::fs_utils::remove_if_exists;
use ppe_media::pipeline::process_video_with_detector;
use ppe_media::{encode_to_h264, Annotator, FrameDetector, ObjectDetector};
use ppe_models::{DetectionStats, JobId, JobPaths, JobStatus};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::JobRegistry;

/// Owns the loaded detector and drives jobs through the pipeline.
pub struct VideoProcessor {
    config: WorkerConfig,
    registry: JobRegistry,
    detector: Arc<dyn FrameDetector>,
    annotator: Arc<Annotator>,
}

impl VideoProcessor {
    /// Load the ONNX model and label font.
    ///
    /// Fails if the model cannot be loaded; the server must not start
    /// without one.
    pub fn new(config: WorkerConfig, registry: JobRegistry) -> WorkerResult<Self> {
        let detector = ObjectDetector::new(config.detector_config())?;
        let annotator = config.annotator()?;
        Ok(Self::with_detector(
            config,
            registry,
            Arc::new(detector),
            annotator,
        ))
    }

    /// Build around an already constructed detector.
    pub fn with_detector(
        config: WorkerConfig,
        registry: JobRegistry,
        detector: Arc<dyn FrameDetector>,
        annotator: Annotator,
    ) -> Self {
        Self {
            config,
            registry,
            detector,
            annotator: Arc::new(annotator),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn class_names(&self) -> Vec<String> {
        self.detector.class_names().to_vec()
    }

    /// Process a registered job and record the outcome in the registry.
    ///
    /// `cancel` aborts the job when it flips to true. The job timeout is
    /// enforced here so the blocking frame loop can be told to stop.
    pub async fn process(
        &self,
        job_id: &JobId,
        mut cancel: watch::Receiver<bool>,
    ) -> WorkerResult<DetectionStats> {
        let logger = JobLogger::new(job_id, "ppe_detection");

        let record = self
            .registry
            .get(job_id)
            .await
            .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()))?;
        let paths = record
            .paths
            .clone()
            .ok_or_else(|| WorkerError::job_failed("Job has no file paths"))?;

        logger.log_start(&record.original_filename);

        let (stop_tx, stop_rx) = watch::channel(false);
        let stages = self.run_stages(job_id, &paths, stop_rx, &logger);
        tokio::pin!(stages);

        let timeout = self.config.job_timeout;
        let result = tokio::select! {
            result = &mut stages => result,
            _ = tokio::time::sleep(timeout) => {
                let _ = stop_tx.send(true);
                // Let the frame loop and encoder exit before touching files
                let _ = (&mut stages).await;
                Err(WorkerError::Timeout(timeout.as_secs()))
            }
            _ = wait_cancelled(&mut cancel) => {
                let _ = stop_tx.send(true);
                let _ = (&mut stages).await;
                Err(WorkerError::ShuttingDown)
            }
        };

        match &result {
            Ok(stats) => {
                self.registry
                    .update(job_id, |job| job.complete(stats.clone()))
                    .await;
                metrics::record_job_completed();
                logger.log_completion(&format!(
                    "{} frames, {} detections ({} violations)",
                    stats.frames_processed,
                    stats.total(),
                    stats.violations()
                ));
            }
            Err(e) => {
                let message = e.user_message();
                self.registry
                    .update(job_id, |job| job.fail(message.clone()))
                    .await;
                metrics::record_job_failed(match e {
                    WorkerError::Timeout(_) => "timeout",
                    _ if e.is_cancelled() => "cancelled",
                    _ => "error",
                });
                logger.log_error(&message);
                self.cleanup_outputs(&paths).await;
            }
        }

        result
    }

    async fn run_stages(
        &self,
        job_id: &JobId,
        paths: &JobPaths,
        stop: watch::Receiver<bool>,
        logger: &JobLogger,
    ) -> WorkerResult<DetectionStats> {
        self.registry
            .update(job_id, |job| job.set_status(JobStatus::Processing))
            .await;

        let started = Instant::now();
        let outcome = {
            let detector = Arc::clone(&self.detector);
            let annotator = Arc::clone(&self.annotator);
            let registry = self.registry.clone();
            let id = job_id.clone();
            let input = paths.input.clone();
            let temp = paths.temp_output.clone();
            let opts = self.config.pipeline_options();
            let stop = stop.clone();
            let span = logger.create_span();

            tokio::task::spawn_blocking(move || {
                let _enter = span.enter();
                process_video_with_detector(
                    &input,
                    &temp,
                    detector.as_ref(),
                    &annotator,
                    &opts,
                    |frame, total| registry.set_progress_blocking(&id, frame, total),
                    Some(&stop),
                )
            })
            .await
            .map_err(|e| WorkerError::processing_failed(format!("Frame loop task failed: {}", e)))??
        };
        metrics::record_processing_duration(started.elapsed().as_secs_f64());
        logger.log_progress(&format!(
            "{} frames at {:.2} fps ({}x{}), encoding",
            outcome.stats.frames_processed, outcome.fps, outcome.width, outcome.height
        ));

        self.registry
            .update(job_id, |job| job.set_status(JobStatus::Encoding))
            .await;

        let started = Instant::now();
        let total_frames = outcome.stats.frames_processed;
        encode_to_h264(
            &paths.temp_output,
            &paths.final_output,
            &self.config.encode_options(),
            Some(stop),
            move |p| {
                debug!(
                    frame = p.frame,
                    percent = (p.frame_fraction(total_frames) * 100.0).round() as u32,
                    "Encoding progress"
                );
            },
        )
        .await?;
        metrics::record_encode_duration(started.elapsed().as_secs_f64());

        if !self.config.keep_temp {
            if let Err(e) = remove_if_exists(&paths.temp_output).await {
                logger.log_warning(&format!("Failed to remove intermediate file: {}", e));
            }
        }

        Ok(outcome.stats)
    }

    /// Remove partial outputs of a failed job. The upload is kept until
    /// retention removes it.
    async fn cleanup_outputs(&self, paths: &JobPaths) {
        for path in [&paths.temp_output, &paths.final_output] {
            if let Err(e) = remove_if_exists(path).await {
                warn!(path = %path.display(), "Failed to remove partial output: {}", e);
            }
        }
    }
}

/// Resolve once `cancel` is true; pend forever if its sender is gone.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use ppe_media::{Detection, FrameWriter, FrameWriterOptions, MediaResult};
    use ppe_models::JobRecord;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoDetections(Vec<String>);

    impl FrameDetector for NoDetections {
        fn detect(&self, _frame: &RgbImage) -> MediaResult<Vec<Detection>> {
            Ok(Vec::new())
        }

        fn class_names(&self) -> &[String] {
            &self.0
        }
    }

    fn processor(dir: &TempDir) -> VideoProcessor {
        let config = WorkerConfig {
            upload_dir: dir.path().join("uploads"),
            output_dir: dir.path().join("outputs"),
            job_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        VideoProcessor::with_detector(
            config,
            JobRegistry::new(),
            Arc::new(NoDetections(vec!["Helmet".into(), "Person".into()])),
            Annotator::boxes_only(),
        )
    }

    /// Sleeps on every frame so a job outlives short timeouts.
    struct SlowDetector(Vec<String>);

    impl FrameDetector for SlowDetector {
        fn detect(&self, _frame: &RgbImage) -> MediaResult<Vec<Detection>> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(Vec::new())
        }

        fn class_names(&self) -> &[String] {
            &self.0
        }
    }

    /// Register a job whose upload is a 40 frame clip written with FFmpeg.
    async fn slow_job(dir: &TempDir, job_timeout: Duration) -> (VideoProcessor, JobId, JobPaths) {
        let config = WorkerConfig {
            upload_dir: dir.path().join("uploads"),
            output_dir: dir.path().join("outputs"),
            job_timeout,
            ..Default::default()
        };
        config.ensure_dirs().await.unwrap();

        let id = JobId::new();
        let paths = JobPaths::for_job(&id, &config.upload_dir, &config.output_dir, "mp4");
        let mut writer = FrameWriter::create(
            &paths.input,
            &FrameWriterOptions {
                width: 64,
                height: 48,
                fps: 10.0,
                codec: "mpeg4".to_string(),
            },
        )
        .unwrap();
        let frame = RgbImage::from_pixel(64, 48, image::Rgb([30, 90, 160]));
        for _ in 0..40 {
            writer.write_frame(&frame).unwrap();
        }
        writer.finish().unwrap();

        let processor = VideoProcessor::with_detector(
            config,
            JobRegistry::new(),
            Arc::new(SlowDetector(vec!["Helmet".into()])),
            Annotator::boxes_only(),
        );
        processor
            .registry()
            .insert(JobRecord::new(id.clone(), "site.mp4", paths.clone()))
            .await;
        (processor, id, paths)
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_timeout_fails_job_and_removes_outputs() {
        let dir = TempDir::new().unwrap();
        let (processor, id, paths) = slow_job(&dir, Duration::from_secs(1)).await;

        let (_tx, rx) = watch::channel(false);
        let result = processor.process(&id, rx).await;
        assert!(matches!(result, Err(WorkerError::Timeout(1))));

        let job = processor.registry().get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("Processing timed out after 1 seconds")
        );
        assert!(!paths.temp_output.exists());
        assert!(!paths.final_output.exists());
        assert!(paths.input.exists());
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_cancel_fails_job_and_removes_outputs() {
        let dir = TempDir::new().unwrap();
        let (processor, id, paths) = slow_job(&dir, Duration::from_secs(60)).await;

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = tx.send(true);
        });
        let result = processor.process(&id, rx).await;
        assert!(matches!(result, Err(WorkerError::ShuttingDown)));

        let job = processor.registry().get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("Worker is shutting down"));
        assert!(!paths.temp_output.exists());
        assert!(!paths.final_output.exists());
        assert!(paths.input.exists());
    }

    #[test]
    fn test_class_names_from_detector() {
        let dir = TempDir::new().unwrap();
        assert_eq!(processor(&dir).class_names(), vec!["Helmet", "Person"]);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let dir = TempDir::new().unwrap();
        let (_tx, rx) = watch::channel(false);
        let result = processor(&dir).process(&JobId::new(), rx).await;
        assert!(matches!(result, Err(WorkerError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_upload_marks_job_failed() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir);
        let id = JobId::new();
        let paths = JobPaths::for_job(&id, dir.path().join("uploads"), dir.path().join("outputs"), "mp4");
        processor
            .registry()
            .insert(JobRecord::new(id.clone(), "site.mp4", paths))
            .await;

        let (_tx, rx) = watch::channel(false);
        assert!(processor.process(&id, rx).await.is_err());

        let job = processor.registry().get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job
            .status_message()
            .starts_with("An error occurred during processing:"));
    }
}
