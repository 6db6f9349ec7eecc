//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ppe_media::detection::class_names::parse_names_list;
use ppe_media::{
    Annotator, EncodeOptions, MediaResult, ObjectDetectorConfig, PipelineOptions, DEFAULT_FPS,
};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Where uploads are saved as `{id}.{ext}`
    pub upload_dir: PathBuf,
    /// Where `{id}_temp.mp4` and `{id}_final.mp4` are written
    pub output_dir: PathBuf,
    /// ONNX model file
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub input_size: u32,
    /// Overrides the class names embedded in the model
    pub class_names: Option<Vec<String>>,
    /// Label font; system fonts are tried when unset
    pub font_path: Option<PathBuf>,
    /// Box border width in pixels
    pub line_thickness: u32,
    /// Frame rate used when the input reports none
    pub default_fps: f64,
    /// Codec of the intermediate file
    pub intermediate_codec: String,
    /// Codec of the final output
    pub h264_codec: String,
    pub pixel_format: String,
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Job timeout
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Age after which finished jobs and their files are removed; zero disables
    pub retention: Duration,
    /// Keep the intermediate file after encoding
    pub keep_temp: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("outputs"),
            model_path: PathBuf::from("model/best.onnx"),
            confidence_threshold: 0.4,
            nms_threshold: 0.45,
            input_size: 640,
            class_names: None,
            font_path: None,
            line_thickness: 2,
            default_fps: DEFAULT_FPS,
            intermediate_codec: "mpeg4".to_string(),
            h264_codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            max_concurrent_jobs: 1,
            job_timeout: Duration::from_secs(3600), // 1 hour
            shutdown_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(86_400),
            keep_temp: false,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            upload_dir: env_string("PPE_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            output_dir: env_string("PPE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            model_path: env_string("PPE_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            confidence_threshold: env_parse::<f32>("PPE_CONFIDENCE")
                .filter(|c| (0.0..=1.0).contains(c))
                .unwrap_or(defaults.confidence_threshold),
            nms_threshold: env_parse::<f32>("PPE_IOU")
                .filter(|c| (0.0..=1.0).contains(c))
                .unwrap_or(defaults.nms_threshold),
            input_size: env_parse::<u32>("PPE_INPUT_SIZE")
                .filter(|s| *s >= 32)
                .unwrap_or(defaults.input_size),
            class_names: env_string("PPE_CLASS_NAMES")
                .map(|s| parse_names_list(&s))
                .filter(|names| !names.is_empty()),
            font_path: env_string("PPE_FONT_PATH").map(PathBuf::from),
            line_thickness: env_parse::<u32>("PPE_LINE_THICKNESS")
                .filter(|t| *t > 0)
                .unwrap_or(defaults.line_thickness),
            default_fps: env_parse::<f64>("PPE_DEFAULT_FPS")
                .filter(|f| *f > 0.0)
                .unwrap_or(defaults.default_fps),
            intermediate_codec: env_string("PPE_INTERMEDIATE_CODEC")
                .unwrap_or(defaults.intermediate_codec),
            h264_codec: env_string("PPE_H264_CODEC").unwrap_or(defaults.h264_codec),
            pixel_format: env_string("PPE_PIXEL_FORMAT").unwrap_or(defaults.pixel_format),
            max_concurrent_jobs: env_parse::<usize>("WORKER_MAX_JOBS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            job_timeout: env_parse::<u64>("WORKER_JOB_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            shutdown_timeout: env_parse::<u64>("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            retention: env_parse::<u64>("PPE_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
            keep_temp: env_bool("PPE_KEEP_TEMP").unwrap_or(defaults.keep_temp),
        }
    }

    pub fn detector_config(&self) -> ObjectDetectorConfig {
        ObjectDetectorConfig {
            model_path: self.model_path.clone(),
            confidence_threshold: self.confidence_threshold,
            nms_threshold: self.nms_threshold,
            input_size: self.input_size,
            class_names: self.class_names.clone(),
        }
    }

    /// Load the label font and apply the box border width.
    pub fn annotator(&self) -> MediaResult<Annotator> {
        Ok(Annotator::load(self.font_path.as_deref())?.with_line_thickness(self.line_thickness))
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            default_fps: self.default_fps,
            intermediate_codec: self.intermediate_codec.clone(),
        }
    }

    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            codec: self.h264_codec.clone(),
            pixel_format: self.pixel_format.clone(),
            timeout_secs: Some(self.job_timeout.as_secs()),
        }
    }

    /// Create the upload and output directories.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::create_dir_all(&self.output_dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.output_dir, PathBuf::from("outputs"));
        assert!((config.confidence_threshold - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.default_fps, 25.0);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.intermediate_codec, "mpeg4");
    }

    #[test]
    fn test_derived_options() {
        let config = WorkerConfig {
            class_names: Some(vec!["Helmet".into()]),
            ..Default::default()
        };

        let detector = config.detector_config();
        assert_eq!(detector.input_size, 640);
        assert_eq!(detector.class_names.as_deref(), Some(&["Helmet".to_string()][..]));

        let encode = config.encode_options();
        assert_eq!(encode.codec, "libx264");
        assert_eq!(encode.timeout_secs, Some(3600));

        assert_eq!(config.pipeline_options().default_fps, 25.0);
    }

    #[test]
    fn test_annotator_uses_line_thickness() {
        use image::{Rgb, RgbImage};
        use ppe_media::{annotate_frame, Detection};

        let config = WorkerConfig {
            line_thickness: 4,
            ..Default::default()
        };
        let annotator = config.annotator().unwrap();

        let mut frame = RgbImage::new(100, 100);
        let det = Detection {
            class_id: 0,
            class_name: "Helmet".to_string(),
            confidence: 0.9,
            bbox: [10.0, 40.0, 80.0, 95.0],
        };
        annotate_frame(&mut frame, &[det], &annotator);

        // Left border below any label: four pixels wide
        assert_ne!(frame.get_pixel(13, 70), &Rgb([0, 0, 0]));
        assert_eq!(frame.get_pixel(14, 70), &Rgb([0, 0, 0]));
    }

    #[tokio::test]
    async fn test_ensure_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = WorkerConfig {
            upload_dir: dir.path().join("uploads"),
            output_dir: dir.path().join("outputs"),
            ..Default::default()
        };
        config.ensure_dirs().await.unwrap();
        assert!(config.upload_dir.is_dir());
        assert!(config.output_dir.is_dir());
    }
}
