#![deny(unreachable_patterns)]
//! Video processing for PPE detection.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with progress and cancellation
//! - FFprobe video properties
//! - Raw RGB frame decode/encode through FFmpeg pipes
//! - YOLOv8 PPE detection over ONNX Runtime
//! - Box and label annotation
//! - The per-frame detection loop and the final H.264 encode

pub mod annotate;
pub mod command;
pub mod detection;
pub mod encode;
pub mod error;
pub mod frames;
pub mod fs_utils;
pub mod pipeline;
pub mod probe;
pub mod progress;

pub use annotate::{annotate_frame, Annotator};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use detection::{Detection, FrameDetector, ObjectDetector, ObjectDetectorConfig};
pub use encode::{encode_to_h264, EncodeOptions};
pub use error::{MediaError, MediaResult};
pub use frames::{FrameReader, FrameWriter, FrameWriterOptions};
pub use pipeline::{
    process_video_with_detector, run_frame_loop, FrameSink, FrameSource, PipelineOptions,
    PipelineOutcome,
};
pub use probe::{probe_video, probe_video_blocking, VideoInfo, DEFAULT_FPS};
pub use progress::FfmpegProgress;
