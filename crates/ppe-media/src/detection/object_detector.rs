//! YOLOv8 object detection over ONNX Runtime.
//!
//! Execution provider selection:
//! - CUDA on Linux with NVIDIA GPU (`cuda` feature)
//! - CoreML on macOS
//! - CPU fallback on all platforms

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::RgbImage;
use ndarray::ArrayView2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info, warn};

use super::class_names::{fallback_name, parse_names_literal};
use super::letterbox::{letterbox, to_nchw, LetterboxMeta};
use super::{Detection, FrameDetector};
use crate::error::{MediaError, MediaResult};

/// Default confidence threshold.
pub const DEFAULT_CONFIDENCE: f32 = 0.4;

/// Configuration for object detection.
#[derive(Debug, Clone)]
pub struct ObjectDetectorConfig {
    /// Path to ONNX model file
    pub model_path: PathBuf,
    /// Confidence threshold for detections
    pub confidence_threshold: f32,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Input image size (model expects square input)
    pub input_size: u32,
    /// Class names to use instead of the model's own metadata
    pub class_names: Option<Vec<String>>,
}

impl Default for ObjectDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model/best.onnx"),
            confidence_threshold: DEFAULT_CONFIDENCE,
            nms_threshold: 0.45,
            input_size: 640,
            class_names: None,
        }
    }
}

/// Thresholds applied when decoding raw model output.
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Object detector using a YOLOv8 ONNX model.
pub struct ObjectDetector {
    session: Mutex<Session>,
    config: ObjectDetectorConfig,
    class_names: Vec<String>,
}

impl ObjectDetector {
    /// Load the model and resolve class names.
    ///
    /// Returns `ModelNotFound` if the model file doesn't exist.
    pub fn new(config: ObjectDetectorConfig) -> MediaResult<Self> {
        if !config.model_path.exists() {
            return Err(MediaError::model_not_found(
                config.model_path.display().to_string(),
            ));
        }

        let session = create_session(&config.model_path)?;

        let class_names = match &config.class_names {
            Some(names) if !names.is_empty() => names.clone(),
            _ => match names_from_metadata(&session) {
                Some(names) => names,
                None => {
                    warn!("Model carries no class names, falling back to class_<id>");
                    Vec::new()
                }
            },
        };

        info!(
            model_path = %config.model_path.display(),
            input_size = config.input_size,
            classes = class_names.len(),
            "Object detector initialized"
        );

        Ok(Self {
            session: Mutex::new(session),
            config,
            class_names,
        })
    }

    /// Run detection on one RGB frame.
    pub fn detect_frame(&self, frame: &RgbImage) -> MediaResult<Vec<Detection>> {
        let (canvas, meta) = letterbox(frame, self.config.input_size);
        let size = self.config.input_size as usize;
        let shape = vec![1usize, 3, size, size];
        let input = Tensor::from_array((shape, to_nchw(&canvas).into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::internal(format!("Failed to create tensor: {}", e)))?;

        let (dims, output) = self.run_inference(input)?;

        let params = DecodeParams {
            confidence_threshold: self.config.confidence_threshold,
            nms_threshold: self.config.nms_threshold,
            frame_width: frame.width(),
            frame_height: frame.height(),
        };
        let detections = decode_output(&output, &dims, &meta, &params, &self.class_names)?;

        debug!(count = detections.len(), "Object detection completed");
        Ok(detections)
    }

    fn run_inference(&self, input: Value) -> MediaResult<(Vec<i64>, Vec<f32>)> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::detection_failed("Missing output0 tensor"))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::detection_failed(format!("Failed to extract tensor: {}", e)))?;

        Ok((shape.iter().copied().collect(), data.to_vec()))
    }

    /// Resolved class names, indexed by class id.
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// Get the configuration.
    pub fn config(&self) -> &ObjectDetectorConfig {
        &self.config
    }
}

impl FrameDetector for ObjectDetector {
    fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<Detection>> {
        self.detect_frame(frame)
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

/// Decode a `[1, 4 + nc, N]` YOLOv8 output into frame-space detections.
///
/// Rows 0..4 are `cx, cy, w, h` in canvas pixels; the rest are per-class
/// scores. The class count is taken from the shape.
pub fn decode_output(
    output: &[f32],
    dims: &[i64],
    meta: &LetterboxMeta,
    params: &DecodeParams,
    class_names: &[String],
) -> MediaResult<Vec<Detection>> {
    let (num_features, num_boxes) = match dims {
        [1, f, n] | [f, n] if *f > 4 && *n >= 0 => (*f as usize, *n as usize),
        _ => {
            return Err(MediaError::detection_failed(format!(
                "Unexpected output shape {:?}",
                dims
            )))
        }
    };
    let num_classes = num_features - 4;

    let predictions = ArrayView2::from_shape((num_features, num_boxes), output)
        .map_err(|e| MediaError::detection_failed(format!("Failed to reshape output: {}", e)))?;

    let max_x = params.frame_width as f32;
    let max_y = params.frame_height as f32;
    let mut candidates: Vec<Detection> = Vec::new();

    for i in 0..num_boxes {
        let mut best_class = 0;
        let mut best_score = f32::MIN;
        for c in 0..num_classes {
            let score = predictions[[4 + c, i]];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < params.confidence_threshold {
            continue;
        }

        let cx = predictions[[0, i]];
        let cy = predictions[[1, i]];
        let w = predictions[[2, i]];
        let h = predictions[[3, i]];

        let (x1, y1) = meta.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = meta.to_frame(cx + w / 2.0, cy + h / 2.0);
        let bbox = [
            x1.clamp(0.0, max_x),
            y1.clamp(0.0, max_y),
            x2.clamp(0.0, max_x),
            y2.clamp(0.0, max_y),
        ];
        if bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
            continue;
        }

        candidates.push(Detection {
            bbox,
            class_id: best_class,
            class_name: class_names
                .get(best_class)
                .cloned()
                .unwrap_or_else(|| fallback_name(best_class)),
            confidence: best_score,
        });
    }

    Ok(non_maximum_suppression(candidates, params.nms_threshold))
}

/// Per-class NMS, highest confidence first.
fn non_maximum_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in detections {
        let overlaps = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.iou(&candidate) > iou_threshold
        });
        if !overlaps {
            keep.push(candidate);
        }
    }

    keep
}

/// Class names from the ONNX `names` metadata entry.
fn names_from_metadata(session: &Session) -> Option<Vec<String>> {
    let metadata = session.metadata().ok()?;
    let literal = metadata.custom("names").ok().flatten()?;
    parse_names_literal(&literal)
}

/// Create ONNX Runtime session with automatic execution provider selection.
fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)?;

    let builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!("Using CoreML execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for object detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::internal(format!("Failed to load ONNX model: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: LetterboxMeta = LetterboxMeta {
        scale: 1.0,
        pad_x: 0.0,
        pad_y: 0.0,
    };

    fn params() -> DecodeParams {
        DecodeParams {
            confidence_threshold: 0.4,
            nms_threshold: 0.45,
            frame_width: 640,
            frame_height: 640,
        }
    }

    /// Build a `[1, 4 + nc, N]` buffer from `(cx, cy, w, h, scores)` rows.
    fn output(boxes: &[(f32, f32, f32, f32, Vec<f32>)]) -> (Vec<f32>, Vec<i64>) {
        let nc = boxes[0].4.len();
        let n = boxes.len();
        let mut data = vec![0f32; (4 + nc) * n];
        for (i, (cx, cy, w, h, scores)) in boxes.iter().enumerate() {
            data[i] = *cx;
            data[n + i] = *cy;
            data[2 * n + i] = *w;
            data[3 * n + i] = *h;
            for (c, s) in scores.iter().enumerate() {
                data[(4 + c) * n + i] = *s;
            }
        }
        (data, vec![1, (4 + nc) as i64, n as i64])
    }

    fn names() -> Vec<String> {
        vec!["Helmet".into(), "No-Helmet".into(), "Person".into()]
    }

    #[test]
    fn test_config_default() {
        let config = ObjectDetectorConfig::default();
        assert_eq!(config.input_size, 640);
        assert!((config.confidence_threshold - 0.4).abs() < 0.001);
        assert!((config.nms_threshold - 0.45).abs() < 0.001);
    }

    #[test]
    fn test_decode_picks_best_class() {
        let (data, dims) = output(&[(100.0, 100.0, 40.0, 60.0, vec![0.1, 0.9, 0.3])]);
        let dets = decode_output(&data, &dims, &IDENTITY, &params(), &names()).unwrap();

        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_name, "No-Helmet");
        assert_eq!(dets[0].bbox, [80.0, 70.0, 120.0, 130.0]);
    }

    #[test]
    fn test_decode_drops_low_confidence() {
        let (data, dims) = output(&[(100.0, 100.0, 40.0, 60.0, vec![0.39, 0.1, 0.0])]);
        let dets = decode_output(&data, &dims, &IDENTITY, &params(), &names()).unwrap();
        assert!(dets.is_empty());
    }

    #[test]
    fn test_nms_is_per_class() {
        let (data, dims) = output(&[
            (100.0, 100.0, 50.0, 50.0, vec![0.9, 0.0, 0.0]),
            (102.0, 101.0, 50.0, 50.0, vec![0.8, 0.0, 0.0]),
            (101.0, 100.0, 50.0, 50.0, vec![0.0, 0.0, 0.7]),
        ]);
        let dets = decode_output(&data, &dims, &IDENTITY, &params(), &names()).unwrap();

        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].class_name, "Helmet");
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(dets[1].class_name, "Person");
    }

    #[test]
    fn test_decode_maps_through_letterbox_and_clamps() {
        // 1280x720 frame on a 640 canvas: scale 0.5, 140px top pad
        let meta = LetterboxMeta {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 140.0,
        };
        let params = DecodeParams {
            frame_width: 1280,
            frame_height: 720,
            ..params()
        };
        let (data, dims) = output(&[(630.0, 200.0, 40.0, 40.0, vec![0.8, 0.0, 0.0])]);
        let dets = decode_output(&data, &dims, &meta, &params, &names()).unwrap();

        assert_eq!(dets[0].bbox, [1220.0, 80.0, 1280.0, 160.0]);
    }

    #[test]
    fn test_unknown_class_id_gets_fallback_name() {
        let (data, dims) = output(&[(50.0, 50.0, 10.0, 10.0, vec![0.0, 0.0, 0.0, 0.95])]);
        let dets = decode_output(&data, &dims, &IDENTITY, &params(), &names()).unwrap();
        assert_eq!(dets[0].class_name, "class_3");
    }

    #[test]
    fn test_bad_shape_is_error() {
        let err = decode_output(&[0.0; 8], &[1, 4, 2], &IDENTITY, &params(), &names());
        assert!(matches!(err, Err(MediaError::DetectionFailed(_))));
    }

    #[test]
    fn test_missing_model() {
        let config = ObjectDetectorConfig {
            model_path: PathBuf::from("/nonexistent/best.onnx"),
            ..Default::default()
        };
        assert!(matches!(
            ObjectDetector::new(config),
            Err(MediaError::ModelNotFound(_))
        ));
    }
}
