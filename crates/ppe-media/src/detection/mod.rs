//! PPE object detection.
//!
//! `FrameDetector` is the seam the frame loop depends on; `ObjectDetector`
//! is the ONNX Runtime implementation.

pub mod class_names;
pub mod letterbox;
pub mod object_detector;

pub use object_detector::{ObjectDetector, ObjectDetectorConfig, DEFAULT_CONFIDENCE};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::MediaResult;

/// One detected object in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` in pixels, clamped to the frame
    pub bbox: [f32; 4],
    pub class_id: usize,
    pub class_name: String,
    /// Score in [0, 1]
    pub confidence: f32,
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.bbox[2] - self.bbox[0]
    }

    pub fn height(&self) -> f32 {
        self.bbox[3] - self.bbox[1]
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &Detection) -> f32 {
        let x1 = self.bbox[0].max(other.bbox[0]);
        let y1 = self.bbox[1].max(other.bbox[1]);
        let x2 = self.bbox[2].min(other.bbox[2]);
        let y2 = self.bbox[3].min(other.bbox[3]);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Runs object detection on decoded frames.
pub trait FrameDetector: Send + Sync {
    /// Detect objects in one RGB frame.
    fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<Detection>>;

    /// Class names indexed by class id.
    fn class_names(&self) -> &[String];
}
