//! The per-frame detection loop.
//!
//! decode → detect → count → annotate → encode, one frame at a time.
//! Everything here is synchronous; callers run it under `spawn_blocking`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use image::RgbImage;
use ppe_models::DetectionStats;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::annotate::{annotate_frame, Annotator};
use crate::detection::FrameDetector;
use crate::error::{MediaError, MediaResult};
use crate::frames::{FrameReader, FrameWriter, FrameWriterOptions};
use crate::probe::{probe_video_blocking, DEFAULT_FPS};

/// Metric names recorded by the frame loop.
pub mod metric_names {
    pub const FRAMES_PROCESSED_TOTAL: &str = "ppe_frames_processed_total";
    pub const DETECTIONS_TOTAL: &str = "ppe_detections_total";
}

/// Something that yields decoded frames in order.
pub trait FrameSource {
    fn next_frame(&mut self) -> MediaResult<Option<RgbImage>>;
}

/// Something that accepts annotated frames in order.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()>;
}

impl FrameSource for FrameReader {
    fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        self.read_frame()
    }
}

impl FrameSink for FrameWriter {
    fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        FrameWriter::write_frame(self, frame)
    }
}

/// Options for [`process_video_with_detector`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Used when the input reports no usable frame rate
    pub default_fps: f64,
    /// Encoder for the intermediate file
    pub intermediate_codec: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            default_fps: DEFAULT_FPS,
            intermediate_codec: "mpeg4".to_string(),
        }
    }
}

/// Summary returned by the frame loop.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub stats: DetectionStats,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Frame count from the container; 0 if unknown
    pub total_frames: u64,
}

fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.map(|rx| *rx.borrow()).unwrap_or(false)
}

fn format_counts(counts: &BTreeMap<String, u64>) -> String {
    let parts: Vec<String> = counts
        .iter()
        .map(|(name, count)| format!("{}: {}", name, count))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

/// Drive frames from `source` through detection and annotation into `sink`.
///
/// `progress` receives `(frame_id, total_frames)` after every frame, but
/// only when `total_frames > 0`.
pub fn run_frame_loop<S, W, F>(
    source: &mut S,
    sink: &mut W,
    detector: &dyn FrameDetector,
    annotator: &Annotator,
    total_frames: u64,
    mut progress: F,
    cancel: Option<&watch::Receiver<bool>>,
) -> MediaResult<DetectionStats>
where
    S: FrameSource + ?Sized,
    W: FrameSink + ?Sized,
    F: FnMut(u64, u64),
{
    let mut stats = DetectionStats::default();
    let mut frame_id: u64 = 0;

    while let Some(mut frame) = source.next_frame()? {
        if is_cancelled(cancel) {
            return Err(MediaError::Cancelled);
        }

        frame_id += 1;

        let detections = detector.detect(&frame)?;
        let counts = stats.record_frame(detections.iter().map(|d| d.class_name.as_str()));

        if !counts.is_empty() {
            info!(
                "Frame {}/{}: {}",
                frame_id,
                total_frames,
                format_counts(&counts)
            );
            for (name, count) in &counts {
                metrics::counter!(metric_names::DETECTIONS_TOTAL, "class" => name.clone())
                    .increment(*count);
            }
        }
        metrics::counter!(metric_names::FRAMES_PROCESSED_TOTAL).increment(1);

        if total_frames > 0 {
            progress(frame_id, total_frames);
        }

        annotate_frame(&mut frame, &detections, annotator);
        sink.write_frame(&frame)?;
    }

    if frame_id == 0 {
        return Err(MediaError::invalid_video("No decodable frames"));
    }

    Ok(stats)
}

/// Run detection over `input` and write the annotated intermediate file.
pub fn process_video_with_detector<F>(
    input: &Path,
    temp_output: &Path,
    detector: &dyn FrameDetector,
    annotator: &Annotator,
    opts: &PipelineOptions,
    progress: F,
    cancel: Option<&watch::Receiver<bool>>,
) -> MediaResult<PipelineOutcome>
where
    F: FnMut(u64, u64),
{
    let started = Instant::now();
    let info = probe_video_blocking(input)?;
    let (fps, width, height, total_frames) = info.frame_properties(opts.default_fps);
    if width == 0 || height == 0 {
        return Err(MediaError::invalid_video("Video stream has no dimensions"));
    }

    info!(
        input = %input.display(),
        fps,
        width,
        height,
        total_frames,
        "Starting frame processing"
    );

    let mut reader = FrameReader::open(input, width, height)?;
    let mut writer = FrameWriter::create(
        temp_output,
        &FrameWriterOptions {
            width,
            height,
            fps,
            codec: opts.intermediate_codec.clone(),
        },
    )?;

    let stats = run_frame_loop(
        &mut reader,
        &mut writer,
        detector,
        annotator,
        total_frames,
        progress,
        cancel,
    )?;

    reader.finish()?;
    writer.finish()?;

    debug!(
        frames = stats.frames_processed,
        detections = stats.total(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Frame processing finished"
    );

    Ok(PipelineOutcome {
        stats,
        fps,
        width,
        height,
        total_frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use image::Rgb;
    use std::collections::VecDeque;

    struct VecSource(VecDeque<RgbImage>);

    impl FrameSource for VecSource {
        fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
            Ok(self.0.pop_front())
        }
    }

    #[derive(Default)]
    struct VecSink(Vec<RgbImage>);

    impl FrameSink for VecSink {
        fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
            self.0.push(frame.clone());
            Ok(())
        }
    }

    /// Reports one "Person" plus one "No-Helmet" on odd frames, nothing on even.
    struct ScriptedDetector {
        names: Vec<String>,
        calls: std::sync::atomic::AtomicU64,
    }

    impl ScriptedDetector {
        fn new() -> Self {
            Self {
                names: vec!["Person".into(), "No-Helmet".into()],
                calls: Default::default(),
            }
        }
    }

    impl FrameDetector for ScriptedDetector {
        fn detect(&self, _frame: &RgbImage) -> MediaResult<Vec<Detection>> {
            let n = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n % 2 == 1 {
                return Ok(vec![]);
            }
            Ok(vec![
                Detection {
                    bbox: [1.0, 1.0, 6.0, 6.0],
                    class_id: 0,
                    class_name: "Person".into(),
                    confidence: 0.9,
                },
                Detection {
                    bbox: [2.0, 2.0, 4.0, 4.0],
                    class_id: 1,
                    class_name: "No-Helmet".into(),
                    confidence: 0.6,
                },
            ])
        }

        fn class_names(&self) -> &[String] {
            &self.names
        }
    }

    fn frames(n: usize) -> VecSource {
        VecSource((0..n).map(|_| RgbImage::new(8, 8)).collect())
    }

    #[test]
    fn test_counts_and_progress() {
        let mut source = frames(3);
        let mut sink = VecSink::default();
        let mut seen = Vec::new();

        let stats = run_frame_loop(
            &mut source,
            &mut sink,
            &ScriptedDetector::new(),
            &Annotator::boxes_only(),
            3,
            |i, total| seen.push((i, total)),
            None,
        )
        .unwrap();

        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(stats.count("Person"), 2);
        assert_eq!(stats.count("No-Helmet"), 2);
        assert_eq!(stats.frames_processed, 3);
        assert_eq!(stats.frames_with_detections, 2);
        assert_eq!(sink.0.len(), 3);
    }

    #[test]
    fn test_frames_are_annotated() {
        let mut source = frames(2);
        let mut sink = VecSink::default();

        run_frame_loop(
            &mut source,
            &mut sink,
            &ScriptedDetector::new(),
            &Annotator::boxes_only(),
            0,
            |_, _| {},
            None,
        )
        .unwrap();

        let person = Rgb(ppe_models::PpeClass::Person.color());
        assert_eq!(sink.0[0].get_pixel(1, 1), &person);
        assert_eq!(sink.0[1].get_pixel(1, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_no_progress_without_total() {
        let mut source = frames(2);
        let mut sink = VecSink::default();
        let mut calls = 0;

        run_frame_loop(
            &mut source,
            &mut sink,
            &ScriptedDetector::new(),
            &Annotator::boxes_only(),
            0,
            |_, _| calls += 1,
            None,
        )
        .unwrap();

        assert_eq!(calls, 0);
    }

    #[test]
    fn test_empty_video_is_invalid() {
        let mut source = frames(0);
        let mut sink = VecSink::default();

        let result = run_frame_loop(
            &mut source,
            &mut sink,
            &ScriptedDetector::new(),
            &Annotator::boxes_only(),
            0,
            |_, _| {},
            None,
        );

        assert!(matches!(result, Err(MediaError::InvalidVideo(_))));
    }

    #[test]
    fn test_cancel_stops_loop() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let mut source = frames(5);
        let mut sink = VecSink::default();

        let result = run_frame_loop(
            &mut source,
            &mut sink,
            &ScriptedDetector::new(),
            &Annotator::boxes_only(),
            5,
            |_, _| {},
            Some(&rx),
        );

        assert!(matches!(result, Err(MediaError::Cancelled)));
        assert!(sink.0.is_empty());
    }

    #[test]
    fn test_format_counts() {
        let mut counts = BTreeMap::new();
        counts.insert("Person".to_string(), 2);
        counts.insert("Helmet".to_string(), 1);
        assert_eq!(format_counts(&counts), "{Helmet: 1, Person: 2}");
    }
}
