//! Drawing detection boxes and labels onto frames.

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use ppe_models::PpeClass;
use tracing::{debug, info, warn};

use crate::detection::Detection;
use crate::error::{MediaError, MediaResult};

/// Fonts tried when no label font is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Box and label style.
#[derive(Clone)]
pub struct Annotator {
    font: Option<FontArc>,
    line_thickness: u32,
    font_scale: f32,
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("has_font", &self.font.is_some())
            .field("line_thickness", &self.line_thickness)
            .field("font_scale", &self.font_scale)
            .finish()
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            line_thickness: 2,
            font_scale: 18.0,
        }
    }
}

impl Annotator {
    /// Annotator that draws boxes only.
    pub fn boxes_only() -> Self {
        Self::default()
    }

    /// Load a label font from `path`, or the first system font found.
    ///
    /// An explicit path that fails to load is an error; a missing system
    /// font just disables labels.
    pub fn load(path: Option<&Path>) -> MediaResult<Self> {
        if let Some(path) = path {
            let font = load_font(path)?;
            info!(font = %path.display(), "Loaded label font");
            return Ok(Self::default().with_font(font));
        }

        for candidate in SYSTEM_FONTS.iter().map(PathBuf::from) {
            if !candidate.exists() {
                continue;
            }
            match load_font(&candidate) {
                Ok(font) => {
                    info!(font = %candidate.display(), "Loaded label font");
                    return Ok(Self::default().with_font(font));
                }
                Err(e) => debug!(font = %candidate.display(), "Skipping font: {}", e),
            }
        }

        warn!("No label font found, detections will be drawn without text");
        Ok(Self::boxes_only())
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn with_line_thickness(mut self, thickness: u32) -> Self {
        self.line_thickness = thickness.max(1);
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Label text for a detection, e.g. `"Helmet 0.87"`.
    pub fn label(detection: &Detection) -> String {
        format!("{} {:.2}", detection.class_name, detection.confidence)
    }
}

fn load_font(path: &Path) -> MediaResult<FontArc> {
    let bytes = std::fs::read(path)?;
    FontArc::try_from_vec(bytes)
        .map_err(|e| MediaError::internal(format!("Invalid font {}: {}", path.display(), e)))
}

/// Draw every detection onto `frame` in its class colour.
pub fn annotate_frame(frame: &mut RgbImage, detections: &[Detection], annotator: &Annotator) {
    let (frame_w, frame_h) = frame.dimensions();
    if frame_w == 0 || frame_h == 0 {
        return;
    }

    for det in detections {
        let color = Rgb(PpeClass::from_label(&det.class_name).color());

        let x1 = (det.bbox[0].round() as i32).clamp(0, frame_w as i32 - 1);
        let y1 = (det.bbox[1].round() as i32).clamp(0, frame_h as i32 - 1);
        let x2 = (det.bbox[2].round() as i32).clamp(0, frame_w as i32 - 1);
        let y2 = (det.bbox[3].round() as i32).clamp(0, frame_h as i32 - 1);

        for t in 0..annotator.line_thickness as i32 {
            let w = x2 - x1 - 2 * t + 1;
            let h = y2 - y1 - 2 * t + 1;
            if w <= 0 || h <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                frame,
                Rect::at(x1 + t, y1 + t).of_size(w as u32, h as u32),
                color,
            );
        }

        if let Some(font) = &annotator.font {
            draw_label(frame, font, annotator.font_scale, &Annotator::label(det), x1, y1, color);
        }
    }
}

fn draw_label(
    frame: &mut RgbImage,
    font: &FontArc,
    font_scale: f32,
    text: &str,
    x: i32,
    y: i32,
    color: Rgb<u8>,
) {
    let scale = PxScale::from(font_scale);
    let (text_w, text_h) = text_size(scale, font, text);
    let pad = 3i32;
    let box_w = text_w as i32 + 2 * pad;
    let box_h = text_h as i32 + 2 * pad;

    // Above the box when there is room, otherwise just inside it.
    let top = if y - box_h >= 0 { y - box_h } else { y };
    let left = x.min(frame.width() as i32 - box_w).max(0);

    draw_filled_rect_mut(
        frame,
        Rect::at(left, top).of_size(box_w as u32, box_h as u32),
        color,
    );
    draw_text_mut(
        frame,
        text_color(color),
        left + pad,
        top + pad,
        scale,
        font,
        text,
    );
}

/// Black or white, whichever reads better on `background`.
fn text_color(background: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = background.0;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 150.0 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}
