//! Aspect-preserving letterbox for square model inputs.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Fill value for the padded border (YOLOv8 training default).
pub const PAD_VALUE: u8 = 114;

/// How a frame was placed on the letterbox canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxMeta {
    /// Frame-to-canvas scale factor
    pub scale: f32,
    /// Left padding in canvas pixels
    pub pad_x: f32,
    /// Top padding in canvas pixels
    pub pad_y: f32,
}

impl LetterboxMeta {
    /// Map a canvas-space point back to frame pixels.
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize `frame` to fit a `size`×`size` canvas and centre it on gray.
pub fn letterbox(frame: &RgbImage, size: u32) -> (RgbImage, LetterboxMeta) {
    let (w, h) = frame.dimensions();
    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    if (new_w, new_h) == (w, h) {
        imageops::replace(&mut canvas, frame, pad_x as i64, pad_y as i64);
    } else {
        let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);
        imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);
    }

    (
        canvas,
        LetterboxMeta {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// HWC u8 -> planar CHW f32 in [0, 1].
pub fn to_nchw(image: &RgbImage) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0f32; 3 * plane];

    for (i, pixel) in image.pixels().enumerate() {
        data[i] = pixel[0] as f32 / 255.0;
        data[plane + i] = pixel[1] as f32 / 255.0;
        data[2 * plane + i] = pixel[2] as f32 / 255.0;
    }

    data
}
