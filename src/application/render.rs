//! Drawing of detections onto RGB frames and JPEG encoding for the browser.

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::warn;

use crate::domain::detection::Detection;
use crate::domain::errors::{DomainError, DomainResult};

const PALETTE: [[u8; 3]; 6] = [
    [255, 56, 56],
    [255, 157, 151],
    [72, 249, 10],
    [0, 194, 255],
    [255, 178, 29],
    [146, 204, 23],
];
const CENTER_TEXT: Rgb<u8> = Rgb([12, 255, 36]);
const CENTER_LINE: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_SCALE: f32 = 16.0;
const CENTER_SCALE: f32 = 14.0;

/// DejaVu Sans, used when no FONT is configured or the configured one is unusable.
const BUNDLED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// Draws boxes, captions and the webcam center overlay.
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(font: FontArc) -> Self {
        Self { font: Some(font) }
    }

    /// Geometry only.
    #[cfg(test)]
    pub fn without_text() -> Self {
        Self { font: None }
    }

    pub fn bundled() -> Self {
        match FontArc::try_from_slice(BUNDLED_FONT) {
            Ok(font) => Self::new(font),
            Err(e) => {
                warn!("Bundled font unreadable ({}), captions disabled", e);
                Self { font: None }
            }
        }
    }

    /// Loads `path`, falling back to the bundled font when it is unset or unreadable.
    pub fn from_font_file(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::bundled();
        };
        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => Self::new(font),
            Err(e) => {
                warn!("Font {} unavailable ({}), using the bundled font", path.display(), e);
                Self::bundled()
            }
        }
    }

    /// Box plus "label 0.87" caption per detection.
    pub fn draw_detections(&self, img: &mut RgbImage, detections: &[Detection]) {
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return;
        }
        for det in detections {
            let color = Rgb(PALETTE[det.class_id % PALETTE.len()]);
            let x = det.x1.round().clamp(0.0, (w - 1) as f32) as i32;
            let y = det.y1.round().clamp(0.0, (h - 1) as f32) as i32;
            let bw = (det.x2.round() as i32 - x).max(1) as u32;
            let bh = (det.y2.round() as i32 - y).max(1) as u32;

            draw_hollow_rect_mut(img, Rect::at(x, y).of_size(bw, bh), color);
            if bw > 2 && bh > 2 {
                draw_hollow_rect_mut(img, Rect::at(x + 1, y + 1).of_size(bw - 2, bh - 2), color);
            }

            if let Some(font) = &self.font {
                let caption = format!("{} {:.2}", det.label, det.score);
                let scale = PxScale::from(LABEL_SCALE);
                let (tw, th) = text_size(scale, font, &caption);
                let ty = if y >= th as i32 + 2 { y - th as i32 - 2 } else { y };
                draw_filled_rect_mut(img, Rect::at(x, ty).of_size(tw.max(1) + 4, th.max(1) + 2), color);
                draw_text_mut(img, LABEL_TEXT, x + 2, ty, scale, font, &caption);
            }
        }
    }

    /// Center coordinates as text and a line from the frame center to each box center.
    pub fn draw_center_overlay(&self, img: &mut RgbImage, detections: &[Detection]) {
        let (w, h) = img.dimensions();
        let frame_center = ((w / 2) as f32, (h / 2) as f32);
        for det in detections {
            let (cx, cy) = det.center();
            if let Some(font) = &self.font {
                let text = format!("({}, {})", cx, cy);
                let scale = PxScale::from(CENTER_SCALE);
                let (_, th) = text_size(scale, font, &text);
                draw_text_mut(img, CENTER_TEXT, cx, cy - 10 - th as i32, scale, font, &text);
            }
            draw_thick_line(img, frame_center, (cx as f32, cy as f32), CENTER_LINE);
        }
    }
}

/// Two-pixel line: the segment plus a copy shifted across its minor axis.
fn draw_thick_line(img: &mut RgbImage, from: (f32, f32), to: (f32, f32), color: Rgb<u8>) {
    draw_line_segment_mut(img, from, to, color);
    let (ox, oy) = if (to.0 - from.0).abs() >= (to.1 - from.1).abs() { (0.0, 1.0) } else { (1.0, 0.0) };
    draw_line_segment_mut(img, (from.0 + ox, from.1 + oy), (to.0 + ox, to.1 + oy), color);
}

pub fn encode_jpeg(rgb: &RgbImage, quality: u8) -> DomainResult<Vec<u8>> {
    let mut jpeg = Vec::new();
    let mut enc = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality);
    enc.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| DomainError::OperationFailed(format!("jpeg encoding failed: {e}")))?;
    Ok(jpeg)
}
