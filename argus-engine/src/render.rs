//! Draw detections onto a copy of the source image and encode it as JPEG

use ab_glyph::{FontVec, PxScale};
use argus_core::{ArgusError, Detection, COCO_CLASSES};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{info, warn};

const JPEG_QUALITY: u8 = 90;

/// Class colours, cycled by class index
const PALETTE: &[[u8; 3]] = &[
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [146, 204, 23],
    [61, 219, 134],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [52, 69, 147],
    [100, 115, 255],
    [0, 24, 236],
    [132, 56, 255],
    [82, 0, 133],
    [203, 56, 255],
    [255, 149, 200],
    [255, 55, 199],
];

pub struct Renderer {
    font: Option<FontVec>,
}

impl Renderer {
    /// Renderer that draws boxes and label tabs without text.
    pub fn new() -> Self {
        Self { font: None }
    }

    pub fn with_font(font: FontVec) -> Self {
        Self { font: Some(font) }
    }

    /// Use the TTF/OTF font at `path` for labels; falls back to untexted tabs.
    pub fn from_font_path(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path,
            None => return Self::new(),
        };
        let loaded = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
        match loaded {
            Ok(font) => {
                info!("Label font loaded from {:?}", path);
                Self::with_font(font)
            }
            Err(e) => {
                warn!("Cannot load label font {:?}: {}; labels drawn without text", path, e);
                Self::new()
            }
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw every detection on a copy of `image`. The input is never modified.
    pub fn draw(&self, image: &DynamicImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.to_rgb8();
        let (width, height) = canvas.dimensions();
        let thickness = ((width.max(height) as f32 / 400.0).round() as u32).max(2);
        let scale = PxScale::from((thickness * 6).max(12) as f32);

        for detection in detections {
            let color = class_color(detection.class_label());
            let bbox = detection.bounding_box();
            let x0 = bbox.x_min().floor() as i32;
            let y0 = bbox.y_min().floor() as i32;
            let x1 = (bbox.x_max().ceil() as i32).min(width as i32);
            let y1 = (bbox.y_max().ceil() as i32).min(height as i32);

            for t in 0..thickness as i32 {
                let w = x1 - x0 - 2 * t;
                let h = y1 - y0 - 2 * t;
                if w <= 0 || h <= 0 {
                    break;
                }
                draw_hollow_rect_mut(
                    &mut canvas,
                    Rect::at(x0 + t, y0 + t).of_size(w as u32, h as u32),
                    color,
                );
            }

            let label = format!("{} {:.2}", detection.class_label(), detection.confidence());
            let (text_w, text_h) = match &self.font {
                Some(font) => text_size(scale, font, &label),
                None => ((label.len() as f32 * scale.x * 0.5) as u32, scale.y as u32),
            };
            let tab_w = (text_w + 4).min(width);
            let tab_h = (text_h + 4).min(height);
            let tab_y = if y0 - tab_h as i32 >= 0 { y0 - tab_h as i32 } else { y0 };
            draw_filled_rect_mut(&mut canvas, Rect::at(x0, tab_y).of_size(tab_w, tab_h), color);

            if let Some(font) = &self.font {
                draw_text_mut(&mut canvas, Rgb([255, 255, 255]), x0 + 2, tab_y + 2, scale, font, &label);
            }
        }

        canvas
    }

    /// Draw and encode as JPEG.
    pub fn render_jpeg(&self, image: &DynamicImage, detections: &[Detection]) -> Result<Vec<u8>, ArgusError> {
        let canvas = self.draw(image, detections);
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
            .encode_image(&canvas)
            .map_err(|e| ArgusError::Internal(format!("JPEG encoding failed: {}", e)))?;
        Ok(bytes)
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

fn class_color(label: &str) -> Rgb<u8> {
    let index = COCO_CLASSES.iter().position(|c| *c == label).unwrap_or(0);
    Rgb(PALETTE[index % PALETTE.len()])
}
