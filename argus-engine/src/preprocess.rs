//! Image decoding and letterboxing into the model's input resolution

use crate::models::ModelInput;
use argus_core::{ArgusError, ImageSize};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use std::io::Cursor;

/// Gray used by YOLO exports for letterbox padding
pub const PAD_VALUE: u8 = 114;

/// Aspect-preserving resize plus centred padding, and its inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub source: ImageSize,
    pub target: ImageSize,
    pub scale: f64,
    pub pad_x: u32,
    pub pad_y: u32,
    pub resized: ImageSize,
}

impl Letterbox {
    pub fn new(source: ImageSize, target: ImageSize) -> Self {
        let scale = (target.width as f64 / source.width as f64)
            .min(target.height as f64 / source.height as f64);
        let resized_w = ((source.width as f64 * scale).round() as u32).clamp(1, target.width);
        let resized_h = ((source.height as f64 * scale).round() as u32).clamp(1, target.height);

        Self {
            source,
            target,
            scale,
            pad_x: (target.width - resized_w) / 2,
            pad_y: (target.height - resized_h) / 2,
            resized: ImageSize::new(resized_w, resized_h),
        }
    }

    /// Map a model-space point back to source-image pixels (unclamped).
    pub fn to_source(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }

    /// Map a source-image point into model space.
    pub fn to_model(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.scale + self.pad_x as f64,
            y * self.scale + self.pad_y as f64,
        )
    }
}

/// Decode image bytes, guessing the format from the content.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ArgusError> {
    if bytes.is_empty() {
        return Err(ArgusError::InvalidImage("empty image".to_string()));
    }
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ArgusError::InvalidImage(e.to_string()))?;
    let image = reader
        .decode()
        .map_err(|e| ArgusError::InvalidImage(e.to_string()))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ArgusError::InvalidImage("image has no pixels".to_string()));
    }
    Ok(image)
}

/// Letterbox `image` into `target` and lay it out as a normalized CHW tensor.
pub fn prepare_input(image: &DynamicImage, target: (u32, u32)) -> (ModelInput, Letterbox) {
    let source = ImageSize::new(image.width(), image.height());
    let letterbox = Letterbox::new(source, ImageSize::new(target.0, target.1));

    let rgb = image.to_rgb8();
    let resized = imageops::resize(
        &rgb,
        letterbox.resized.width,
        letterbox.resized.height,
        FilterType::Triangle,
    );
    let mut canvas = RgbImage::from_pixel(target.0, target.1, Rgb([PAD_VALUE; 3]));
    imageops::overlay(
        &mut canvas,
        &resized,
        letterbox.pad_x as i64,
        letterbox.pad_y as i64,
    );

    (to_chw(&canvas), letterbox)
}

fn to_chw(canvas: &RgbImage) -> ModelInput {
    let (width, height) = canvas.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; plane * 3];
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = pixel.0[c] as f32 / 255.0;
        }
    }
    ModelInput { width, height, data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;

    fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_letterbox_wide_image() {
        let lb = Letterbox::new(ImageSize::new(1920, 1080), ImageSize::new(640, 640));
        assert!((lb.scale - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(lb.resized, ImageSize::new(640, 360));
        assert_eq!((lb.pad_x, lb.pad_y), (0, 140));

        let (x, y) = lb.to_source(100.0, 200.0);
        assert!((x - 300.0).abs() < 1e-9);
        assert!((y - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_letterbox_tall_image() {
        let lb = Letterbox::new(ImageSize::new(300, 600), ImageSize::new(640, 640));
        assert_eq!(lb.resized, ImageSize::new(320, 640));
        assert_eq!((lb.pad_x, lb.pad_y), (160, 0));
    }

    #[test]
    fn test_letterbox_inverse() {
        let lb = Letterbox::new(ImageSize::new(1280, 720), ImageSize::new(640, 640));
        let (mx, my) = lb.to_model(400.0, 300.0);
        let (sx, sy) = lb.to_source(mx, my);
        assert!((sx - 400.0).abs() < 1e-9);
        assert!((sy - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_png_and_jpeg() {
        let image = RgbImage::from_pixel(8, 4, Rgb([10, 20, 30]));
        for format in [ImageFormat::Png, ImageFormat::Jpeg] {
            let decoded = decode_image(&encode(&image, format)).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (8, 4));
        }
    }

    #[test]
    fn test_decode_garbage_is_invalid_image() {
        for bytes in [&b""[..], b"not an image at all", &[0x89, b'P', b'N', b'G'][..]] {
            match decode_image(bytes) {
                Err(ArgusError::InvalidImage(_)) => {}
                other => panic!("Expected InvalidImage, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_prepare_input_pads_with_gray() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 32, Rgb([255, 0, 0])));
        let (input, lb) = prepare_input(&image, (64, 64));
        assert_eq!((input.width, input.height), (64, 64));
        assert_eq!(input.data.len(), 3 * 64 * 64);
        assert_eq!((lb.pad_x, lb.pad_y), (0, 16));

        let plane = 64 * 64;
        let gray = PAD_VALUE as f32 / 255.0;
        // top-left is padding, centre is the red image
        assert!((input.data[0] - gray).abs() < 1e-6);
        let centre = 32 * 64 + 32;
        assert!((input.data[centre] - 1.0).abs() < 1e-6);
        assert!(input.data[plane + centre].abs() < 1e-6);
    }
}
