use crate::error::{DecodeError, StorageError};
use crate::frame::{CropRegion, ProcessingParams};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::Projection;
use std::io::Write;
use tracing::trace;

/// Stateless rotate / crop / resize pipeline. Every operation returns a new
/// image and never touches its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameProcessor;

impl FrameProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Run the full pipeline: rotate, then crop (if enabled), then resize
    pub fn process(&self, image: &RgbImage, params: &ProcessingParams) -> RgbImage {
        let rotated = self.rotate(image, params.rotation_degrees);
        let cropped = match params.crop {
            Some(region) => self.extract_region(&rotated, region),
            None => rotated,
        };
        self.resize(&cropped, params.output_size)
    }

    /// Rotate by signed degrees (positive is counter-clockwise). The canvas
    /// grows to the rotated bounding box; uncovered pixels repeat the nearest
    /// edge pixel of the source.
    pub fn rotate(&self, image: &RgbImage, degrees: f32) -> RgbImage {
        if degrees == 0.0 || !degrees.is_finite() || image.width() == 0 || image.height() == 0 {
            return image.clone();
        }

        let (w, h) = (image.width() as f32, image.height() as f32);
        let theta = degrees.to_radians();
        let (sin, cos) = (theta.sin().abs(), theta.cos().abs());

        let new_w = ((h * sin + w * cos) as u32).max(1);
        let new_h = ((h * cos + w * sin) as u32).max(1);

        // Output pixel to source pixel. Image y points down, so a visually
        // counter-clockwise turn maps back through a positive angle.
        let inverse = Projection::translate(w / 2.0, h / 2.0)
            * Projection::rotate(theta)
            * Projection::translate(-(new_w as f32) / 2.0, -(new_h as f32) / 2.0);

        let out = RgbImage::from_fn(new_w, new_h, |x, y| {
            let (sx, sy) = inverse * (x as f32, y as f32);
            sample_clamped(image, sx, sy)
        });

        trace!(
            "Rotated {}x{} by {} degrees -> {}x{}",
            image.width(),
            image.height(),
            degrees,
            new_w,
            new_h
        );
        out
    }

    /// Crop to `region` clamped to the image bounds. A region that degenerates
    /// to zero width or height returns the input unchanged.
    pub fn extract_region(&self, image: &RgbImage, region: CropRegion) -> RgbImage {
        let (img_w, img_h) = (image.width() as i64, image.height() as i64);
        if img_w == 0 || img_h == 0 {
            return image.clone();
        }

        let x = (region.x as i64).clamp(0, img_w - 1);
        let y = (region.y as i64).clamp(0, img_h - 1);
        let w = (region.width as i64).min(img_w - x);
        let h = (region.height as i64).min(img_h - y);

        if w <= 0 || h <= 0 {
            trace!("Crop region {:?} is degenerate, passing frame through", region);
            return image.clone();
        }

        imageops::crop_imm(image, x as u32, y as u32, w as u32, h as u32).to_image()
    }

    /// Resize to exactly `size` using bilinear filtering
    pub fn resize(&self, image: &RgbImage, size: (u32, u32)) -> RgbImage {
        if image.dimensions() == size || size.0 == 0 || size.1 == 0 {
            return image.clone();
        }
        imageops::resize(image, size.0, size.1, FilterType::Triangle)
    }

    /// Encode as baseline JPEG into any writer
    pub fn encode_jpeg_to<W: Write>(
        &self,
        image: &RgbImage,
        quality: u8,
        writer: W,
    ) -> Result<(), image::ImageError> {
        let mut encoder = JpegEncoder::new_with_quality(writer, quality.clamp(1, 100));
        encoder.encode_image(image)
    }

    /// Encode as JPEG into memory
    pub fn encode_jpeg(&self, image: &RgbImage, quality: u8) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();
        self.encode_jpeg_to(image, quality, &mut buf)
            .map_err(|e| StorageError::Write {
                path: "<memory>".to_string(),
                details: format!("JPEG encoding failed: {}", e),
            })?;
        Ok(buf)
    }
}

/// Bilinear sample with coordinates clamped to the image, so points outside
/// take the colour of the nearest edge
fn sample_clamped(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let max_x = (image.width() - 1) as f32;
    let max_y = (image.height() - 1) as f32;
    let x = if x.is_finite() { x.clamp(0.0, max_x) } else { 0.0 };
    let y = if y.is_finite() { y.clamp(0.0, max_y) } else { 0.0 };

    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let (p00, p10) = (image.get_pixel(x0, y0), image.get_pixel(x1, y0));
    let (p01, p11) = (image.get_pixel(x0, y1), image.get_pixel(x1, y1));

    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        *value = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Decode an encoded image payload (JPEG, PNG, ...) to RGB
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| DecodeError::Image {
            details: e.to_string(),
        })
}
