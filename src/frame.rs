use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Decoded frame received from the device
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Monotonic frame identifier assigned by the frame source
    pub id: u64,
    /// Time the frame was received
    pub timestamp: SystemTime,
    /// Decoded pixels (shared ownership, frames are never mutated)
    pub image: Arc<RgbImage>,
}

impl FrameData {
    pub fn new(id: u64, timestamp: SystemTime, image: RgbImage) -> Self {
        Self {
            id,
            timestamp,
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Decoded frames are always 3-channel RGB
    pub fn channels(&self) -> u8 {
        3
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Rectangular crop region. Coordinates refer to the image the region is
/// applied to and may lie partly outside it; the processor clamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl CropRegion {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Map a region drawn on a scaled preview back to source coordinates
    pub fn to_source(&self, preview_size: (u32, u32), source_size: (u32, u32)) -> Self {
        if preview_size.0 == 0 || preview_size.1 == 0 {
            return *self;
        }
        let sx = source_size.0 as f64 / preview_size.0 as f64;
        let sy = source_size.1 as f64 / preview_size.1 as f64;

        Self {
            x: (self.x as f64 * sx).round() as i32,
            y: (self.y as f64 * sy).round() as i32,
            width: (self.width as f64 * sx).round() as i32,
            height: (self.height as f64 * sy).round() as i32,
        }
    }
}

impl From<(i32, i32, i32, i32)> for CropRegion {
    fn from((x, y, width, height): (i32, i32, i32, i32)) -> Self {
        Self::new(x, y, width, height)
    }
}

/// Immutable snapshot of the processing settings, pulled once per capture tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessingParams {
    /// Signed rotation in degrees, positive is counter-clockwise
    pub rotation_degrees: f32,
    /// Crop region, `None` when cropping is disabled
    pub crop: Option<CropRegion>,
    /// Output (width, height)
    pub output_size: (u32, u32),
}

impl ProcessingParams {
    pub fn roi_applied(&self) -> bool {
        self.crop.is_some()
    }
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            rotation_degrees: 0.0,
            crop: None,
            output_size: (240, 240),
        }
    }
}
