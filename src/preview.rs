use crate::error::StorageError;
use crate::frame::{CropRegion, FrameData};
use crate::processor::FrameProcessor;
use crate::settings::ParameterProvider;
use crate::source::FrameProvider;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// File name used for on-demand preview snapshots
pub const PREVIEW_FILE: &str = "preview.jpg";

/// Renders the live frame exactly as the next capture tick would save it
pub struct Preview {
    frames: Arc<dyn FrameProvider>,
    params: Arc<dyn ParameterProvider>,
    processor: FrameProcessor,
}

impl Preview {
    pub fn new(frames: Arc<dyn FrameProvider>, params: Arc<dyn ParameterProvider>) -> Self {
        Self {
            frames,
            params,
            processor: FrameProcessor::new(),
        }
    }

    /// Current frame through the capture pipeline, or `None` without a frame
    pub fn render(&self) -> Option<RgbImage> {
        let frame = self.frames.current_frame()?;
        let params = self.params.processing_parameters();
        Some(self.processor.process(&frame.image, &params))
    }

    /// Map a region selected on a preview of `preview_size` onto the current
    /// source frame
    pub fn source_crop(&self, selection: CropRegion, preview_size: (u32, u32)) -> Option<CropRegion> {
        let frame: FrameData = self.frames.current_frame()?;
        Some(selection.to_source(preview_size, (frame.width(), frame.height())))
    }

    /// Write the rendered preview as `preview.jpg` into `dir`. Returns
    /// `Ok(None)` when no frame is available.
    pub async fn save_snapshot(
        &self,
        dir: &Path,
        quality: u8,
    ) -> Result<Option<PathBuf>, StorageError> {
        let Some(frame) = self.frames.current_frame() else {
            debug!("No frame available for preview");
            return Ok(None);
        };
        let params = self.params.processing_parameters();
        let processor = self.processor;

        let bytes = tokio::task::spawn_blocking(move || {
            let rendered = processor.process(&frame.image, &params);
            processor.encode_jpeg(&rendered, quality)
        })
        .await
        .map_err(|e| StorageError::Write {
            path: dir.join(PREVIEW_FILE).display().to_string(),
            details: e.to_string(),
        })??;

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| StorageError::DirectoryCreation {
                path: dir.display().to_string(),
                source,
            })?;

        let path = dir.join(PREVIEW_FILE);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::Write {
                path: path.display().to_string(),
                details: e.to_string(),
            })?;

        info!("Preview written to {}", path.display());
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ProcessingParams;
    use image::Rgb;
    use parking_lot::Mutex;
    use std::time::SystemTime;
    use tempfile::TempDir;

    struct StaticFrame(Mutex<Option<FrameData>>);

    impl FrameProvider for StaticFrame {
        fn is_connected(&self) -> bool {
            self.0.lock().is_some()
        }

        fn current_frame(&self) -> Option<FrameData> {
            self.0.lock().clone()
        }
    }

    fn preview_with(frame: Option<FrameData>, params: ProcessingParams) -> Preview {
        Preview::new(Arc::new(StaticFrame(Mutex::new(frame))), Arc::new(params))
    }

    fn frame(width: u32, height: u32) -> FrameData {
        FrameData::new(
            7,
            SystemTime::now(),
            RgbImage::from_pixel(width, height, Rgb([10, 200, 30])),
        )
    }

    #[test]
    fn test_render_matches_processor_output() {
        let params = ProcessingParams {
            rotation_degrees: 15.0,
            crop: Some(CropRegion::new(10, 10, 100, 100)),
            output_size: (240, 240),
        };
        let preview = preview_with(Some(frame(320, 240)), params);

        let rendered = preview.render().unwrap();
        let expected = FrameProcessor::new().process(&frame(320, 240).image, &params);
        assert_eq!(rendered.dimensions(), (240, 240));
        assert_eq!(rendered.as_raw(), expected.as_raw());
    }

    #[test]
    fn test_render_without_frame() {
        let preview = preview_with(None, ProcessingParams::default());
        assert!(preview.render().is_none());
        assert!(preview
            .source_crop(CropRegion::new(0, 0, 10, 10), (100, 100))
            .is_none());
    }

    #[test]
    fn test_source_crop_scales_to_frame() {
        let preview = preview_with(Some(frame(640, 480)), ProcessingParams::default());
        let region = preview
            .source_crop(CropRegion::new(20, 10, 100, 50), (320, 240))
            .unwrap();
        assert_eq!(region, CropRegion::new(40, 20, 200, 100));
    }

    #[tokio::test]
    async fn test_save_snapshot() {
        let temp = TempDir::new().unwrap();
        let preview = preview_with(Some(frame(320, 240)), ProcessingParams::default());

        let path = preview
            .save_snapshot(temp.path(), 90)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, temp.path().join(PREVIEW_FILE));

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (240, 240));

        let empty = preview_with(None, ProcessingParams::default());
        assert!(empty.save_snapshot(temp.path(), 90).await.unwrap().is_none());
    }
}
