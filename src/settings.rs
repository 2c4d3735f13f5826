use crate::config::ProcessingConfig;
use crate::frame::{CropRegion, ProcessingParams};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Source of the processing settings applied at each capture tick
pub trait ParameterProvider: Send + Sync {
    fn processing_parameters(&self) -> ProcessingParams;
}

#[derive(Debug, Clone)]
struct SettingsState {
    rotation_degrees: f32,
    roi_enabled: bool,
    roi: CropRegion,
    output_size: (u32, u32),
}

/// Live, thread-safe processing settings that the keyboard controls mutate
/// while a session is running
#[derive(Debug, Clone)]
pub struct SharedSettings {
    state: Arc<RwLock<SettingsState>>,
    rotation_step: f32,
}

impl SharedSettings {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(SettingsState {
                rotation_degrees: config.rotation_degrees,
                roi_enabled: config.roi_enabled,
                roi: config.roi.into(),
                output_size: config.output_size,
            })),
            rotation_step: config.rotation_step_degrees,
        }
    }

    pub fn rotation_degrees(&self) -> f32 {
        self.state.read().rotation_degrees
    }

    pub fn set_rotation(&self, degrees: f32) {
        let normalized = normalize_degrees(degrees);
        self.state.write().rotation_degrees = normalized;
        info!("Rotation set to {:.1} degrees", normalized);
    }

    /// Rotate by `steps` configured increments (negative is clockwise)
    pub fn rotate_by_steps(&self, steps: i32) -> f32 {
        let mut state = self.state.write();
        state.rotation_degrees =
            normalize_degrees(state.rotation_degrees + steps as f32 * self.rotation_step);
        info!("Rotation set to {:.1} degrees", state.rotation_degrees);
        state.rotation_degrees
    }

    pub fn roi_enabled(&self) -> bool {
        self.state.read().roi_enabled
    }

    /// Flip the crop region on or off, returning the new state
    pub fn toggle_roi(&self) -> bool {
        let mut state = self.state.write();
        state.roi_enabled = !state.roi_enabled;
        info!(
            "Crop region {}",
            if state.roi_enabled { "enabled" } else { "disabled" }
        );
        state.roi_enabled
    }

    pub fn set_roi(&self, region: CropRegion) {
        self.state.write().roi = region;
    }
}

impl ParameterProvider for SharedSettings {
    fn processing_parameters(&self) -> ProcessingParams {
        let state = self.state.read();
        ProcessingParams {
            rotation_degrees: state.rotation_degrees,
            crop: state.roi_enabled.then_some(state.roi),
            output_size: state.output_size,
        }
    }
}

/// Fixed parameters, for tests and one-shot tooling
impl ParameterProvider for ProcessingParams {
    fn processing_parameters(&self) -> ProcessingParams {
        *self
    }
}

/// Keep angles in (-180, 180]
fn normalize_degrees(degrees: f32) -> f32 {
    let mut d = degrees % 360.0;
    if d > 180.0 {
        d -= 360.0;
    } else if d <= -180.0 {
        d += 360.0;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EyecapConfig;

    #[test]
    fn test_snapshot_reflects_changes() {
        let settings = SharedSettings::new(&EyecapConfig::default().processing);

        let before = settings.processing_parameters();
        assert_eq!(before.rotation_degrees, 0.0);
        assert!(before.crop.is_none());

        settings.rotate_by_steps(2);
        assert!(settings.toggle_roi());

        let after = settings.processing_parameters();
        assert_eq!(after.rotation_degrees, 10.0);
        assert_eq!(after.crop, Some(CropRegion::new(0, 0, 240, 240)));
        // Earlier snapshot is unaffected
        assert!(before.crop.is_none());
    }

    #[test]
    fn test_rotation_wraps() {
        let settings = SharedSettings::new(&EyecapConfig::default().processing);
        settings.set_rotation(190.0);
        assert_eq!(settings.rotation_degrees(), -170.0);

        settings.set_rotation(-180.0);
        assert_eq!(settings.rotation_degrees(), 180.0);
    }
}
