use crate::error::StagePlanError;
use crate::stage::{RawStageConfig, StagePlan};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EyecapConfig {
    pub device: DeviceConfig,
    pub processing: ProcessingConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub user: UserIdentity,
    pub system: SystemConfig,

    /// Stage plan; when empty the built-in eye capture plan is used
    #[serde(default)]
    pub stages: Vec<RawStageConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    /// Device address, with or without a ws:// / wss:// scheme
    #[serde(default = "default_device_address")]
    pub address: String,

    /// Reconnect after an established connection drops
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Maximum reconnect rounds over all address variants (0 = unlimited)
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Delay between connection attempts in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Handshake timeout per attempt
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// How long the application waits for the first connection at startup
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Ports tried when the address does not name one
    #[serde(default = "default_fallback_ports")]
    pub fallback_ports: Vec<u16>,

    /// Frames with a side at or above this bound are dropped
    #[serde(default = "default_max_frame_dimension")]
    pub max_frame_dimension: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProcessingConfig {
    /// Signed rotation in degrees, positive is counter-clockwise
    #[serde(default = "default_rotation_degrees")]
    pub rotation_degrees: f32,

    /// Rotation change applied by the keyboard controls
    #[serde(default = "default_rotation_step_degrees")]
    pub rotation_step_degrees: f32,

    /// Whether the crop region is applied
    #[serde(default = "default_roi_enabled")]
    pub roi_enabled: bool,

    /// Crop region (x, y, width, height) in rotated-frame coordinates
    #[serde(default = "default_roi")]
    pub roi: (i32, i32, i32, i32),

    /// Output resolution (width, height)
    #[serde(default = "default_output_size")]
    pub output_size: (u32, u32),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Base path under which session folders are created
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// JPEG quality for saved frames (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Bundle the finished session folder into a zip archive
    #[serde(default = "default_create_archive")]
    pub create_archive: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Countdown ticks played after the stage prompts
    #[serde(default = "default_countdown_seconds")]
    pub countdown_seconds: u32,

    /// Spacing between prompt messages in milliseconds
    #[serde(default = "default_prompt_interval_ms")]
    pub prompt_interval_ms: u64,

    /// Length of one countdown tick in milliseconds
    #[serde(default = "default_countdown_tick_ms")]
    pub countdown_tick_ms: u64,

    /// Pause between a completed stage and the next stage's prompts
    #[serde(default = "default_transition_delay_ms")]
    pub transition_delay_ms: u64,

    /// Abort the session when a capture tick finds the device disconnected
    #[serde(default = "default_abort_on_disconnect")]
    pub abort_on_disconnect: bool,

    /// Write report and summary when a session is stopped early
    #[serde(default = "default_finalize_on_abort")]
    pub finalize_on_abort: bool,
}

/// Identity of the person being recorded
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct UserIdentity {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub contact: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl EyecapConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("eyecap.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("device.address", default_device_address())?
            .set_default("device.auto_reconnect", default_auto_reconnect())?
            .set_default(
                "device.max_reconnect_attempts",
                default_max_reconnect_attempts(),
            )?
            .set_default("device.reconnect_delay_ms", default_reconnect_delay_ms())?
            .set_default(
                "device.connect_timeout_secs",
                default_connect_timeout_secs(),
            )?
            .set_default(
                "device.startup_timeout_secs",
                default_startup_timeout_secs(),
            )?
            .set_default(
                "device.fallback_ports",
                default_fallback_ports()
                    .into_iter()
                    .map(i64::from)
                    .collect::<Vec<_>>(),
            )?
            .set_default("device.max_frame_dimension", default_max_frame_dimension())?
            .set_default(
                "processing.rotation_degrees",
                default_rotation_degrees() as f64,
            )?
            .set_default(
                "processing.rotation_step_degrees",
                default_rotation_step_degrees() as f64,
            )?
            .set_default("processing.roi_enabled", default_roi_enabled())?
            .set_default(
                "processing.roi",
                vec![
                    default_roi().0,
                    default_roi().1,
                    default_roi().2,
                    default_roi().3,
                ],
            )?
            .set_default(
                "processing.output_size",
                vec![default_output_size().0, default_output_size().1],
            )?
            .set_default("storage.path", default_storage_path())?
            .set_default("storage.jpeg_quality", default_jpeg_quality() as i64)?
            .set_default("storage.create_archive", default_create_archive())?
            .set_default("session.countdown_seconds", default_countdown_seconds())?
            .set_default("session.prompt_interval_ms", default_prompt_interval_ms())?
            .set_default("session.countdown_tick_ms", default_countdown_tick_ms())?
            .set_default(
                "session.transition_delay_ms",
                default_transition_delay_ms(),
            )?
            .set_default(
                "session.abort_on_disconnect",
                default_abort_on_disconnect(),
            )?
            .set_default("session.finalize_on_abort", default_finalize_on_abort())?
            .set_default("user.username", "")?
            .set_default("user.contact", "")?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // EYECAP_DEVICE__ADDRESS, EYECAP_SESSION__COUNTDOWN_SECONDS, ...
            .add_source(
                Environment::with_prefix("EYECAP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: EyecapConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.address.trim().is_empty() {
            return Err(ConfigError::Message(
                "device.address must not be empty".to_string(),
            ));
        }

        if self.device.connect_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "device.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.device.max_frame_dimension == 0 {
            return Err(ConfigError::Message(
                "device.max_frame_dimension must be greater than 0".to_string(),
            ));
        }

        if self.processing.output_size.0 == 0 || self.processing.output_size.1 == 0 {
            return Err(ConfigError::Message(
                "processing.output_size must be greater than 0".to_string(),
            ));
        }

        if !self.processing.rotation_degrees.is_finite() {
            return Err(ConfigError::Message(
                "processing.rotation_degrees must be a finite number".to_string(),
            ));
        }

        if self.processing.roi_enabled && (self.processing.roi.2 <= 0 || self.processing.roi.3 <= 0)
        {
            return Err(ConfigError::Message(
                "processing.roi width and height must be greater than 0".to_string(),
            ));
        }

        if self.storage.jpeg_quality == 0 || self.storage.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "storage.jpeg_quality must be between 1 and 100".to_string(),
            ));
        }

        if self.session.countdown_tick_ms == 0 {
            return Err(ConfigError::Message(
                "session.countdown_tick_ms must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "system.event_bus_capacity must be greater than 0".to_string(),
            ));
        }

        self.stage_plan()
            .map_err(|e| ConfigError::Message(format!("stages: {}", e)))?;

        Ok(())
    }

    /// Validated stage plan from `[[stages]]`, or the built-in plan
    pub fn stage_plan(&self) -> Result<StagePlan, StagePlanError> {
        if self.stages.is_empty() {
            Ok(StagePlan::eye_default())
        } else {
            StagePlan::from_raw(&self.stages)
        }
    }
}

impl Default for EyecapConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            processing: ProcessingConfig {
                rotation_degrees: default_rotation_degrees(),
                rotation_step_degrees: default_rotation_step_degrees(),
                roi_enabled: default_roi_enabled(),
                roi: default_roi(),
                output_size: default_output_size(),
            },
            storage: StorageConfig {
                path: default_storage_path(),
                jpeg_quality: default_jpeg_quality(),
                create_archive: default_create_archive(),
            },
            session: SessionConfig::default(),
            user: UserIdentity::default(),
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
            stages: Vec::new(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: default_device_address(),
            auto_reconnect: default_auto_reconnect(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            startup_timeout_secs: default_startup_timeout_secs(),
            fallback_ports: default_fallback_ports(),
            max_frame_dimension: default_max_frame_dimension(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            countdown_seconds: default_countdown_seconds(),
            prompt_interval_ms: default_prompt_interval_ms(),
            countdown_tick_ms: default_countdown_tick_ms(),
            transition_delay_ms: default_transition_delay_ms(),
            abort_on_disconnect: default_abort_on_disconnect(),
            finalize_on_abort: default_finalize_on_abort(),
        }
    }
}

// Default value functions
fn default_device_address() -> String {
    "ws://localhost:8080".to_string()
}
fn default_auto_reconnect() -> bool {
    true
}
fn default_max_reconnect_attempts() -> u32 {
    0
}
fn default_reconnect_delay_ms() -> u64 {
    0
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_startup_timeout_secs() -> u64 {
    15
}
fn default_fallback_ports() -> Vec<u16> {
    vec![8080, 3000]
}
fn default_max_frame_dimension() -> u32 {
    10_000
}

fn default_rotation_degrees() -> f32 {
    0.0
}
fn default_rotation_step_degrees() -> f32 {
    5.0
}
fn default_roi_enabled() -> bool {
    false
}
fn default_roi() -> (i32, i32, i32, i32) {
    (0, 0, 240, 240)
}
fn default_output_size() -> (u32, u32) {
    (240, 240)
}

fn default_storage_path() -> String {
    "./recordings".to_string()
}
fn default_jpeg_quality() -> u8 {
    95
}
fn default_create_archive() -> bool {
    false
}

fn default_countdown_seconds() -> u32 {
    5
}
fn default_prompt_interval_ms() -> u64 {
    2000
}
fn default_countdown_tick_ms() -> u64 {
    1000
}
fn default_transition_delay_ms() -> u64 {
    2000
}
fn default_abort_on_disconnect() -> bool {
    false
}
fn default_finalize_on_abort() -> bool {
    false
}

fn default_event_bus_capacity() -> usize {
    256
}
