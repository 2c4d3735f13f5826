pub mod app;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod keyboard_input;
pub mod orchestrator;
pub mod preview;
pub mod processor;
pub mod prompt;
pub mod settings;
pub mod source;
pub mod stage;
pub mod storage;

pub use app::{AppOptions, ComponentState, RecorderApp, ShutdownReason};
pub use config::{EyecapConfig, UserIdentity};
pub use error::{EyecapError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, EyecapEvent};
pub use frame::{CropRegion, FrameData, ProcessingParams};
pub use orchestrator::{SessionState, SessionStatus, StageOrchestrator};
pub use preview::Preview;
pub use processor::FrameProcessor;
pub use prompt::{BellCue, PromptCue, PromptSequencer, SilentCue};
pub use settings::{ParameterProvider, SharedSettings};
pub use source::{FrameProvider, FrameSource};
pub use stage::{RawStageConfig, StageConfig, StagePlan};
pub use storage::{CaptureSession, FinalizeOutcome, SessionStore};
