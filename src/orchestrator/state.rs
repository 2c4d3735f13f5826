use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Lifecycle of a multi-stage capture run. The countdown belongs to the
/// prompt sequencer and only shows up as notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    StagePrompting,
    StageRecording,
    StageCompleting,
    AllComplete,
    Aborted,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::StagePrompting => "prompting",
            SessionState::StageRecording => "recording",
            SessionState::StageCompleting => "completing",
            SessionState::AllComplete => "all complete",
            SessionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Counters for the stage being recorded, reset at each stage start
#[derive(Debug, Clone)]
pub struct StageRuntime {
    pub stage_index: usize,
    pub frames_captured: u64,
    pub started_at: Instant,
}

impl StageRuntime {
    pub fn new(stage_index: usize) -> Self {
        Self {
            stage_index,
            frames_captured: 0,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Share of `duration` elapsed so far, 0-100
    pub fn percent_elapsed(&self, duration: Duration) -> f32 {
        if duration.is_zero() {
            return 100.0;
        }
        (self.elapsed().as_secs_f32() / duration.as_secs_f32() * 100.0).min(100.0)
    }
}

/// Point-in-time view of the orchestrator for status displays
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_folder: Option<PathBuf>,
    /// 1-based number of the active stage
    pub stage_number: Option<usize>,
    pub stage_count: usize,
    pub stage_label: Option<String>,
    pub frames_in_stage: u64,
    pub configured_frames: u64,
    pub total_frames: u64,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            session_folder: None,
            stage_number: None,
            stage_count: 0,
            stage_label: None,
            frames_in_stage: 0,
            configured_frames: 0,
            total_frames: 0,
        }
    }

    /// `frames_in_stage/configured_frames`
    pub fn progress(&self) -> String {
        format!("{}/{}", self.frames_in_stage, self.configured_frames)
    }
}
