use crate::config::UserIdentity;
use crate::stage::{StageConfig, StagePlan};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Processing applied to a saved frame, encoded into its file name
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameMetadata {
    pub rotation_degrees: f32,
    pub roi_applied: bool,
    /// Id of the device frame the image was produced from
    pub source_frame_id: Option<u64>,
}

/// One multi-stage capture run and its folders on disk
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub(super) session_id: Uuid,
    pub(super) user: UserIdentity,
    pub(super) root: PathBuf,
    pub(super) plan: StagePlan,
    pub(super) stage_dirs: Vec<PathBuf>,
    pub(super) stage_counts: Vec<u64>,
    pub(super) active_stage: Option<usize>,
    pub(super) started_at: DateTime<Local>,
}

impl CaptureSession {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the session root folder
    pub fn folder_name(&self) -> String {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub fn stage_dir(&self, index: usize) -> Option<&Path> {
        self.stage_dirs.get(index).map(PathBuf::as_path)
    }

    pub fn stage_count(&self, index: usize) -> u64 {
        self.stage_counts.get(index).copied().unwrap_or(0)
    }

    pub fn stage_counts(&self) -> &[u64] {
        &self.stage_counts
    }

    /// Always the sum of the per-stage counters
    pub fn total_frames(&self) -> u64 {
        self.stage_counts.iter().sum()
    }

    pub fn active_stage(&self) -> Option<usize> {
        self.active_stage
    }

    pub fn active_stage_config(&self) -> Option<&StageConfig> {
        self.active_stage.and_then(|index| self.plan.get(index))
    }

    /// Move to the next stage. Returns the new index, or `None` once every
    /// stage has been visited.
    pub fn advance_stage(&mut self) -> Option<usize> {
        let next = self.active_stage.map(|index| index + 1).unwrap_or(0);
        self.active_stage = (next < self.plan.len()).then_some(next);
        self.active_stage
    }

    /// Clear the active stage, used when a run ends early
    pub fn deactivate(&mut self) {
        self.active_stage = None;
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub(super) fn record_saved(&mut self, stage_index: usize) {
        if let Some(count) = self.stage_counts.get_mut(stage_index) {
            *count += 1;
        }
    }
}

/// Folder-safe form of a user name
pub(super) fn sanitize_username(username: &str) -> String {
    let cleaned: String = username
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "anonymous".to_string()
    } else {
        cleaned
    }
}

/// `rot15`, `rot-7.5`
pub(super) fn rotation_suffix(degrees: f32) -> String {
    if degrees.fract() == 0.0 {
        format!("rot{}", degrees as i64)
    } else {
        format!("rot{:.1}", degrees)
    }
}

/// `<stage-id>_<timestamp>_<seq:06>[_rot<angle>][_roi]_<w>x<h>.jpg`
pub(super) fn frame_file_name(
    identifier: &str,
    timestamp: &DateTime<Local>,
    sequence: u64,
    metadata: &FrameMetadata,
    size: (u32, u32),
) -> String {
    let mut name = format!(
        "{}_{}_{:06}",
        identifier,
        timestamp.format("%Y%m%d_%H%M%S_%3f"),
        sequence
    );
    if metadata.rotation_degrees != 0.0 {
        name.push('_');
        name.push_str(&rotation_suffix(metadata.rotation_degrees));
    }
    if metadata.roi_applied {
        name.push_str("_roi");
    }
    name.push_str(&format!("_{}x{}.jpg", size.0, size.1));
    name
}
