use super::session::CaptureSession;
use crate::config::UserIdentity;
use crate::error::StorageError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const REPORT_FILE: &str = "session_report.json";
pub const SUMMARY_FILE: &str = "multi_stage_summary.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_info: SessionInfo,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user: UserIdentity,
    pub session_type: String,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub duration_seconds: i64,
    pub total_images: u64,
    pub save_folder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the session folder, `/` separated
    pub filename: String,
    pub size_bytes: u64,
    pub created_time: DateTime<Local>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub recording_info: RecordingInfo,
    pub stages: Vec<StageSummaryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingInfo {
    pub user: UserIdentity,
    pub timestamp: DateTime<Local>,
    pub total_images: u64,
    pub total_duration: i64,
    pub recording_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummaryEntry {
    pub stage_number: usize,
    pub identifier: String,
    pub label: String,
    pub description: String,
    pub duration_secs: u64,
    pub interval_ms: u64,
    pub configured_frames: u64,
    pub actual_count: u64,
    pub folder: String,
}

pub(super) fn build_report(
    session: &CaptureSession,
    files: Vec<FileEntry>,
    end_time: DateTime<Local>,
) -> SessionReport {
    SessionReport {
        session_info: SessionInfo {
            session_id: session.session_id().to_string(),
            user: session.user().clone(),
            session_type: "multi_stage".to_string(),
            start_time: session.started_at(),
            end_time,
            duration_seconds: (end_time - session.started_at()).num_seconds(),
            total_images: session.total_frames(),
            save_folder: session.folder_name(),
        },
        files,
    }
}

pub(super) fn build_summary(session: &CaptureSession, end_time: DateTime<Local>) -> StageSummary {
    let stages = session
        .plan()
        .stages()
        .iter()
        .enumerate()
        .map(|(index, stage)| StageSummaryEntry {
            stage_number: index + 1,
            identifier: stage.identifier.clone(),
            label: stage.label.clone(),
            description: stage.description.clone(),
            duration_secs: stage.duration_secs,
            interval_ms: stage.interval_ms,
            configured_frames: stage.configured_frames(),
            actual_count: session.stage_count(index),
            folder: stage.folder_name(index),
        })
        .collect();

    StageSummary {
        recording_info: RecordingInfo {
            user: session.user().clone(),
            timestamp: end_time,
            total_images: session.total_frames(),
            total_duration: (end_time - session.started_at()).num_seconds(),
            recording_type: "multi_stage".to_string(),
        },
        stages,
    }
}

/// Every `.jpg` below `root`, sorted by relative path
pub(super) async fn collect_image_files(root: &Path) -> Result<Vec<FileEntry>, StorageError> {
    let mut entries = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    let report_error = |path: &Path, e: std::io::Error| StorageError::Report {
        path: path.display().to_string(),
        details: e.to_string(),
    };

    while let Some(dir) = pending.pop() {
        let mut read_dir = fs::read_dir(&dir)
            .await
            .map_err(|e| report_error(&dir, e))?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| report_error(&dir, e))?
        {
            let path = entry.path();
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| report_error(&path, e))?;

            if metadata.is_dir() {
                pending.push(path);
                continue;
            }

            let is_jpeg = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("jpg"))
                .unwrap_or(false);
            if !is_jpeg {
                continue;
            }

            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");

            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map(DateTime::<Local>::from)
                .unwrap_or_else(|_| Local::now());

            entries.push(FileEntry {
                filename: relative,
                size_bytes: metadata.len(),
                created_time: created,
            });
        }
    }

    entries.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(entries)
}

pub(super) async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| StorageError::Report {
        path: path.display().to_string(),
        details: format!("Failed to serialize: {}", e),
    })?;

    fs::write(path, json).await.map_err(|e| StorageError::Report {
        path: path.display().to_string(),
        details: e.to_string(),
    })
}
