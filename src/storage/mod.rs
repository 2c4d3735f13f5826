mod archive;
mod report;
mod session;
#[cfg(test)]
mod tests;

pub use report::{
    FileEntry, RecordingInfo, SessionInfo, SessionReport, StageSummary, StageSummaryEntry,
    REPORT_FILE, SUMMARY_FILE,
};
pub use session::{CaptureSession, FrameMetadata};

use crate::config::{StorageConfig, UserIdentity};
use crate::error::StorageError;
use crate::processor::FrameProcessor;
use crate::stage::StagePlan;
use chrono::Local;
use image::RgbImage;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Highest numeric suffix tried when the session folder name is taken
const MAX_FOLDER_SUFFIX: u32 = 1000;

/// Paths written by [`SessionStore::finalize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub report_path: PathBuf,
    pub summary_path: PathBuf,
    pub archive_path: Option<PathBuf>,
}

/// Encodes one frame into the file at the given path
type FrameWriter = fn(&FrameProcessor, &Path, &RgbImage, u8) -> Result<(), String>;

/// Creates session folders and writes frames, reports and archives
#[derive(Clone)]
pub struct SessionStore {
    base_path: PathBuf,
    jpeg_quality: u8,
    create_archive: bool,
    processor: FrameProcessor,
    primary_writer: FrameWriter,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("base_path", &self.base_path)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("create_archive", &self.create_archive)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            base_path: PathBuf::from(&config.path),
            jpeg_quality: config.jpeg_quality,
            create_archive: config.create_archive,
            processor: FrameProcessor::new(),
            primary_writer: write_streamed,
        }
    }

    /// Replace the streaming writer tried before the in-memory fallback
    #[cfg(test)]
    pub(crate) fn with_primary_writer(mut self, writer: FrameWriter) -> Self {
        self.primary_writer = writer;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Create `<base>/<user>_multi_stage_<timestamp>` plus one sub-folder per
    /// stage. Nothing is returned unless every folder exists.
    pub async fn create_session(
        &self,
        user: &UserIdentity,
        plan: &StagePlan,
    ) -> Result<CaptureSession, StorageError> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| StorageError::DirectoryCreation {
                path: self.base_path.display().to_string(),
                source: e,
            })?;

        let started_at = Local::now();
        let folder = format!(
            "{}_multi_stage_{}",
            session::sanitize_username(&user.username),
            started_at.format("%Y%m%d_%H%M%S")
        );
        let root = self.create_unique_dir(&folder).await?;

        let mut stage_dirs = Vec::with_capacity(plan.len());
        for (index, stage) in plan.stages().iter().enumerate() {
            let dir = root.join(stage.folder_name(index));
            fs::create_dir(&dir)
                .await
                .map_err(|e| StorageError::DirectoryCreation {
                    path: dir.display().to_string(),
                    source: e,
                })?;
            stage_dirs.push(dir);
        }

        info!(
            "Created session folder {} with {} stage folders",
            root.display(),
            stage_dirs.len()
        );

        Ok(CaptureSession {
            session_id: Uuid::new_v4(),
            user: user.clone(),
            root,
            plan: plan.clone(),
            stage_dirs,
            stage_counts: vec![0; plan.len()],
            active_stage: (!plan.is_empty()).then_some(0),
            started_at,
        })
    }

    async fn create_unique_dir(&self, folder: &str) -> Result<PathBuf, StorageError> {
        let mut candidate = self.base_path.join(folder);

        for suffix in 2..=MAX_FOLDER_SUFFIX + 1 {
            match fs::create_dir(&candidate).await {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("{} exists, trying suffix {}", candidate.display(), suffix);
                    candidate = self.base_path.join(format!("{}_{}", folder, suffix));
                }
                Err(e) => {
                    return Err(StorageError::DirectoryCreation {
                        path: candidate.display().to_string(),
                        source: e,
                    })
                }
            }
        }

        Err(StorageError::DirectoryCreation {
            path: candidate.display().to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "no free session folder name",
            ),
        })
    }

    /// Write one processed frame into the stage folder. The stage counter
    /// only advances once the file is on disk.
    pub async fn save_frame(
        &self,
        session: &mut CaptureSession,
        image: RgbImage,
        stage_index: usize,
        metadata: &FrameMetadata,
    ) -> Result<PathBuf, StorageError> {
        let (stage, dir) = match (session.plan.get(stage_index), session.stage_dir(stage_index)) {
            (Some(stage), Some(dir)) => (stage, dir),
            _ => {
                return Err(StorageError::StageOutOfRange {
                    index: stage_index,
                    stages: session.plan.len(),
                })
            }
        };

        let file_name = session::frame_file_name(
            &stage.identifier,
            &Local::now(),
            session.stage_count(stage_index),
            metadata,
            image.dimensions(),
        );
        let path = dir.join(file_name);
        let image = Arc::new(image);

        let primary = {
            let path = path.clone();
            let image = Arc::clone(&image);
            let processor = self.processor;
            let quality = self.jpeg_quality;
            let write = self.primary_writer;
            tokio::task::spawn_blocking(move || write(&processor, &path, &image, quality))
                .await
                .unwrap_or_else(|e| Err(format!("encoder task failed: {}", e)))
        };

        match primary {
            Ok(()) => {
                debug!("Saved {}", path.display());
            }
            Err(primary_error) => {
                warn!(
                    "Primary write of {} failed ({}), retrying with in-memory encoding",
                    path.display(),
                    primary_error
                );
                if let Err(fallback_error) = self.write_buffered(&path, image).await {
                    error!(
                        "Fallback write of {} failed: {}",
                        path.display(),
                        fallback_error
                    );
                    let _ = fs::remove_file(&path).await;
                    return Err(StorageError::Write {
                        path: path.display().to_string(),
                        details: format!("{}; fallback: {}", primary_error, fallback_error),
                    });
                }
                info!("Saved {} via fallback path", path.display());
            }
        }

        session.record_saved(stage_index);
        Ok(path)
    }

    async fn write_buffered(&self, path: &Path, image: Arc<RgbImage>) -> Result<(), String> {
        let processor = self.processor;
        let quality = self.jpeg_quality;
        let bytes = tokio::task::spawn_blocking(move || processor.encode_jpeg(&image, quality))
            .await
            .map_err(|e| format!("encoder task failed: {}", e))?
            .map_err(|e| e.to_string())?;

        fs::write(path, bytes).await.map_err(|e| e.to_string())
    }

    /// Write the session report and stage summary, then the archive if
    /// enabled. Archive failures are logged and leave `archive_path` empty.
    pub async fn finalize(&self, session: &CaptureSession) -> Result<FinalizeOutcome, StorageError> {
        let end_time = Local::now();

        let files = report::collect_image_files(session.root()).await?;
        let report = report::build_report(session, files, end_time);
        let report_path = session.root().join(REPORT_FILE);
        report::write_json(&report_path, &report).await?;

        let summary = report::build_summary(session, end_time);
        let summary_path = session.root().join(SUMMARY_FILE);
        report::write_json(&summary_path, &summary).await?;

        info!(
            "Session {} finalized: {} frames",
            session.folder_name(),
            session.total_frames()
        );

        let archive_path = if self.create_archive {
            let root = session.root().to_path_buf();
            match tokio::task::spawn_blocking(move || archive::create_archive(&root)).await {
                Ok(Ok(path)) => {
                    info!("Session archive written to {}", path.display());
                    Some(path)
                }
                Ok(Err(e)) => {
                    warn!("Failed to create session archive: {}", e);
                    None
                }
                Err(e) => {
                    warn!("Archive task failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(FinalizeOutcome {
            report_path,
            summary_path,
            archive_path,
        })
    }
}

/// Primary path: stream the encoder straight into the opened file
fn write_streamed(
    processor: &FrameProcessor,
    path: &Path,
    image: &RgbImage,
    quality: u8,
) -> Result<(), String> {
    let file = std::fs::File::create(path).map_err(|e| e.to_string())?;
    let mut writer = BufWriter::new(file);
    processor
        .encode_jpeg_to(image, quality, &mut writer)
        .map_err(|e| e.to_string())?;
    writer.flush().map_err(|e| e.to_string())
}
