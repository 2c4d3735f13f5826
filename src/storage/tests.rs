use super::*;
use crate::config::StorageConfig;
use crate::stage::{RawStageConfig, StagePlan};
use image::Rgb;
use std::fs::File;
use tempfile::TempDir;

fn store_in(dir: &Path, create_archive: bool) -> SessionStore {
    SessionStore::new(&StorageConfig {
        path: dir.join("recordings").display().to_string(),
        jpeg_quality: 90,
        create_archive,
    })
}

fn two_stage_plan() -> StagePlan {
    let stage = |id: &str| RawStageConfig {
        identifier: Some(id.to_string()),
        label: None,
        description: Some(format!("{} stage", id)),
        prompts: Some(vec![]),
        duration_secs: Some(2),
        interval_ms: Some(100),
    };
    StagePlan::from_raw(&[stage("open"), stage("closed")]).unwrap()
}

fn user() -> UserIdentity {
    UserIdentity {
        username: "jane doe".to_string(),
        contact: "jane@example.com".to_string(),
    }
}

fn frame() -> RgbImage {
    RgbImage::from_pixel(240, 240, Rgb([10, 200, 30]))
}

fn count_dirs(root: &Path) -> usize {
    let mut count = 1;
    for entry in std::fs::read_dir(root).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            count += count_dirs(&path);
        }
    }
    count
}

#[tokio::test]
async fn test_create_session_makes_root_and_stage_folders() {
    let temp = TempDir::new().unwrap();
    let store = store_in(temp.path(), false);
    let plan = two_stage_plan();

    let session = store.create_session(&user(), &plan).await.unwrap();

    assert!(session.folder_name().starts_with("jane_doe_multi_stage_"));
    assert_eq!(count_dirs(session.root()), plan.len() + 1);
    assert!(session.root().join("stage_1_open").is_dir());
    assert!(session.root().join("stage_2_closed").is_dir());
    assert_eq!(session.active_stage(), Some(0));
    assert_eq!(session.total_frames(), 0);
}

#[tokio::test]
async fn test_folder_name_collision_gets_suffix() {
    let temp = TempDir::new().unwrap();
    let store = store_in(temp.path(), false);
    std::fs::create_dir_all(store.base_path()).unwrap();

    let first = store.create_unique_dir("alice_multi_stage_x").await.unwrap();
    let second = store.create_unique_dir("alice_multi_stage_x").await.unwrap();

    assert!(first.ends_with("alice_multi_stage_x"));
    assert!(second.ends_with("alice_multi_stage_x_2"));
}

#[tokio::test]
async fn test_create_session_fails_on_unwritable_base() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("recordings");
    File::create(&blocker).unwrap();

    let store = store_in(temp.path(), false);
    let result = store.create_session(&user(), &two_stage_plan()).await;

    assert!(matches!(
        result,
        Err(StorageError::DirectoryCreation { .. })
    ));
}

#[tokio::test]
async fn test_save_frame_names_and_counts() {
    let temp = TempDir::new().unwrap();
    let store = store_in(temp.path(), false);
    let mut session = store.create_session(&user(), &two_stage_plan()).await.unwrap();

    let plain = store
        .save_frame(&mut session, frame(), 0, &FrameMetadata::default())
        .await
        .unwrap();
    let name = plain.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("open_"));
    assert!(name.ends_with("_000000_240x240.jpg"));

    let flagged = store
        .save_frame(
            &mut session,
            frame(),
            0,
            &FrameMetadata {
                rotation_degrees: -15.0,
                roi_applied: true,
                source_frame_id: Some(4),
            },
        )
        .await
        .unwrap();
    let name = flagged.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.ends_with("_000001_rot-15_roi_240x240.jpg"));

    store
        .save_frame(&mut session, frame(), 1, &FrameMetadata::default())
        .await
        .unwrap();

    assert_eq!(session.stage_counts(), &[2, 1]);
    assert_eq!(session.total_frames(), 3);

    let decoded = image::open(&flagged).unwrap();
    assert_eq!(decoded.width(), 240);
}

#[tokio::test]
async fn test_save_frame_rejects_unknown_stage() {
    let temp = TempDir::new().unwrap();
    let store = store_in(temp.path(), false);
    let mut session = store.create_session(&user(), &two_stage_plan()).await.unwrap();

    let result = store
        .save_frame(&mut session, frame(), 5, &FrameMetadata::default())
        .await;

    assert!(matches!(
        result,
        Err(StorageError::StageOutOfRange {
            index: 5,
            stages: 2
        })
    ));
    assert_eq!(session.total_frames(), 0);
}

#[tokio::test]
async fn test_failed_write_leaves_counters_untouched() {
    let temp = TempDir::new().unwrap();
    let store = store_in(temp.path(), false);
    let mut session = store.create_session(&user(), &two_stage_plan()).await.unwrap();

    std::fs::remove_dir(session.stage_dir(1).unwrap()).unwrap();

    let result = store
        .save_frame(&mut session, frame(), 1, &FrameMetadata::default())
        .await;

    assert!(matches!(result, Err(StorageError::Write { .. })));
    assert_eq!(session.stage_count(1), 0);
    assert_eq!(session.total_frames(), 0);
}

#[tokio::test]
async fn test_fallback_write_saves_frame_when_primary_fails() {
    fn failing_writer(_: &FrameProcessor, _: &Path, _: &RgbImage, _: u8) -> Result<(), String> {
        Err("disk stream unavailable".to_string())
    }

    let temp = TempDir::new().unwrap();
    let store = store_in(temp.path(), false).with_primary_writer(failing_writer);
    let mut session = store.create_session(&user(), &two_stage_plan()).await.unwrap();

    let path = store
        .save_frame(&mut session, frame(), 0, &FrameMetadata::default())
        .await
        .unwrap();

    assert!(path.is_file());
    assert_eq!(image::open(&path).unwrap().width(), 240);
    assert_eq!(session.stage_count(0), 1);
    assert_eq!(session.total_frames(), 1);
}

#[tokio::test]
async fn test_finalize_writes_consistent_report_and_summary() {
    let temp = TempDir::new().unwrap();
    let store = store_in(temp.path(), true);
    let mut session = store.create_session(&user(), &two_stage_plan()).await.unwrap();

    for stage in [0, 0, 0, 1] {
        store
            .save_frame(&mut session, frame(), stage, &FrameMetadata::default())
            .await
            .unwrap();
    }

    let outcome = store.finalize(&session).await.unwrap();

    let report: SessionReport =
        serde_json::from_str(&std::fs::read_to_string(&outcome.report_path).unwrap()).unwrap();
    let summary: StageSummary =
        serde_json::from_str(&std::fs::read_to_string(&outcome.summary_path).unwrap()).unwrap();

    let summed: u64 = summary.stages.iter().map(|s| s.actual_count).sum();
    assert_eq!(report.session_info.total_images, 4);
    assert_eq!(report.session_info.total_images, summed);
    assert_eq!(report.session_info.session_type, "multi_stage");
    assert_eq!(report.session_info.user, user());
    assert_eq!(report.files.len(), 4);
    assert!(report.files.iter().all(|f| f.size_bytes > 0));
    assert!(report.files[0].filename.starts_with("stage_1_open/"));

    assert_eq!(summary.stages[0].actual_count, 3);
    assert_eq!(summary.stages[0].configured_frames, 20);
    assert_eq!(summary.stages[1].folder, "stage_2_closed");

    let archive_path = outcome.archive_path.unwrap();
    assert_eq!(archive_path.parent(), session.root().parent());
    let mut archive = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
    let report_entry = format!("{}/{}", session.folder_name(), REPORT_FILE);
    assert!(archive.by_name(&report_entry).is_ok());
    assert!(archive.len() >= 4 + 2 + 3);
}

#[tokio::test]
async fn test_finalize_without_archive() {
    let temp = TempDir::new().unwrap();
    let store = store_in(temp.path(), false);
    let session = store.create_session(&user(), &two_stage_plan()).await.unwrap();

    let outcome = store.finalize(&session).await.unwrap();

    assert!(outcome.archive_path.is_none());
    assert!(outcome.report_path.is_file());
}

#[test]
fn test_username_sanitizing() {
    assert_eq!(session::sanitize_username("  "), "anonymous");
    assert_eq!(session::sanitize_username("a/b\\c"), "a_b_c");
    assert_eq!(session::sanitize_username(".."), "anonymous");
    assert_eq!(session::sanitize_username("José"), "José");
}

#[test]
fn test_rotation_suffix() {
    assert_eq!(session::rotation_suffix(90.0), "rot90");
    assert_eq!(session::rotation_suffix(-7.5), "rot-7.5");
}
