use super::*;
use crate::config::StorageConfig;
use crate::error::{EyecapError, StagePlanError};
use crate::events::EyecapEvent;
use crate::frame::{FrameData, ProcessingParams};
use crate::settings::SharedSettings;
use crate::storage::{SessionReport, StageSummary, REPORT_FILE, SUMMARY_FILE};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::SystemTime;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// Device stand-in with a switchable connection and a fixed frame
struct FakeDevice {
    connected: AtomicBool,
    frame: Mutex<Option<FrameData>>,
}

impl FakeDevice {
    fn connected_with_frame() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            frame: Mutex::new(Some(FrameData::new(
                1,
                SystemTime::now(),
                RgbImage::from_pixel(320, 240, Rgb([40, 80, 120])),
            ))),
        })
    }

    fn connected_without_frame() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            frame: Mutex::new(None),
        })
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.frame.lock() = None;
    }
}

impl FrameProvider for FakeDevice {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn current_frame(&self) -> Option<FrameData> {
        self.frame.lock().clone()
    }
}

/// Fixed parameters that count how often they were pulled
#[derive(Default)]
struct CountingParams {
    calls: AtomicUsize,
}

impl ParameterProvider for CountingParams {
    fn processing_parameters(&self) -> ProcessingParams {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ProcessingParams::default()
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        countdown_seconds: 1,
        prompt_interval_ms: 5,
        countdown_tick_ms: 5,
        transition_delay_ms: 10,
        abort_on_disconnect: false,
        finalize_on_abort: false,
    }
}

fn stage(id: &str, duration_secs: i64, interval_ms: i64) -> RawStageConfig {
    RawStageConfig {
        identifier: Some(id.to_string()),
        label: Some(format!("Stage {}", id)),
        description: None,
        prompts: Some(vec![format!("Get ready for {}", id)]),
        duration_secs: Some(duration_secs),
        interval_ms: Some(interval_ms),
    }
}

fn user() -> UserIdentity {
    UserIdentity {
        username: "tester".to_string(),
        contact: String::new(),
    }
}

struct Harness {
    _temp: TempDir,
    base: PathBuf,
    bus: EventBus,
    orchestrator: StageOrchestrator,
}

fn harness(
    device: Arc<dyn FrameProvider>,
    params: Arc<dyn ParameterProvider>,
    config: SessionConfig,
) -> Harness {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("recordings");
    let store = SessionStore::new(&StorageConfig {
        path: base.display().to_string(),
        jpeg_quality: 85,
        create_archive: false,
    });
    let bus = EventBus::new(1024);
    let orchestrator = StageOrchestrator::new(device, params, store, bus.clone(), config);

    Harness {
        _temp: temp,
        base,
        bus,
        orchestrator,
    }
}

fn folder_count(base: &Path) -> usize {
    if !base.exists() {
        return 0;
    }
    let mut count = 0;
    let mut pending = vec![base.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                count += 1;
                pending.push(path);
            }
        }
    }
    count
}

fn jpeg_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter(|entry| {
            entry
                .as_ref()
                .map(|e| e.path().extension().map(|x| x == "jpg").unwrap_or(false))
                .unwrap_or(false)
        })
        .count()
}

async fn wait_for_event(rx: &mut broadcast::Receiver<EyecapEvent>, event_type: &str) -> EyecapEvent {
    timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.event_type() == event_type => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event bus closed: {}", e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", event_type))
}

#[tokio::test]
async fn test_start_rejected_when_disconnected() {
    let device = FakeDevice::connected_with_frame();
    device.disconnect();
    let h = harness(device, Arc::new(CountingParams::default()), fast_config());

    let result = h.orchestrator.start(&user(), &[stage("open", 1, 100)]).await;

    assert!(matches!(
        result,
        Err(EyecapError::Session(SessionError::DeviceNotConnected))
    ));
    assert_eq!(h.orchestrator.state(), SessionState::Idle);
    assert_eq!(folder_count(&h.base), 0);
}

#[tokio::test]
async fn test_start_rejects_stage_missing_interval() {
    let h = harness(
        FakeDevice::connected_with_frame(),
        Arc::new(CountingParams::default()),
        fast_config(),
    );
    let mut broken = stage("open", 1, 100);
    broken.interval_ms = None;

    let result = h.orchestrator.start(&user(), &[broken]).await;

    match result {
        Err(EyecapError::StagePlan(err)) => {
            assert_eq!(err.field(), Some("interval_ms"));
            assert!(matches!(err, StagePlanError::MissingField { stage: 1, .. }));
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(h.orchestrator.state(), SessionState::Idle);
    assert!(!h.base.exists());
}

#[tokio::test]
async fn test_full_run_reaches_all_complete() {
    let params = Arc::new(CountingParams::default());
    let h = harness(FakeDevice::connected_with_frame(), params.clone(), fast_config());
    let mut events = h.bus.subscribe();

    h.orchestrator
        .start(&user(), &[stage("open", 1, 200), stage("closed", 1, 250)])
        .await
        .unwrap();
    assert!(h.orchestrator.state().is_active());

    let folder = match wait_for_event(&mut events, "all_stages_completed").await {
        EyecapEvent::AllStagesCompleted {
            total_frames,
            session_folder,
        } => {
            // At most duration / interval + 1 attempts per stage
            assert!(total_frames > 0 && total_frames <= 6 + 5);
            PathBuf::from(session_folder)
        }
        other => panic!("unexpected event {:?}", other),
    };

    assert!(
        h.orchestrator
            .wait_until_idle(Duration::from_secs(2))
            .await
    );

    // Root plus one folder per stage, created before any stage began
    assert_eq!(folder_count(&h.base), 3);

    let report: SessionReport =
        serde_json::from_str(&std::fs::read_to_string(folder.join(REPORT_FILE)).unwrap()).unwrap();
    let summary: StageSummary =
        serde_json::from_str(&std::fs::read_to_string(folder.join(SUMMARY_FILE)).unwrap()).unwrap();

    let summed: u64 = summary.stages.iter().map(|s| s.actual_count).sum();
    assert_eq!(report.session_info.total_images, summed);
    assert_eq!(report.files.len() as u64, summed);
    assert_eq!(
        jpeg_count(&folder.join("stage_1_open")) as u64,
        summary.stages[0].actual_count
    );

    // Parameters are pulled on every tick that had a frame
    assert!(params.calls.load(Ordering::SeqCst) as u64 >= summed);

    let status = h.orchestrator.status();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.total_frames, summed);
}

#[tokio::test]
async fn test_ticks_without_frames_change_nothing() {
    let h = harness(
        FakeDevice::connected_without_frame(),
        Arc::new(CountingParams::default()),
        fast_config(),
    );
    let mut events = h.bus.subscribe();

    h.orchestrator
        .start(&user(), &[stage("open", 1, 50)])
        .await
        .unwrap();

    match wait_for_event(&mut events, "all_stages_completed").await {
        EyecapEvent::AllStagesCompleted { total_frames, .. } => assert_eq!(total_frames, 0),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_stop_during_recording_halts_saving() {
    let h = harness(
        FakeDevice::connected_with_frame(),
        Arc::new(CountingParams::default()),
        fast_config(),
    );
    let mut events = h.bus.subscribe();

    h.orchestrator
        .start(&user(), &[stage("open", 30, 50)])
        .await
        .unwrap();

    wait_for_event(&mut events, "recording_started").await;
    wait_for_event(&mut events, "capture_progress").await;
    assert_eq!(h.orchestrator.state(), SessionState::StageRecording);

    let outcome = h.orchestrator.stop(false).await.unwrap();
    assert!(outcome.is_none());
    assert_eq!(h.orchestrator.state(), SessionState::Idle);

    let status = h.orchestrator.status();
    let folder = status.session_folder.clone().unwrap();
    let stage_dir = folder.join("stage_1_open");
    let saved = jpeg_count(&stage_dir);
    assert!(saved > 0);
    assert_eq!(status.total_frames, saved as u64);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(jpeg_count(&stage_dir), saved);

    // Not finalized unless asked
    assert!(!folder.join(REPORT_FILE).exists());
    wait_for_event(&mut events, "session_aborted").await;
}

#[tokio::test]
async fn test_stop_with_finalize_writes_report() {
    let h = harness(
        FakeDevice::connected_with_frame(),
        Arc::new(CountingParams::default()),
        fast_config(),
    );
    let mut events = h.bus.subscribe();

    h.orchestrator
        .start(&user(), &[stage("open", 30, 50), stage("closed", 30, 50)])
        .await
        .unwrap();
    wait_for_event(&mut events, "capture_progress").await;

    let outcome = h.orchestrator.stop(true).await.unwrap().unwrap();
    assert!(outcome.report_path.is_file());
    assert!(outcome.summary_path.is_file());

    // A second stop is a no-op
    assert!(h.orchestrator.stop(true).await.unwrap().is_none());
}

#[tokio::test]
async fn test_stop_during_prompting() {
    let config = SessionConfig {
        prompt_interval_ms: 5_000,
        ..fast_config()
    };
    let h = harness(
        FakeDevice::connected_with_frame(),
        Arc::new(CountingParams::default()),
        config,
    );

    h.orchestrator
        .start(&user(), &[stage("open", 5, 100)])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.orchestrator.state(), SessionState::StagePrompting);

    h.orchestrator.stop(false).await.unwrap();
    assert_eq!(h.orchestrator.state(), SessionState::Idle);
    assert_eq!(h.orchestrator.status().total_frames, 0);
}

#[tokio::test]
async fn test_second_start_rejected_while_running() {
    let h = harness(
        FakeDevice::connected_with_frame(),
        Arc::new(CountingParams::default()),
        fast_config(),
    );

    h.orchestrator
        .start(&user(), &[stage("open", 30, 100)])
        .await
        .unwrap();
    let folders_before = folder_count(&h.base);

    let second = h.orchestrator.start(&user(), &[stage("open", 30, 100)]).await;
    assert!(matches!(
        second,
        Err(EyecapError::Session(SessionError::AlreadyRunning))
    ));
    assert_eq!(folder_count(&h.base), folders_before);

    h.orchestrator.stop(false).await.unwrap();
}

#[tokio::test]
async fn test_parameter_changes_apply_to_next_frame() {
    let settings = Arc::new(SharedSettings::new(
        &crate::config::EyecapConfig::default().processing,
    ));
    let h = harness(
        FakeDevice::connected_with_frame(),
        settings.clone(),
        fast_config(),
    );
    let mut events = h.bus.subscribe();

    h.orchestrator
        .start(&user(), &[stage("open", 1, 50)])
        .await
        .unwrap();

    wait_for_event(&mut events, "capture_progress").await;
    settings.set_rotation(10.0);
    settings.toggle_roi();

    wait_for_event(&mut events, "all_stages_completed").await;

    let folder = h.orchestrator.status().session_folder.unwrap();
    let names: Vec<String> = std::fs::read_dir(folder.join("stage_1_open"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();

    assert!(names.iter().any(|n| !n.contains("_rot")));
    assert!(names.iter().any(|n| n.contains("_rot10_roi_240x240")));
}

#[tokio::test]
async fn test_abort_on_disconnect() {
    let device = FakeDevice::connected_with_frame();
    let config = SessionConfig {
        abort_on_disconnect: true,
        ..fast_config()
    };
    let h = harness(device.clone(), Arc::new(CountingParams::default()), config);
    let mut events = h.bus.subscribe();

    h.orchestrator
        .start(&user(), &[stage("open", 30, 50)])
        .await
        .unwrap();
    wait_for_event(&mut events, "capture_progress").await;

    device.disconnect();

    wait_for_event(&mut events, "session_aborted").await;
    assert!(
        h.orchestrator
            .wait_until_idle(Duration::from_secs(2))
            .await
    );
}

#[tokio::test]
async fn test_disconnect_without_abort_keeps_stage_timer() {
    let device = FakeDevice::connected_with_frame();
    let h = harness(
        device.clone(),
        Arc::new(CountingParams::default()),
        fast_config(),
    );
    let mut events = h.bus.subscribe();

    h.orchestrator
        .start(&user(), &[stage("open", 1, 50)])
        .await
        .unwrap();
    wait_for_event(&mut events, "capture_progress").await;
    device.disconnect();

    // The duration timer still ends the stage
    match wait_for_event(&mut events, "stage_completed").await {
        EyecapEvent::StageCompleted {
            frames_captured, ..
        } => assert!(frames_captured > 0),
        other => panic!("unexpected event {:?}", other),
    }
    wait_for_event(&mut events, "all_stages_completed").await;
}

/// Panics on the first frame request, then behaves
struct FlakyDevice {
    failed: AtomicBool,
    inner: Arc<FakeDevice>,
}

impl FrameProvider for FlakyDevice {
    fn is_connected(&self) -> bool {
        true
    }

    fn current_frame(&self) -> Option<FrameData> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            panic!("frame provider failure");
        }
        self.inner.current_frame()
    }
}

#[tokio::test]
async fn test_oversized_stage_rejected_before_start() {
    let h = harness(
        FakeDevice::connected_with_frame(),
        Arc::new(CountingParams::default()),
        fast_config(),
    );

    let result = h
        .orchestrator
        .start(&user(), &[stage("open", i64::MAX / 2, 100)])
        .await;

    match result {
        Err(EyecapError::StagePlan(err)) => assert_eq!(err.field(), Some("duration_secs")),
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(h.orchestrator.state(), SessionState::Idle);
    assert!(!h.base.exists());
}

#[tokio::test]
async fn test_crashed_run_returns_to_idle() {
    let device = Arc::new(FlakyDevice {
        failed: AtomicBool::new(false),
        inner: FakeDevice::connected_with_frame(),
    });
    let h = harness(device, Arc::new(CountingParams::default()), fast_config());

    h.orchestrator
        .start(&user(), &[stage("open", 30, 50)])
        .await
        .unwrap();
    assert!(
        h.orchestrator
            .wait_until_idle(Duration::from_secs(5))
            .await
    );
    assert_eq!(h.orchestrator.status().state, SessionState::Idle);

    // A new session can start after the failed one
    h.orchestrator
        .start(&user(), &[stage("open", 30, 50)])
        .await
        .unwrap();
    assert!(h.orchestrator.state().is_active());
    h.orchestrator.stop(false).await.unwrap();
    assert_eq!(h.orchestrator.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_five_second_stage_bounds_capture_attempts() {
    let h = harness(
        FakeDevice::connected_with_frame(),
        Arc::new(CountingParams::default()),
        fast_config(),
    );
    let mut events = h.bus.subscribe();
    let started = std::time::Instant::now();

    h.orchestrator
        .start(&user(), &[stage("blink", 5, 200)])
        .await
        .unwrap();

    match wait_for_event(&mut events, "all_stages_completed").await {
        EyecapEvent::AllStagesCompleted { total_frames, .. } => {
            // 5000 / 200 + 1
            assert!(total_frames > 0 && total_frames <= 26);
        }
        other => panic!("unexpected event {:?}", other),
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(8));
    assert!(
        h.orchestrator
            .wait_until_idle(Duration::from_secs(2))
            .await
    );
}
