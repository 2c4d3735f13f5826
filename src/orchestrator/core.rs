use super::state::{SessionState, SessionStatus, StageRuntime};
use crate::config::SessionConfig;
use crate::error::StorageError;
use crate::events::{EventBus, EyecapEvent};
use crate::processor::FrameProcessor;
use crate::prompt::{PromptCue, PromptSequencer};
use crate::settings::ParameterProvider;
use crate::source::FrameProvider;
use crate::stage::StageConfig;
use crate::storage::{CaptureSession, FinalizeOutcome, FrameMetadata, SessionStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

pub(super) type StopAck = oneshot::Sender<Result<Option<FinalizeOutcome>, StorageError>>;

pub(super) enum Command {
    Stop { finalize: bool, ack: StopAck },
}

/// How a stage ended
enum StageEnd {
    Completed,
    /// Stop command, or `None` when the orchestrator went away
    Stopped(Option<Command>),
    /// Device lost with `abort_on_disconnect` set
    DeviceLost,
}

enum TickOutcome {
    Saved,
    Skipped,
    DeviceLost,
}

/// Owns the capture session for the duration of one run. Both timers and
/// the command channel are polled from this single task, so the session
/// counters have exactly one writer.
pub(super) struct StageRunner {
    session: CaptureSession,
    frames: Arc<dyn FrameProvider>,
    params: Arc<dyn ParameterProvider>,
    store: SessionStore,
    bus: EventBus,
    config: SessionConfig,
    cue: Arc<dyn PromptCue>,
    state_tx: Arc<watch::Sender<SessionState>>,
    status: Arc<Mutex<SessionStatus>>,
    commands: mpsc::Receiver<Command>,
    processor: FrameProcessor,
    runtime: Option<StageRuntime>,
}

impl StageRunner {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        session: CaptureSession,
        frames: Arc<dyn FrameProvider>,
        params: Arc<dyn ParameterProvider>,
        store: SessionStore,
        bus: EventBus,
        config: SessionConfig,
        cue: Arc<dyn PromptCue>,
        state_tx: Arc<watch::Sender<SessionState>>,
        status: Arc<Mutex<SessionStatus>>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let runner = Self {
            session,
            frames,
            params,
            store,
            bus,
            config,
            cue,
            state_tx,
            status,
            commands,
            processor: FrameProcessor::new(),
            runtime: None,
        };

        // Leave Idle before the task is spawned so callers never observe a
        // started session as idle
        {
            let mut status = runner.status.lock();
            *status = SessionStatus::idle();
            status.session_folder = Some(runner.session.root().to_path_buf());
            status.stage_count = runner.session.plan().len();
        }
        runner.set_state(SessionState::StagePrompting);
        runner
    }

    fn set_state(&self, state: SessionState) {
        self.status.lock().state = state;
        self.state_tx.send_replace(state);
        debug!("Session state -> {}", state);
    }

    fn publish(&self, event: EyecapEvent) {
        let _ = self.bus.publish(event);
    }

    fn refresh_status(&self) {
        let mut status = self.status.lock();
        status.total_frames = self.session.total_frames();
        match self.session.active_stage_config() {
            Some(stage) => {
                let index = self.session.active_stage().unwrap_or(0);
                status.stage_number = Some(index + 1);
                status.stage_label = Some(stage.label.clone());
                status.configured_frames = stage.configured_frames();
                status.frames_in_stage = self
                    .runtime
                    .as_ref()
                    .filter(|runtime| runtime.stage_index == index)
                    .map(|runtime| runtime.frames_captured)
                    .unwrap_or(0);
            }
            None => {
                status.stage_number = None;
                status.stage_label = None;
                status.configured_frames = 0;
                status.frames_in_stage = 0;
            }
        }
    }

    pub(super) async fn run(mut self) {
        while let Some(index) = self.session.active_stage() {
            let Some(stage) = self.session.plan().get(index).cloned() else {
                break;
            };

            match self.run_stage(index, &stage).await {
                StageEnd::Completed => {}
                StageEnd::Stopped(command) => {
                    self.handle_stop(command).await;
                    return;
                }
                StageEnd::DeviceLost => {
                    warn!("Device lost during stage {}, aborting session", index + 1);
                    self.abort(self.config.finalize_on_abort).await;
                    return;
                }
            }

            self.session.advance_stage();
            self.runtime = None;
            self.refresh_status();

            let delay = Duration::from_millis(self.config.transition_delay_ms);
            if let Err(command) = self.pause(delay).await {
                self.handle_stop(command).await;
                return;
            }
        }

        self.complete_all().await;
    }

    async fn run_stage(&mut self, index: usize, stage: &StageConfig) -> StageEnd {
        self.set_state(SessionState::StagePrompting);
        self.refresh_status();
        info!("Stage {} ({}) started", index + 1, stage.label);
        self.publish(EyecapEvent::StageStarted {
            stage_index: index,
            label: stage.label.clone(),
        });

        let mut prompts = PromptSequencer::new(
            stage.prompts.clone(),
            self.config.countdown_seconds,
            Duration::from_millis(self.config.prompt_interval_ms),
            Duration::from_millis(self.config.countdown_tick_ms),
        )
        .with_cue(Arc::clone(&self.cue))
        .start(self.bus.clone());

        tokio::select! {
            biased;
            command = self.commands.recv() => {
                prompts.stop();
                return StageEnd::Stopped(command);
            }
            ready = prompts.ready() => {
                if !ready {
                    warn!("Prompt sequence ended without a ready signal, recording anyway");
                }
            }
        }

        self.set_state(SessionState::StageRecording);
        self.runtime = Some(StageRuntime::new(index));
        self.refresh_status();
        self.publish(EyecapEvent::RecordingStarted { stage_index: index });

        let duration = stage.duration();
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        let mut capture = tokio::time::interval(stage.interval());
        capture.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => return StageEnd::Stopped(command),
                _ = &mut deadline => break,
                _ = capture.tick() => {
                    if let TickOutcome::DeviceLost = self.capture_tick(index, duration).await {
                        return StageEnd::DeviceLost;
                    }
                }
            }
        }

        self.set_state(SessionState::StageCompleting);
        let frames_captured = self.session.stage_count(index);
        info!(
            "Stage {} ({}) completed with {} frames",
            index + 1,
            stage.label,
            frames_captured
        );
        self.publish(EyecapEvent::StageCompleted {
            stage_index: index,
            label: stage.label.clone(),
            frames_captured,
        });

        StageEnd::Completed
    }

    /// One capture timer tick: pull frame and parameters, process, save
    async fn capture_tick(&mut self, index: usize, duration: Duration) -> TickOutcome {
        if self.config.abort_on_disconnect && !self.frames.is_connected() {
            return TickOutcome::DeviceLost;
        }

        let Some(frame) = self.frames.current_frame() else {
            trace!("No frame available, skipping tick");
            return TickOutcome::Skipped;
        };

        let params = self.params.processing_parameters();
        let processor = self.processor;
        let source_image = Arc::clone(&frame.image);
        let processed =
            match tokio::task::spawn_blocking(move || processor.process(&source_image, &params))
                .await
            {
                Ok(image) => image,
                Err(e) => {
                    error!("Frame processing task failed: {}", e);
                    return TickOutcome::Skipped;
                }
            };

        let metadata = FrameMetadata {
            rotation_degrees: params.rotation_degrees,
            roi_applied: params.roi_applied(),
            source_frame_id: Some(frame.id),
        };

        match self
            .store
            .save_frame(&mut self.session, processed, index, &metadata)
            .await
        {
            Ok(path) => {
                trace!("Saved {}", path.display());
                let (frames_captured, percent_elapsed) = match self.runtime.as_mut() {
                    Some(runtime) => {
                        runtime.frames_captured += 1;
                        (runtime.frames_captured, runtime.percent_elapsed(duration))
                    }
                    None => (self.session.stage_count(index), 0.0),
                };
                self.refresh_status();
                self.publish(EyecapEvent::CaptureProgress {
                    stage_index: index,
                    frames_captured,
                    percent_elapsed,
                });
                TickOutcome::Saved
            }
            Err(e) => {
                self.publish(EyecapEvent::FrameSaveFailed {
                    stage_index: index,
                    error: e.to_string(),
                });
                TickOutcome::Skipped
            }
        }
    }

    /// Sleep between stages. A stop command interrupts the pause.
    async fn pause(&mut self, delay: Duration) -> Result<(), Option<Command>> {
        if delay.is_zero() {
            return match self.commands.try_recv() {
                Ok(command) => Err(Some(command)),
                Err(mpsc::error::TryRecvError::Empty) => Ok(()),
                Err(mpsc::error::TryRecvError::Disconnected) => Err(None),
            };
        }

        tokio::select! {
            biased;
            command = self.commands.recv() => Err(command),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn handle_stop(&mut self, command: Option<Command>) {
        match command {
            Some(Command::Stop { finalize, ack }) => {
                info!("Session stopped by request (finalize: {})", finalize);
                let result = self.abort(finalize).await;
                let _ = ack.send(result);
            }
            None => {
                debug!("Orchestrator dropped, ending session");
                let _ = self.abort(false).await;
            }
        }
    }

    /// End the run early. Partial data stays on disk.
    async fn abort(&mut self, finalize: bool) -> Result<Option<FinalizeOutcome>, StorageError> {
        self.set_state(SessionState::Aborted);
        self.session.deactivate();
        self.runtime = None;

        let result = if finalize {
            self.store.finalize(&self.session).await.map(Some)
        } else {
            Ok(None)
        };
        if let Err(e) = &result {
            error!("Failed to finalize aborted session: {}", e);
        }

        self.publish(EyecapEvent::SessionAborted {
            total_frames: self.session.total_frames(),
        });
        self.refresh_status();
        self.set_state(SessionState::Idle);
        result
    }

    async fn complete_all(&mut self) {
        self.set_state(SessionState::AllComplete);
        self.refresh_status();

        match self.store.finalize(&self.session).await {
            Ok(outcome) => debug!("Report written to {}", outcome.report_path.display()),
            Err(e) => {
                error!("Failed to finalize session: {}", e);
                self.publish(EyecapEvent::SystemError {
                    component: "session_store".to_string(),
                    error: e.to_string(),
                });
            }
        }

        let total_frames = self.session.total_frames();
        info!(
            "All stages completed: {} frames in {}",
            total_frames,
            self.session.root().display()
        );
        self.publish(EyecapEvent::AllStagesCompleted {
            total_frames,
            session_folder: self.session.root().display().to_string(),
        });
        self.set_state(SessionState::Idle);
    }
}

impl Drop for StageRunner {
    /// The run task ends in `Idle` however it exits, including a panic
    fn drop(&mut self) {
        if *self.state_tx.borrow() == SessionState::Idle {
            return;
        }
        warn!("Session task ended unexpectedly, returning to idle");
        self.status.lock().state = SessionState::Idle;
        self.state_tx.send_replace(SessionState::Idle);
    }
}
