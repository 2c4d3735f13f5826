mod core;
mod state;
#[cfg(test)]
mod tests;

pub use state::{SessionState, SessionStatus, StageRuntime};

use self::core::{Command, StageRunner};
use crate::config::{SessionConfig, UserIdentity};
use crate::error::{Result, SessionError};
use crate::events::EventBus;
use crate::prompt::{PromptCue, SilentCue};
use crate::settings::ParameterProvider;
use crate::source::FrameProvider;
use crate::stage::{RawStageConfig, StagePlan};
use crate::storage::{FinalizeOutcome, SessionStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ActiveRun {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Drives a stage plan through prompting, recording and completion,
/// pulling frames from a [`FrameProvider`] and persisting them through the
/// [`SessionStore`]
pub struct StageOrchestrator {
    frames: Arc<dyn FrameProvider>,
    params: Arc<dyn ParameterProvider>,
    store: SessionStore,
    event_bus: EventBus,
    config: SessionConfig,
    cue: Arc<dyn PromptCue>,
    state_tx: Arc<watch::Sender<SessionState>>,
    status: Arc<Mutex<SessionStatus>>,
    active: tokio::sync::Mutex<Option<ActiveRun>>,
}

impl StageOrchestrator {
    pub fn new(
        frames: Arc<dyn FrameProvider>,
        params: Arc<dyn ParameterProvider>,
        store: SessionStore,
        event_bus: EventBus,
        config: SessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            frames,
            params,
            store,
            event_bus,
            config,
            cue: Arc::new(SilentCue),
            state_tx: Arc::new(state_tx),
            status: Arc::new(Mutex::new(SessionStatus::idle())),
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_cue(mut self, cue: Arc<dyn PromptCue>) -> Self {
        self.cue = cue;
        self
    }

    /// Validate `stages` and start a run. Rejections leave the state at
    /// `Idle` and create no folders.
    pub async fn start(&self, user: &UserIdentity, stages: &[RawStageConfig]) -> Result<()> {
        let plan = StagePlan::from_raw(stages)?;
        self.start_plan(user, plan).await
    }

    /// Start a run with an already validated plan
    pub async fn start_plan(&self, user: &UserIdentity, plan: StagePlan) -> Result<()> {
        if !self.frames.is_connected() {
            warn!("Refusing to start session: device not connected");
            return Err(SessionError::DeviceNotConnected.into());
        }

        let mut active = self.active.lock().await;
        if let Some(run) = active.take() {
            if !run.task.is_finished() && self.state() != SessionState::Idle {
                *active = Some(run);
                return Err(SessionError::AlreadyRunning.into());
            }
            // An idle run is at most unwinding its last poll
            if let Err(e) = run.task.await {
                warn!("Previous session task ended abnormally: {}", e);
            }
        }

        let session = self.store.create_session(user, &plan).await?;
        info!(
            "Starting {} stage session in {}",
            plan.len(),
            session.root().display()
        );

        let (commands_tx, commands_rx) = mpsc::channel(4);
        let runner = StageRunner::new(
            session,
            Arc::clone(&self.frames),
            Arc::clone(&self.params),
            self.store.clone(),
            self.event_bus.clone(),
            self.config.clone(),
            Arc::clone(&self.cue),
            Arc::clone(&self.state_tx),
            Arc::clone(&self.status),
            commands_rx,
        );

        let task = tokio::spawn(runner.run());
        *active = Some(ActiveRun {
            commands: commands_tx,
            task,
        });

        Ok(())
    }

    /// Stop the running session from any state. When this returns the run
    /// task has acknowledged and no further frame will be saved. Finalizes
    /// only when asked to.
    pub async fn stop(&self, finalize: bool) -> Result<Option<FinalizeOutcome>> {
        let mut active = self.active.lock().await;
        let Some(run) = active.take() else {
            debug!("Stop requested with no active session");
            return Ok(None);
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        let sent = run
            .commands
            .send(Command::Stop {
                finalize,
                ack: ack_tx,
            })
            .await;

        let outcome = if sent.is_ok() {
            ack_rx.await.unwrap_or(Ok(None))
        } else {
            // The run already ended on its own
            Ok(None)
        };

        if let Err(e) = run.task.await {
            warn!("Session task ended abnormally: {}", e);
        }

        Ok(outcome?)
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.lock().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Wait until the orchestrator is back in `Idle`, up to `timeout`
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.state_tx.subscribe();
        let idle = tokio::time::timeout(timeout, rx.wait_for(|state| *state == SessionState::Idle))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false);
        idle
    }
}
