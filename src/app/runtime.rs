use super::{RecorderApp, ShutdownReason};
use crate::error::{EyecapError, Result};
use crate::events::EyecapEvent;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, error, info, warn};

type SharedShutdown = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

impl RecorderApp {
    /// Run until a signal, a quit request or (with `exit_on_complete`) the
    /// end of a session, then shut down. Returns the process exit code.
    pub async fn run(&mut self) -> Result<i32> {
        info!("eyecap is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| EyecapError::system("Shutdown sender already taken"))?;
        let mut shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| EyecapError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers(Arc::new(Mutex::new(Some(shutdown_sender))));

        let mut events = self.event_bus.subscribe();

        if self.options.auto_start {
            self.start_session().await;
        }

        let shutdown_reason = loop {
            tokio::select! {
                reason = &mut shutdown_receiver => {
                    break reason.map_err(|_| {
                        EyecapError::system("Shutdown channel closed unexpectedly")
                    })?;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(reason) = self.handle_event(event).await {
                            break reason;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Application loop lagged behind by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break ShutdownReason::Error("event bus closed".to_string());
                    }
                },
            }
        };

        info!("Shutdown initiated: {:?}", shutdown_reason);
        let exit_code = self.shutdown(&shutdown_reason).await?;

        info!("eyecap shutdown complete");
        Ok(exit_code)
    }

    /// React to one bus event. Returns a reason when the app should stop.
    pub(super) async fn handle_event(&self, event: EyecapEvent) -> Option<ShutdownReason> {
        match event {
            EyecapEvent::SessionStartRequested => self.start_session().await,
            EyecapEvent::SessionStopRequested { finalize } => {
                match self.session.stop(finalize).await {
                    Ok(Some(outcome)) => {
                        info!("Partial session report: {}", outcome.report_path.display())
                    }
                    Ok(None) => {}
                    Err(e) => error!("Failed to stop session: {}", e),
                }
            }
            EyecapEvent::StageStarted { stage_index, label } => {
                info!(
                    "Stage {}/{}: {}",
                    stage_index + 1,
                    self.plan.len(),
                    label
                );
            }
            EyecapEvent::PromptMessage { text } => info!("{}", text),
            EyecapEvent::CaptureProgress { .. } => {
                let status = self.session.status();
                debug!(
                    "Stage {} progress {} ({} total)",
                    status.stage_number.unwrap_or(0),
                    status.progress(),
                    status.total_frames
                );
            }
            EyecapEvent::AllStagesCompleted { .. } if self.options.exit_on_complete => {
                return Some(ShutdownReason::SessionComplete);
            }
            EyecapEvent::ShutdownRequested { .. } => return Some(ShutdownReason::UserRequest),
            _ => {}
        }
        None
    }

    /// Start the configured plan for the configured user. Failures are
    /// logged; the recorder stays idle.
    pub(super) async fn start_session(&self) {
        if self.session.state().is_active() {
            warn!("A session is already running");
            return;
        }

        match self
            .session
            .start_plan(&self.config.user, self.plan.clone())
            .await
        {
            Ok(()) => info!("Session started for '{}'", self.config.user.username),
            Err(e) => warn!("Cannot start session: {}", e),
        }
    }

    fn setup_signal_handlers(&self, shutdown_sender: SharedShutdown) {
        // SIGTERM (systemd stop)
        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm =
                    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                        Ok(sigterm) => sigterm,
                        Err(e) => {
                            warn!("Failed to register SIGTERM handler: {}", e);
                            return;
                        }
                    };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        // SIGINT (Ctrl+C)
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
