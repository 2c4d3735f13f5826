use super::{ComponentState, RecorderApp, ShutdownReason};
use crate::error::{EyecapError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

impl RecorderApp {
    /// Stop the running session, then the keyboard, then the frame source
    pub async fn shutdown(&mut self, reason: &ShutdownReason) -> Result<i32> {
        info!("Beginning graceful shutdown");

        let mut exit_code = match reason {
            ShutdownReason::Error(_) => 1,
            _ => 0,
        };

        let session = self.session.clone();
        let finalize = self.config.session.finalize_on_abort;
        let stopped = self
            .stop_with_timeout("session", Duration::from_secs(15), async move {
                if let Some(outcome) = session.stop(finalize).await? {
                    info!("Session report written: {}", outcome.report_path.display());
                }
                Ok(())
            })
            .await;
        if let Err(e) = stopped {
            error!("Error stopping session: {}", e);
            exit_code = 1;
        }

        if let Some(keyboard_handler) = self.keyboard_handler.take() {
            let stopped = self
                .stop_with_timeout("keyboard", Duration::from_secs(2), async move {
                    keyboard_handler.stop().await
                })
                .await;
            if let Err(e) = stopped {
                error!("Error stopping keyboard: {}", e);
                exit_code = 1;
            }
        }

        let frame_source = self.frame_source.clone();
        let stopped = self
            .stop_with_timeout("frame_source", Duration::from_secs(5), async move {
                frame_source.stop();
                Ok(())
            })
            .await;
        if let Err(e) = stopped {
            error!("Error stopping frame source: {}", e);
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_with_timeout<F>(&self, component: &str, limit: Duration, stop: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        match timeout(limit, stop).await {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(e)
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(EyecapError::component(
                    component.to_string(),
                    "stop timeout".to_string(),
                ))
            }
        }
    }
}
