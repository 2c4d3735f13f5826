use super::{ComponentState, RecorderApp};
use crate::error::Result;
use std::time::Duration;
use tracing::{error, info, warn};

impl RecorderApp {
    /// Register every component as stopped
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing eyecap components");

        let mut states = self.component_states.lock().await;
        states.insert("frame_source".to_string(), ComponentState::Stopped);
        states.insert("session".to_string(), ComponentState::Stopped);
        if self.keyboard_handler.is_some() {
            states.insert("keyboard".to_string(), ComponentState::Stopped);
        }
        drop(states);

        Ok(())
    }

    /// Start the frame source and keyboard controls. A device that is not
    /// reachable within the startup timeout is only a warning; the source
    /// keeps reconnecting in the background.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting eyecap");

        self.set_component_state("frame_source", ComponentState::Starting)
            .await;
        self.frame_source.start().map_err(|e| {
            error!("Failed to start frame source: {}", e);
            e
        })?;

        let startup_timeout = Duration::from_secs(self.config.device.startup_timeout_secs);
        if self.frame_source.wait_for_connection(startup_timeout).await {
            info!("Frame source connected");
        } else {
            warn!(
                "No device connection within {}s, still trying",
                startup_timeout.as_secs()
            );
        }
        self.set_component_state("frame_source", ComponentState::Running)
            .await;
        self.set_component_state("session", ComponentState::Running)
            .await;

        if let Some(keyboard_handler) = &self.keyboard_handler {
            self.set_component_state("keyboard", ComponentState::Starting)
                .await;
            keyboard_handler.start().await.map_err(|e| {
                error!("Failed to start keyboard handler: {}", e);
                e
            })?;
            self.set_component_state("keyboard", ComponentState::Running)
                .await;
        }

        info!("eyecap started");
        Ok(())
    }
}
