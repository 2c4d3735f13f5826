use crate::error::Result;
use crate::events::{EventBus, EyecapEvent};
use crate::preview::Preview;
use crate::settings::SharedSettings;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Actions reachable from the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    StartSession,
    AbortSession,
    AbortAndFinalize,
    RotateLeft,
    RotateRight,
    ToggleRoi,
    SavePreview,
    Quit,
}

impl KeyCommand {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char('s') => Some(Self::StartSession),
            KeyCode::Char('x') => Some(Self::AbortSession),
            KeyCode::Char('f') => Some(Self::AbortAndFinalize),
            KeyCode::Char('[') => Some(Self::RotateLeft),
            KeyCode::Char(']') => Some(Self::RotateRight),
            KeyCode::Char('r') => Some(Self::ToggleRoi),
            KeyCode::Char('p') => Some(Self::SavePreview),
            KeyCode::Char('q') | KeyCode::Esc => Some(Self::Quit),
            _ => None,
        }
    }
}

pub const KEY_HELP: &str =
    "keys: s start | x abort | f abort+finalize | [ ] rotate | r crop | p preview | q quit";

/// Shared by the input thread and tests
#[derive(Clone)]
struct KeyDispatcher {
    event_bus: EventBus,
    settings: SharedSettings,
    preview: Arc<Preview>,
    preview_dir: PathBuf,
    jpeg_quality: u8,
}

impl KeyDispatcher {
    /// Apply a command. Returns false when the input loop should end.
    fn dispatch(&self, command: KeyCommand, runtime: &Handle) -> bool {
        match command {
            KeyCommand::StartSession => {
                info!("Start key pressed");
                self.publish(EyecapEvent::SessionStartRequested);
            }
            KeyCommand::AbortSession => {
                info!("Abort key pressed");
                self.publish(EyecapEvent::SessionStopRequested { finalize: false });
            }
            KeyCommand::AbortAndFinalize => {
                info!("Abort and finalize key pressed");
                self.publish(EyecapEvent::SessionStopRequested { finalize: true });
            }
            KeyCommand::RotateLeft => {
                self.settings.rotate_by_steps(1);
            }
            KeyCommand::RotateRight => {
                self.settings.rotate_by_steps(-1);
            }
            KeyCommand::ToggleRoi => {
                self.settings.toggle_roi();
            }
            KeyCommand::SavePreview => {
                let preview = Arc::clone(&self.preview);
                let dir = self.preview_dir.clone();
                let quality = self.jpeg_quality;
                runtime.spawn(async move {
                    match preview.save_snapshot(&dir, quality).await {
                        Ok(Some(_)) => {}
                        Ok(None) => warn!("No frame available for preview"),
                        Err(e) => warn!("Failed to write preview: {}", e),
                    }
                });
            }
            KeyCommand::Quit => {
                info!("Quit key pressed - requesting shutdown");
                self.publish(EyecapEvent::ShutdownRequested {
                    reason: "User requested via keyboard".to_string(),
                });
                return false;
            }
        }
        true
    }

    fn publish(&self, event: EyecapEvent) {
        if let Err(e) = self.event_bus.publish(event) {
            warn!("Failed to publish keyboard event: {}", e);
        }
    }
}

/// Raw-mode terminal controls for the recorder
pub struct KeyboardInputHandler {
    dispatcher: KeyDispatcher,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(
        event_bus: EventBus,
        settings: SharedSettings,
        preview: Arc<Preview>,
        preview_dir: PathBuf,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            dispatcher: KeyDispatcher {
                event_bus,
                settings,
                preview,
                preview_dir,
                jpeg_quality,
            },
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Apply a command as if its key had been pressed
    pub fn handle(&self, command: KeyCommand) -> bool {
        self.dispatcher.dispatch(command, &Handle::current())
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard input handler ({})", KEY_HELP);

        let dispatcher = self.dispatcher.clone();
        let cancellation_token = self.cancellation_token.clone();
        let runtime_handle = Handle::current();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }
            debug!("Raw mode enabled");

            while !cancellation_token.is_cancelled() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }
                        match KeyCommand::from_key(key_event.code) {
                            Some(command) => {
                                if !dispatcher.dispatch(command, &runtime_handle) {
                                    break;
                                }
                            }
                            None => debug!("Key pressed: {:?}", key_event.code),
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Error polling for keyboard events: {}", e),
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // One poll period for the input thread to notice
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = disable_raw_mode();

        Ok(())
    }
}
