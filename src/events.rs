use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events exchanged between the device connection, the capture session and
/// the user-facing front end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EyecapEvent {
    /// Human-readable connection status line ("Connecting to ...", ...)
    ConnectionStatus { status: String },
    /// A WebSocket connection to the device was established
    DeviceConnected { url: String },
    /// The device connection was lost or stopped
    DeviceDisconnected,
    /// A frame was decoded and became the current frame
    FrameReceived {
        frame_id: u64,
        width: u32,
        height: u32,
        timestamp: SystemTime,
    },
    /// Status text pushed by the device itself
    DeviceStatus { message: String },

    /// A stage became active (zero-based index)
    StageStarted { stage_index: usize, label: String },
    /// A prompt message for the person being recorded
    PromptMessage { text: String },
    /// Countdown tick before recording starts
    CountdownTick { remaining: u32 },
    /// Prompts finished, frames are now being saved for the stage
    RecordingStarted { stage_index: usize },
    /// A frame was saved
    CaptureProgress {
        stage_index: usize,
        frames_captured: u64,
        percent_elapsed: f32,
    },
    /// A frame could not be written; counters were not advanced
    FrameSaveFailed { stage_index: usize, error: String },
    /// A stage reached its duration
    StageCompleted {
        stage_index: usize,
        label: String,
        frames_captured: u64,
    },
    /// Every stage completed and the session was finalized
    AllStagesCompleted {
        total_frames: u64,
        session_folder: String,
    },
    /// The session was stopped before the last stage completed
    SessionAborted { total_frames: u64 },

    /// The front end asked for a session to start
    SessionStartRequested,
    /// The front end asked for the running session to stop
    SessionStopRequested { finalize: bool },
    /// Application shutdown requested
    ShutdownRequested { reason: String },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
}

impl EyecapEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            EyecapEvent::ConnectionStatus { status } => status.clone(),
            EyecapEvent::DeviceConnected { url } => format!("Connected to {}", url),
            EyecapEvent::DeviceDisconnected => "Device disconnected".to_string(),
            EyecapEvent::FrameReceived {
                frame_id,
                width,
                height,
                ..
            } => format!("Frame {} received ({}x{})", frame_id, width, height),
            EyecapEvent::DeviceStatus { message } => format!("Device: {}", message),
            EyecapEvent::StageStarted { stage_index, label } => {
                format!("Stage {} started: {}", stage_index + 1, label)
            }
            EyecapEvent::PromptMessage { text } => text.clone(),
            EyecapEvent::CountdownTick { remaining } => format!("{}...", remaining),
            EyecapEvent::RecordingStarted { stage_index } => {
                format!("Recording stage {}", stage_index + 1)
            }
            EyecapEvent::CaptureProgress {
                stage_index,
                frames_captured,
                percent_elapsed,
            } => format!(
                "Stage {}: {} frames ({:.0}%)",
                stage_index + 1,
                frames_captured,
                percent_elapsed
            ),
            EyecapEvent::FrameSaveFailed { stage_index, error } => {
                format!("Stage {}: frame save failed: {}", stage_index + 1, error)
            }
            EyecapEvent::StageCompleted {
                stage_index,
                label,
                frames_captured,
            } => format!(
                "Stage {} completed: {} ({} frames)",
                stage_index + 1,
                label,
                frames_captured
            ),
            EyecapEvent::AllStagesCompleted {
                total_frames,
                session_folder,
            } => format!(
                "All stages completed: {} frames in {}",
                total_frames, session_folder
            ),
            EyecapEvent::SessionAborted { total_frames } => {
                format!("Session aborted after {} frames", total_frames)
            }
            EyecapEvent::SessionStartRequested => "Session start requested".to_string(),
            EyecapEvent::SessionStopRequested { finalize } => {
                format!("Session stop requested (finalize: {})", finalize)
            }
            EyecapEvent::ShutdownRequested { reason } => {
                format!("Shutdown requested: {}", reason)
            }
            EyecapEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            EyecapEvent::ConnectionStatus { .. } => "connection_status",
            EyecapEvent::DeviceConnected { .. } => "device_connected",
            EyecapEvent::DeviceDisconnected => "device_disconnected",
            EyecapEvent::FrameReceived { .. } => "frame_received",
            EyecapEvent::DeviceStatus { .. } => "device_status",
            EyecapEvent::StageStarted { .. } => "stage_started",
            EyecapEvent::PromptMessage { .. } => "prompt_message",
            EyecapEvent::CountdownTick { .. } => "countdown_tick",
            EyecapEvent::RecordingStarted { .. } => "recording_started",
            EyecapEvent::CaptureProgress { .. } => "capture_progress",
            EyecapEvent::FrameSaveFailed { .. } => "frame_save_failed",
            EyecapEvent::StageCompleted { .. } => "stage_completed",
            EyecapEvent::AllStagesCompleted { .. } => "all_stages_completed",
            EyecapEvent::SessionAborted { .. } => "session_aborted",
            EyecapEvent::SessionStartRequested => "session_start_requested",
            EyecapEvent::SessionStopRequested { .. } => "session_stop_requested",
            EyecapEvent::ShutdownRequested { .. } => "shutdown_requested",
            EyecapEvent::SystemError { .. } => "system_error",
        }
    }
}

/// Broadcast event bus shared by every component
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EyecapEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus that logs every event at debug level
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EyecapEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers. Fails only when nobody is
    /// listening, which most publishers ignore.
    pub fn publish(&self, event: EyecapEvent) -> Result<usize, EventBusError> {
        match &event {
            EyecapEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            EyecapEvent::DeviceConnected { url } => {
                info!("Device connected: {}", url);
            }
            EyecapEvent::DeviceDisconnected => {
                warn!("Device disconnected");
            }
            EyecapEvent::FrameSaveFailed { stage_index, error } => {
                warn!("Frame save failed in stage {}: {}", stage_index + 1, error);
            }
            EyecapEvent::StageCompleted { .. }
            | EyecapEvent::AllStagesCompleted { .. }
            | EyecapEvent::SessionAborted { .. }
            | EyecapEvent::ShutdownRequested { .. } => {
                info!("{}", event.description());
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    /// Accept only the named event types
    EventTypes(Vec<&'static str>),
    /// Accept `SystemError` events from the named components
    Components(Vec<String>),
    Custom(fn(&EyecapEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &EyecapEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Components(components) => {
                if let EyecapEvent::SystemError { component, .. } = event {
                    components.contains(component)
                } else {
                    false
                }
            }
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Named receiver that only yields events passing its filter
pub struct EventReceiver {
    receiver: broadcast::Receiver<EyecapEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<EyecapEvent>,
        filter: EventFilter,
        name: impl Into<String>,
    ) -> Self {
        Self {
            receiver,
            filter,
            name: name.into(),
        }
    }

    /// Receive the next matching event. Lag is logged and skipped over.
    pub async fn recv(&mut self) -> Result<EyecapEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Result<Option<EyecapEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus
            .publish(EyecapEvent::PromptMessage {
                text: "Close your eyes".to_string(),
            })
            .unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            EyecapEvent::PromptMessage { text } => assert_eq!(text, "Close your eyes"),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let event_bus = EventBus::new(10);
        assert!(!event_bus.has_subscribers());
        assert!(event_bus.publish(EyecapEvent::DeviceDisconnected).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus
            .publish(EyecapEvent::CountdownTick { remaining: 3 })
            .unwrap();

        let _ = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let filter = EventFilter::EventTypes(vec!["stage_completed"]);
        let mut filtered = EventReceiver::new(event_bus.subscribe(), filter, "test");

        event_bus
            .publish(EyecapEvent::CountdownTick { remaining: 1 })
            .unwrap();
        event_bus
            .publish(EyecapEvent::StageCompleted {
                stage_index: 0,
                label: "Blink".to_string(),
                frames_captured: 12,
            })
            .unwrap();

        let event = timeout(Duration::from_millis(100), filtered.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "stage_completed");
        assert!(filtered.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_component_filter() {
        let filter = EventFilter::Components(vec!["frame_source".to_string()]);

        assert!(filter.matches(&EyecapEvent::SystemError {
            component: "frame_source".to_string(),
            error: "boom".to_string(),
        }));
        assert!(!filter.matches(&EyecapEvent::DeviceDisconnected));
    }

    #[test]
    fn test_event_descriptions_use_one_based_stages() {
        let event = EyecapEvent::StageStarted {
            stage_index: 0,
            label: "Blink".to_string(),
        };
        assert_eq!(event.description(), "Stage 1 started: Blink");
    }
}
