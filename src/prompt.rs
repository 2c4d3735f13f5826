use crate::events::{EventBus, EyecapEvent};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Audible (or silent) accompaniment to prompt notifications
pub trait PromptCue: Send + Sync {
    fn message(&self, _text: &str) {}
    fn countdown(&self, _remaining: u32) {}
    fn ready(&self) {}
}

/// No sound at all
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentCue;

impl PromptCue for SilentCue {}

/// Rings the terminal bell on every prompt and countdown tick
#[derive(Debug, Default, Clone, Copy)]
pub struct BellCue;

impl BellCue {
    fn ring(&self) {
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }
}

impl PromptCue for BellCue {
    fn message(&self, _text: &str) {
        self.ring();
    }

    fn countdown(&self, _remaining: u32) {
        self.ring();
    }

    fn ready(&self) {
        self.ring();
    }
}

/// Plays a stage's prompt messages and countdown on its own task, then
/// signals that recording may begin
pub struct PromptSequencer {
    messages: Vec<String>,
    countdown: u32,
    message_interval: Duration,
    countdown_tick: Duration,
    cue: Arc<dyn PromptCue>,
}

impl PromptSequencer {
    pub fn new(
        messages: Vec<String>,
        countdown: u32,
        message_interval: Duration,
        countdown_tick: Duration,
    ) -> Self {
        Self {
            messages,
            countdown,
            message_interval,
            countdown_tick,
            cue: Arc::new(SilentCue),
        }
    }

    pub fn with_cue(mut self, cue: Arc<dyn PromptCue>) -> Self {
        self.cue = cue;
        self
    }

    /// Total time from start to the ready signal
    pub fn total_duration(&self) -> Duration {
        self.message_interval * self.messages.len() as u32 + self.countdown_tick * self.countdown
    }

    pub fn start(self, event_bus: EventBus) -> PromptHandle {
        let token = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(event_bus, token.clone(), ready_tx));

        PromptHandle {
            token,
            ready: ready_rx,
            task,
        }
    }

    async fn run(self, bus: EventBus, token: CancellationToken, ready: oneshot::Sender<()>) {
        for text in &self.messages {
            if token.is_cancelled() {
                return;
            }
            trace!("Prompt: {}", text);
            let _ = bus.publish(EyecapEvent::PromptMessage { text: text.clone() });
            self.cue.message(text);

            if pause(self.message_interval, &token).await {
                return;
            }
        }

        for remaining in (1..=self.countdown).rev() {
            if token.is_cancelled() {
                return;
            }
            let _ = bus.publish(EyecapEvent::CountdownTick { remaining });
            let _ = bus.publish(EyecapEvent::PromptMessage {
                text: format!("Recording starts in {}...", remaining),
            });
            self.cue.countdown(remaining);

            if pause(self.countdown_tick, &token).await {
                return;
            }
        }

        if token.is_cancelled() {
            return;
        }
        let _ = bus.publish(EyecapEvent::PromptMessage {
            text: "Recording!".to_string(),
        });
        self.cue.ready();
        let _ = ready.send(());
        debug!("Prompt sequence finished");
    }
}

/// Sleep for `duration`; true if cancelled first
async fn pause(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Running prompt sequence
pub struct PromptHandle {
    token: CancellationToken,
    ready: oneshot::Receiver<()>,
    task: JoinHandle<()>,
}

impl PromptHandle {
    /// Suppress every later notification and the ready signal
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Resolves once the sequence completes. False if it was stopped or
    /// ended without signalling. Safe to use as a `select!` branch.
    pub async fn ready(&mut self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        match (&mut self.ready).await {
            Ok(()) => !self.token.is_cancelled(),
            Err(_) => false,
        }
    }
}

impl Drop for PromptHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::time::timeout;

    #[derive(Default)]
    struct RecordingCue {
        calls: Mutex<Vec<String>>,
    }

    impl PromptCue for RecordingCue {
        fn message(&self, text: &str) {
            self.calls.lock().push(format!("message:{}", text));
        }

        fn countdown(&self, remaining: u32) {
            self.calls.lock().push(format!("countdown:{}", remaining));
        }

        fn ready(&self) {
            self.calls.lock().push("ready".to_string());
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<EyecapEvent>) -> Vec<EyecapEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_plays_messages_then_countdown_then_ready() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let cue = Arc::new(RecordingCue::default());

        let sequencer = PromptSequencer::new(
            vec!["Open".to_string(), "Blink".to_string()],
            3,
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
        .with_cue(cue.clone());
        assert_eq!(sequencer.total_duration(), Duration::from_millis(50));

        let mut handle = sequencer.start(bus);
        assert!(timeout(Duration::from_secs(2), handle.ready()).await.unwrap());

        let ticks: Vec<u32> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                EyecapEvent::CountdownTick { remaining } => Some(remaining),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![3, 2, 1]);

        assert_eq!(
            *cue.calls.lock(),
            vec![
                "message:Open",
                "message:Blink",
                "countdown:3",
                "countdown:2",
                "countdown:1",
                "ready"
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_suppresses_ready_and_later_notifications() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();

        let mut handle = PromptSequencer::new(
            vec!["One".to_string(), "Two".to_string(), "Three".to_string()],
            5,
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
        .start(bus);

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop();
        assert!(handle.is_stopped());
        assert!(!handle.ready().await);

        let seen = drain(&mut rx).len();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(drain(&mut rx).len(), 0, "no events after stop (saw {})", seen);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_empty_sequence_is_ready_immediately() {
        let bus = EventBus::new(8);
        let mut handle =
            PromptSequencer::new(Vec::new(), 0, Duration::from_secs(2), Duration::from_secs(1))
                .start(bus);

        assert!(timeout(Duration::from_millis(500), handle.ready())
            .await
            .unwrap());
    }
}
