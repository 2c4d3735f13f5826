use super::address::DeviceAddress;
use super::message::{classify, decode_frame, Inbound};
use super::{ConnectionState, ConnectionStats, FrameProvider};
use crate::config::DeviceConfig;
use crate::error::ConnectionError;
use crate::events::{EventBus, EyecapEvent};
use crate::frame::FrameData;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type DeviceStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// State shared between the public handle and the connection loop. The
/// loop only writes while its epoch is current, so a loop that was stopped
/// can never overwrite the state of its successor.
#[derive(Debug)]
struct Shared {
    epoch: u64,
    state: ConnectionState,
    connected: bool,
    current_url: Option<String>,
    frame: Option<FrameData>,
    next_frame_id: u64,
    frames_received: u64,
    last_frame_at: Option<SystemTime>,
    retry_count: u32,
}

struct Running {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// WebSocket client holding the latest frame received from the device
pub struct FrameSource {
    config: DeviceConfig,
    event_bus: EventBus,
    address: Mutex<Option<DeviceAddress>>,
    shared: Arc<Mutex<Shared>>,
    connected_tx: Arc<watch::Sender<bool>>,
    running: Mutex<Option<Running>>,
}

impl FrameSource {
    pub fn new(config: DeviceConfig, event_bus: EventBus) -> Self {
        let (connected_tx, _) = watch::channel(false);
        Self {
            config,
            event_bus,
            address: Mutex::new(None),
            shared: Arc::new(Mutex::new(Shared {
                epoch: 0,
                state: ConnectionState::Idle,
                connected: false,
                current_url: None,
                frame: None,
                next_frame_id: 0,
                frames_received: 0,
                last_frame_at: None,
                retry_count: 0,
            })),
            connected_tx: Arc::new(connected_tx),
            running: Mutex::new(None),
        }
    }

    /// Validate and store the device address. Takes effect on the next
    /// `start`.
    pub fn configure(&self, address: &str) -> Result<(), ConnectionError> {
        let parsed = DeviceAddress::parse(address, &self.config.fallback_ports)?;
        info!(
            "Device address set to {} ({} connection variants)",
            parsed.base(),
            parsed.variants().len()
        );
        debug!("Connection variants: {:?}", parsed.variants());
        *self.address.lock() = Some(parsed);
        Ok(())
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        self.address.lock().clone()
    }

    /// Spawn the connection loop, stopping a previous loop first
    pub fn start(&self) -> Result<(), ConnectionError> {
        let address = self
            .address
            .lock()
            .clone()
            .ok_or(ConnectionError::NoAddress)?;

        let was_running = self.running.lock().is_some();
        if was_running {
            debug!("Frame source already running, restarting");
            self.stop();
        }

        let epoch = {
            let mut shared = self.shared.lock();
            shared.epoch += 1;
            shared.state = ConnectionState::Connecting;
            shared.retry_count = 0;
            shared.epoch
        };

        let context = LoopContext {
            epoch,
            config: self.config.clone(),
            variants: address.variants().to_vec(),
            shared: Arc::clone(&self.shared),
            connected_tx: Arc::clone(&self.connected_tx),
            event_bus: self.event_bus.clone(),
        };

        info!("Starting frame source for {}", address.base());
        let _ = self.event_bus.publish(EyecapEvent::ConnectionStatus {
            status: format!("Connecting to {}...", address.base()),
        });

        let token = CancellationToken::new();
        let task = tokio::spawn(context.run(token.clone()));
        *self.running.lock() = Some(Running { token, task });

        Ok(())
    }

    /// Cancel the connection loop without waiting for it, clear the
    /// connection state and the latest frame
    pub fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.token.cancel();
        }

        {
            let mut shared = self.shared.lock();
            shared.epoch += 1;
            shared.state = ConnectionState::Idle;
            shared.connected = false;
            shared.current_url = None;
            shared.frame = None;
            self.connected_tx.send_replace(false);
        }

        info!("Frame source stopped");
        let _ = self.event_bus.publish(EyecapEvent::DeviceDisconnected);
        let _ = self.event_bus.publish(EyecapEvent::ConnectionStatus {
            status: "Disconnected".to_string(),
        });
    }

    /// Whether a connection loop is still alive
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|running| !running.task.is_finished())
            .unwrap_or(false)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn stats(&self) -> ConnectionStats {
        let shared = self.shared.lock();
        ConnectionStats {
            connected: shared.connected,
            state: shared.state,
            frames_received: shared.frames_received,
            last_frame_at: shared.last_frame_at,
            current_url: shared.current_url.clone(),
            retry_count: shared.retry_count,
        }
    }

    /// Wait until a connection is established, up to `timeout`
    pub async fn wait_for_connection(&self, timeout: Duration) -> bool {
        let mut rx = self.connected_tx.subscribe();
        let connected = tokio::time::timeout(timeout, rx.wait_for(|connected| *connected))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false);
        connected
    }
}

impl FrameProvider for FrameSource {
    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    fn current_frame(&self) -> Option<FrameData> {
        self.shared.lock().frame.clone()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.token.cancel();
        }
    }
}

/// Everything the background loop needs, owned by the spawned task
struct LoopContext {
    epoch: u64,
    config: DeviceConfig,
    variants: Vec<String>,
    shared: Arc<Mutex<Shared>>,
    connected_tx: Arc<watch::Sender<bool>>,
    event_bus: EventBus,
}

impl LoopContext {
    /// Apply `update` only if this loop has not been superseded
    fn with_current<R>(&self, update: impl FnOnce(&mut Shared) -> R) -> Option<R> {
        let mut shared = self.shared.lock();
        if shared.epoch != self.epoch {
            return None;
        }
        Some(update(&mut shared))
    }

    fn publish(&self, event: EyecapEvent) {
        let _ = self.event_bus.publish(event);
    }

    fn status(&self, status: impl Into<String>) {
        self.publish(EyecapEvent::ConnectionStatus {
            status: status.into(),
        });
    }

    async fn run(self, token: CancellationToken) {
        let timeout = Duration::from_secs(self.config.connect_timeout_secs.max(1));
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        let mut index = 0usize;
        let mut rounds = 0u32;

        while !token.is_cancelled() {
            let url = self.variants[index].clone();
            let live = self
                .with_current(|s| {
                    s.state = ConnectionState::Connecting;
                    s.current_url = Some(url.clone());
                })
                .is_some();
            if !live {
                break;
            }

            debug!("Connecting to {}", url);
            self.status(format!("Trying {}", url));

            let attempt = tokio::select! {
                _ = token.cancelled() => break,
                result = tokio::time::timeout(timeout, connect_async(url.as_str())) => result,
            };

            match attempt {
                Ok(Ok((stream, _response))) => {
                    let live = self
                        .with_current(|s| {
                            s.state = ConnectionState::Connected;
                            s.connected = true;
                            s.retry_count = 0;
                            self.connected_tx.send_replace(true);
                        })
                        .is_some();
                    if !live {
                        break;
                    }
                    rounds = 0;

                    info!("Connected to {}", url);
                    self.publish(EyecapEvent::DeviceConnected { url: url.clone() });
                    self.status("Connected");

                    self.listen(stream, &token).await;

                    if token.is_cancelled() {
                        break;
                    }
                    let live = self
                        .with_current(|s| {
                            s.state = ConnectionState::Disconnected;
                            s.connected = false;
                            s.frame = None;
                            self.connected_tx.send_replace(false);
                        })
                        .is_some();
                    if !live {
                        break;
                    }

                    self.publish(EyecapEvent::DeviceDisconnected);
                    if !self.config.auto_reconnect {
                        self.status("Connection closed");
                        self.with_current(|s| s.state = ConnectionState::Idle);
                        break;
                    }
                    self.status(format!("Connection to {} lost, reconnecting", url));
                }
                Ok(Err(e)) => {
                    let error = ConnectionError::Handshake {
                        url: url.clone(),
                        details: e.to_string(),
                    };
                    if !self.attempt_failed(error, &mut index, &mut rounds) {
                        break;
                    }
                }
                Err(_) => {
                    let error = ConnectionError::Timeout {
                        url: url.clone(),
                        seconds: timeout.as_secs(),
                    };
                    if !self.attempt_failed(error, &mut index, &mut rounds) {
                        break;
                    }
                }
            }

            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        debug!("Connection loop (epoch {}) finished", self.epoch);
    }

    /// Advance to the next variant after a failed attempt. Returns false
    /// when the loop should give up.
    fn attempt_failed(&self, error: ConnectionError, index: &mut usize, rounds: &mut u32) -> bool {
        debug!("Connection attempt failed: {}", error);
        self.status(error.to_string());

        *index += 1;
        if *index < self.variants.len() {
            return true;
        }

        *index = 0;
        *rounds += 1;
        let round = *rounds;
        if self.with_current(|s| s.retry_count = round).is_none() {
            return false;
        }
        warn!(
            "All {} address variants failed (round {})",
            self.variants.len(),
            round
        );

        let max = self.config.max_reconnect_attempts;
        if max > 0 && round >= max {
            let error = ConnectionError::RetriesExhausted { attempts: round };
            error!("{}", error);
            self.with_current(|s| {
                s.state = ConnectionState::Error;
                s.current_url = None;
            });
            self.status(error.to_string());
            self.publish(EyecapEvent::SystemError {
                component: "frame_source".to_string(),
                error: error.to_string(),
            });
            return false;
        }

        true
    }

    async fn listen(&self, mut stream: DeviceStream, token: &CancellationToken) {
        self.with_current(|s| s.state = ConnectionState::Listening);

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => None,
                next = stream.next() => Some(next),
            };

            let message = match next {
                None => {
                    let _ = stream.close(None).await;
                    return;
                }
                Some(Some(Ok(message))) => message,
                Some(Some(Err(e))) => {
                    warn!("Connection error while listening: {}", e);
                    return;
                }
                Some(None) => {
                    info!("Device closed the stream");
                    return;
                }
            };

            match classify(message) {
                Inbound::Image(bytes) => self.handle_image(bytes).await,
                Inbound::Status(message) => {
                    debug!("Device status: {}", message);
                    self.publish(EyecapEvent::DeviceStatus { message });
                }
                Inbound::Invalid(e) => warn!("Dropping frame: {}", e),
                Inbound::Ignored => {}
                Inbound::Closed => {
                    info!("Device sent close frame");
                    return;
                }
            }
        }
    }

    async fn handle_image(&self, bytes: Vec<u8>) {
        let max_dimension = self.config.max_frame_dimension;
        let decoded =
            tokio::task::spawn_blocking(move || decode_frame(&bytes, max_dimension)).await;

        let image = match decoded {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                warn!("Dropping frame: {}", e);
                return;
            }
            Err(e) => {
                error!("Frame decode task failed: {}", e);
                return;
            }
        };

        let (width, height) = image.dimensions();
        let timestamp = SystemTime::now();
        let frame_id = self.with_current(|s| {
            let id = s.next_frame_id;
            s.next_frame_id += 1;
            s.frames_received += 1;
            s.last_frame_at = Some(timestamp);
            s.frame = Some(FrameData::new(id, timestamp, image));
            id
        });

        if let Some(frame_id) = frame_id {
            self.publish(EyecapEvent::FrameReceived {
                frame_id,
                width,
                height,
                timestamp,
            });
        }
    }
}
