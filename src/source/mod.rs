mod address;
mod client;
mod message;

pub use address::DeviceAddress;
pub use client::FrameSource;
pub use message::{classify, decode_frame, Inbound};

use crate::frame::FrameData;
use serde::Serialize;
use std::fmt;
use std::time::SystemTime;

/// Read access to the live device stream
pub trait FrameProvider: Send + Sync {
    /// True only while a handshake-confirmed connection is live
    fn is_connected(&self) -> bool;

    /// Latest decoded frame, `None` before the first frame or after a
    /// disconnect
    fn current_frame(&self) -> Option<FrameData>;
}

/// Connection lifecycle of the frame source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Listening,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Listening => "listening",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot of connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub connected: bool,
    pub state: ConnectionState,
    pub frames_received: u64,
    pub last_frame_at: Option<SystemTime>,
    pub current_url: Option<String>,
    /// Completed rounds over every address variant without a connection
    pub retry_count: u32,
}
