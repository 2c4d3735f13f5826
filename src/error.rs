use thiserror::Error;

#[derive(Error, Debug)]
pub enum EyecapError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Stage plan error: {0}")]
    StagePlan(#[from] StagePlanError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl EyecapError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Problems found while validating a stage plan. Stage numbers are 1-based.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StagePlanError {
    #[error("stage plan contains no stages")]
    Empty,

    #[error("stage {stage}: missing required field `{field}`")]
    MissingField { stage: usize, field: &'static str },

    #[error("stage {stage}: field `{field}` must be greater than 0 (got {value})")]
    NonPositive {
        stage: usize,
        field: &'static str,
        value: i64,
    },

    #[error("stage {stage}: field `{field}` must be at most {max} (got {value})")]
    TooLarge {
        stage: usize,
        field: &'static str,
        value: i64,
        max: i64,
    },

    #[error("stage {stage}: field `{field}` is invalid: {reason}")]
    InvalidField {
        stage: usize,
        field: &'static str,
        reason: String,
    },
}

impl StagePlanError {
    /// Name of the offending field, if the error concerns a single field
    pub fn field(&self) -> Option<&'static str> {
        match self {
            StagePlanError::Empty => None,
            StagePlanError::MissingField { field, .. }
            | StagePlanError::NonPositive { field, .. }
            | StagePlanError::TooLarge { field, .. }
            | StagePlanError::InvalidField { field, .. } => Some(field),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("no device address configured")]
    NoAddress,

    #[error("invalid device address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("handshake with {url} failed: {details}")]
    Handshake { url: String, details: String },

    #[error("connection to {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("gave up after {attempts} reconnect rounds")]
    RetriesExhausted { attempts: u32 },
}

#[derive(Error, Debug, Clone)]
pub enum DecodeError {
    #[error("image payload could not be decoded: {details}")]
    Image { details: String },

    #[error("base64 payload could not be decoded: {details}")]
    Base64 { details: String },

    #[error("implausible frame dimensions {width}x{height}")]
    Dimensions { width: u32, height: u32 },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreation {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {details}")]
    Write { path: String, details: String },

    #[error("stage index {index} out of range ({stages} stages)")]
    StageOutOfRange { index: usize, stages: usize },

    #[error("failed to write report {path}: {details}")]
    Report { path: String, details: String },

    #[error("failed to build archive {path}: {details}")]
    Archive { path: String, details: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("device is not connected")]
    DeviceNotConnected,

    #[error("a capture session is already running")]
    AlreadyRunning,
}

#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, EyecapError>;
