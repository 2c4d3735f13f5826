/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Why the recorder is shutting down
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
    /// Every stage finished and `exit_on_complete` is set
    SessionComplete,
}

/// Runtime switches that come from the command line rather than the
/// configuration file
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    pub keyboard: bool,
    pub auto_start: bool,
    pub exit_on_complete: bool,
    /// Ring the terminal bell on prompts and countdown ticks
    pub bell: bool,
}
