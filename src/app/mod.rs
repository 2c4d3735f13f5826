mod recorder;
mod runtime;
mod shutdown;
mod startup;
mod types;


pub use recorder::RecorderApp;
pub use types::{AppOptions, ComponentState, ShutdownReason};
