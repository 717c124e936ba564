//! Engine Error Types

use std::time::Duration;

use thiserror::Error;

use crate::script::ValidationError;

/// Errors returned by the engine's control surface
///
/// Faults inside a running script never show up here. They end the session
/// in `Failed` and are reported through the status snapshot instead.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("A session is already running - stop it first")]
    AlreadyRunning,

    #[error("Script rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("DMX error: {0}")]
    Dmx(#[from] sequenzer_dmx::DmxError),

    #[error("Platform error: {0}")]
    Platform(#[from] sequenzer_platform::PlatformError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    #[error("Session did not stop within {0:?}")]
    StopTimeout(Duration),

    #[error("Channel send error - receiver dropped")]
    ChannelSendError,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings format error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
