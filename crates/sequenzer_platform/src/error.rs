//! Platform Error Types

use thiserror::Error;

/// Errors from hardware-facing operations
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Platform not supported")]
    UnsupportedPlatform,

    #[error("Feature not available in this build: {0}")]
    FeatureNotAvailable(String),

    #[error("GPIO error on pin {pin}: {message}")]
    Gpio { pin: u32, message: String },

    #[error("Serial port {port}: {message}")]
    Serial { port: String, message: String },

    #[error("Line write failed: {0}")]
    LineWriteFailed(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Failed to decode audio file: {0}")]
    Decode(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
