//! Sequenzer Platform - Hardware Boundary
//!
//! This crate provides the outside-world half of the engine:
//! - A GPIO-like line that DMX frames are bit-banged onto
//! - A single-voice audio output with completion callbacks
//! - Simulated versions of both for headless runs and tests
//!
//! # Platform Support
//!
//! | Platform | DMX line                | Audio                      |
//! |----------|-------------------------|----------------------------|
//! | Linux    | UART or sysfs GPIO      | cpal (`cpal` feature)      |
//! | Others   | Simulated only          | cpal (`cpal` feature)      |
//!
//! # Architecture
//!
//! The engine only ever sees `Box<dyn LineDriver>` and `Arc<dyn AudioBackend>`,
//! so real hardware and the simulators are interchangeable.

mod error;
mod sim;
mod traits;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(feature = "cpal")]
pub mod cpal_output;

pub use error::PlatformError;
pub use sim::{LineRecorder, SimulatedAudio, SimulatedLine};
pub use traits::{
    extension_of, AudioBackend, CompletionCallback, Framing, GpioConfig, LineDriver, SerialConfig,
};

/// Open a UART-driven DMX line
pub fn serial_line(config: SerialConfig) -> Result<Box<dyn LineDriver>, PlatformError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::UartLine::open(config)?))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = config;
        Err(PlatformError::UnsupportedPlatform)
    }
}

/// Open a bit-banged GPIO DMX line
pub fn gpio_line(config: GpioConfig) -> Result<Box<dyn LineDriver>, PlatformError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::SysfsGpioLine::open(config)?))
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = config;
        Err(PlatformError::UnsupportedPlatform)
    }
}

/// Open the default audio output
pub fn default_audio_backend() -> Result<Box<dyn AudioBackend>, PlatformError> {
    #[cfg(feature = "cpal")]
    {
        Ok(Box::new(cpal_output::CpalAudio::new()?))
    }

    #[cfg(not(feature = "cpal"))]
    {
        Err(PlatformError::FeatureNotAvailable(
            "audio output (build with the `cpal` feature)".into(),
        ))
    }
}

/// Check if this build can drive a real DMX line (UART or GPIO)
pub fn supports_gpio() -> bool {
    cfg!(target_os = "linux")
}
