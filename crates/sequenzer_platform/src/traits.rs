//! Hardware Boundary Traits
//!
//! Defines the interface the engine consumes from the outside world: a
//! GPIO-like line that can be held high or low for a duration, and an audio
//! output that plays one file at a time and reports when it is done.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sequenzer_dmx::{LineLevel, Pulse};

use crate::error::PlatformError;

/// Called exactly once when a playback ends, whether it finished, was
/// stopped, or was replaced by a newer playback
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Pin assignment for a bit-banged DMX output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioConfig {
    /// BCM number of the pin driving the transceiver's data input
    pub data_pin: u32,

    /// BCM number of the transceiver's driver-enable pin, if wired
    pub enable_pin: Option<u32>,

    /// Whether the enable pin asserts on low or high
    pub enable_active_low: bool,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            data_pin: 18,
            enable_pin: Some(22),
            enable_active_low: true,
        }
    }
}

/// Serial port and control pin for a UART-driven DMX output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// TTY device whose TX feeds the transceiver
    pub port: PathBuf,

    pub baud_rate: u32,

    /// BCM number of the transceiver's driver-enable pin, if wired
    pub control_pin: Option<u32>,

    /// Whether the control pin asserts on low or high
    pub control_active_low: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: PathBuf::from("/dev/ttyS0"),
            baud_rate: sequenzer_dmx::BAUD_RATE,
            control_pin: Some(17),
            control_active_low: false,
        }
    }
}

/// What a line driver wants to be handed each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Encoded line levels, for drivers that toggle a pin themselves
    Pulses,
    /// BREAK and MAB lengths plus the raw packet, for UART drivers
    Packet,
}

/// A single output line that DMX frames are sent on
///
/// Implementations must leave the line at mark (high) when idle, which is
/// the DMX512 rest state between frames.
pub trait LineDriver: Send {
    /// Get the name of this driver (e.g., "sysfs-gpio", "simulated")
    fn name(&self) -> &'static str;

    fn framing(&self) -> Framing {
        Framing::Pulses
    }

    /// Assert or release the transceiver's driver-enable line
    fn set_enabled(&mut self, _enabled: bool) -> Result<(), PlatformError> {
        Ok(())
    }

    /// Hold the line at `level` for `duration`
    fn drive(&mut self, level: LineLevel, duration: Duration) -> Result<(), PlatformError>;

    /// Return the line to mark
    fn idle(&mut self) -> Result<(), PlatformError>;

    /// Emit a full pulse train and return to idle
    fn transmit(&mut self, pulses: &[Pulse]) -> Result<(), PlatformError> {
        for pulse in pulses {
            self.drive(pulse.level, Duration::from_micros(pulse.duration_us as u64))?;
        }
        self.idle()
    }

    /// Send BREAK, MAB and `packet` (start code first). Only drivers that
    /// report [`Framing::Packet`] implement this.
    fn transmit_packet(
        &mut self,
        _break_us: u32,
        _mark_after_break_us: u32,
        _packet: &[u8],
    ) -> Result<(), PlatformError> {
        Err(PlatformError::FeatureNotAvailable(format!(
            "{} line does not take byte packets",
            self.name()
        )))
    }
}

/// Single-voice audio output
pub trait AudioBackend: Send + Sync {
    /// Get the name of this backend (e.g., "cpal", "simulated")
    fn name(&self) -> &'static str;

    /// Whether this backend can decode the given file
    fn supports(&self, path: &Path) -> bool;

    /// Start playing `path` at `volume` (0.0 - 1.0), replacing anything
    /// currently playing. `on_complete` fires when this playback ends.
    fn play(
        &self,
        path: &Path,
        volume: f32,
        on_complete: CompletionCallback,
    ) -> Result<(), PlatformError>;

    /// Stop the current playback, if any
    fn stop(&self);

    /// Whether something is currently playing
    fn is_playing(&self) -> bool;
}

/// Lower-cased file extension, for `supports()` implementations
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingLine {
        drives: usize,
        idles: usize,
    }

    impl LineDriver for CountingLine {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn drive(&mut self, _level: LineLevel, _duration: Duration) -> Result<(), PlatformError> {
            self.drives += 1;
            Ok(())
        }

        fn idle(&mut self) -> Result<(), PlatformError> {
            self.idles += 1;
            Ok(())
        }
    }

    #[test]
    fn test_default_transmit_drives_every_pulse_then_idles() {
        let mut line = CountingLine { drives: 0, idles: 0 };
        let pulses = [
            Pulse::new(LineLevel::Low, 100),
            Pulse::new(LineLevel::High, 12),
            Pulse::new(LineLevel::Low, 36),
        ];
        line.transmit(&pulses).unwrap();
        assert_eq!(line.drives, 3);
        assert_eq!(line.idles, 1);
        assert!(line.set_enabled(true).is_ok());
    }

    #[test]
    fn test_pulse_lines_reject_packets() {
        let mut line = CountingLine { drives: 0, idles: 0 };
        assert_eq!(line.framing(), Framing::Pulses);
        assert!(matches!(
            line.transmit_packet(100, 12, &[0, 255]),
            Err(PlatformError::FeatureNotAvailable(_))
        ));
        assert_eq!(line.drives, 0);
    }

    #[test]
    fn test_default_serial_config() {
        let config = SerialConfig::default();
        assert_eq!(config.port, PathBuf::from("/dev/ttyS0"));
        assert_eq!(config.baud_rate, 250_000);
        assert_eq!(config.control_pin, Some(17));
    }

    #[test]
    fn test_gpio_config_default_matches_wiring() {
        let config = GpioConfig::default();
        assert_eq!(config.data_pin, 18);
        assert_eq!(config.enable_pin, Some(22));
        assert!(config.enable_active_low);
    }

    #[test]
    fn test_gpio_config_serialization() {
        let config = GpioConfig {
            data_pin: 14,
            enable_pin: None,
            enable_active_low: false,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: GpioConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("intro.WAV")).as_deref(), Some("wav"));
        assert_eq!(extension_of(Path::new("noext")), None);
    }
}
