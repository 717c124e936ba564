//! Persistent Settings Management
//!
//! Handles saving/loading the hardware and engine settings to disk.
//!
//! # Storage Locations
//! - Linux: `~/.config/sequenzer/settings.json`
//! - Windows: `%APPDATA%\sequenzer\settings.json`
//! - macOS: `~/Library/Application Support/com.sequenzer.sequenzer/settings.json`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use sequenzer_dmx::DmxTiming;
use sequenzer_platform::{GpioConfig, SerialConfig};

use crate::config::{AudioConfig, EngineConfig, ScriptLimits};
use crate::error::{EngineError, EngineResult};

/// Which line driver carries the universe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmxOutput {
    /// UART into an RS-485 transceiver
    #[default]
    Serial,
    /// Bit-banged sysfs GPIO
    Gpio,
}

/// Root settings structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenzerSettings {
    pub dmx_output: DmxOutput,
    pub serial_port: PathBuf,
    pub baud_rate: u32,
    /// BCM pin switching the transceiver into transmit for the UART line
    pub control_pin: Option<u32>,
    /// BCM pin driving the RS-485 transceiver's data input
    pub data_pin: u32,
    /// BCM pin for the transceiver's driver enable, if wired
    pub enable_pin: Option<u32>,
    pub sounds_directory: PathBuf,
    pub refresh_hz: f32,
    pub break_us: u32,
    pub mark_after_break_us: u32,
    pub slot_count: usize,
    pub max_script_bytes: usize,
    pub compile_timeout_ms: u64,
    /// Default log filter for the `sequenzer` crates; `RUST_LOG` overrides it
    pub log_level: String,
}

impl Default for SequenzerSettings {
    fn default() -> Self {
        let timing = DmxTiming::default();
        let gpio = GpioConfig::default();
        let serial = SerialConfig::default();
        Self {
            dmx_output: DmxOutput::default(),
            serial_port: serial.port,
            baud_rate: serial.baud_rate,
            control_pin: serial.control_pin,
            data_pin: gpio.data_pin,
            enable_pin: gpio.enable_pin,
            sounds_directory: PathBuf::from("sounds"),
            refresh_hz: timing.refresh_hz,
            break_us: timing.break_us,
            mark_after_break_us: timing.mark_after_break_us,
            slot_count: timing.slot_count,
            max_script_bytes: ScriptLimits::default().max_source_bytes,
            compile_timeout_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl SequenzerSettings {
    /// Load settings from disk, or return default if missing/corrupt
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match Self::load_from(&path) {
                    Ok(settings) => {
                        info!("Settings loaded from {:?}", path);
                        return settings;
                    }
                    Err(e) => error!("Failed to load settings file: {}", e),
                }
            }
        }

        info!("Using default settings");
        Self::default()
    }

    /// Load settings from a specific file; errors are returned, not masked
    pub fn load_from(path: &Path) -> EngineResult<Self> {
        let file = fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Save settings to the platform config directory
    pub fn save(&self) -> EngineResult<()> {
        let path = Self::config_path()
            .ok_or_else(|| EngineError::Config("Could not determine config path".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;

        info!("Settings saved to {:?}", path);
        Ok(())
    }

    /// Get the platform-specific configuration file path
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "sequenzer", "sequenzer")
            .map(|proj| proj.config_dir().join("settings.json"))
    }

    /// Engine configuration described by these settings
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            dmx: DmxTiming {
                refresh_hz: self.refresh_hz,
                break_us: self.break_us,
                mark_after_break_us: self.mark_after_break_us,
                slot_count: self.slot_count,
                ..defaults.dmx
            },
            script: ScriptLimits {
                max_source_bytes: self.max_script_bytes,
                compile_timeout: Duration::from_millis(self.compile_timeout_ms),
                ..defaults.script
            },
            audio: AudioConfig {
                sounds_dir: self.sounds_directory.clone(),
                ..defaults.audio
            },
            ..defaults
        }
    }

    /// GPIO wiring described by these settings
    pub fn gpio_config(&self) -> GpioConfig {
        GpioConfig {
            data_pin: self.data_pin,
            enable_pin: self.enable_pin,
            ..GpioConfig::default()
        }
    }

    /// Serial wiring described by these settings
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            port: self.serial_port.clone(),
            baud_rate: self.baud_rate,
            control_pin: self.control_pin,
            ..SerialConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = SequenzerSettings::default();
        assert_eq!(settings.dmx_output, DmxOutput::Serial);
        assert_eq!(settings.serial_port, PathBuf::from("/dev/ttyS0"));
        assert_eq!(settings.baud_rate, 250_000);
        assert_eq!(settings.control_pin, Some(17));
        assert_eq!(settings.data_pin, 18);
        assert_eq!(settings.enable_pin, Some(22));
        assert_eq!(settings.sounds_directory, PathBuf::from("sounds"));
        assert_eq!(settings.refresh_hz, 40.0);
        assert_eq!(settings.break_us, 100);
        assert_eq!(settings.mark_after_break_us, 12);
        assert_eq!(settings.slot_count, 512);
        assert_eq!(settings.max_script_bytes, 65536);
        assert_eq!(settings.compile_timeout_ms, 1000);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_defaults_match_engine_defaults() {
        let config = SequenzerSettings::default().engine_config();
        assert_eq!(config, EngineConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = SequenzerSettings {
            dmx_output: DmxOutput::Gpio,
            serial_port: PathBuf::from("/dev/ttyAMA0"),
            data_pin: 12,
            enable_pin: None,
            refresh_hz: 30.0,
            log_level: "debug".into(),
            ..Default::default()
        };
        settings.save_to(&path).unwrap();

        let loaded = SequenzerSettings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.gpio_config().enable_pin, None);
        assert_eq!(loaded.serial_config().port, PathBuf::from("/dev/ttyAMA0"));
        assert_eq!(loaded.engine_config().dmx.refresh_hz, 30.0);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "data_pin": 4, "sounds_directory": "/srv/sounds" }"#).unwrap();

        let settings = SequenzerSettings::load_from(&path).unwrap();
        assert_eq!(settings.data_pin, 4);
        assert_eq!(settings.enable_pin, Some(22));
        assert_eq!(
            settings.engine_config().audio.sounds_dir,
            PathBuf::from("/srv/sounds")
        );
    }

    #[test]
    fn test_load_from_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            SequenzerSettings::load_from(&missing),
            Err(EngineError::Io(_))
        ));

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{ not json").unwrap();
        assert!(matches!(
            SequenzerSettings::load_from(&corrupt),
            Err(EngineError::Serialization(_))
        ));
    }

    #[test]
    fn test_invalid_timing_is_caught_by_validation() {
        let settings = SequenzerSettings {
            break_us: 50,
            ..Default::default()
        };
        assert!(settings.engine_config().validate().is_err());
    }

    #[test]
    fn test_output_selection_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "dmx_output": "gpio", "serial_port": "/dev/ttyUSB0", "control_pin": null }"#,
        )
        .unwrap();

        let settings = SequenzerSettings::load_from(&path).unwrap();
        assert_eq!(settings.dmx_output, DmxOutput::Gpio);
        let serial = settings.serial_config();
        assert_eq!(serial.port, PathBuf::from("/dev/ttyUSB0"));
        assert_eq!(serial.baud_rate, 250_000);
        assert_eq!(serial.control_pin, None);

        fs::write(&path, r#"{ "dmx_output": "spi" }"#).unwrap();
        assert!(matches!(
            SequenzerSettings::load_from(&path),
            Err(EngineError::Serialization(_))
        ));
    }

    #[test]
    fn test_degenerate_refresh_rate_is_rejected() {
        let settings = SequenzerSettings {
            refresh_hz: 1e-20,
            ..Default::default()
        };
        assert!(settings.engine_config().validate().is_err());
    }
}
