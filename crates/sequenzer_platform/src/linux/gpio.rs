//! sysfs GPIO line driver
//!
//! Bit-bangs DMX onto a GPIO pin through `/sys/class/gpio`.
//!
//! # Limitations
//!
//! A sysfs write costs a few microseconds by itself and the kernel may
//! preempt the transmitter thread mid-frame, so slot timing jitters. BREAK
//! and MAB are always held at least as long as requested. Receivers that
//! are strict about the 4µs bit time should use [`UartLine`](super::UartLine).

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use sequenzer_dmx::LineLevel;

use super::hold;
use crate::error::PlatformError;
use crate::traits::{GpioConfig, LineDriver};

const SYSFS_GPIO: &str = "/sys/class/gpio";

/// One exported output pin
pub(super) struct GpioPin {
    number: u32,
    value: File,
}

impl GpioPin {
    pub(super) fn open_output(number: u32) -> Result<Self, PlatformError> {
        let gpio_err = |e: std::io::Error| PlatformError::Gpio {
            pin: number,
            message: e.to_string(),
        };

        let pin_dir = PathBuf::from(SYSFS_GPIO).join(format!("gpio{}", number));
        if !pin_dir.exists() {
            fs::write(PathBuf::from(SYSFS_GPIO).join("export"), number.to_string())
                .map_err(gpio_err)?;
            // udev needs a moment to fix up permissions on the new node
            thread::sleep(Duration::from_millis(50));
        }
        fs::write(pin_dir.join("direction"), "out").map_err(gpio_err)?;

        let value = OpenOptions::new()
            .write(true)
            .open(pin_dir.join("value"))
            .map_err(gpio_err)?;

        debug!("GPIO {} exported as output", number);
        Ok(Self { number, value })
    }

    #[inline]
    pub(super) fn write(&mut self, high: bool) -> Result<(), PlatformError> {
        self.value
            .write_all(if high { b"1" } else { b"0" })
            .map_err(|e| PlatformError::Gpio {
                pin: self.number,
                message: e.to_string(),
            })
    }
}

/// DMX line driver on a Raspberry Pi style GPIO header
pub struct SysfsGpioLine {
    data: GpioPin,
    enable: Option<GpioPin>,
    enable_active_low: bool,
    level: Option<LineLevel>,
}

impl SysfsGpioLine {
    /// Export the configured pins and park the data line at mark
    pub fn open(config: GpioConfig) -> Result<Self, PlatformError> {
        let data = GpioPin::open_output(config.data_pin)?;
        let enable = config.enable_pin.map(GpioPin::open_output).transpose()?;

        let mut line = Self {
            data,
            enable,
            enable_active_low: config.enable_active_low,
            level: None,
        };
        line.idle()?;

        info!(
            "GPIO DMX line ready - data: GPIO{}, enable: {:?}",
            config.data_pin, config.enable_pin
        );
        Ok(line)
    }

    fn set_level(&mut self, level: LineLevel) -> Result<(), PlatformError> {
        if self.level != Some(level) {
            self.data.write(level == LineLevel::High)?;
            self.level = Some(level);
        }
        Ok(())
    }
}

impl LineDriver for SysfsGpioLine {
    fn name(&self) -> &'static str {
        "sysfs-gpio"
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), PlatformError> {
        let active_low = self.enable_active_low;
        match self.enable.as_mut() {
            Some(pin) => pin.write(enabled != active_low),
            None => Ok(()),
        }
    }

    fn drive(&mut self, level: LineLevel, duration: Duration) -> Result<(), PlatformError> {
        let start = Instant::now();
        self.set_level(level)?;
        hold(start, duration);
        Ok(())
    }

    fn idle(&mut self) -> Result<(), PlatformError> {
        self.set_level(LineLevel::High)
    }
}
