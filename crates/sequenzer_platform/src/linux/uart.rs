//! UART line driver
//!
//! Sends DMX through a serial port wired to an RS-485 transceiver. The UART
//! produces the bit timing itself: the port runs raw at 250 kbit/s with
//! 8 data bits, no parity and 2 stop bits, so every slot is written as a
//! plain byte. BREAK and MARK-AFTER-BREAK come from the break ioctls.
//!
//! 250000 is not one of the classic termios rates, so the port is set up
//! through `termios2` with `BOTHER`.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use sequenzer_dmx::{LineLevel, BAUD_RATE};

use super::gpio::GpioPin;
use super::hold;
use crate::error::PlatformError;
use crate::traits::{Framing, LineDriver, SerialConfig};

/// DMX line driver on a serial port
pub struct UartLine {
    port: File,
    path: PathBuf,
    control: Option<GpioPin>,
    control_active_low: bool,
    in_break: bool,
}

impl UartLine {
    /// Open and configure the port, and park the control pin released
    pub fn open(config: SerialConfig) -> Result<Self, PlatformError> {
        let port = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&config.port)
            .map_err(|e| serial_error(&config.port, e))?;
        configure(port.as_raw_fd(), config.baud_rate)
            .map_err(|e| serial_error(&config.port, e))?;

        if config.baud_rate != BAUD_RATE {
            warn!(
                "Serial port runs at {} baud; DMX512 receivers expect {}",
                config.baud_rate, BAUD_RATE
            );
        }

        let control = config.control_pin.map(GpioPin::open_output).transpose()?;
        let mut line = Self {
            port,
            path: config.port.clone(),
            control,
            control_active_low: config.control_active_low,
            // Forces the first set_break(false) to reach the driver
            in_break: true,
        };
        line.idle()?;
        line.set_enabled(false)?;

        info!(
            "UART DMX line ready - port: {}, baud: {}, control: {:?}",
            config.port.display(),
            config.baud_rate,
            config.control_pin
        );
        Ok(line)
    }

    fn set_break(&mut self, on: bool) -> Result<(), PlatformError> {
        if self.in_break == on {
            return Ok(());
        }
        let request = if on { libc::TIOCSBRK } else { libc::TIOCCBRK };
        // SAFETY: the descriptor is owned by `self.port`; neither request
        // takes an argument
        if unsafe { libc::ioctl(self.port.as_raw_fd(), request) } < 0 {
            return Err(serial_error(&self.path, io::Error::last_os_error()));
        }
        self.in_break = on;
        Ok(())
    }

    /// Block until everything written so far has left the shift register
    fn drain(&self) -> Result<(), PlatformError> {
        // SAFETY: the descriptor is owned by `self.port`
        if unsafe { libc::tcdrain(self.port.as_raw_fd()) } < 0 {
            return Err(serial_error(&self.path, io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl LineDriver for UartLine {
    fn name(&self) -> &'static str {
        "uart"
    }

    fn framing(&self) -> Framing {
        Framing::Packet
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), PlatformError> {
        let active_low = self.control_active_low;
        match self.control.as_mut() {
            Some(pin) => pin.write(enabled != active_low),
            None => Ok(()),
        }
    }

    fn drive(&mut self, level: LineLevel, duration: Duration) -> Result<(), PlatformError> {
        let start = Instant::now();
        self.set_break(level == LineLevel::Low)?;
        hold(start, duration);
        Ok(())
    }

    fn idle(&mut self) -> Result<(), PlatformError> {
        self.set_break(false)
    }

    fn transmit_packet(
        &mut self,
        break_us: u32,
        mark_after_break_us: u32,
        packet: &[u8],
    ) -> Result<(), PlatformError> {
        // The previous frame must be fully on the wire before the next BREAK
        self.drain()?;
        self.drive(LineLevel::Low, Duration::from_micros(break_us as u64))?;
        self.drive(
            LineLevel::High,
            Duration::from_micros(mark_after_break_us as u64),
        )?;
        self.port
            .write_all(packet)
            .map_err(|e| serial_error(&self.path, e))
    }
}

/// Raw 8N2 at an arbitrary baud rate
fn configure(fd: RawFd, baud_rate: u32) -> io::Result<()> {
    // SAFETY: termios2 is plain data and TCGETS2 fills every field
    let mut tio: libc::termios2 = unsafe { std::mem::zeroed() };
    if unsafe { libc::ioctl(fd, libc::TCGETS2, &mut tio as *mut libc::termios2) } < 0 {
        return Err(io::Error::last_os_error());
    }

    tio.c_iflag = 0;
    tio.c_oflag = 0;
    tio.c_lflag = 0;
    tio.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::CBAUD | libc::CRTSCTS);
    tio.c_cflag |= libc::CS8 | libc::CSTOPB | libc::CLOCAL | libc::BOTHER;
    tio.c_ispeed = baud_rate;
    tio.c_ospeed = baud_rate;

    // SAFETY: `tio` is a valid termios2 for the duration of the call
    if unsafe { libc::ioctl(fd, libc::TCSETS2, &tio as *const libc::termios2) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn serial_error(port: &Path, e: io::Error) -> PlatformError {
    PlatformError::Serial {
        port: port.display().to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires a UART wired to an RS-485 transceiver"]
    fn test_open_default_port() {
        let mut line = UartLine::open(SerialConfig::default()).unwrap();
        line.set_enabled(true).unwrap();
        let mut packet = vec![0u8; 513];
        packet[1] = 255;
        line.transmit_packet(100, 12, &packet).unwrap();
        line.set_enabled(false).unwrap();
    }

    #[test]
    fn test_missing_port_is_a_serial_error() {
        let result = UartLine::open(SerialConfig {
            port: PathBuf::from("/dev/does-not-exist-sequenzer"),
            control_pin: None,
            ..SerialConfig::default()
        });
        match result {
            Err(PlatformError::Serial { port, .. }) => {
                assert_eq!(port, "/dev/does-not-exist-sequenzer")
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }

    #[test]
    fn test_regular_file_is_not_a_tty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = UartLine::open(SerialConfig {
            port: file.path().to_path_buf(),
            control_pin: None,
            ..SerialConfig::default()
        });
        assert!(matches!(result, Err(PlatformError::Serial { .. })));
    }
}
