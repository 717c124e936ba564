//! Linux DMX Line Drivers
//!
//! Two ways of getting a universe onto an RS-485 transceiver:
//!
//! | Driver          | Wiring                        | Timing                     |
//! |-----------------|-------------------------------|----------------------------|
//! | `UartLine`      | serial port TX, control pin   | UART hardware, 8N2         |
//! | `SysfsGpioLine` | data pin, enable pin          | bit-banged, jitters        |
//!
//! Both hold BREAK and MAB by spinning on a monotonic clock, because
//! `thread::sleep` cannot resolve microseconds.

mod gpio;
mod uart;

use std::time::{Duration, Instant};

pub use gpio::SysfsGpioLine;
pub use uart::UartLine;

/// Spin until `duration` has passed since `start`
#[inline]
fn hold(start: Instant, duration: Duration) {
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}
