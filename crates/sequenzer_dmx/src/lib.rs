//! Sequenzer DMX - DMX512 Protocol Module
//!
//! This crate provides everything needed to put a DMX512 universe on a wire:
//! - The shared `ChannelBuffer` written by scripts and read by the transmitter
//! - Consistent `Frame` snapshots of all 512 channels
//! - The physical-layer timing budget (BREAK, MAB, 250 kbit/s slots)
//! - Bit-level encoding of frames into line pulses for GPIO bit-banging
//!
//! # Architecture
//!
//! ```text
//!   script thread ──set()──▶ ChannelBuffer ──snapshot()──▶ FrameEncoder ──▶ [Pulse]
//!                          (one lock per frame)           (no allocation)
//! ```

mod encoder;
mod error;
mod frame;
mod timing;
mod universe;

pub use encoder::{decode_pulses, total_duration_us, FrameEncoder, LineLevel, Pulse};
pub use error::DmxError;
pub use frame::{Frame, DMX_CHANNELS, START_CODE};
pub use timing::{
    DmxTiming, BAUD_RATE, BITS_PER_SLOT, BIT_TIME_US, MAX_REFRESH_HZ, MIN_BREAK_US,
    MIN_MARK_AFTER_BREAK_US, MIN_REFRESH_HZ, SLOT_TIME_US,
};
pub use universe::ChannelBuffer;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let buffer = ChannelBuffer::new();
        let mut encoder = FrameEncoder::new(DmxTiming::default()).unwrap();
        let pulses = encoder.encode(&buffer.snapshot());
        assert!(!pulses.is_empty());
    }
}
