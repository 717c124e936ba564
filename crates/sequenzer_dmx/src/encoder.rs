//! Bit-Level Frame Encoding
//!
//! Turns a [`Frame`] into the sequence of line levels a GPIO pin has to hold,
//! as run-length `Pulse`s. Adjacent bits of the same level are merged, so a
//! driver toggles the pin only on real edges.
//!
//! # Real-time Safety
//!
//! `FrameEncoder::encode` reuses its pulse buffer. After construction it does
//! not allocate, so it can run on the transmitter thread every refresh tick.

use serde::{Deserialize, Serialize};

use crate::error::DmxError;
use crate::frame::Frame;
use crate::timing::{
    DmxTiming, BIT_TIME_US, MIN_BREAK_US, MIN_MARK_AFTER_BREAK_US, SLOT_TIME_US,
};

/// Logical line state. DMX idles at mark (high); BREAK and start bits are low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineLevel {
    Low,
    High,
}

/// Hold the line at `level` for `duration_us` microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub level: LineLevel,
    pub duration_us: u32,
}

impl Pulse {
    pub fn new(level: LineLevel, duration_us: u32) -> Self {
        Self { level, duration_us }
    }
}

/// Total time covered by a pulse train
pub fn total_duration_us(pulses: &[Pulse]) -> u64 {
    pulses.iter().map(|p| p.duration_us as u64).sum()
}

/// Encodes frames into pulse trains with a fixed timing budget
pub struct FrameEncoder {
    timing: DmxTiming,
    pulses: Vec<Pulse>,
}

impl FrameEncoder {
    /// Create an encoder; the timing is validated up front
    pub fn new(timing: DmxTiming) -> Result<Self, DmxError> {
        timing.validate()?;
        Ok(Self {
            timing,
            pulses: Vec::with_capacity(max_pulses(timing.slot_count)),
        })
    }

    pub fn timing(&self) -> &DmxTiming {
        &self.timing
    }

    /// Replace the timing budget.
    ///
    /// Note: This may allocate. Only call between frames.
    pub fn set_timing(&mut self, timing: DmxTiming) -> Result<(), DmxError> {
        timing.validate()?;
        let needed = max_pulses(timing.slot_count);
        if needed > self.pulses.capacity() {
            self.pulses.reserve(needed - self.pulses.len());
        }
        self.timing = timing;
        Ok(())
    }

    /// Encode one frame: BREAK, MAB, start code, data slots
    pub fn encode(&mut self, frame: &Frame) -> &[Pulse] {
        self.pulses.clear();
        self.push(LineLevel::Low, self.timing.break_us);
        self.push(LineLevel::High, self.timing.mark_after_break_us);

        for byte in frame.wire_bytes(self.timing.slot_count) {
            self.encode_slot(byte);
        }

        &self.pulses
    }

    /// Start bit, 8 data bits LSB first, 2 stop bits, optional inter-slot mark
    #[inline]
    fn encode_slot(&mut self, byte: u8) {
        self.push(LineLevel::Low, BIT_TIME_US);
        for bit in 0..8 {
            let level = if (byte >> bit) & 1 == 1 {
                LineLevel::High
            } else {
                LineLevel::Low
            };
            self.push(level, BIT_TIME_US);
        }
        self.push(
            LineLevel::High,
            (2 * BIT_TIME_US).saturating_add(self.timing.mark_between_slots_us),
        );
    }

    #[inline]
    fn push(&mut self, level: LineLevel, duration_us: u32) {
        if duration_us == 0 {
            return;
        }
        match self.pulses.last_mut() {
            Some(last) if last.level == level => {
                last.duration_us = last.duration_us.saturating_add(duration_us)
            }
            _ => self.pulses.push(Pulse::new(level, duration_us)),
        }
    }
}

/// Upper bound on pulses per frame: break + MAB + at most 10 edges per slot
fn max_pulses(slot_count: usize) -> usize {
    2 + (slot_count + 1) * 10
}

/// Recover the wire bytes (start code first) from a pulse train.
///
/// Bits are sampled at the middle of each bit-time, the way a UART receiver
/// does. Used to verify what a line driver actually emitted.
pub fn decode_pulses(pulses: &[Pulse]) -> Result<Vec<u8>, DmxError> {
    match pulses.first() {
        Some(p) if p.level == LineLevel::Low && p.duration_us >= MIN_BREAK_US => {}
        _ => return Err(DmxError::MalformedFrame("missing BREAK".into())),
    }
    match pulses.get(1) {
        Some(p) if p.level == LineLevel::High && p.duration_us >= MIN_MARK_AFTER_BREAK_US => {}
        _ => return Err(DmxError::MalformedFrame("missing mark-after-break".into())),
    }

    let body = &pulses[2..];
    let mut starts = Vec::with_capacity(body.len());
    let mut total = 0u64;
    for pulse in body {
        starts.push(total);
        total += pulse.duration_us as u64;
    }

    let level_at = |time: u64| -> LineLevel {
        let idx = starts.partition_point(|&s| s <= time);
        body[idx - 1].level
    };

    let mut bytes = Vec::new();
    let mut idx = 0;
    while idx < body.len() {
        let Some(offset) = body[idx..].iter().position(|p| p.level == LineLevel::Low) else {
            break;
        };
        let t0 = starts[idx + offset];
        if t0 + SLOT_TIME_US as u64 > total {
            return Err(DmxError::MalformedFrame(format!(
                "slot {} is truncated",
                bytes.len()
            )));
        }

        let sample = |bit: u32| level_at(t0 + (bit * BIT_TIME_US + BIT_TIME_US / 2) as u64);

        let mut byte = 0u8;
        for bit in 0..8 {
            if sample(bit + 1) == LineLevel::High {
                byte |= 1 << bit;
            }
        }
        if sample(9) != LineLevel::High || sample(10) != LineLevel::High {
            return Err(DmxError::MalformedFrame(format!(
                "slot {} has no stop bits",
                bytes.len()
            )));
        }
        bytes.push(byte);

        let next_slot = t0 + SLOT_TIME_US as u64;
        idx = starts.partition_point(|&s| s < next_slot);
    }

    if bytes.is_empty() {
        return Err(DmxError::MalformedFrame("no start code".into()));
    }
    Ok(bytes)
}
