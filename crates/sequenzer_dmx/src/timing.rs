//! DMX512 Physical-Layer Timing
//!
//! A DMX512 packet on the wire looks like this:
//!
//! ```text
//!  idle   BREAK (>=88µs)  MAB (>=8µs)  start code   slot 1   ...   slot N   idle
//! ──────┐               ┌───────────┐ ┌─┐ ┌──┐   ┌─┐ ┌──┐        ┌─┐ ┌───────────
//!       └───────────────┘           └─┘ └─┘  └───┘ └─┘  └── ... ──┘ └─┘
//! ```
//!
//! Every slot is 11 bit-times at 250 kbit/s: one start bit (low), eight data
//! bits LSB first, and two stop bits (high).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DmxError;
use crate::frame::DMX_CHANNELS;

/// Line bit rate in bits per second
pub const BAUD_RATE: u32 = 250_000;

/// Duration of one bit at 250 kbit/s
pub const BIT_TIME_US: u32 = 4;

/// Start bit + 8 data bits + 2 stop bits
pub const BITS_PER_SLOT: u32 = 11;

/// Duration of one slot on the wire
pub const SLOT_TIME_US: u32 = BIT_TIME_US * BITS_PER_SLOT;

/// Shortest BREAK a receiver is required to accept
pub const MIN_BREAK_US: u32 = 88;

/// Shortest MARK-AFTER-BREAK a receiver is required to accept
pub const MIN_MARK_AFTER_BREAK_US: u32 = 8;

/// Slowest refresh accepted; receivers drop the universe after about a second
pub const MIN_REFRESH_HZ: f32 = 1.0;

/// Fastest refresh accepted
pub const MAX_REFRESH_HZ: f32 = 1000.0;

/// Timing budget for frame generation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DmxTiming {
    /// Frames per second (default 40Hz, one frame every 25ms)
    pub refresh_hz: f32,

    /// BREAK length in microseconds (line held low)
    pub break_us: u32,

    /// MARK-AFTER-BREAK length in microseconds (line held high)
    pub mark_after_break_us: u32,

    /// Number of data slots sent after the start code (1-512)
    pub slot_count: usize,

    /// Extra idle time inserted after each slot's stop bits
    #[serde(default)]
    pub mark_between_slots_us: u32,
}

impl Default for DmxTiming {
    fn default() -> Self {
        Self {
            refresh_hz: 40.0,
            break_us: 100,
            mark_after_break_us: 12,
            slot_count: DMX_CHANNELS,
            mark_between_slots_us: 0,
        }
    }
}

impl DmxTiming {
    /// Time between the start of two consecutive frames
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_hz as f64)
    }

    /// Time the line is busy with one frame (break through last stop bit)
    pub fn frame_duration_us(&self) -> u64 {
        let per_slot = SLOT_TIME_US as u64 + self.mark_between_slots_us as u64;
        // +1 for the start code
        self.break_us as u64
            + self.mark_after_break_us as u64
            + (self.slot_count as u64 + 1) * per_slot
    }

    /// Check the timing against the DMX512 minimums and the refresh period
    pub fn validate(&self) -> Result<(), DmxError> {
        if !(MIN_REFRESH_HZ..=MAX_REFRESH_HZ).contains(&self.refresh_hz) {
            return Err(DmxError::InvalidRefreshRate(self.refresh_hz));
        }
        if self.break_us < MIN_BREAK_US {
            return Err(DmxError::BreakTooShort(self.break_us));
        }
        if self.mark_after_break_us < MIN_MARK_AFTER_BREAK_US {
            return Err(DmxError::MarkAfterBreakTooShort(self.mark_after_break_us));
        }
        if self.slot_count == 0 || self.slot_count > DMX_CHANNELS {
            return Err(DmxError::InvalidSlotCount(self.slot_count));
        }

        let frame_us = self.frame_duration_us();
        let period_us = self.period().as_micros() as u64;
        if frame_us > period_us {
            return Err(DmxError::FrameTooLong {
                frame_us,
                period_us,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_is_valid() {
        let timing = DmxTiming::default();
        assert!(timing.validate().is_ok());
        assert_eq!(timing.period(), Duration::from_millis(25));
    }

    #[test]
    fn test_slot_time_matches_baud_rate() {
        assert_eq!(1_000_000 / BAUD_RATE, BIT_TIME_US);
        assert_eq!(SLOT_TIME_US, 44);
    }

    #[test]
    fn test_full_universe_frame_duration() {
        let timing = DmxTiming::default();
        // 100 + 12 + 513 * 44
        assert_eq!(timing.frame_duration_us(), 22_684);
    }

    #[test]
    fn test_rejects_short_break_and_mab() {
        let short_break = DmxTiming {
            break_us: 80,
            ..Default::default()
        };
        assert_eq!(short_break.validate(), Err(DmxError::BreakTooShort(80)));

        let short_mab = DmxTiming {
            mark_after_break_us: 4,
            ..Default::default()
        };
        assert_eq!(
            short_mab.validate(),
            Err(DmxError::MarkAfterBreakTooShort(4))
        );
    }

    #[test]
    fn test_rejects_bad_slot_count_and_rate() {
        let no_slots = DmxTiming {
            slot_count: 0,
            ..Default::default()
        };
        assert!(no_slots.validate().is_err());

        let too_many = DmxTiming {
            slot_count: 513,
            ..Default::default()
        };
        assert!(too_many.validate().is_err());

        let zero_rate = DmxTiming {
            refresh_hz: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            zero_rate.validate(),
            Err(DmxError::InvalidRefreshRate(_))
        ));
    }

    #[test]
    fn test_extreme_values_are_errors() {
        let glacial = DmxTiming {
            refresh_hz: 1e-20,
            ..Default::default()
        };
        assert_eq!(glacial.validate(), Err(DmxError::InvalidRefreshRate(1e-20)));

        let nan = DmxTiming {
            refresh_hz: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(nan.validate(), Err(DmxError::InvalidRefreshRate(_))));

        let huge_gap = DmxTiming {
            mark_between_slots_us: u32::MAX,
            ..Default::default()
        };
        assert_eq!(
            huge_gap.frame_duration_us(),
            100 + 12 + 513 * (44 + u32::MAX as u64)
        );
        assert!(matches!(
            huge_gap.validate(),
            Err(DmxError::FrameTooLong { .. })
        ));
    }

    #[test]
    fn test_frame_must_fit_period() {
        // A full universe takes ~22.7ms, which does not fit in 20ms (50Hz)
        let fast = DmxTiming {
            refresh_hz: 50.0,
            ..Default::default()
        };
        assert!(matches!(
            fast.validate(),
            Err(DmxError::FrameTooLong { .. })
        ));

        // Fewer slots make 50Hz possible
        let short_universe = DmxTiming {
            refresh_hz: 50.0,
            slot_count: 64,
            ..Default::default()
        };
        assert!(short_universe.validate().is_ok());
    }

    #[test]
    fn test_timing_deserializes_without_optional_fields() {
        let json = r#"{"refresh_hz":30.0,"break_us":120,"mark_after_break_us":16,"slot_count":24}"#;
        let timing: DmxTiming = serde_json::from_str(json).unwrap();
        assert_eq!(timing.mark_between_slots_us, 0);
        assert_eq!(timing.slot_count, 24);
    }
}
