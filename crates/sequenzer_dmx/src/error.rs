//! DMX Error Types

use thiserror::Error;

/// Errors that can occur while building, encoding or decoding DMX frames
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DmxError {
    #[error("Invalid channel address: {0} (must be 1-512)")]
    InvalidAddress(usize),

    #[error("Break of {0}µs is shorter than the 88µs minimum")]
    BreakTooShort(u32),

    #[error("Mark-after-break of {0}µs is shorter than the 8µs minimum")]
    MarkAfterBreakTooShort(u32),

    #[error("Invalid slot count: {0} (must be 1-512)")]
    InvalidSlotCount(usize),

    #[error("Invalid refresh rate: {0}Hz")]
    InvalidRefreshRate(f32),

    #[error("Frame takes {frame_us}µs but the refresh period is only {period_us}µs")]
    FrameTooLong { frame_us: u64, period_us: u64 },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}
