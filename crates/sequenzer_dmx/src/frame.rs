//! DMX512 Frame Model
//!
//! A frame is the start code followed by one byte per channel. Channels are
//! addressed 1-512 in the public API; index 0 of the slot array is channel 1.

use std::fmt;

use crate::error::DmxError;

/// Number of addressable channels in one DMX universe
pub const DMX_CHANNELS: usize = 512;

/// Start code for dimmer/level data ("null start code")
pub const START_CODE: u8 = 0x00;

/// One complete, consistent universe snapshot
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    start_code: u8,
    slots: [u8; DMX_CHANNELS],
}

impl Frame {
    /// An all-zero (blackout) frame with the null start code
    pub fn new() -> Self {
        Self {
            start_code: START_CODE,
            slots: [0; DMX_CHANNELS],
        }
    }

    /// Build a frame from a full slot array
    pub fn from_slots(slots: [u8; DMX_CHANNELS]) -> Self {
        Self {
            start_code: START_CODE,
            slots,
        }
    }

    pub fn start_code(&self) -> u8 {
        self.start_code
    }

    pub fn slots(&self) -> &[u8; DMX_CHANNELS] {
        &self.slots
    }

    /// Value of a channel (1-based), `None` outside 1-512
    pub fn get(&self, address: usize) -> Option<u8> {
        slot_index(address).ok().map(|i| self.slots[i])
    }

    /// Set a channel (1-based)
    pub fn set(&mut self, address: usize, value: u8) -> Result<(), DmxError> {
        let index = slot_index(address)?;
        self.slots[index] = value;
        Ok(())
    }

    /// Whether every channel is zero
    pub fn is_blackout(&self) -> bool {
        self.slots.iter().all(|&v| v == 0)
    }

    /// Bytes as they go on the wire: start code, then the first `slot_count` channels
    pub fn wire_bytes(&self, slot_count: usize) -> impl Iterator<Item = u8> + '_ {
        let count = slot_count.min(DMX_CHANNELS);
        std::iter::once(self.start_code).chain(self.slots[..count].iter().copied())
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Frame {
    // 512 mostly-zero bytes are useless in logs; show only lit channels
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lit: Vec<(usize, u8)> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0)
            .map(|(i, &v)| (i + 1, v))
            .collect();
        f.debug_struct("Frame")
            .field("start_code", &self.start_code)
            .field("lit", &lit)
            .finish()
    }
}

/// Convert a 1-based channel address into an index into the slot array
pub(crate) fn slot_index(address: usize) -> Result<usize, DmxError> {
    if (1..=DMX_CHANNELS).contains(&address) {
        Ok(address - 1)
    } else {
        Err(DmxError::InvalidAddress(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frame_is_blackout() {
        let frame = Frame::new();
        assert!(frame.is_blackout());
        assert_eq!(frame.start_code(), START_CODE);
    }

    #[test]
    fn test_set_and_get_bounds() {
        let mut frame = Frame::new();
        frame.set(1, 255).unwrap();
        frame.set(512, 7).unwrap();

        assert_eq!(frame.get(1), Some(255));
        assert_eq!(frame.get(512), Some(7));
        assert_eq!(frame.slots()[0], 255);
        assert_eq!(frame.slots()[511], 7);

        assert_eq!(frame.set(0, 1), Err(DmxError::InvalidAddress(0)));
        assert_eq!(frame.set(513, 1), Err(DmxError::InvalidAddress(513)));
        assert_eq!(frame.get(0), None);
        assert_eq!(frame.get(513), None);
    }

    #[test]
    fn test_wire_bytes_truncates_to_slot_count() {
        let mut frame = Frame::new();
        frame.set(1, 10).unwrap();
        frame.set(2, 20).unwrap();
        frame.set(3, 30).unwrap();

        let bytes: Vec<u8> = frame.wire_bytes(2).collect();
        assert_eq!(bytes, vec![0x00, 10, 20]);

        assert_eq!(frame.wire_bytes(DMX_CHANNELS).count(), 513);
        assert_eq!(frame.wire_bytes(9999).count(), 513);
    }

    #[test]
    fn test_debug_lists_only_lit_channels() {
        let mut frame = Frame::new();
        frame.set(42, 128).unwrap();
        let debug = format!("{:?}", frame);
        assert!(debug.contains("(42, 128)"));
    }
}
