//! Message Types for Thread Communication
//!
//! Commands flow from the control surface -> DMX transmitter thread
//! Events flow from the session and transmitter threads -> caller

use serde::{Deserialize, Serialize};

use sequenzer_dmx::DmxTiming;

use crate::status::{ErrorReport, LifecycleState, Mode, SessionId};

/// Commands sent to the DMX transmitter thread
#[derive(Debug, Clone)]
pub enum TransmitterCommand {
    /// Replace the frame timing from the next frame on
    UpdateTiming(DmxTiming),

    /// Send a final blackout frame and exit
    Shutdown,
}

/// Events published by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// A session claimed the engine
    SessionStarted {
        session_id: SessionId,
        script_name: String,
        mode: Mode,
    },

    /// A loop-mode pass ran to the end of the script
    IterationCompleted { session_id: SessionId, iteration: u64 },

    /// A session reached a terminal state
    SessionFinished {
        session_id: SessionId,
        state: LifecycleState,
        error: Option<ErrorReport>,
    },

    /// The line driver started failing; frames are being dropped
    TransmitterDegraded { message: String },

    /// Frames are going out again
    TransmitterRecovered { failed_frames: u64 },
}
