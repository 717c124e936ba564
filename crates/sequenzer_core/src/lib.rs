//! Sequenzer Core - Sequence Execution Engine
//!
//! This crate provides the engine that runs lighting and sound sequences:
//! - A sandboxed script compiler producing a flat instruction sequence
//! - An interpreter with cooperative cancellation at every suspension point
//! - A single-session scheduler with single and loop modes
//! - A free-running DMX512 transmitter fed from a shared channel buffer
//! - Single-voice audio coordination and a pollable status snapshot
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Caller Thread                          │
//! │   compile() / start() / stop() / status() ──▶ Sequencer     │
//! └─────────────────────────────────────────────────────────────┘
//!                │ CancelToken                    ▲ Event (crossbeam-channel)
//!                ▼                                │
//! ┌──────────────────────────────┐   ┌──────────────────────────┐
//! │       Session Thread         │   │     DMX Thread           │
//! │  Program ─▶ interpreter      │   │  snapshot ─▶ encode      │
//! │     │ write_dmx     │ audio  │   │      ─▶ LineDriver       │
//! │     ▼               ▼        │   └──────────────────────────┘
//! │  ChannelBuffer   AudioPlayer │                ▲
//! └──────│───────────────────────┘                │
//!        └──────────── one lock per frame ────────┘
//! ```

mod audio;
mod cancel;
mod config;
mod engine;
mod error;
mod message;
mod settings;
mod status;
mod transmitter;

pub mod script;

pub use audio::{AssetError, AudioHandle, AudioPlayer};
pub use cancel::CancelToken;
pub use config::{AudioConfig, EngineConfig, ScriptLimits};
pub use engine::Sequencer;
pub use error::{EngineError, EngineResult};
pub use message::{Event, TransmitterCommand};
pub use script::{compile, CompileWarning, CompiledScript, RuntimeFault, ValidationError};
pub use settings::{DmxOutput, SequenzerSettings};
pub use status::{
    DmxHealth, ErrorKind, ErrorReport, LifecycleState, Mode, SessionId, StatusSnapshot,
};
pub use transmitter::DmxTransmitter;

// Re-export DMX types for convenience
pub use sequenzer_dmx::{ChannelBuffer, DmxTiming, DMX_CHANNELS};
