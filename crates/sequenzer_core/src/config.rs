//! Engine Configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sequenzer_dmx::DmxTiming;

use crate::error::{EngineError, EngineResult};

/// Limits applied while compiling a script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptLimits {
    /// Largest accepted source text in bytes
    pub max_source_bytes: usize,

    /// Compilation is abandoned after this long
    pub compile_timeout: Duration,

    /// Deepest allowed nesting of loops or parenthesised expressions
    pub max_nesting_depth: usize,

    /// Longest statically known `range()` accepted
    pub max_range_len: u64,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: 64 * 1024,
            compile_timeout: Duration::from_secs(1),
            max_nesting_depth: 32,
            max_range_len: 1_000_000,
        }
    }
}

/// Audio asset location and wait behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Directory `play_sound` names are resolved against
    pub sounds_dir: PathBuf,

    /// How often `wait_for_sound` re-checks the backend when no
    /// completion signal arrives
    pub wait_poll_interval: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sounds_dir: PathBuf::from("sounds"),
            wait_poll_interval: Duration::from_millis(50),
        }
    }
}

/// Overall engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// DMX output timing
    pub dmx: DmxTiming,

    /// Script compilation limits
    pub script: ScriptLimits,

    /// Audio playback
    pub audio: AudioConfig,

    /// How long `stop()` waits for the session to acknowledge
    pub stop_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dmx: DmxTiming::default(),
            script: ScriptLimits::default(),
            audio: AudioConfig::default(),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

impl EngineConfig {
    /// Create config with the fastest refresh a full universe allows
    pub fn low_latency() -> Self {
        Self {
            dmx: DmxTiming {
                refresh_hz: 44.0, // 22.7ms period, full frame is 22.684ms
                ..Default::default()
            },
            audio: AudioConfig {
                wait_poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
            stop_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    /// Create config for long cable runs and slow receivers
    pub fn conservative() -> Self {
        Self {
            dmx: DmxTiming {
                refresh_hz: 30.0,
                break_us: 176,
                mark_after_break_us: 16,
                mark_between_slots_us: 4,
                ..Default::default()
            },
            audio: AudioConfig {
                wait_poll_interval: Duration::from_millis(100),
                ..Default::default()
            },
            stop_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> EngineResult<()> {
        self.dmx.validate()?;

        if self.script.max_source_bytes == 0 {
            return Err(EngineError::Config("max_source_bytes must be positive".into()));
        }
        if self.script.max_nesting_depth == 0 {
            return Err(EngineError::Config("max_nesting_depth must be positive".into()));
        }
        if self.script.compile_timeout.is_zero() {
            return Err(EngineError::Config("compile_timeout must be positive".into()));
        }
        if self.audio.wait_poll_interval.is_zero() {
            return Err(EngineError::Config(
                "wait_poll_interval must be positive".into(),
            ));
        }
        if self.stop_timeout.is_zero() {
            return Err(EngineError::Config("stop_timeout must be positive".into()));
        }
        Ok(())
    }
}
