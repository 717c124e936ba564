//! Simulated Hardware
//!
//! Headless stand-ins for the DMX line and the audio output. They keep no
//! real time (a simulated line returns immediately) and record everything,
//! so engine behavior can be checked without a Raspberry Pi or a sound card.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::debug;

use sequenzer_dmx::{decode_pulses, LineLevel, Pulse};

use crate::error::PlatformError;
use crate::traits::{extension_of, AudioBackend, CompletionCallback, Framing, LineDriver};

/// How many transmitted frames a recorder keeps
const RECORDED_FRAMES: usize = 64;

enum Recorded {
    Pulses(Vec<Pulse>),
    Packet(Vec<u8>),
}

#[derive(Default)]
struct RecorderState {
    frames: Mutex<VecDeque<Recorded>>,
    frame_count: AtomicU64,
    pending_failures: AtomicU32,
    enabled: Mutex<Option<bool>>,
    enable_writes: AtomicU64,
}

/// Inspection handle for a [`SimulatedLine`]; clone it before handing the
/// line to the transmitter
#[derive(Clone, Default)]
pub struct LineRecorder {
    state: Arc<RecorderState>,
}

impl LineRecorder {
    /// Number of frames transmitted successfully
    pub fn frame_count(&self) -> u64 {
        self.state.frame_count.load(Ordering::SeqCst)
    }

    /// Pulse train of the most recent frame, if it was sent as pulses
    pub fn last_frame(&self) -> Option<Vec<Pulse>> {
        match self.state.frames.lock().back() {
            Some(Recorded::Pulses(pulses)) => Some(pulses.clone()),
            _ => None,
        }
    }

    /// Wire bytes (start code first) of the most recent frame
    pub fn last_bytes(&self) -> Option<Vec<u8>> {
        match self.state.frames.lock().back() {
            Some(Recorded::Pulses(pulses)) => decode_pulses(pulses).ok(),
            Some(Recorded::Packet(bytes)) => Some(bytes.clone()),
            None => None,
        }
    }

    /// Last value written to the enable line
    pub fn enabled(&self) -> Option<bool> {
        *self.state.enabled.lock()
    }

    /// How many times the enable line was written
    pub fn enable_writes(&self) -> u64 {
        self.state.enable_writes.load(Ordering::SeqCst)
    }

    /// Make the next `count` frames fail with a write error
    pub fn fail_next(&self, count: u32) {
        self.state.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Block until at least `count` frames have gone out, or `timeout` passes
    pub fn wait_for_frames(&self, count: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.frame_count() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        self.frame_count() >= count
    }

    fn take_failure(&self) -> bool {
        self.state
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn record(&self, frame: Recorded) {
        let mut frames = self.state.frames.lock();
        if frames.len() == RECORDED_FRAMES {
            frames.pop_front();
        }
        frames.push_back(frame);
        self.state.frame_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// A line driver that records frames instead of toggling a pin
pub struct SimulatedLine {
    recorder: LineRecorder,
    framing: Framing,
    pending: Vec<Pulse>,
}

impl SimulatedLine {
    /// A bit-banged line that records pulse trains
    pub fn new() -> Self {
        Self {
            recorder: LineRecorder::default(),
            framing: Framing::Pulses,
            pending: Vec::new(),
        }
    }

    /// A UART-style line that records byte packets
    pub fn packet() -> Self {
        Self {
            framing: Framing::Packet,
            ..Self::new()
        }
    }

    pub fn recorder(&self) -> LineRecorder {
        self.recorder.clone()
    }
}

impl Default for SimulatedLine {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDriver for SimulatedLine {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn framing(&self) -> Framing {
        self.framing
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), PlatformError> {
        *self.recorder.state.enabled.lock() = Some(enabled);
        self.recorder.state.enable_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn drive(&mut self, level: LineLevel, duration: Duration) -> Result<(), PlatformError> {
        if self.pending.is_empty() && self.recorder.take_failure() {
            return Err(PlatformError::LineWriteFailed(
                "simulated write failure".into(),
            ));
        }
        self.pending
            .push(Pulse::new(level, duration.as_micros() as u32));
        Ok(())
    }

    fn idle(&mut self) -> Result<(), PlatformError> {
        if !self.pending.is_empty() {
            let frame = std::mem::take(&mut self.pending);
            self.recorder.record(Recorded::Pulses(frame));
        }
        Ok(())
    }

    fn transmit(&mut self, pulses: &[Pulse]) -> Result<(), PlatformError> {
        self.pending.clear();
        for pulse in pulses {
            if let Err(e) =
                self.drive(pulse.level, Duration::from_micros(pulse.duration_us as u64))
            {
                self.pending.clear();
                return Err(e);
            }
        }
        self.idle()
    }

    fn transmit_packet(
        &mut self,
        _break_us: u32,
        _mark_after_break_us: u32,
        packet: &[u8],
    ) -> Result<(), PlatformError> {
        if self.framing != Framing::Packet {
            return Err(PlatformError::FeatureNotAvailable(
                "simulated pulse line does not take byte packets".into(),
            ));
        }
        if self.recorder.take_failure() {
            return Err(PlatformError::LineWriteFailed(
                "simulated write failure".into(),
            ));
        }
        self.recorder.record(Recorded::Packet(packet.to_vec()));
        Ok(())
    }
}

struct ActivePlayback {
    id: u64,
    stop: Sender<()>,
}

#[derive(Default)]
struct SimAudioState {
    active: Mutex<Option<ActivePlayback>>,
    next_id: AtomicU64,
    played: Mutex<Vec<(PathBuf, f32)>>,
}

/// An audio backend that "plays" every clip for a fixed duration
///
/// Playback runs on its own thread so completion is reported asynchronously,
/// the same way a real device callback would.
#[derive(Clone)]
pub struct SimulatedAudio {
    clip_duration: Duration,
    state: Arc<SimAudioState>,
}

impl SimulatedAudio {
    pub fn new(clip_duration: Duration) -> Self {
        Self {
            clip_duration,
            state: Arc::new(SimAudioState::default()),
        }
    }

    /// Every (path, volume) pair passed to `play`, in order
    pub fn played(&self) -> Vec<(PathBuf, f32)> {
        self.state.played.lock().clone()
    }
}

impl Default for SimulatedAudio {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

impl AudioBackend for SimulatedAudio {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn supports(&self, path: &Path) -> bool {
        matches!(
            extension_of(path).as_deref(),
            Some("wav" | "flac" | "mp3" | "ogg")
        )
    }

    fn play(
        &self,
        path: &Path,
        volume: f32,
        on_complete: CompletionCallback,
    ) -> Result<(), PlatformError> {
        self.stop();

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        *self.state.active.lock() = Some(ActivePlayback { id, stop: stop_tx });
        self.state.played.lock().push((path.to_path_buf(), volume));

        let state = Arc::clone(&self.state);
        let duration = self.clip_duration;
        let name = path.display().to_string();

        thread::Builder::new()
            .name("sequenzer-sim-audio".into())
            .spawn(move || {
                match stop_rx.recv_timeout(duration) {
                    Err(RecvTimeoutError::Timeout) => debug!("Simulated clip finished: {}", name),
                    _ => debug!("Simulated clip stopped: {}", name),
                }
                {
                    let mut active = state.active.lock();
                    if active.as_ref().map(|a| a.id) == Some(id) {
                        *active = None;
                    }
                }
                on_complete();
            })
            .map_err(|e| PlatformError::AudioDevice(e.to_string()))?;

        Ok(())
    }

    fn stop(&self) {
        if let Some(active) = self.state.active.lock().take() {
            let _ = active.stop.try_send(());
        }
    }

    fn is_playing(&self) -> bool {
        self.state.active.lock().is_some()
    }
}
