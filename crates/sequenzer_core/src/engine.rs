//! Sequencer - Main Entry Point
//!
//! The `Sequencer` owns the DMX universe, the audio player and the one
//! execution session slot. It lives on the caller's thread; scripts run on
//! a dedicated session thread and the DMX output on its own free-running
//! thread.
//!
//! # Architecture
//!
//! ```text
//!   caller ── start()/stop()/status() ──▶ Sequencer
//!                                            │
//!              ┌─────────────────────────────┼──────────────────────────┐
//!              ▼                             ▼                          ▼
//!      "sequenzer-session"            ChannelBuffer              "sequenzer-dmx"
//!      interpreter + SessionHost ──set()──▶ [u8; 512] ──snapshot()──▶ encoder ─▶ line
//!              │
//!              └── play/stop/wait ──▶ AudioPlayer ──▶ AudioBackend
//! ```
//!
//! Every session exit path (completion, stop, fault, panic) runs through a
//! drop guard that stops audio, zeroes all channels and records the
//! terminal state exactly once.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use sequenzer_dmx::{ChannelBuffer, DmxTiming};
use sequenzer_platform::{AudioBackend, LineDriver, SimulatedAudio, SimulatedLine};

use crate::audio::{AudioHandle, AudioPlayer};
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::message::Event;
use crate::script::{
    self, Cancelled, CompiledScript, FaultKind, Interrupt, RuntimeFault, ScriptHost,
    ValidationError,
};
use crate::status::{
    ErrorKind, ErrorReport, LifecycleState, Mode, SessionId, StatusReporter, StatusSnapshot,
};
use crate::transmitter::DmxTransmitter;

/// Events beyond this many unread ones are dropped
const EVENT_CAPACITY: usize = 256;

struct ActiveSession {
    id: SessionId,
    cancel: CancelToken,
    thread: JoinHandle<()>,
    /// Disconnects once the session's cleanup has run
    done: Receiver<()>,
}

impl ActiveSession {
    fn is_finished(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    fn join(self) {
        if self.thread.join().is_err() {
            error!(session_id = %self.id, "Session thread panicked outside the interpreter");
        }
    }
}

/// The sequence execution engine
pub struct Sequencer {
    config: EngineConfig,
    channels: Arc<ChannelBuffer>,
    audio: Arc<AudioPlayer>,
    status: Arc<StatusReporter>,
    event_sender: Sender<Event>,
    event_receiver: Receiver<Event>,
    session: Mutex<Option<ActiveSession>>,
    next_session_id: AtomicU64,
    transmitter: DmxTransmitter,
}

impl Sequencer {
    /// Create an engine driving `line` and playing through `audio`.
    ///
    /// The DMX transmitter starts immediately and sends all-zero frames
    /// until a script writes something.
    pub fn new(
        config: EngineConfig,
        line: Box<dyn LineDriver>,
        audio: Arc<dyn AudioBackend>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let channels = Arc::new(ChannelBuffer::new());
        let status = Arc::new(StatusReporter::new());
        let (event_sender, event_receiver) = bounded::<Event>(EVENT_CAPACITY);

        let transmitter = DmxTransmitter::spawn(
            line,
            Arc::clone(&channels),
            config.dmx,
            Arc::clone(&status),
            event_sender.clone(),
        )?;
        let audio = Arc::new(AudioPlayer::new(audio, config.audio.sounds_dir.clone()));

        info!(
            line = transmitter.driver_name(),
            refresh_hz = config.dmx.refresh_hz,
            "Sequencer ready"
        );

        Ok(Self {
            config,
            channels,
            audio,
            status,
            event_sender,
            event_receiver,
            session: Mutex::new(None),
            next_session_id: AtomicU64::new(1),
            transmitter,
        })
    }

    /// Create an engine with simulated line and audio, for headless use
    pub fn simulated(config: EngineConfig) -> EngineResult<Self> {
        Self::new(
            config,
            Box::new(SimulatedLine::new()),
            Arc::new(SimulatedAudio::default()),
        )
    }

    /// Validate and compile a script without running it
    pub fn compile(&self, name: &str, source: &str) -> Result<CompiledScript, ValidationError> {
        let script = script::compile(name, source, &self.config.script)?;
        for warning in script.warnings() {
            warn!(script = name, "{}", warning);
        }
        Ok(script)
    }

    /// Start running a compiled script.
    ///
    /// Returns as soon as the session thread is running. Fails with
    /// [`EngineError::AlreadyRunning`] while another session is active.
    pub fn start(&self, script: CompiledScript, mode: Mode) -> EngineResult<SessionId> {
        let mut slot = self.claim()?;
        self.launch(&mut slot, script, mode)
    }

    /// Compile `source` and start it, recording a validation failure in the
    /// status snapshot
    pub fn start_source(&self, name: &str, source: &str, mode: Mode) -> EngineResult<SessionId> {
        let mut slot = self.claim()?;
        self.status.begin_validation(name, mode);

        match self.compile(name, source) {
            Ok(script) => self.launch(&mut slot, script, mode),
            Err(e) => {
                warn!(script = name, "Script rejected: {}", e);
                self.status.fail_validation(ErrorReport::new(
                    ErrorKind::Validation,
                    e.to_string(),
                    Some(e.line),
                ));
                Err(e.into())
            }
        }
    }

    /// Stop the active session and wait for it to acknowledge.
    ///
    /// A no-op when nothing is running. If the session does not respond
    /// within the stop timeout its outputs are reset here and
    /// [`EngineError::StopTimeout`] is returned.
    pub fn stop(&self) -> EngineResult<()> {
        let mut slot = self.session.lock();
        let Some(active) = slot.as_ref() else {
            return Ok(());
        };

        if !active.is_finished() {
            info!(session_id = %active.id, "Stopping session");
        }
        active.cancel.cancel();

        let timeout = self.config.stop_timeout;
        if let Err(RecvTimeoutError::Timeout) = active.done.recv_timeout(timeout) {
            let id = active.id;
            error!(session_id = %id, "Session did not stop within {:?}", timeout);
            self.audio.stop_current();
            self.channels.clear();
            if self.status.finish(id, LifecycleState::Stopped, None) {
                self.publish(Event::SessionFinished {
                    session_id: id,
                    state: LifecycleState::Stopped,
                    error: None,
                });
            }
            // The thread is detached; its guard will find a newer session
            // or an already-finished one
            slot.take();
            return Err(EngineError::StopTimeout(timeout));
        }

        if let Some(active) = slot.take() {
            active.join();
        }
        Ok(())
    }

    /// Current status, without blocking on the session thread
    pub fn status(&self) -> StatusSnapshot {
        let mut snapshot = self.status.snapshot();
        if let Some(handle) = self.audio.current() {
            snapshot.sound_playing = true;
            snapshot.current_sound = Some(handle.name().to_string());
        }
        snapshot
    }

    /// Whether a session is validating or running
    pub fn is_running(&self) -> bool {
        self.status.lifecycle().is_active()
    }

    /// Get next event (non-blocking)
    pub fn poll_event(&self) -> Option<Event> {
        self.event_receiver.try_recv().ok()
    }

    /// Get next event, waiting up to `timeout`
    pub fn wait_event(&self, timeout: Duration) -> Option<Event> {
        self.event_receiver.recv_timeout(timeout).ok()
    }

    /// Change DMX frame timing on the running transmitter
    pub fn set_dmx_timing(&self, timing: DmxTiming) -> EngineResult<()> {
        self.transmitter.update_timing(timing)
    }

    pub fn channels(&self) -> &ChannelBuffer {
        &self.channels
    }

    pub fn audio(&self) -> &AudioPlayer {
        &self.audio
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Lock the session slot, failing if it holds a live session
    fn claim(&self) -> EngineResult<MutexGuard<'_, Option<ActiveSession>>> {
        let mut slot = self.session.lock();
        match slot.as_ref() {
            Some(active) if !active.is_finished() => return Err(EngineError::AlreadyRunning),
            _ => {}
        }
        if let Some(previous) = slot.take() {
            previous.join();
        }
        Ok(slot)
    }

    fn launch(
        &self,
        slot: &mut Option<ActiveSession>,
        script: CompiledScript,
        mode: Mode,
    ) -> EngineResult<SessionId> {
        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::SeqCst));
        let cancel = CancelToken::new();
        let (done_sender, done) = bounded::<()>(0);

        self.status.begin_session(id, script.name(), mode);
        self.publish(Event::SessionStarted {
            session_id: id,
            script_name: script.name().to_string(),
            mode,
        });
        info!(
            session_id = %id,
            script = script.name(),
            %mode,
            instructions = script.instruction_count(),
            "Session started"
        );

        let runner = SessionRunner {
            id,
            script,
            mode,
            channels: Arc::clone(&self.channels),
            audio: Arc::clone(&self.audio),
            status: Arc::clone(&self.status),
            events: self.event_sender.clone(),
            cancel: cancel.clone(),
            wait_poll_interval: self.config.audio.wait_poll_interval,
        };

        let spawned = thread::Builder::new()
            .name("sequenzer-session".into())
            .spawn(move || runner.run(done_sender));

        match spawned {
            Ok(thread) => {
                *slot = Some(ActiveSession {
                    id,
                    cancel,
                    thread,
                    done,
                });
                Ok(id)
            }
            Err(e) => {
                let message = format!("failed to spawn session thread: {}", e);
                self.status.finish(
                    id,
                    LifecycleState::Failed,
                    Some(ErrorReport::new(ErrorKind::Runtime, message, None)),
                );
                Err(EngineError::ThreadSpawn(e.to_string()))
            }
        }
    }

    fn publish(&self, event: Event) {
        if self.event_sender.try_send(event).is_err() {
            debug!("Event queue full, dropping event");
        }
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Session did not shut down cleanly: {}", e);
        }
    }
}

/// Everything a session thread needs, moved into it at spawn
struct SessionRunner {
    id: SessionId,
    script: CompiledScript,
    mode: Mode,
    channels: Arc<ChannelBuffer>,
    audio: Arc<AudioPlayer>,
    status: Arc<StatusReporter>,
    events: Sender<Event>,
    cancel: CancelToken,
    wait_poll_interval: Duration,
}

impl SessionRunner {
    fn run(self, done: Sender<()>) {
        let mut guard = SessionGuard {
            id: self.id,
            channels: Arc::clone(&self.channels),
            audio: Arc::clone(&self.audio),
            status: Arc::clone(&self.status),
            events: self.events.clone(),
            outcome: None,
            _done: done,
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute()));
        guard.outcome = Some(match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(session_id = %self.id, "Session panicked: {}", message);
                (
                    LifecycleState::Failed,
                    Some(ErrorReport::new(
                        ErrorKind::Runtime,
                        format!("internal error: {}", message),
                        None,
                    )),
                )
            }
        });
    }

    fn execute(&self) -> (LifecycleState, Option<ErrorReport>) {
        let mut host = SessionHost {
            runner: self,
            sound: None,
        };

        loop {
            match script::run(self.script.program(), &mut host) {
                Ok(()) => {}
                Err(Interrupt::Cancelled) => return (LifecycleState::Stopped, None),
                Err(Interrupt::Fault(fault)) => {
                    warn!(session_id = %self.id, script = self.script.name(), "Session failed: {}", fault);
                    return (LifecycleState::Failed, Some(fault_report(&fault)));
                }
            }

            if self.mode == Mode::Single {
                return (LifecycleState::Completed, None);
            }

            let iteration = self.status.complete_iteration();
            let _ = self.events.try_send(Event::IterationCompleted {
                session_id: self.id,
                iteration,
            });
            if self.cancel.is_cancelled() {
                return (LifecycleState::Stopped, None);
            }
        }
    }
}

/// Resets outputs and records the terminal state on every exit path
struct SessionGuard {
    id: SessionId,
    channels: Arc<ChannelBuffer>,
    audio: Arc<AudioPlayer>,
    status: Arc<StatusReporter>,
    events: Sender<Event>,
    outcome: Option<(LifecycleState, Option<ErrorReport>)>,
    // Dropped last, after cleanup, to release stop()
    _done: Sender<()>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let (state, error) = self.outcome.take().unwrap_or_else(|| {
            (
                LifecycleState::Failed,
                Some(ErrorReport::new(ErrorKind::Runtime, "session aborted", None)),
            )
        });

        // A newer session owns the outputs once the slot has moved on
        self.status.while_current(self.id, || {
            self.audio.stop_current();
            self.channels.clear();
        });

        if self.status.finish(self.id, state, error.clone()) {
            info!(session_id = %self.id, %state, "Session finished");
            let _ = self.events.try_send(Event::SessionFinished {
                session_id: self.id,
                state,
                error,
            });
        }
    }
}

/// The interpreter's view of the engine for one session
struct SessionHost<'a> {
    runner: &'a SessionRunner,
    sound: Option<AudioHandle>,
}

impl ScriptHost for SessionHost<'_> {
    fn write_dmx(&mut self, address: usize, value: u8) -> Result<(), FaultKind> {
        self.runner
            .channels
            .set(address, value)
            .map_err(|e| FaultKind::Hardware(e.to_string()))
    }

    fn sleep(&mut self, duration: Duration) -> Result<(), Cancelled> {
        if self.runner.cancel.wait(duration) {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    fn play_sound(&mut self, filename: &str, volume: f32) -> Result<(), FaultKind> {
        let handle = self.runner.audio.play(filename, volume)?;
        self.sound = Some(handle);
        Ok(())
    }

    fn wait_for_sound(&mut self) -> Result<(), Cancelled> {
        let Some(handle) = self.sound.as_ref() else {
            return Ok(());
        };
        let cancel = &self.runner.cancel;

        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            if handle.is_finished() {
                return Ok(());
            }
            select! {
                recv(handle.completion()) -> _ => return Ok(()),
                recv(cancel.receiver()) -> _ => return Err(Cancelled),
                default(self.runner.wait_poll_interval) => {}
            }
        }
    }

    fn stop_sound(&mut self) {
        if let Some(handle) = self.sound.take() {
            self.runner.audio.stop(&handle);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.runner.cancel.is_cancelled()
    }

    fn on_instruction(&mut self, ip: usize) {
        self.runner.status.set_instruction(ip);
    }
}

fn fault_report(fault: &RuntimeFault) -> ErrorReport {
    let kind = match fault.kind {
        FaultKind::Asset(_) => ErrorKind::Asset,
        FaultKind::Hardware(_) => ErrorKind::Hardware,
        _ => ErrorKind::Runtime,
    };
    ErrorReport::new(kind, fault.to_string(), Some(fault.line))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
