//! Live Engine Status
//!
//! The session thread is the only writer of session state; any number of
//! callers may poll. Hot-path updates (instruction pointer, iteration count)
//! are plain atomics, and lifecycle transitions take a short write lock, so
//! `snapshot()` never waits on script execution.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Identifier of one execution session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Run once, or repeat until stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Single,
    Loop,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Single => write!(f, "single"),
            Mode::Loop => write!(f, "loop"),
        }
    }
}

/// Session lifecycle
///
/// ```text
/// Idle ─▶ Validating ─▶ Running ─┬─▶ Completed
///              │          ▲  │   ├─▶ Stopped
///              │          └──┘   └─▶ Failed
///              └──────────────────────▶ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Validating,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl LifecycleState {
    /// Validating or running
    pub fn is_active(self) -> bool {
        matches!(self, LifecycleState::Validating | LifecycleState::Running)
    }

    /// Completed, stopped or failed
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::Completed | LifecycleState::Stopped | LifecycleState::Failed
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Validating => "validating",
            LifecycleState::Running => "running",
            LifecycleState::Completed => "completed",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Category of a recorded error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected before execution
    Validation,
    /// Bad dynamic value or evaluation error while running
    Runtime,
    /// Missing or unplayable sound
    Asset,
    /// Output hardware failure
    Hardware,
}

/// Last error of a session, as shown to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    /// Script line the error points at, when known
    pub line: Option<usize>,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
        }
    }
}

/// DMX transmitter health
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DmxHealth {
    pub frames_sent: u64,
    pub failed_frames: u64,
    pub degraded: bool,
    pub last_error: Option<String>,
}

/// Point-in-time copy of the engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub session_id: Option<SessionId>,
    pub script_name: Option<String>,
    pub mode: Option<Mode>,
    pub iteration_count: u64,
    pub elapsed_seconds: f64,
    pub lifecycle_state: LifecycleState,
    pub last_error: Option<ErrorReport>,
    pub instruction_pointer: Option<usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub sound_playing: bool,
    pub current_sound: Option<String>,
    pub dmx: DmxHealth,
}

/// Health edge reported by the transmitter bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub enum HealthChange {
    Degraded(String),
    Recovered { failed_frames: u64 },
}

#[derive(Debug)]
struct SessionState {
    session_id: Option<SessionId>,
    script_name: Option<String>,
    mode: Option<Mode>,
    lifecycle: LifecycleState,
    last_error: Option<ErrorReport>,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    /// Set at the terminal transition
    final_elapsed: Option<f64>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session_id: None,
            script_name: None,
            mode: None,
            lifecycle: LifecycleState::Idle,
            last_error: None,
            started_at: None,
            started: None,
            final_elapsed: None,
        }
    }
}

const NO_INSTRUCTION: usize = usize::MAX;

/// Holds the latest engine state for external polling
#[derive(Debug)]
pub struct StatusReporter {
    session: RwLock<SessionState>,
    instruction_pointer: AtomicUsize,
    iterations: AtomicU64,
    dmx: RwLock<DmxHealth>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self {
            session: RwLock::new(SessionState::default()),
            instruction_pointer: AtomicUsize::new(NO_INSTRUCTION),
            iterations: AtomicU64::new(0),
            dmx: RwLock::new(DmxHealth::default()),
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.session.read().lifecycle
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.read().session_id
    }

    /// A script was submitted and is being compiled
    pub fn begin_validation(&self, script_name: &str, mode: Mode) {
        let mut session = self.session.write();
        *session = SessionState {
            script_name: Some(script_name.to_string()),
            mode: Some(mode),
            lifecycle: LifecycleState::Validating,
            ..Default::default()
        };
        self.reset_counters();
    }

    /// Compilation failed; there is no session to run
    pub fn fail_validation(&self, error: ErrorReport) {
        let mut session = self.session.write();
        session.lifecycle = LifecycleState::Failed;
        session.last_error = Some(error);
        session.final_elapsed = Some(0.0);
    }

    /// A session claimed the engine and starts running
    pub fn begin_session(&self, id: SessionId, script_name: &str, mode: Mode) {
        let mut session = self.session.write();
        *session = SessionState {
            session_id: Some(id),
            script_name: Some(script_name.to_string()),
            mode: Some(mode),
            lifecycle: LifecycleState::Running,
            started_at: Some(Utc::now()),
            started: Some(Instant::now()),
            ..Default::default()
        };
        self.reset_counters();
    }

    /// Run `f` only while `id` is still the current session.
    ///
    /// `begin_session` cannot take over until `f` returns, so a finishing
    /// session never resets outputs that a newer one already owns.
    pub fn while_current(&self, id: SessionId, f: impl FnOnce()) -> bool {
        let session = self.session.read();
        if session.session_id != Some(id) {
            return false;
        }
        f();
        true
    }

    #[inline]
    pub fn set_instruction(&self, ip: usize) {
        self.instruction_pointer.store(ip, Ordering::Relaxed);
    }

    /// Count one finished loop pass; returns the new total
    pub fn complete_iteration(&self) -> u64 {
        self.iterations.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Move session `id` to a terminal state.
    ///
    /// Returns false (and changes nothing) if that session is no longer the
    /// current one or has already finished, so a session ends exactly once.
    pub fn finish(&self, id: SessionId, state: LifecycleState, error: Option<ErrorReport>) -> bool {
        let mut session = self.session.write();
        if session.session_id != Some(id) || !session.lifecycle.is_active() {
            return false;
        }
        session.lifecycle = state;
        session.last_error = error;
        session.final_elapsed = Some(
            session
                .started
                .map(|s| s.elapsed().as_secs_f64())
                .unwrap_or(0.0),
        );
        self.instruction_pointer.store(NO_INSTRUCTION, Ordering::Relaxed);
        true
    }

    /// Record a successfully transmitted frame
    pub fn record_frame_ok(&self) -> Option<HealthChange> {
        let mut dmx = self.dmx.write();
        dmx.frames_sent += 1;
        if dmx.degraded {
            dmx.degraded = false;
            return Some(HealthChange::Recovered {
                failed_frames: dmx.failed_frames,
            });
        }
        None
    }

    /// Record a frame the line driver could not emit
    pub fn record_frame_failed(&self, message: String) -> Option<HealthChange> {
        let mut dmx = self.dmx.write();
        dmx.failed_frames += 1;
        dmx.last_error = Some(message.clone());
        if !dmx.degraded {
            dmx.degraded = true;
            return Some(HealthChange::Degraded(message));
        }
        None
    }

    pub fn dmx_health(&self) -> DmxHealth {
        self.dmx.read().clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let session = self.session.read();
        let elapsed_seconds = match (session.final_elapsed, session.started) {
            (Some(done), _) => done,
            (None, Some(started)) => started.elapsed().as_secs_f64(),
            (None, None) => 0.0,
        };
        let ip = self.instruction_pointer.load(Ordering::Relaxed);

        StatusSnapshot {
            session_id: session.session_id,
            script_name: session.script_name.clone(),
            mode: session.mode,
            iteration_count: self.iterations.load(Ordering::SeqCst),
            elapsed_seconds,
            lifecycle_state: session.lifecycle,
            last_error: session.last_error.clone(),
            instruction_pointer: (ip != NO_INSTRUCTION && session.lifecycle.is_active())
                .then_some(ip),
            started_at: session.started_at,
            sound_playing: false,
            current_sound: None,
            dmx: self.dmx_health(),
        }
    }

    fn reset_counters(&self) {
        self.instruction_pointer.store(NO_INSTRUCTION, Ordering::Relaxed);
        self.iterations.store(0, Ordering::SeqCst);
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_initial_snapshot_is_idle() {
        let status = StatusReporter::new();
        let snapshot = status.snapshot();
        assert_eq!(snapshot.lifecycle_state, LifecycleState::Idle);
        assert_eq!(snapshot.session_id, None);
        assert_eq!(snapshot.iteration_count, 0);
        assert_eq!(snapshot.elapsed_seconds, 0.0);
        assert_eq!(snapshot.instruction_pointer, None);
    }

    #[test]
    fn test_session_lifecycle() {
        let status = StatusReporter::new();
        let id = SessionId(1);
        status.begin_session(id, "show", Mode::Loop);
        status.set_instruction(3);
        assert_eq!(status.complete_iteration(), 1);
        assert_eq!(status.complete_iteration(), 2);

        let running = status.snapshot();
        assert_eq!(running.lifecycle_state, LifecycleState::Running);
        assert_eq!(running.instruction_pointer, Some(3));
        assert_eq!(running.iteration_count, 2);
        assert!(running.started_at.is_some());

        assert!(status.finish(id, LifecycleState::Stopped, None));
        let stopped = status.snapshot();
        assert_eq!(stopped.lifecycle_state, LifecycleState::Stopped);
        assert_eq!(stopped.instruction_pointer, None);
        assert_eq!(stopped.iteration_count, 2);
    }

    #[test]
    fn test_finish_happens_once() {
        let status = StatusReporter::new();
        let id = SessionId(7);
        status.begin_session(id, "show", Mode::Single);
        assert!(status.finish(id, LifecycleState::Stopped, None));
        assert!(!status.finish(id, LifecycleState::Failed, None));
        assert_eq!(status.lifecycle(), LifecycleState::Stopped);

        // A stale session cannot touch a newer one
        status.begin_session(SessionId(8), "next", Mode::Single);
        assert!(!status.finish(id, LifecycleState::Completed, None));
        assert_eq!(status.lifecycle(), LifecycleState::Running);
    }

    #[test]
    fn test_while_current_holds_off_next_session() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        let status = Arc::new(StatusReporter::new());
        let old = SessionId(3);
        status.begin_session(old, "old", Mode::Single);

        let took_over = Arc::new(AtomicBool::new(false));
        let mut next = None;
        let ran = status.while_current(old, || {
            let status = Arc::clone(&status);
            let flag = Arc::clone(&took_over);
            next = Some(thread::spawn(move || {
                status.begin_session(SessionId(4), "new", Mode::Single);
                flag.store(true, Ordering::SeqCst);
            }));
            thread::sleep(Duration::from_millis(50));
            assert!(!took_over.load(Ordering::SeqCst));
        });
        assert!(ran);

        next.unwrap().join().unwrap();
        assert!(took_over.load(Ordering::SeqCst));
        assert_eq!(status.session_id(), Some(SessionId(4)));
        assert!(!status.while_current(old, || panic!("stale session ran")));
    }

    #[test]
    fn test_elapsed_freezes_at_finish() {
        let status = StatusReporter::new();
        let id = SessionId(2);
        status.begin_session(id, "show", Mode::Single);
        thread::sleep(Duration::from_millis(20));
        status.finish(id, LifecycleState::Completed, None);

        let first = status.snapshot().elapsed_seconds;
        assert!(first >= 0.02);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(status.snapshot().elapsed_seconds, first);
    }

    #[test]
    fn test_validation_failure() {
        let status = StatusReporter::new();
        status.begin_validation("broken", Mode::Single);
        assert_eq!(status.lifecycle(), LifecycleState::Validating);

        status.fail_validation(ErrorReport::new(ErrorKind::Validation, "bad", Some(2)));
        let snapshot = status.snapshot();
        assert_eq!(snapshot.lifecycle_state, LifecycleState::Failed);
        assert_eq!(snapshot.last_error.unwrap().kind, ErrorKind::Validation);
    }

    #[test]
    fn test_health_transitions_reported_once() {
        let status = StatusReporter::new();
        assert_eq!(status.record_frame_ok(), None);
        assert!(matches!(
            status.record_frame_failed("gpio".into()),
            Some(HealthChange::Degraded(_))
        ));
        assert_eq!(status.record_frame_failed("gpio".into()), None);
        assert_eq!(
            status.record_frame_ok(),
            Some(HealthChange::Recovered { failed_frames: 2 })
        );

        let health = status.dmx_health();
        assert_eq!(health.frames_sent, 2);
        assert_eq!(health.failed_frames, 2);
        assert!(!health.degraded);
        assert_eq!(health.last_error.as_deref(), Some("gpio"));
    }

    #[test]
    fn test_snapshot_serialization() {
        let status = StatusReporter::new();
        status.begin_session(SessionId(3), "show", Mode::Loop);
        let json = serde_json::to_string(&status.snapshot()).unwrap();
        assert!(json.contains("\"lifecycle_state\":\"running\""));
        assert!(json.contains("\"mode\":\"loop\""));

        let back: StatusSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, Some(SessionId(3)));
    }
}
