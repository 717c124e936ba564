//! Audio Player
//!
//! Resolves sound names against the sounds directory and drives a single
//! voice on the audio backend. Starting a sound stops the previous one.
//!
//! Completion is a channel whose sender lives inside the backend's
//! completion callback. When playback ends for any reason the callback runs,
//! the sender is dropped, and every clone of the handle observes the
//! disconnect.
//!
//! Backend calls are serialized by their own lock. The `current` slot is
//! only ever held for a clone or a swap, so status polling never waits on
//! a sound that is still being decoded or opened.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use sequenzer_platform::AudioBackend;

/// Why a sound could not be played
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssetError {
    #[error("Sound not found: {0}")]
    NotFound(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid sound name: {0} (must be a relative name inside the sounds directory)")]
    InvalidName(String),

    #[error("Playback failed: {0}")]
    Playback(String),
}

/// One in-flight playback
#[derive(Debug, Clone)]
pub struct AudioHandle {
    id: u64,
    name: String,
    volume: f32,
    done: Receiver<()>,
}

impl AudioHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Whether playback has ended (finished, stopped or replaced)
    pub fn is_finished(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block until playback ends or `timeout` passes; returns true if ended
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(self.done.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }

    /// Becomes disconnected when playback ends, for use in `select!`
    pub fn completion(&self) -> &Receiver<()> {
        &self.done
    }
}

/// Single-voice player on top of an [`AudioBackend`]
pub struct AudioPlayer {
    backend: Arc<dyn AudioBackend>,
    sounds_dir: PathBuf,
    /// Held across backend play/stop calls
    playback: Mutex<()>,
    current: Mutex<Option<AudioHandle>>,
    next_id: AtomicU64,
}

impl AudioPlayer {
    pub fn new(backend: Arc<dyn AudioBackend>, sounds_dir: impl Into<PathBuf>) -> Self {
        let sounds_dir = sounds_dir.into();
        info!(
            "Audio player using {} backend, sounds from {:?}",
            backend.name(),
            sounds_dir
        );
        Self {
            backend,
            sounds_dir,
            playback: Mutex::new(()),
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn sounds_dir(&self) -> &Path {
        &self.sounds_dir
    }

    /// Start `name` at `volume`, replacing whatever is playing.
    ///
    /// Volume is clamped to 0.0 - 1.0.
    pub fn play(&self, name: &str, volume: f32) -> Result<AudioHandle, AssetError> {
        let path = self.resolve(name)?;
        if !self.backend.supports(&path) {
            return Err(AssetError::UnsupportedFormat(name.to_string()));
        }
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };

        let _playback = self.playback.lock();
        let previous = self.current.lock().take();
        if previous.is_some() {
            self.backend.stop();
        }

        let (done_tx, done_rx) = bounded::<()>(0);
        self.backend
            .play(&path, volume, Box::new(move || drop(done_tx)))
            .map_err(|e| AssetError::Playback(e.to_string()))?;

        let handle = AudioHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            volume,
            done: done_rx,
        };
        debug!("Playing {} at volume {:.2}", name, volume);
        *self.current.lock() = Some(handle.clone());
        Ok(handle)
    }

    /// Stop `handle` if it is still the current sound
    pub fn stop(&self, handle: &AudioHandle) {
        let _playback = self.playback.lock();
        let is_current = {
            let mut current = self.current.lock();
            let matches = current.as_ref().map(|h| h.id) == Some(handle.id);
            if matches {
                *current = None;
            }
            matches
        };
        if is_current {
            self.backend.stop();
            debug!("Stopped {}", handle.name);
        }
    }

    /// Stop whatever is playing
    pub fn stop_current(&self) {
        let _playback = self.playback.lock();
        let previous = self.current.lock().take();
        if let Some(handle) = previous {
            self.backend.stop();
            debug!("Stopped {}", handle.name);
        }
    }

    pub fn is_playing(&self, handle: &AudioHandle) -> bool {
        !handle.is_finished()
    }

    /// The current sound, if it is still playing
    pub fn current(&self) -> Option<AudioHandle> {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(AudioHandle::is_finished) {
            *current = None;
        }
        current.clone()
    }

    /// Map a script-supplied name to a file inside the sounds directory
    pub fn resolve(&self, name: &str) -> Result<PathBuf, AssetError> {
        let relative = Path::new(name);
        let is_plain = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !is_plain {
            return Err(AssetError::InvalidName(name.to_string()));
        }

        let path = self.sounds_dir.join(relative);
        if !path.is_file() {
            return Err(AssetError::NotFound(name.to_string()));
        }
        Ok(path)
    }
}

impl std::fmt::Debug for AudioPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPlayer")
            .field("backend", &self.backend.name())
            .field("sounds_dir", &self.sounds_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequenzer_platform::SimulatedAudio;
    use std::fs;

    fn player_with(files: &[&str], clip: Duration) -> (AudioPlayer, SimulatedAudio, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            fs::write(dir.path().join(file), b"RIFF").unwrap();
        }
        let backend = SimulatedAudio::new(clip);
        let player = AudioPlayer::new(Arc::new(backend.clone()), dir.path());
        (player, backend, dir)
    }

    #[test]
    fn test_play_and_complete() {
        let (player, backend, _dir) = player_with(&["intro.wav"], Duration::from_millis(30));
        let handle = player.play("intro.wav", 0.8).unwrap();
        assert_eq!(handle.name(), "intro.wav");
        assert!(player.is_playing(&handle));

        assert!(handle.wait(Duration::from_secs(5)));
        assert!(!player.is_playing(&handle));
        assert!(player.current().is_none());
        assert_eq!(backend.played().len(), 1);
    }

    #[test]
    fn test_missing_and_unsupported_assets() {
        let (player, _backend, _dir) = player_with(&["notes.txt"], Duration::from_millis(10));
        assert_eq!(
            player.play("missing.wav", 1.0).unwrap_err(),
            AssetError::NotFound("missing.wav".into())
        );
        assert_eq!(
            player.play("notes.txt", 1.0).unwrap_err(),
            AssetError::UnsupportedFormat("notes.txt".into())
        );
    }

    #[test]
    fn test_names_cannot_escape_sounds_dir() {
        let (player, _backend, _dir) = player_with(&[], Duration::from_millis(10));
        for name in ["../secret.wav", "/etc/passwd", "", "a/../../b.wav"] {
            assert!(
                matches!(player.play(name, 1.0), Err(AssetError::InvalidName(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_new_sound_replaces_current() {
        let (player, _backend, _dir) = player_with(&["a.wav", "b.wav"], Duration::from_secs(10));
        let first = player.play("a.wav", 1.0).unwrap();
        let second = player.play("b.wav", 1.0).unwrap();

        assert!(first.wait(Duration::from_secs(5)));
        assert!(player.is_playing(&second));
        assert_eq!(player.current().unwrap().name(), "b.wav");

        // Stopping a stale handle leaves the current sound alone
        player.stop(&first);
        assert!(player.is_playing(&second));

        player.stop(&second);
        assert!(second.wait(Duration::from_secs(5)));
    }

    /// Backend that takes a while to start each sound
    struct SlowStart {
        delay: Duration,
        inner: SimulatedAudio,
    }

    impl AudioBackend for SlowStart {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn supports(&self, path: &Path) -> bool {
            self.inner.supports(path)
        }

        fn play(
            &self,
            path: &Path,
            volume: f32,
            on_complete: sequenzer_platform::CompletionCallback,
        ) -> Result<(), sequenzer_platform::PlatformError> {
            std::thread::sleep(self.delay);
            self.inner.play(path, volume, on_complete)
        }

        fn stop(&self) {
            self.inner.stop()
        }

        fn is_playing(&self) -> bool {
            self.inner.is_playing()
        }
    }

    #[test]
    fn test_current_does_not_wait_for_slow_start() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.wav"), b"RIFF").unwrap();
        let backend = SlowStart {
            delay: Duration::from_millis(500),
            inner: SimulatedAudio::new(Duration::from_secs(10)),
        };
        let player = Arc::new(AudioPlayer::new(Arc::new(backend), dir.path()));

        let starter = {
            let player = Arc::clone(&player);
            std::thread::spawn(move || player.play("a.wav", 1.0))
        };
        std::thread::sleep(Duration::from_millis(100));

        let started = std::time::Instant::now();
        assert!(player.current().is_none());
        assert!(started.elapsed() < Duration::from_millis(50));

        let handle = starter.join().unwrap().unwrap();
        assert_eq!(player.current().unwrap().name(), "a.wav");
        player.stop_current();
        assert!(handle.wait(Duration::from_secs(5)));
    }

    #[test]
    fn test_volume_is_clamped() {
        let (player, backend, _dir) = player_with(&["a.wav"], Duration::from_millis(10));
        let handle = player.play("a.wav", 3.0).unwrap();
        assert_eq!(handle.volume(), 1.0);
        player.play("a.wav", -1.0).unwrap();
        assert_eq!(backend.played()[1].1, 0.0);
    }
}
