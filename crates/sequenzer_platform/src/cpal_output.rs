//! cpal Audio Output
//!
//! Plays WAV files on the default output device.
//!
//! ```text
//!   playback thread                         device callback
//!   hound decode ─▶ resample ─▶ ×volume ──rtrb──▶ pop() ─▶ speakers
//! ```
//!
//! Each playback owns its own thread and `cpal::Stream`, so a stream never
//! crosses threads. Stopping drops the control sender; the playback thread
//! sees the disconnect, tears the stream down and fires the completion
//! callback.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, error, info};

use crate::error::PlatformError;
use crate::traits::{extension_of, AudioBackend, CompletionCallback};

/// Ring buffer length in seconds of output audio
const RING_SECONDS: f32 = 0.25;

/// How often the feeder tops up the ring buffer
const FEED_INTERVAL: Duration = Duration::from_millis(10);

/// How long `play` waits for the device to come up
const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Decoded PCM, interleaved
struct Clip {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

struct ActivePlayback {
    id: u64,
    _stop: Sender<()>,
}

#[derive(Default)]
struct CpalState {
    active: Mutex<Option<ActivePlayback>>,
    next_id: AtomicU64,
}

/// Audio backend on the system's default output device
pub struct CpalAudio {
    state: Arc<CpalState>,
}

impl CpalAudio {
    /// Check that an output device exists
    pub fn new() -> Result<Self, PlatformError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlatformError::AudioDevice("no default output device".into()))?;
        info!(
            "Audio output device: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );
        Ok(Self {
            state: Arc::new(CpalState::default()),
        })
    }
}

impl AudioBackend for CpalAudio {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn supports(&self, path: &Path) -> bool {
        extension_of(path).as_deref() == Some("wav")
    }

    fn play(
        &self,
        path: &Path,
        volume: f32,
        on_complete: CompletionCallback,
    ) -> Result<(), PlatformError> {
        if !self.supports(path) {
            return Err(PlatformError::UnsupportedFormat(path.display().to_string()));
        }
        let clip = decode_wav(path)?;
        self.stop();

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), PlatformError>>(1);
        *self.state.active.lock() = Some(ActivePlayback { id, _stop: stop_tx });

        let state = Arc::clone(&self.state);
        let name = path.display().to_string();
        thread::Builder::new()
            .name("sequenzer-audio".into())
            .spawn(move || {
                run_playback(clip, volume, stop_rx, ready_tx);
                debug!("Playback ended: {}", name);
                {
                    let mut active = state.active.lock();
                    if active.as_ref().map(|a| a.id) == Some(id) {
                        *active = None;
                    }
                }
                on_complete();
            })
            .map_err(|e| PlatformError::AudioDevice(e.to_string()))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(PlatformError::AudioDevice(
                "timed out opening output stream".into(),
            )),
        }
    }

    fn stop(&self) {
        // Dropping the sender disconnects the playback thread's receiver
        self.state.active.lock().take();
    }

    fn is_playing(&self) -> bool {
        self.state.active.lock().is_some()
    }
}

fn run_playback(
    clip: Clip,
    volume: f32,
    stop: Receiver<()>,
    ready: Sender<Result<(), PlatformError>>,
) {
    let opened = open_output(&clip);
    let (stream, samples, mut producer) = match opened {
        Ok(parts) => parts,
        Err(e) => {
            error!("Failed to open audio output: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let capacity = producer.buffer().capacity();
    let mut cursor = 0;
    loop {
        let n = producer.slots().min(samples.len() - cursor);
        for &sample in &samples[cursor..cursor + n] {
            let _ = producer.push(sample * volume);
        }
        cursor += n;

        if cursor >= samples.len() && producer.slots() == capacity {
            break;
        }
        match stop.recv_timeout(FEED_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
    }

    drop(stream);
}

fn open_output(clip: &Clip) -> Result<(cpal::Stream, Vec<f32>, Producer<f32>), PlatformError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| PlatformError::AudioDevice("no default output device".into()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| PlatformError::AudioDevice(e.to_string()))?;
    let config = supported.config();

    let samples = convert(clip, config.channels, config.sample_rate.0);
    let ring_len = (config.sample_rate.0 as f32 * config.channels as f32 * RING_SECONDS) as usize;
    let (producer, consumer) = RingBuffer::<f32>::new(ring_len.max(1024));

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer)?,
        other => {
            return Err(PlatformError::AudioDevice(format!(
                "unsupported device sample format {:?}",
                other
            )))
        }
    };
    stream
        .play()
        .map_err(|e| PlatformError::AudioDevice(e.to_string()))?;

    Ok((stream, samples, producer))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: Consumer<f32>,
) -> Result<cpal::Stream, PlatformError>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    *sample = T::from_sample(consumer.pop().unwrap_or(0.0));
                }
            },
            |err| error!("Audio output stream error: {}", err),
            None,
        )
        .map_err(|e| PlatformError::AudioDevice(e.to_string()))
}

fn decode_wav(path: &Path) -> Result<Clip, PlatformError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| PlatformError::Decode(e.to_string()))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(PlatformError::Decode("file has no channels".into()));
    }

    let samples: Result<Vec<f32>, hound::Error> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect(),
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect()
        }
    };

    Ok(Clip {
        samples: samples.map_err(|e| PlatformError::Decode(e.to_string()))?,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

/// Map the clip onto the device's channel count and rate (linear interpolation)
fn convert(clip: &Clip, out_channels: u16, out_rate: u32) -> Vec<f32> {
    let in_ch = clip.channels as usize;
    let out_ch = out_channels as usize;
    let frames_in = clip.samples.len() / in_ch;
    if frames_in == 0 || out_ch == 0 || out_rate == 0 {
        return Vec::new();
    }

    let ratio = clip.sample_rate as f64 / out_rate as f64;
    let frames_out = (frames_in as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(frames_out * out_ch);

    for frame in 0..frames_out {
        let pos = frame as f64 * ratio;
        let i = (pos.floor() as usize).min(frames_in - 1);
        let frac = (pos - i as f64) as f32;
        for c in 0..out_ch {
            let src = c.min(in_ch - 1);
            let a = clip.samples[i * in_ch + src];
            let b = if i + 1 < frames_in {
                clip.samples[(i + 1) * in_ch + src]
            } else {
                a
            };
            out.push(a + (b - a) * frac);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_mono_to_stereo_same_rate() {
        let clip = Clip {
            samples: vec![0.1, 0.2, 0.3],
            channels: 1,
            sample_rate: 48000,
        };
        let out = convert(&clip, 2, 48000);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_convert_halves_frames_when_downsampling() {
        let clip = Clip {
            samples: vec![0.0; 960],
            channels: 2,
            sample_rate: 96000,
        };
        let out = convert(&clip, 2, 48000);
        assert_eq!(out.len(), 480);
    }

    #[test]
    fn test_decode_missing_file() {
        assert!(matches!(
            decode_wav(Path::new("/definitely/not/here.wav")),
            Err(PlatformError::Decode(_))
        ));
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_open_default_device() {
        assert!(CpalAudio::new().is_ok());
    }
}
