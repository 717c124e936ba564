//! DMX Transmitter
//!
//! A free-running thread that snapshots the [`ChannelBuffer`] once per
//! refresh period and puts it on the line. Bit-banged lines get the frame
//! as an encoded pulse train; UART lines take the wire bytes and make the
//! BREAK themselves. The transceiver enable is asserted before every frame. It runs for the lifetime
//! of the engine, whether or not a session is active, so receivers always
//! see a continuous refresh (all zeros when idle).
//!
//! Line failures never stop the loop. They are counted in the status
//! reporter, and the transition into and out of the degraded state is
//! logged and published once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use sequenzer_dmx::{ChannelBuffer, DmxTiming, Frame, FrameEncoder};
use sequenzer_platform::{Framing, LineDriver, PlatformError};

use crate::error::{EngineError, EngineResult};
use crate::message::{Event, TransmitterCommand};
use crate::status::{HealthChange, StatusReporter};

/// Handle to the transmitter thread; dropping it blacks out the line and
/// joins the thread
pub struct DmxTransmitter {
    command_sender: Sender<TransmitterCommand>,
    thread: Option<JoinHandle<()>>,
    shutdown_flag: Arc<AtomicBool>,
    driver_name: &'static str,
}

impl DmxTransmitter {
    pub fn spawn(
        line: Box<dyn LineDriver>,
        channels: Arc<ChannelBuffer>,
        timing: DmxTiming,
        status: Arc<StatusReporter>,
        events: Sender<Event>,
    ) -> EngineResult<Self> {
        let encoder = FrameEncoder::new(timing)?;
        let (command_sender, command_receiver) = bounded::<TransmitterCommand>(8);
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let driver_name = line.name();

        let worker = TransmitterLoop {
            line,
            encoder,
            channels,
            status,
            events,
            commands: command_receiver,
            shutdown_flag: Arc::clone(&shutdown_flag),
            packet: Vec::with_capacity(timing.slot_count + 1),
        };

        let thread = thread::Builder::new()
            .name("sequenzer-dmx".into())
            .spawn(move || worker.run())
            .map_err(|e| EngineError::ThreadSpawn(e.to_string()))?;

        info!(
            driver = driver_name,
            refresh_hz = timing.refresh_hz,
            slots = timing.slot_count,
            "DMX transmitter started"
        );

        Ok(Self {
            command_sender,
            thread: Some(thread),
            shutdown_flag,
            driver_name,
        })
    }

    /// Apply new frame timing from the next frame on
    pub fn update_timing(&self, timing: DmxTiming) -> EngineResult<()> {
        timing.validate()?;
        self.command_sender
            .send(TransmitterCommand::UpdateTiming(timing))
            .map_err(|_| EngineError::ChannelSendError)
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver_name
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for DmxTransmitter {
    fn drop(&mut self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        let _ = self.command_sender.send(TransmitterCommand::Shutdown);

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("DMX transmitter thread panicked");
            }
        }
    }
}

struct TransmitterLoop {
    line: Box<dyn LineDriver>,
    encoder: FrameEncoder,
    channels: Arc<ChannelBuffer>,
    status: Arc<StatusReporter>,
    events: Sender<Event>,
    commands: Receiver<TransmitterCommand>,
    shutdown_flag: Arc<AtomicBool>,
    /// Reused wire-byte buffer for packet lines
    packet: Vec<u8>,
}

impl TransmitterLoop {
    fn run(mut self) {
        debug!("DMX transmitter thread running");

        while !self.shutdown_flag.load(Ordering::SeqCst) {
            let frame_start = Instant::now();
            let frame = self.channels.snapshot();
            self.send_frame(&frame);

            if !self.wait_until(frame_start + self.encoder.timing().period()) {
                break;
            }
        }

        // Leave receivers dark and release the transceiver
        self.send_frame(&Frame::new());
        if let Err(e) = self.line.set_enabled(false) {
            warn!("Failed to release DMX transceiver: {}", e);
        }
        debug!("DMX transmitter thread exiting");
    }

    fn send_frame(&mut self, frame: &Frame) {
        let change = match self.put_on_line(frame) {
            Ok(()) => self.status.record_frame_ok(),
            Err(e) => self.status.record_frame_failed(e.to_string()),
        };

        match change {
            Some(HealthChange::Degraded(message)) => {
                warn!("DMX output degraded: {}", message);
                let _ = self.events.try_send(Event::TransmitterDegraded { message });
            }
            Some(HealthChange::Recovered { failed_frames }) => {
                info!(failed_frames, "DMX output recovered");
                let _ = self
                    .events
                    .try_send(Event::TransmitterRecovered { failed_frames });
            }
            None => {}
        }
    }

    fn put_on_line(&mut self, frame: &Frame) -> Result<(), PlatformError> {
        self.line.set_enabled(true)?;

        match self.line.framing() {
            Framing::Pulses => {
                let pulses = self.encoder.encode(frame);
                self.line.transmit(pulses)
            }
            Framing::Packet => {
                let timing = self.encoder.timing();
                self.packet.clear();
                self.packet.extend(frame.wire_bytes(timing.slot_count));
                self.line.transmit_packet(
                    timing.break_us,
                    timing.mark_after_break_us,
                    &self.packet,
                )
            }
        }
    }

    /// Handle commands until `deadline`; returns false on shutdown
    fn wait_until(&mut self, deadline: Instant) -> bool {
        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.commands.recv_timeout(timeout) {
                Ok(TransmitterCommand::UpdateTiming(timing)) => {
                    match self.encoder.set_timing(timing) {
                        Ok(()) => info!(
                            refresh_hz = timing.refresh_hz,
                            break_us = timing.break_us,
                            mab_us = timing.mark_after_break_us,
                            "DMX timing updated"
                        ),
                        Err(e) => warn!("Rejected DMX timing: {}", e),
                    }
                }
                Ok(TransmitterCommand::Shutdown) => return false,
                Err(RecvTimeoutError::Timeout) => return true,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}
