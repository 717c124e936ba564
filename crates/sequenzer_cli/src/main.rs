//! sequenzer - Lighting and Sound Sequencer
//!
//! Runs sequence scripts against a DMX512 line and the audio output, or
//! against simulated hardware with `--simulate`.

use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{bounded, Receiver};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sequenzer_core::script::library;
use sequenzer_core::{
    DmxOutput, Event, LifecycleState, Mode, SequenzerSettings, Sequencer, SessionId,
    StatusSnapshot,
};
use sequenzer_platform::{AudioBackend, LineDriver, SimulatedAudio};

/// Channels swept by `test-dmx --test sweep`
const TEST_CHANNELS: std::ops::RangeInclusive<usize> = 1..=8;
/// Levels written to channels 1-5 by `test-dmx --test basic`
const BASIC_LEVELS: [u8; 5] = [255, 128, 64, 32, 16];
const FADE_STEP: u8 = 16;
/// Frames timed by `test-dmx --test timing`
const TIMED_FRAMES: u64 = 10;
const POLL: Duration = Duration::from_millis(100);

/// How long each `test-dmx` step holds
#[derive(Debug, Clone, Copy)]
struct TestPace {
    hold: Duration,
    fade_step: Duration,
}

impl Default for TestPace {
    fn default() -> Self {
        Self {
            hold: Duration::from_millis(500),
            fade_step: Duration::from_millis(100),
        }
    }
}

#[derive(Parser)]
#[command(name = "sequenzer")]
#[command(author, version, about = "DMX512 and audio sequence runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (default: the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use simulated DMX and audio instead of the hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Print the final status as JSON
    #[arg(long, global = true)]
    json: bool,

    /// DMX line driver (default: the `dmx_output` setting)
    #[arg(long, global = true, value_enum)]
    output: Option<OutputArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputArg {
    /// UART on the configured serial port
    Serial,
    /// Bit-banged GPIO data pin
    Gpio,
}

impl From<OutputArg> for DmxOutput {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Serial => DmxOutput::Serial,
            OutputArg::Gpio => DmxOutput::Gpio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DmxTest {
    /// Channels 1-5 at fixed levels
    Basic,
    /// Channels 1-8 at full, one at a time
    Sweep,
    /// Channel 1 ramps up then down
    Fade,
    /// Average frame period over 10 frames
    Timing,
    All,
}

impl DmxTest {
    fn includes(self, test: DmxTest) -> bool {
        self == DmxTest::All || self == test
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sequence script
    Run {
        file: PathBuf,
        /// Repeat until Enter is pressed
        #[arg(long = "loop")]
        repeat: bool,
    },
    /// Validate a script without running it
    Check { file: PathBuf },
    /// Exercise the DMX output
    TestDmx {
        #[arg(long = "test", value_enum, default_value_t = DmxTest::All)]
        test: DmxTest,
    },
    /// Play a sound file to the end
    TestSound { file: PathBuf },
    /// List the example scripts, or print one
    Examples { name: Option<String> },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => SequenzerSettings::load_from(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => SequenzerSettings::load(),
    };
    if let Some(output) = cli.output {
        settings.dmx_output = output.into();
    }
    init_logging(&settings.log_level);

    match &cli.command {
        Commands::Run { file, repeat } => run(&cli, &settings, file, *repeat),
        Commands::Check { file } => check(&settings, file),
        Commands::TestDmx { test } => test_dmx(&cli, &settings, *test),
        Commands::TestSound { file } => test_sound(&cli, &settings, file),
        Commands::Examples { name } => show_examples(name.as_deref()),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn default_filter(level: &str) -> String {
    ["sequenzer_cli", "sequenzer_core", "sequenzer_platform", "sequenzer_dmx"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn open_engine(cli: &Cli, settings: &SequenzerSettings) -> Result<Sequencer> {
    let config = settings.engine_config();
    if cli.simulate {
        info!("Using simulated hardware");
        return Ok(Sequencer::simulated(config)?);
    }

    let line = open_line(settings)?;
    let audio: Arc<dyn AudioBackend> = match sequenzer_platform::default_audio_backend() {
        Ok(backend) => Arc::from(backend),
        Err(e) => {
            warn!("Audio output unavailable, sounds will be silent: {}", e);
            Arc::new(SimulatedAudio::default())
        }
    };
    Ok(Sequencer::new(config, line, audio)?)
}

fn open_line(settings: &SequenzerSettings) -> Result<Box<dyn LineDriver>> {
    match settings.dmx_output {
        DmxOutput::Serial => sequenzer_platform::serial_line(settings.serial_config())
            .with_context(|| {
                format!(
                    "failed to open DMX line on {}",
                    settings.serial_port.display()
                )
            }),
        DmxOutput::Gpio => sequenzer_platform::gpio_line(settings.gpio_config())
            .with_context(|| format!("failed to open DMX line on GPIO {}", settings.data_pin)),
    }
}

fn read_script(path: &Path) -> Result<(String, String)> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok((name, source))
}

fn run(cli: &Cli, settings: &SequenzerSettings, file: &Path, repeat: bool) -> Result<()> {
    let (name, source) = read_script(file)?;
    let engine = open_engine(cli, settings)?;
    let mode = if repeat { Mode::Loop } else { Mode::Single };

    let id = match engine.start_source(&name, &source, mode) {
        Ok(id) => id,
        Err(e) => {
            report(cli, &engine.status());
            return Err(e).with_context(|| format!("{} was not started", name));
        }
    };
    println!("Running {} ({})", name, mode);

    if repeat {
        println!("Press Enter to stop");
        let enter = spawn_enter_listener()?;
        loop {
            if enter.try_recv().is_ok() {
                engine.stop()?;
                break;
            }
            if watch(&engine, id) {
                break;
            }
        }
    } else {
        while !watch(&engine, id) {}
    }

    let status = engine.status();
    report(cli, &status);
    finish(&status)
}

/// Print events for `id` for one poll interval; true once it has finished
fn watch(engine: &Sequencer, id: SessionId) -> bool {
    match engine.wait_event(POLL) {
        Some(Event::IterationCompleted {
            session_id,
            iteration,
        }) if session_id == id => {
            println!("Iteration {} completed", iteration);
            false
        }
        Some(Event::SessionFinished { session_id, .. }) if session_id == id => true,
        Some(Event::TransmitterDegraded { message }) => {
            eprintln!("DMX output degraded: {}", message);
            false
        }
        Some(Event::TransmitterRecovered { failed_frames }) => {
            eprintln!("DMX output recovered after {} failed frames", failed_frames);
            false
        }
        Some(_) => false,
        // Events may have been dropped; fall back to the snapshot
        None => engine.status().lifecycle_state.is_terminal(),
    }
}

fn spawn_enter_listener() -> Result<Receiver<()>> {
    let (tx, rx) = bounded::<()>(1);
    thread::Builder::new()
        .name("sequenzer-stdin".into())
        .spawn(move || {
            let mut line = String::new();
            // EOF counts as Enter so piped input still stops the loop
            let _ = io::stdin().lock().read_line(&mut line);
            let _ = tx.send(());
        })
        .context("failed to spawn stdin listener")?;
    Ok(rx)
}

fn report(cli: &Cli, status: &StatusSnapshot) {
    if cli.json {
        match serde_json::to_string_pretty(status) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize status: {}", e),
        }
        return;
    }

    println!(
        "{}: {} after {:.1}s, {} iteration(s)",
        status.script_name.as_deref().unwrap_or("-"),
        status.lifecycle_state,
        status.elapsed_seconds,
        status.iteration_count
    );
    if let Some(error) = &status.last_error {
        match error.line {
            Some(line) => eprintln!("Error ({:?}, line {}): {}", error.kind, line, error.message),
            None => eprintln!("Error ({:?}): {}", error.kind, error.message),
        }
    }
}

fn finish(status: &StatusSnapshot) -> Result<()> {
    match status.lifecycle_state {
        LifecycleState::Failed => bail!("sequence failed"),
        _ => Ok(()),
    }
}

fn check(settings: &SequenzerSettings, file: &Path) -> Result<()> {
    let (name, source) = read_script(file)?;
    let limits = settings.engine_config().script;

    let script = sequenzer_core::compile(&name, &source, &limits)
        .with_context(|| format!("{} is not a valid sequence", name))?;
    for warning in script.warnings() {
        println!("warning: {}", warning);
    }
    println!(
        "{}: OK ({} instructions, {} warning(s))",
        name,
        script.instruction_count(),
        script.warnings().len()
    );
    Ok(())
}

fn test_dmx(cli: &Cli, settings: &SequenzerSettings, test: DmxTest) -> Result<()> {
    let engine = open_engine(cli, settings)?;
    let period = settings.engine_config().dmx.period();
    run_dmx_test(&engine, test, TestPace::default(), period)?;

    let health = engine.status().dmx;
    println!(
        "{} frames sent, {} failed",
        health.frames_sent, health.failed_frames
    );
    if health.degraded {
        bail!(
            "DMX output degraded: {}",
            health.last_error.unwrap_or_default()
        );
    }
    Ok(())
}

fn run_dmx_test(engine: &Sequencer, test: DmxTest, pace: TestPace, period: Duration) -> Result<()> {
    let channels = engine.channels();

    if test.includes(DmxTest::Basic) {
        println!("Basic output: channels 1-{}", BASIC_LEVELS.len());
        for (index, level) in BASIC_LEVELS.iter().enumerate() {
            println!("  Channel {}: {}", index + 1, level);
            channels.set(index + 1, *level)?;
        }
        thread::sleep(pace.hold);
        channels.clear();
    }

    if test.includes(DmxTest::Sweep) {
        println!("Channel sweep: channels {}-{}", TEST_CHANNELS.start(), TEST_CHANNELS.end());
        for channel in TEST_CHANNELS {
            println!("  Channel {} at 255", channel);
            channels.set(channel, 255)?;
            thread::sleep(pace.hold);
            channels.set(channel, 0)?;
        }
    }

    if test.includes(DmxTest::Fade) {
        println!("Fade: channel 1 up");
        for level in fade_up() {
            channels.set(1, level)?;
            thread::sleep(pace.fade_step);
        }
        thread::sleep(pace.hold);
        println!("Fade: channel 1 down");
        for level in fade_down() {
            channels.set(1, level)?;
            thread::sleep(pace.fade_step);
        }
        channels.clear();
    }

    if test.includes(DmxTest::Timing) {
        println!("Timing: {} frames", TIMED_FRAMES);
        channels.set(1, 255)?;
        let average = time_frames(engine, TIMED_FRAMES, period)?;
        channels.clear();
        println!(
            "  Average frame period: {:.3} ms (configured {:.3} ms)",
            average.as_secs_f64() * 1000.0,
            period.as_secs_f64() * 1000.0
        );
    }

    channels.clear();
    Ok(())
}

fn fade_up() -> impl Iterator<Item = u8> {
    (0..=u8::MAX).step_by(FADE_STEP as usize)
}

fn fade_down() -> impl Iterator<Item = u8> {
    (0..=u8::MAX).rev().step_by(FADE_STEP as usize)
}

/// Average period of the next `frames` frames the transmitter sends
fn time_frames(engine: &Sequencer, frames: u64, period: Duration) -> Result<Duration> {
    let timeout = period * (frames as u32) * 4 + Duration::from_secs(1);
    let first = wait_for_frame(engine, engine.status().dmx.frames_sent + 1, timeout)?;
    let start = Instant::now();
    wait_for_frame(engine, first + frames, timeout)?;
    Ok(start.elapsed() / frames as u32)
}

/// Poll the frame counter until it reaches `target`; returns the count seen
fn wait_for_frame(engine: &Sequencer, target: u64, timeout: Duration) -> Result<u64> {
    let deadline = Instant::now() + timeout;
    loop {
        let sent = engine.status().dmx.frames_sent;
        if sent >= target {
            return Ok(sent);
        }
        if Instant::now() >= deadline {
            bail!("DMX transmitter stalled at {} frames", sent);
        }
        thread::sleep(Duration::from_micros(200));
    }
}

fn test_sound(cli: &Cli, settings: &SequenzerSettings, file: &Path) -> Result<()> {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} is not a file", file.display()))?;
    let dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut settings = settings.clone();
    settings.sounds_directory = dir;
    let engine = open_engine(cli, &settings)?;

    let handle = engine
        .audio()
        .play(&name, 1.0)
        .with_context(|| format!("failed to play {}", file.display()))?;
    println!("Playing {}", name);
    while !handle.wait(POLL) {}
    println!("Done");
    Ok(())
}

fn show_examples(name: Option<&str>) -> Result<()> {
    match name {
        Some(name) => {
            let Some(example) = library::example(name) else {
                bail!("no example named {}", name);
            };
            print!("{}", example.source);
        }
        None => {
            for example in library::examples() {
                println!("{:<18} {}", example.name, example.description);
            }
        }
    }
    Ok(())
}
