//! Interpreter
//!
//! Walks a [`Program`] against a [`ScriptHost`]. The host owns every side
//! effect (DMX writes, sleeping, audio), which keeps the interpreter itself
//! free of threads and clocks.
//!
//! Cancellation is observed before every instruction and inside every
//! blocking host call, so a stop request never waits longer than the host's
//! own wake-up latency.

use std::time::Duration;

use sequenzer_dmx::DMX_CHANNELS;

use crate::script::error::{FaultKind, RuntimeFault};
use crate::script::program::{Expr, Instruction, Program, Value};

/// Returned by blocking host calls when the session was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Why a run ended early
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    Cancelled,
    Fault(RuntimeFault),
}

impl From<Cancelled> for Interrupt {
    fn from(_: Cancelled) -> Self {
        Interrupt::Cancelled
    }
}

/// The side effects a script can have
pub trait ScriptHost {
    /// Set `address` (1-512) to `value`
    fn write_dmx(&mut self, address: usize, value: u8) -> Result<(), FaultKind>;

    /// Block for `duration`, returning early if cancelled
    fn sleep(&mut self, duration: Duration) -> Result<(), Cancelled>;

    /// Start a sound, replacing the current one
    fn play_sound(&mut self, filename: &str, volume: f32) -> Result<(), FaultKind>;

    /// Block until the current sound ends; returns at once if none is playing
    fn wait_for_sound(&mut self) -> Result<(), Cancelled>;

    fn stop_sound(&mut self);

    fn is_cancelled(&self) -> bool;

    /// Called before each instruction executes
    fn on_instruction(&mut self, _ip: usize) {}
}

struct LoopFrame {
    head: usize,
    slot: usize,
    current: i64,
    stop: i64,
    step: i64,
}

fn in_range(value: i64, stop: i64, step: i64) -> bool {
    if step > 0 {
        value < stop
    } else {
        value > stop
    }
}

fn eval_int(expr: &Expr, vars: &[Value]) -> Result<i64, FaultKind> {
    Ok(expr.eval(vars)?.to_i64_truncating()?)
}

fn eval_range_bound(expr: &Expr, vars: &[Value]) -> Result<i64, FaultKind> {
    let value = expr.eval(vars)?;
    value.to_i64_strict().map_err(|_| {
        FaultKind::InvalidRange(format!(
            "arguments must be integers, got {}",
            value.type_name()
        ))
    })
}

/// Run `program` once from the top.
///
/// Returns `Ok` when the last instruction has executed.
pub fn run<H: ScriptHost + ?Sized>(program: &Program, host: &mut H) -> Result<(), Interrupt> {
    let mut vars = vec![Value::Int(0); program.slot_count()];
    let mut loops: Vec<LoopFrame> = Vec::with_capacity(program.slot_count());
    let mut ip = 0;

    while let Some(instruction) = program.instructions().get(ip) {
        if host.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        host.on_instruction(ip);

        let line = program.line_of(ip);
        let fault = |kind: FaultKind| Interrupt::Fault(RuntimeFault::new(line, kind));

        ip = match instruction {
            Instruction::WriteDmx { address, value } => {
                let address = eval_int(address, &vars).map_err(fault)?;
                if !(1..=DMX_CHANNELS as i64).contains(&address) {
                    return Err(fault(FaultKind::AddressOutOfRange(address)));
                }
                let value = eval_int(value, &vars).map_err(fault)?;
                if !(0..=255).contains(&value) {
                    return Err(fault(FaultKind::ValueOutOfRange(value)));
                }
                host.write_dmx(address as usize, value as u8)
                    .map_err(fault)?;
                ip + 1
            }

            Instruction::Sleep { seconds } => {
                let seconds = seconds
                    .eval(&vars)
                    .and_then(|v| v.to_f64())
                    .map_err(|e| fault(e.into()))?;
                let duration = if seconds.is_finite() && seconds >= 0.0 {
                    Duration::try_from_secs_f64(seconds).ok()
                } else {
                    None
                };
                let duration = duration.ok_or_else(|| fault(FaultKind::InvalidSleep(seconds)))?;
                host.sleep(duration)?;
                ip + 1
            }

            Instruction::PlaySound { filename, volume } => {
                let filename = filename.eval(&vars).map_err(|e| fault(e.into()))?;
                let filename = filename.as_str().map_err(|e| fault(e.into()))?;
                let volume = volume
                    .eval(&vars)
                    .and_then(|v| v.to_f64())
                    .map_err(|e| fault(e.into()))?;
                host.play_sound(filename, volume.clamp(0.0, 1.0) as f32)
                    .map_err(fault)?;
                ip + 1
            }

            Instruction::WaitForSound => {
                host.wait_for_sound()?;
                ip + 1
            }

            Instruction::StopSound => {
                host.stop_sound();
                ip + 1
            }

            Instruction::LoopRange {
                slot,
                start,
                stop,
                step,
                exit,
            } => {
                let start = eval_range_bound(start, &vars).map_err(fault)?;
                let stop = eval_range_bound(stop, &vars).map_err(fault)?;
                let step = eval_range_bound(step, &vars).map_err(fault)?;
                if step == 0 {
                    return Err(fault(FaultKind::InvalidRange("step must not be zero".into())));
                }

                if in_range(start, stop, step) {
                    if let Some(var) = vars.get_mut(*slot) {
                        *var = Value::Int(start);
                    }
                    loops.push(LoopFrame {
                        head: ip,
                        slot: *slot,
                        current: start,
                        stop,
                        step,
                    });
                    ip + 1
                } else {
                    *exit
                }
            }

            Instruction::EndLoop { head } => {
                let frame = loops.last_mut().filter(|f| f.head == *head);
                let Some(frame) = frame else {
                    return Err(fault(FaultKind::Internal(format!(
                        "loop at {} is not active",
                        head
                    ))));
                };

                let next = frame
                    .current
                    .checked_add(frame.step)
                    .filter(|&n| in_range(n, frame.stop, frame.step));
                match next {
                    Some(n) => {
                        frame.current = n;
                        if let Some(var) = vars.get_mut(frame.slot) {
                            *var = Value::Int(n);
                        }
                        head + 1
                    }
                    None => {
                        loops.pop();
                        ip + 1
                    }
                }
            }
        };
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScriptLimits;
    use crate::script::compile;

    #[derive(Debug, PartialEq)]
    enum Call {
        Write(usize, u8),
        Sleep(Duration),
        Play(String, f32),
        Wait,
        Stop,
    }

    #[derive(Default)]
    struct RecordingHost {
        calls: Vec<Call>,
        cancel_after: Option<usize>,
        missing: Vec<&'static str>,
    }

    impl RecordingHost {
        fn writes(&self) -> Vec<(usize, u8)> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Write(a, v) => Some((*a, *v)),
                    _ => None,
                })
                .collect()
        }
    }

    impl ScriptHost for RecordingHost {
        fn write_dmx(&mut self, address: usize, value: u8) -> Result<(), FaultKind> {
            self.calls.push(Call::Write(address, value));
            Ok(())
        }

        fn sleep(&mut self, duration: Duration) -> Result<(), Cancelled> {
            self.calls.push(Call::Sleep(duration));
            Ok(())
        }

        fn play_sound(&mut self, filename: &str, volume: f32) -> Result<(), FaultKind> {
            if self.missing.contains(&filename) {
                return Err(crate::audio::AssetError::NotFound(filename.into()).into());
            }
            self.calls.push(Call::Play(filename.to_string(), volume));
            Ok(())
        }

        fn wait_for_sound(&mut self) -> Result<(), Cancelled> {
            self.calls.push(Call::Wait);
            Ok(())
        }

        fn stop_sound(&mut self) {
            self.calls.push(Call::Stop);
        }

        fn is_cancelled(&self) -> bool {
            self.cancel_after.is_some_and(|n| self.calls.len() >= n)
        }
    }

    fn run_source(source: &str, host: &mut RecordingHost) -> Result<(), Interrupt> {
        let script = compile("test", source, &ScriptLimits::default()).unwrap();
        run(script.program(), host)
    }

    #[test]
    fn test_straight_line_program() {
        let mut host = RecordingHost::default();
        run_source(
            "write_dmx(1, 255)\nsleep(0.5)\nplay_sound('a.wav', volume=0.5)\nwait_for_sound()\nstop_sound()\n",
            &mut host,
        )
        .unwrap();

        assert_eq!(
            host.calls,
            vec![
                Call::Write(1, 255),
                Call::Sleep(Duration::from_millis(500)),
                Call::Play("a.wav".into(), 0.5),
                Call::Wait,
                Call::Stop,
            ]
        );
    }

    #[test]
    fn test_fade_loop_uses_loop_variable() {
        let mut host = RecordingHost::default();
        run_source("for v in range(0, 256, 64):\n    write_dmx(1, v)\n", &mut host).unwrap();
        assert_eq!(host.writes(), vec![(1, 0), (1, 64), (1, 128), (1, 192)]);
    }

    #[test]
    fn test_descending_and_empty_ranges() {
        let mut host = RecordingHost::default();
        run_source(
            "for v in range(3, 0, -1):\n    write_dmx(2, v)\nfor v in range(5, 5):\n    write_dmx(3, v)\nwrite_dmx(4, 9)\n",
            &mut host,
        )
        .unwrap();
        assert_eq!(host.writes(), vec![(2, 3), (2, 2), (2, 1), (4, 9)]);
    }

    #[test]
    fn test_nested_loops() {
        let mut host = RecordingHost::default();
        run_source(
            "for a in range(1, 3):\n    for b in range(2):\n        write_dmx(a, b * 10 + a)\n",
            &mut host,
        )
        .unwrap();
        assert_eq!(host.writes(), vec![(1, 1), (1, 11), (2, 2), (2, 12)]);
    }

    #[test]
    fn test_inner_range_depends_on_outer_variable() {
        let mut host = RecordingHost::default();
        run_source(
            "for a in range(1, 4):\n    for b in range(a):\n        write_dmx(a, b)\n",
            &mut host,
        )
        .unwrap();
        assert_eq!(host.writes().len(), 1 + 2 + 3);
    }

    #[test]
    fn test_float_values_truncate() {
        let mut host = RecordingHost::default();
        run_source("for i in range(2):\n    write_dmx(1 + i, 10.9 + i)\n", &mut host).unwrap();
        assert_eq!(host.writes(), vec![(1, 10), (2, 11)]);
    }

    #[test]
    fn test_dynamic_address_out_of_range_faults() {
        let mut host = RecordingHost::default();
        let err = run_source(
            "write_dmx(1, 100)\nfor i in range(510, 514):\n    write_dmx(i, 1)\n",
            &mut host,
        )
        .unwrap_err();

        assert_eq!(
            err,
            Interrupt::Fault(RuntimeFault::new(3, FaultKind::AddressOutOfRange(513)))
        );
        assert_eq!(host.writes(), vec![(1, 100), (510, 1), (511, 1), (512, 1)]);
    }

    #[test]
    fn test_dynamic_value_out_of_range_faults() {
        let mut host = RecordingHost::default();
        let err = run_source("for v in range(250, 270, 5):\n    write_dmx(1, v)\n", &mut host)
            .unwrap_err();
        assert_eq!(
            err,
            Interrupt::Fault(RuntimeFault::new(2, FaultKind::ValueOutOfRange(260)))
        );
        assert_eq!(host.writes(), vec![(1, 250), (1, 255)]);
    }

    #[test]
    fn test_dynamic_negative_sleep_faults() {
        let mut host = RecordingHost::default();
        let err = run_source("for i in range(2):\n    sleep(0.5 - i)\n", &mut host).unwrap_err();
        assert!(matches!(
            err,
            Interrupt::Fault(RuntimeFault {
                line: 2,
                kind: FaultKind::InvalidSleep(_)
            })
        ));
    }

    #[test]
    fn test_dynamic_division_by_zero_faults() {
        let mut host = RecordingHost::default();
        let err = run_source("for i in range(2):\n    write_dmx(1, 10 // i)\n", &mut host)
            .unwrap_err();
        assert!(matches!(
            err,
            Interrupt::Fault(RuntimeFault {
                kind: FaultKind::Evaluation(_),
                ..
            })
        ));
    }

    #[test]
    fn test_asset_fault_carries_line() {
        let mut host = RecordingHost {
            missing: vec!["missing.wav"],
            ..Default::default()
        };
        let err = run_source("write_dmx(1, 1)\nplay_sound('missing.wav')\n", &mut host)
            .unwrap_err();
        assert!(matches!(
            err,
            Interrupt::Fault(RuntimeFault {
                line: 2,
                kind: FaultKind::Asset(_)
            })
        ));
    }

    #[test]
    fn test_cancellation_between_instructions() {
        let mut host = RecordingHost {
            cancel_after: Some(3),
            ..Default::default()
        };
        let err = run_source("for i in range(1, 100):\n    write_dmx(i, 1)\n", &mut host)
            .unwrap_err();
        assert_eq!(err, Interrupt::Cancelled);
        assert_eq!(host.writes().len(), 3);
    }

    #[test]
    fn test_large_empty_loop_completes() {
        let mut host = RecordingHost::default();
        run_source("for i in range(100000):\n    pass\nwrite_dmx(1, 1)\n", &mut host).unwrap();
        assert_eq!(host.writes(), vec![(1, 1)]);
    }
}
