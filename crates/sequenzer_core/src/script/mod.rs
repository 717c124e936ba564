//! Sequence Scripts
//!
//! Scripts are written in a small Python-like language: five calls
//! (`write_dmx`, `play_sound`, `sleep`, `wait_for_sound`, `stop_sound`),
//! arithmetic, comparisons and `for` loops over `range(...)`.
//!
//! ```text
//! source ──► lexer ──► compiler ──► Program ──► interpreter ──► ScriptHost
//!                         │
//!                         └─ constant folding + static range checks
//! ```
//!
//! [`compile`] does all rejection up front. The resulting [`CompiledScript`]
//! is cheap to clone and is run any number of times without re-parsing.

mod compiler;
mod error;
mod interpreter;
mod lexer;
pub mod library;
mod program;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::ScriptLimits;

pub use error::{CompileWarning, FaultKind, RuntimeFault, ValidationError, ValidationErrorKind};
pub use interpreter::{run, Cancelled, Interrupt, ScriptHost};
pub use program::{BinaryOp, EvalError, Expr, Instruction, Program, UnaryOp, Value};

/// Compilation deadline, checked once per source line
pub(crate) struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    pub(crate) fn check(&self, line: usize, column: usize) -> Result<(), ValidationError> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(ValidationError::new(
                line,
                column,
                ValidationErrorKind::Timeout,
            )),
            _ => Ok(()),
        }
    }
}

/// A validated script, ready to run
#[derive(Debug, Clone)]
pub struct CompiledScript {
    name: Arc<str>,
    program: Arc<Program>,
    warnings: Arc<[CompileWarning]>,
}

impl CompiledScript {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Non-fatal diagnostics, such as very long literal sleeps
    pub fn warnings(&self) -> &[CompileWarning] {
        &self.warnings
    }

    pub fn instruction_count(&self) -> usize {
        self.program.len()
    }
}

/// Validate `source` and compile it into a runnable program
pub fn compile(
    name: &str,
    source: &str,
    limits: &ScriptLimits,
) -> Result<CompiledScript, ValidationError> {
    if source.len() > limits.max_source_bytes {
        return Err(ValidationError::new(
            1,
            1,
            ValidationErrorKind::SourceTooLarge {
                size: source.len(),
                limit: limits.max_source_bytes,
            },
        ));
    }

    let deadline = Deadline::after(limits.compile_timeout);
    let tokens = lexer::tokenize(source, &deadline)?;
    let (program, warnings) = compiler::Compiler::new(tokens, limits, &deadline).compile()?;

    debug!(
        script = name,
        instructions = program.len(),
        warnings = warnings.len(),
        "Compiled script"
    );

    Ok(CompiledScript {
        name: name.into(),
        program: Arc::new(program),
        warnings: warnings.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_default(source: &str) -> Result<CompiledScript, ValidationError> {
        compile("test", source, &ScriptLimits::default())
    }

    fn reject(source: &str) -> ValidationErrorKind {
        match compile_default(source) {
            Ok(_) => panic!("expected {:?} to be rejected", source),
            Err(e) => e.kind,
        }
    }

    #[test]
    fn test_whitelisted_script_compiles() {
        let script = compile_default(
            "write_dmx(1, 255); sleep(0.1); write_dmx(1, 0)\n\
             play_sound('intro.wav')\n\
             play_sound(filename=\"b.wav\", volume=0.5)\n\
             wait_for_sound()\n\
             stop_sound()\n\
             for i in range(5): write_dmx(2, 255); sleep(0.05); write_dmx(2, 0); sleep(0.05)\n",
        )
        .unwrap();

        assert_eq!(script.name(), "test");
        assert_eq!(script.instruction_count(), 3 + 2 + 2 + 6);
        assert!(script.program().uses_audio());
    }

    #[test]
    fn test_constant_arguments_are_folded() {
        let script = compile_default("write_dmx(2 * 3 + 1, 255 // 2)\nsleep(1 / 4)\n").unwrap();
        assert_eq!(
            script.program().instructions()[0],
            Instruction::WriteDmx {
                address: Expr::Const(Value::Int(7)),
                value: Expr::Const(Value::Int(127)),
            }
        );
        assert_eq!(
            script.program().instructions()[1],
            Instruction::Sleep {
                seconds: Expr::Const(Value::Float(0.25)),
            }
        );
    }

    #[test]
    fn test_loop_layout() {
        let script = compile_default("for i in range(3):\n    write_dmx(i + 1, 9)\nsleep(1)\n").unwrap();
        let program = script.program();
        assert_eq!(program.len(), 4);
        assert!(matches!(
            program.instructions()[0],
            Instruction::LoopRange { slot: 0, exit: 3, .. }
        ));
        assert_eq!(program.instructions()[2], Instruction::EndLoop { head: 0 });
        assert_eq!(program.line_of(3), 3);
        assert_eq!(program.slot_count(), 1);
    }

    #[test]
    fn test_unknown_names_rejected() {
        assert_eq!(reject("open('x')\n"), ValidationErrorKind::UnknownName("open".into()));
        assert_eq!(reject("print(1)\n"), ValidationErrorKind::UnknownName("print".into()));
        assert_eq!(
            reject("write_dmx(x, 1)\n"),
            ValidationErrorKind::UnknownName("x".into())
        );
        assert_eq!(
            reject("__import__('os')\n"),
            ValidationErrorKind::UnknownName("__import__".into())
        );
    }

    #[test]
    fn test_forbidden_syntax_rejected() {
        assert_eq!(reject("import os\n"), ValidationErrorKind::ForbiddenKeyword("import".into()));
        assert_eq!(
            reject("from os import system\n"),
            ValidationErrorKind::ForbiddenKeyword("from".into())
        );
        assert_eq!(
            reject("while 1:\n    sleep(1)\n"),
            ValidationErrorKind::ForbiddenKeyword("while".into())
        );
        assert_eq!(
            reject("def f():\n    pass\n"),
            ValidationErrorKind::ForbiddenKeyword("def".into())
        );
        assert_eq!(
            reject("sleep(lambda: 1)\n"),
            ValidationErrorKind::ForbiddenKeyword("lambda".into())
        );
        assert_eq!(reject("x = 5\n"), ValidationErrorKind::Assignment);
        assert_eq!(reject("os.system('ls')\n"), ValidationErrorKind::AttributeAccess);
        assert_eq!(reject("write_dmx('a'.upper(), 1)\n"), ValidationErrorKind::AttributeAccess);
        assert_eq!(reject("sleep.x\n"), ValidationErrorKind::AttributeAccess);
        assert_eq!(reject("x[0]\n"), ValidationErrorKind::Subscript);
        assert_eq!(reject("(sleep)(1)\n"), ValidationErrorKind::IndirectCall);
        assert_eq!(reject("stop_sound()()\n"), ValidationErrorKind::IndirectCall);
        assert_eq!(
            reject("write_dmx(1, sleep(1))\n"),
            ValidationErrorKind::CallAsValue("sleep".into())
        );
        assert_eq!(
            reject("for i in range(3):\n    i(1)\n"),
            ValidationErrorKind::IndirectCall
        );
    }

    #[test]
    fn test_argument_binding_errors() {
        assert!(matches!(
            reject("write_dmx(1)\n"),
            ValidationErrorKind::MissingArgument { .. }
        ));
        assert!(matches!(
            reject("write_dmx(1, 2, 3)\n"),
            ValidationErrorKind::TooManyArguments { max: 2, .. }
        ));
        assert!(matches!(
            reject("write_dmx(1, channel=2)\n"),
            ValidationErrorKind::UnknownArgument { .. }
        ));
        assert!(matches!(
            reject("write_dmx(1, address=2)\n"),
            ValidationErrorKind::DuplicateArgument { .. }
        ));
        assert_eq!(
            reject("write_dmx(address=1, 2)\n"),
            ValidationErrorKind::PositionalAfterKeyword
        );
        assert!(compile_default("write_dmx(value=3, address=1)\n").is_ok());
    }

    #[test]
    fn test_static_range_checks() {
        assert!(matches!(
            reject("write_dmx(0, 1)\n"),
            ValidationErrorKind::ArgumentOutOfRange { .. }
        ));
        assert!(matches!(
            reject("write_dmx(513, 1)\n"),
            ValidationErrorKind::ArgumentOutOfRange { .. }
        ));
        assert!(matches!(
            reject("write_dmx(1, 256)\n"),
            ValidationErrorKind::ArgumentOutOfRange { .. }
        ));
        assert!(matches!(
            reject("sleep(-1)\n"),
            ValidationErrorKind::ArgumentOutOfRange { .. }
        ));
        assert!(matches!(
            reject("play_sound('a.wav', 1.5)\n"),
            ValidationErrorKind::ArgumentOutOfRange { .. }
        ));
        assert_eq!(
            reject("play_sound(3)\n"),
            ValidationErrorKind::Evaluation(EvalError::NotAString("int"))
        );
        assert_eq!(
            reject("write_dmx(1, 10 / 0)\n"),
            ValidationErrorKind::Evaluation(EvalError::DivisionByZero)
        );
        // Floats truncate before the bounds check
        assert!(compile_default("write_dmx(512.9, 255.5)\n").is_ok());
    }

    #[test]
    fn test_dynamic_arguments_are_deferred() {
        // i + 512 is out of range for i > 0, but only at runtime
        assert!(compile_default("for i in range(3):\n    write_dmx(i + 512, 1)\n").is_ok());
    }

    #[test]
    fn test_range_checks() {
        assert!(matches!(reject("for i in range(1.5):\n    pass\n"), ValidationErrorKind::InvalidRange(_)));
        assert!(matches!(reject("for i in range(0, 5, 0):\n    pass\n"), ValidationErrorKind::InvalidRange(_)));
        assert!(matches!(reject("for i in range():\n    pass\n"), ValidationErrorKind::InvalidRange(_)));
        assert!(matches!(
            reject("for i in range(1, 2, 3, 4):\n    pass\n"),
            ValidationErrorKind::InvalidRange(_)
        ));
        assert!(matches!(
            reject("for i in range(10 ** 9):\n    pass\n"),
            ValidationErrorKind::UnexpectedToken { .. }
        ));
        assert!(matches!(
            reject("for i in range(2000000):\n    pass\n"),
            ValidationErrorKind::InvalidRange(_)
        ));
        assert!(matches!(
            reject("for i in range(stop=3):\n    pass\n"),
            ValidationErrorKind::UnknownArgument { .. }
        ));
        assert!(matches!(
            reject("for sleep in range(3):\n    pass\n"),
            ValidationErrorKind::UnexpectedToken { .. }
        ));
    }

    #[test]
    fn test_loop_variable_scope() {
        assert_eq!(
            reject("for i in range(3):\n    pass\nwrite_dmx(i, 1)\n"),
            ValidationErrorKind::UnknownName("i".into())
        );

        let nested = compile_default(
            "for i in range(2):\n    for i in range(3):\n        write_dmx(i + 1, 1)\n    write_dmx(i + 1, 2)\n",
        )
        .unwrap();
        assert_eq!(nested.program().slot_count(), 2);
    }

    #[test]
    fn test_nesting_limit() {
        let limits = ScriptLimits {
            max_nesting_depth: 2,
            ..ScriptLimits::default()
        };
        let source = "for a in range(2):\n    for b in range(2):\n        for c in range(2):\n            pass\n";
        let err = compile("deep", source, &limits).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::NestingTooDeep(2));
        assert_eq!(err.line, 3);

        let parens = format!("sleep({}1{})\n", "(".repeat(40), ")".repeat(40));
        assert_eq!(
            compile_default(&parens).unwrap_err().kind,
            ValidationErrorKind::NestingTooDeep(ScriptLimits::default().max_nesting_depth)
        );
    }

    #[test]
    fn test_source_size_limit() {
        let limits = ScriptLimits {
            max_source_bytes: 16,
            ..ScriptLimits::default()
        };
        let err = compile("big", "write_dmx(1, 255)\nwrite_dmx(2, 255)\n", &limits).unwrap_err();
        assert!(matches!(err.kind, ValidationErrorKind::SourceTooLarge { limit: 16, .. }));
    }

    #[test]
    fn test_compile_timeout() {
        let limits = ScriptLimits {
            compile_timeout: Duration::ZERO,
            ..ScriptLimits::default()
        };
        let err = compile("slow", "sleep(1)\n", &limits).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Timeout);
    }

    #[test]
    fn test_error_location() {
        let err = compile_default("write_dmx(1, 1)\nsleep(1)\n  open('x')\n").unwrap_err();
        assert_eq!(err.line, 3);

        let err = compile_default("write_dmx(1, 1)\nsleep(1)\nwrite_dmx(1, foo)\n").unwrap_err();
        assert_eq!((err.line, err.column), (3, 14));
        assert!(err.to_string().starts_with("line 3, column 14"));
    }

    #[test]
    fn test_long_sleep_warns() {
        let script = compile_default("sleep(7200)\nsleep(10)\n").unwrap();
        assert_eq!(script.warnings().len(), 1);
        assert_eq!(script.warnings()[0].line, 1);
    }

    #[test]
    fn test_expression_semantics() {
        let script = compile_default(
            "write_dmx(1, 7 // -2 + 10)\nwrite_dmx(2, -7 % 3)\nwrite_dmx(3, (2 < 3) + True)\nwrite_dmx(4, not 0)\n",
        )
        .unwrap();
        let values: Vec<_> = script
            .program()
            .instructions()
            .iter()
            .map(|i| match i {
                Instruction::WriteDmx { value, .. } => value.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(
            values,
            vec![
                Expr::Const(Value::Int(6)),
                Expr::Const(Value::Int(2)),
                Expr::Const(Value::Int(2)),
                Expr::Const(Value::Int(1)),
            ]
        );
        assert!(matches!(
            reject("write_dmx(1, 1 < 2 < 3)\n"),
            ValidationErrorKind::UnexpectedToken { .. }
        ));
    }

    #[test]
    fn test_empty_script_compiles() {
        let script = compile_default("# nothing to do\n\n").unwrap();
        assert_eq!(script.instruction_count(), 0);
    }
}
