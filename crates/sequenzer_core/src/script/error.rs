//! Script Error Types

use std::fmt;

use thiserror::Error;

use crate::audio::AssetError;
use crate::script::program::EvalError;

/// Why a script was rejected at compile time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationErrorKind {
    #[error("script is {size} bytes, the limit is {limit}")]
    SourceTooLarge { size: usize, limit: usize },

    #[error("compilation timed out")]
    Timeout,

    #[error("unexpected character {0:?}")]
    UnexpectedCharacter(char),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("invalid number literal {0:?}")]
    InvalidNumber(String),

    #[error("unindent does not match any outer indentation level")]
    InconsistentIndentation,

    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("name {0:?} is not defined")]
    UnknownName(String),

    #[error("{0:?} is not allowed in sequences")]
    ForbiddenKeyword(String),

    #[error("attribute access is not allowed")]
    AttributeAccess,

    #[error("subscripts are not allowed")]
    Subscript,

    #[error("only write_dmx, play_sound, sleep, wait_for_sound and stop_sound can be called")]
    IndirectCall,

    #[error("{0}() does not return a value")]
    CallAsValue(String),

    #[error("assignment is not allowed")]
    Assignment,

    #[error("{function}() got an unexpected keyword argument {argument:?}")]
    UnknownArgument { function: String, argument: String },

    #[error("{function}() got multiple values for argument {argument:?}")]
    DuplicateArgument { function: String, argument: String },

    #[error("{function}() missing required argument {argument:?}")]
    MissingArgument { function: String, argument: String },

    #[error("{function}() takes at most {max} arguments")]
    TooManyArguments { function: String, max: usize },

    #[error("positional argument follows keyword argument")]
    PositionalAfterKeyword,

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("{function}() {argument} {message}")]
    ArgumentOutOfRange {
        function: String,
        argument: String,
        message: String,
    },

    #[error("{0}")]
    Evaluation(#[from] EvalError),

    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),
}

/// A rejected script, with the position of the problem
#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {line}, column {column}: {kind}")]
pub struct ValidationError {
    pub line: usize,
    pub column: usize,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(line: usize, column: usize, kind: ValidationErrorKind) -> Self {
        Self { line, column, kind }
    }
}

/// A non-fatal compile diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct CompileWarning {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// What went wrong while running an instruction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FaultKind {
    #[error("DMX address {0} is outside 1-512")]
    AddressOutOfRange(i64),

    #[error("DMX value {0} is outside 0-255")]
    ValueOutOfRange(i64),

    #[error("invalid sleep duration {0}")]
    InvalidSleep(f64),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("{0}")]
    Evaluation(#[from] EvalError),

    #[error("{0}")]
    Asset(#[from] AssetError),

    #[error("hardware error: {0}")]
    Hardware(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A fault that ends the session in `Failed`
#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {line}: {kind}")]
pub struct RuntimeFault {
    pub line: usize,
    pub kind: FaultKind,
}

impl RuntimeFault {
    pub fn new(line: usize, kind: FaultKind) -> Self {
        Self { line, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new(3, 5, ValidationErrorKind::UnknownName("open".into()));
        assert_eq!(err.to_string(), "line 3, column 5: name \"open\" is not defined");
    }

    #[test]
    fn test_runtime_fault_display() {
        let fault = RuntimeFault::new(2, FaultKind::AddressOutOfRange(513));
        assert_eq!(fault.to_string(), "line 2: DMX address 513 is outside 1-512");

        let fault = RuntimeFault::new(1, AssetError::NotFound("missing.wav".into()).into());
        assert!(fault.to_string().contains("missing.wav"));
    }
}
