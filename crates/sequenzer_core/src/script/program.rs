//! Compiled Program Representation
//!
//! A program is a flat instruction list. Loops are a `LoopRange` head that
//! jumps past its `EndLoop` when the range is exhausted, and an `EndLoop`
//! that jumps back to its head's body. Expressions left in instructions are
//! the ones that depend on loop variables; everything else was folded to a
//! constant by the compiler.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors from evaluating an expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,

    #[error("unsupported operand types for {op}: {left} and {right}")]
    OperandTypes {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("bad operand type for unary {op}: {operand}")]
    UnaryOperandType {
        op: &'static str,
        operand: &'static str,
    },

    #[error("expected a number, got {0}")]
    NotANumber(&'static str),

    #[error("expected an integer, got {0}")]
    NotAnInteger(&'static str),

    #[error("expected a string, got {0}")]
    NotAString(&'static str),
}

/// A runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(Arc<str>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            Value::Str(_) => None,
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    /// Numeric value as f64
    pub fn to_f64(&self) -> Result<f64, EvalError> {
        self.as_f64().ok_or(EvalError::NotANumber(self.type_name()))
    }

    /// Integer value; floats are truncated toward zero
    pub fn to_i64_truncating(&self) -> Result<i64, EvalError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(x) if x.is_finite() => Ok(x.trunc() as i64),
            Value::Float(_) => Err(EvalError::Overflow),
            Value::Str(_) => Err(EvalError::NotANumber("str")),
        }
    }

    /// Integer value; floats are rejected
    pub fn to_i64_strict(&self) -> Result<i64, EvalError> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(EvalError::NotAnInteger(other.type_name())),
        }
    }

    pub fn as_str(&self) -> Result<&str, EvalError> {
        match self {
            Value::Str(s) => Ok(&**s),
            other => Err(EvalError::NotAString(other.type_name())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Less
                | BinaryOp::LessEq
                | BinaryOp::Greater
                | BinaryOp::GreaterEq
        )
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
        }
    }
}

/// An expression over literals and loop variables
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Value),
    /// Loop variable, by slot
    Var(usize),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn as_const(&self) -> Option<&Value> {
        match self {
            Expr::Const(value) => Some(value),
            _ => None,
        }
    }

    pub fn eval(&self, vars: &[Value]) -> Result<Value, EvalError> {
        match self {
            Expr::Const(value) => Ok(value.clone()),
            Expr::Var(slot) => Ok(vars.get(*slot).cloned().unwrap_or(Value::Int(0))),
            Expr::Unary(op, operand) => apply_unary(*op, &operand.eval(vars)?),
            Expr::Binary(op, left, right) => {
                apply_binary(*op, &left.eval(vars)?, &right.eval(vars)?)
            }
        }
    }
}

pub(crate) fn apply_unary(op: UnaryOp, value: &Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Int(i64::from(!v.is_truthy()))),
        (UnaryOp::Plus, Value::Int(n)) => Ok(Value::Int(*n)),
        (UnaryOp::Plus, Value::Float(x)) => Ok(Value::Float(*x)),
        (UnaryOp::Neg, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or(EvalError::Overflow),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (op, Value::Str(_)) => Err(EvalError::UnaryOperandType {
            op: if op == UnaryOp::Neg { "-" } else { "+" },
            operand: "str",
        }),
    }
}

pub(crate) fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let type_error = || EvalError::OperandTypes {
        op: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    };

    // Comparisons first: they also accept strings
    if op.is_comparison() {
        let ordering = match (left, right) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                return match op {
                    BinaryOp::Eq => Ok(Value::Int(0)),
                    BinaryOp::NotEq => Ok(Value::Int(1)),
                    _ => Err(type_error()),
                };
            }
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) => a
                .as_f64()
                .zip(b.as_f64())
                .and_then(|(a, b)| a.partial_cmp(&b)),
        };
        return Ok(Value::Int(i64::from(compare(op, ordering))));
    }

    match (left, right) {
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => {
            Ok(Value::Str(format!("{}{}", a, b).into()))
        }
        (Value::Str(_), _) | (_, Value::Str(_)) => Err(type_error()),
        (Value::Int(a), Value::Int(b)) => int_arith(op, *a, *b),
        (a, b) => {
            let (a, b) = (a.to_f64()?, b.to_f64()?);
            float_arith(op, a, b).map(Value::Float)
        }
    }
}

fn compare(op: BinaryOp, ordering: Option<Ordering>) -> bool {
    match op {
        BinaryOp::Eq => ordering == Some(Ordering::Equal),
        BinaryOp::NotEq => ordering != Some(Ordering::Equal),
        BinaryOp::Less => ordering == Some(Ordering::Less),
        BinaryOp::LessEq => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        BinaryOp::Greater => ordering == Some(Ordering::Greater),
        BinaryOp::GreaterEq => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        _ => false,
    }
}

fn int_arith(op: BinaryOp, a: i64, b: i64) -> Result<Value, EvalError> {
    let checked = |r: Option<i64>| r.map(Value::Int).ok_or(EvalError::Overflow);
    match op {
        BinaryOp::Add => checked(a.checked_add(b)),
        BinaryOp::Sub => checked(a.checked_sub(b)),
        BinaryOp::Mul => checked(a.checked_mul(b)),
        BinaryOp::Div => float_arith(op, a as f64, b as f64).map(Value::Float),
        BinaryOp::FloorDiv | BinaryOp::Mod => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            let q = a.checked_div(b).ok_or(EvalError::Overflow)?;
            let r = a - q * b;
            // Round toward negative infinity
            let (q, r) = if r != 0 && (r < 0) != (b < 0) {
                (q - 1, r + b)
            } else {
                (q, r)
            };
            Ok(Value::Int(if op == BinaryOp::Mod { r } else { q }))
        }
        _ => Err(EvalError::Overflow),
    }
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> Result<f64, EvalError> {
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod if b == 0.0 => {
            return Err(EvalError::DivisionByZero);
        }
        BinaryOp::Div => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        BinaryOp::Mod => a - b * (a / b).floor(),
        _ => return Err(EvalError::Overflow),
    };
    if result.is_finite() {
        Ok(result)
    } else {
        Err(EvalError::Overflow)
    }
}

/// One operation of the instruction sequence
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    WriteDmx { address: Expr, value: Expr },
    Sleep { seconds: Expr },
    PlaySound { filename: Expr, volume: Expr },
    WaitForSound,
    StopSound,
    /// Enter a `for` loop over `range(start, stop, step)`; jump to `exit`
    /// when the range is empty
    LoopRange {
        slot: usize,
        start: Expr,
        stop: Expr,
        step: Expr,
        exit: usize,
    },
    /// Advance the loop whose head is at `head`
    EndLoop { head: usize },
}

/// A compiled instruction sequence
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) lines: Vec<usize>,
    pub(crate) slot_count: usize,
}

impl Program {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Source line of the instruction at `ip`
    pub fn line_of(&self, ip: usize) -> usize {
        self.lines.get(ip).copied().unwrap_or(0)
    }

    /// Number of loop-variable slots the interpreter must provide
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn uses_audio(&self) -> bool {
        self.instructions.iter().any(|i| {
            matches!(
                i,
                Instruction::PlaySound { .. } | Instruction::WaitForSound | Instruction::StopSound
            )
        })
    }

    pub(crate) fn push(&mut self, instruction: Instruction, line: usize) -> usize {
        self.instructions.push(instruction);
        self.lines.push(line);
        self.instructions.len() - 1
    }
}
