//! Script Validator
//!
//! Recursive-descent parser that compiles the token stream straight into a
//! [`Program`]. There is no separate syntax tree: every construct outside
//! the sequence vocabulary is rejected the moment it is seen, and
//! expressions that do not mention a loop variable are folded to constants
//! so their arguments can be range-checked before anything runs.

use sequenzer_dmx::DMX_CHANNELS;

use crate::config::ScriptLimits;
use crate::script::error::{CompileWarning, ValidationError, ValidationErrorKind};
use crate::script::lexer::{Token, TokenKind};
use crate::script::program::{
    apply_binary, apply_unary, BinaryOp, Expr, Instruction, Program, UnaryOp, Value,
};
use crate::script::Deadline;

/// Literal sleeps longer than this compile with a warning
const LONG_SLEEP_SECONDS: f64 = 3600.0;

/// Python keywords and builtins with no meaning in a sequence
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "finally", "from", "global", "if", "import", "in", "is", "lambda", "None",
    "nonlocal", "or", "raise", "return", "try", "while", "with", "yield",
];

/// The callable vocabulary: name and parameter names, required ones first
struct Operation {
    name: &'static str,
    params: &'static [&'static str],
    required: usize,
}

const OPERATIONS: &[Operation] = &[
    Operation {
        name: "write_dmx",
        params: &["address", "value"],
        required: 2,
    },
    Operation {
        name: "play_sound",
        params: &["filename", "volume"],
        required: 1,
    },
    Operation {
        name: "sleep",
        params: &["seconds"],
        required: 1,
    },
    Operation {
        name: "wait_for_sound",
        params: &[],
        required: 0,
    },
    Operation {
        name: "stop_sound",
        params: &[],
        required: 0,
    },
];

fn operation(name: &str) -> Option<&'static Operation> {
    OPERATIONS.iter().find(|op| op.name == name)
}

fn is_reserved(name: &str) -> bool {
    FORBIDDEN_KEYWORDS.contains(&name)
        || operation(name).is_some()
        || matches!(name, "for" | "not" | "pass" | "range" | "True" | "False")
}

/// One call argument as written
struct Argument {
    keyword: Option<String>,
    expr: Expr,
    line: usize,
    column: usize,
}

type ParseResult<T> = Result<T, ValidationError>;

pub(crate) struct Compiler<'a> {
    tokens: Vec<Token>,
    position: usize,
    limits: &'a ScriptLimits,
    deadline: &'a Deadline,
    program: Program,
    /// Visible loop variables, innermost last
    scopes: Vec<(String, usize)>,
    loop_depth: usize,
    expr_depth: usize,
    warnings: Vec<CompileWarning>,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(tokens: Vec<Token>, limits: &'a ScriptLimits, deadline: &'a Deadline) -> Self {
        Self {
            tokens,
            position: 0,
            limits,
            deadline,
            program: Program::default(),
            scopes: Vec::new(),
            loop_depth: 0,
            expr_depth: 0,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn compile(mut self) -> ParseResult<(Program, Vec<CompileWarning>)> {
        while self.kind() != &TokenKind::Eof {
            self.statement()?;
        }
        Ok((self.program, self.warnings))
    }

    // ========================================================================
    // Token access
    // ========================================================================

    fn current(&self) -> &Token {
        // The lexer always terminates the stream with Eof
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.position.min(last)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.position + 1).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, kind: ValidationErrorKind) -> ValidationError {
        ValidationError::new(token.line, token.column, kind)
    }

    fn error(&self, kind: ValidationErrorKind) -> ValidationError {
        self.error_at(self.current(), kind)
    }

    fn unexpected(&self, expected: &str) -> ValidationError {
        self.error(ValidationErrorKind::UnexpectedToken {
            expected: expected.to_string(),
            found: self.kind().to_string(),
        })
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<Token> {
        if self.kind() == &kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_name(&mut self, name: &str) -> ParseResult<Token> {
        match self.kind() {
            TokenKind::Name(n) if n == name => Ok(self.advance()),
            _ => Err(self.unexpected(&format!("'{}'", name))),
        }
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.scopes
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, slot)| *slot)
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn statement(&mut self) -> ParseResult<()> {
        self.deadline.check(self.current().line, self.current().column)?;

        if matches!(self.kind(), TokenKind::Name(name) if name == "for") {
            self.for_statement()
        } else if self.kind() == &TokenKind::Indent {
            Err(self.unexpected("a statement"))
        } else {
            self.simple_statements()
        }
    }

    /// `stmt (';' stmt)* [';'] NEWLINE`
    fn simple_statements(&mut self) -> ParseResult<()> {
        loop {
            self.simple_statement()?;
            if self.kind() != &TokenKind::Semicolon {
                break;
            }
            self.advance();
            if self.kind() == &TokenKind::Newline {
                break;
            }
        }
        self.expect(TokenKind::Newline, "end of line")?;
        Ok(())
    }

    fn simple_statement(&mut self) -> ParseResult<()> {
        let token = self.current().clone();
        let name = match &token.kind {
            TokenKind::Name(name) => name.clone(),
            TokenKind::LeftParen => {
                return Err(self.error_at(&token, ValidationErrorKind::IndirectCall));
            }
            _ => return Err(self.unexpected("a statement")),
        };

        if name == "pass" {
            self.advance();
            return Ok(());
        }
        if FORBIDDEN_KEYWORDS.contains(&name.as_str()) {
            return Err(self.error_at(&token, ValidationErrorKind::ForbiddenKeyword(name)));
        }
        if name == "for" {
            return Err(self.unexpected("a simple statement"));
        }

        self.advance();
        match self.kind() {
            TokenKind::LeftParen => self.call(&name, &token),
            TokenKind::Dot => Err(self.error(ValidationErrorKind::AttributeAccess)),
            TokenKind::LeftBracket => Err(self.error(ValidationErrorKind::Subscript)),
            TokenKind::Assign => Err(self.error(ValidationErrorKind::Assignment)),
            _ if operation(&name).is_some() => Err(self.unexpected("'('")),
            _ if is_reserved(&name) || self.lookup(&name).is_some() => {
                Err(self.error_at(&token, ValidationErrorKind::IndirectCall))
            }
            _ => Err(self.error_at(&token, ValidationErrorKind::UnknownName(name))),
        }
    }

    /// `for NAME in range(args): suite`
    fn for_statement(&mut self) -> ParseResult<()> {
        let for_token = self.advance();

        let var_token = self.advance();
        let var = match &var_token.kind {
            TokenKind::Name(name) if !is_reserved(name) => name.clone(),
            other => {
                return Err(self.error_at(
                    &var_token,
                    ValidationErrorKind::UnexpectedToken {
                        expected: "a loop variable name".into(),
                        found: other.to_string(),
                    },
                ));
            }
        };

        self.expect_name("in")?;
        let range_token = self.expect_name("range")?;
        let (start, stop, step) = self.range_arguments(&range_token)?;
        self.expect(TokenKind::Colon, "':'")?;

        self.loop_depth += 1;
        if self.loop_depth > self.limits.max_nesting_depth {
            return Err(self.error_at(
                &for_token,
                ValidationErrorKind::NestingTooDeep(self.limits.max_nesting_depth),
            ));
        }
        let slot = self.loop_depth - 1;
        self.program.slot_count = self.program.slot_count.max(self.loop_depth);

        let head = self.program.push(
            Instruction::LoopRange {
                slot,
                start,
                stop,
                step,
                exit: 0,
            },
            for_token.line,
        );

        self.scopes.push((var, slot));
        self.suite()?;
        self.scopes.pop();
        self.loop_depth -= 1;

        let end = self
            .program
            .push(Instruction::EndLoop { head }, for_token.line);
        if let Some(Instruction::LoopRange { exit, .. }) = self.program.instructions.get_mut(head) {
            *exit = end + 1;
        }
        Ok(())
    }

    /// Statements on the same line, or an indented block
    fn suite(&mut self) -> ParseResult<()> {
        if self.kind() != &TokenKind::Newline {
            return self.simple_statements();
        }
        self.advance();
        self.expect(TokenKind::Indent, "an indented block")?;
        loop {
            self.statement()?;
            match self.kind() {
                TokenKind::Dedent => {
                    self.advance();
                    return Ok(());
                }
                TokenKind::Eof => return Ok(()),
                _ => {}
            }
        }
    }

    /// `( expr [, expr [, expr]] )` normalized to (start, stop, step)
    fn range_arguments(&mut self, range_token: &Token) -> ParseResult<(Expr, Expr, Expr)> {
        self.expect(TokenKind::LeftParen, "'('")?;
        let mut args = Vec::new();
        while self.kind() != &TokenKind::RightParen {
            if let (TokenKind::Name(name), Some(TokenKind::Assign)) = (self.kind(), self.peek_kind()) {
                let kind = ValidationErrorKind::UnknownArgument {
                    function: "range".into(),
                    argument: name.clone(),
                };
                return Err(self.error(kind));
            }
            let token = self.current().clone();
            args.push((self.expression()?, token));
            if self.kind() != &TokenKind::Comma {
                break;
            }
            self.advance();
        }
        self.expect(TokenKind::RightParen, "')'")?;

        for (expr, token) in &args {
            if let Some(value) = expr.as_const() {
                value.to_i64_strict().map_err(|_| {
                    self.error_at(
                        token,
                        ValidationErrorKind::InvalidRange(format!(
                            "arguments must be integers, got {}",
                            value.type_name()
                        )),
                    )
                })?;
            }
        }

        let count = args.len();
        let mut args = args.into_iter().map(|(expr, _)| expr);
        let mut next = || args.next().unwrap_or(Expr::Const(Value::Int(0)));
        let (start, stop, step) = match count {
            1 => (Expr::Const(Value::Int(0)), next(), Expr::Const(Value::Int(1))),
            2 => {
                let start = next();
                (start, next(), Expr::Const(Value::Int(1)))
            }
            3 => {
                let start = next();
                let stop = next();
                (start, stop, next())
            }
            n => {
                return Err(self.error_at(
                    range_token,
                    ValidationErrorKind::InvalidRange(format!("expected 1 to 3 arguments, got {}", n)),
                ));
            }
        };

        if let Some(Value::Int(0)) = step.as_const() {
            return Err(self.error_at(
                range_token,
                ValidationErrorKind::InvalidRange("step must not be zero".into()),
            ));
        }
        if let (Some(Value::Int(a)), Some(Value::Int(b)), Some(Value::Int(c))) =
            (start.as_const(), stop.as_const(), step.as_const())
        {
            let len = range_len(*a, *b, *c);
            if len > self.limits.max_range_len {
                return Err(self.error_at(
                    range_token,
                    ValidationErrorKind::InvalidRange(format!(
                        "{} iterations exceed the limit of {}",
                        len, self.limits.max_range_len
                    )),
                ));
            }
        }
        Ok((start, stop, step))
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn call(&mut self, name: &str, name_token: &Token) -> ParseResult<()> {
        let Some(op) = operation(name) else {
            return Err(if is_reserved(name) || self.lookup(name).is_some() {
                self.error_at(name_token, ValidationErrorKind::IndirectCall)
            } else {
                self.error_at(name_token, ValidationErrorKind::UnknownName(name.to_string()))
            });
        };

        let args = self.arguments()?;
        self.reject_postfix()?;
        let mut bound = self.bind(op, args, name_token)?.into_iter();
        let mut arg = || bound.next().flatten();
        let line = name_token.line;

        let instruction = match op.name {
            "write_dmx" => {
                let address = self.dmx_argument(op, arg(), "address", 1, DMX_CHANNELS as i64)?;
                let value = self.dmx_argument(op, arg(), "value", 0, 255)?;
                Instruction::WriteDmx { address, value }
            }
            "sleep" => Instruction::Sleep {
                seconds: self.sleep_argument(arg())?,
            },
            "play_sound" => {
                let filename = self.filename_argument(arg())?;
                let volume = self.volume_argument(arg())?;
                Instruction::PlaySound { filename, volume }
            }
            "wait_for_sound" => Instruction::WaitForSound,
            _ => Instruction::StopSound,
        };
        self.program.push(instruction, line);
        Ok(())
    }

    /// `'(' [arg (',' arg)* [',']] ')'`
    fn arguments(&mut self) -> ParseResult<Vec<Argument>> {
        self.expect(TokenKind::LeftParen, "'('")?;
        let mut args = Vec::new();
        while self.kind() != &TokenKind::RightParen {
            let token = self.current().clone();
            let keyword = match (&token.kind, self.peek_kind()) {
                (TokenKind::Name(name), Some(TokenKind::Assign)) => {
                    self.advance();
                    self.advance();
                    Some(name.clone())
                }
                _ => None,
            };
            args.push(Argument {
                keyword,
                expr: self.expression()?,
                line: token.line,
                column: token.column,
            });
            if self.kind() != &TokenKind::Comma {
                break;
            }
            self.advance();
        }
        self.expect(TokenKind::RightParen, "')'")?;
        Ok(args)
    }

    /// Match arguments to parameters, by position then by keyword
    fn bind(
        &self,
        op: &Operation,
        args: Vec<Argument>,
        call_token: &Token,
    ) -> ParseResult<Vec<Option<Argument>>> {
        let mut bound: Vec<Option<Argument>> = op.params.iter().map(|_| None).collect();
        let mut seen_keyword = false;

        for (index, arg) in args.into_iter().enumerate() {
            let slot = match &arg.keyword {
                None => {
                    if seen_keyword {
                        return Err(ValidationError::new(
                            arg.line,
                            arg.column,
                            ValidationErrorKind::PositionalAfterKeyword,
                        ));
                    }
                    if index >= op.params.len() {
                        return Err(ValidationError::new(
                            arg.line,
                            arg.column,
                            ValidationErrorKind::TooManyArguments {
                                function: op.name.into(),
                                max: op.params.len(),
                            },
                        ));
                    }
                    index
                }
                Some(keyword) => {
                    seen_keyword = true;
                    let position = op.params.iter().position(|p| p == keyword);
                    let Some(position) = position else {
                        return Err(ValidationError::new(
                            arg.line,
                            arg.column,
                            ValidationErrorKind::UnknownArgument {
                                function: op.name.into(),
                                argument: keyword.clone(),
                            },
                        ));
                    };
                    if bound[position].is_some() {
                        return Err(ValidationError::new(
                            arg.line,
                            arg.column,
                            ValidationErrorKind::DuplicateArgument {
                                function: op.name.into(),
                                argument: keyword.clone(),
                            },
                        ));
                    }
                    position
                }
            };
            bound[slot] = Some(arg);
        }

        if let Some(missing) = (0..op.required).find(|&i| bound[i].is_none()) {
            return Err(self.error_at(
                call_token,
                ValidationErrorKind::MissingArgument {
                    function: op.name.into(),
                    argument: op.params[missing].into(),
                },
            ));
        }
        Ok(bound)
    }

    /// Address or value: truncated to an integer and range-checked when static
    fn dmx_argument(
        &self,
        op: &Operation,
        arg: Option<Argument>,
        name: &str,
        min: i64,
        max: i64,
    ) -> ParseResult<Expr> {
        let Some(arg) = arg else {
            return Err(self.missing(op, name));
        };
        let Some(value) = arg.expr.as_const() else {
            return Ok(arg.expr);
        };

        let n = value
            .to_i64_truncating()
            .map_err(|e| ValidationError::new(arg.line, arg.column, e.into()))?;
        if n < min || n > max {
            return Err(ValidationError::new(
                arg.line,
                arg.column,
                ValidationErrorKind::ArgumentOutOfRange {
                    function: op.name.into(),
                    argument: name.into(),
                    message: format!("{} is outside {}-{}", n, min, max),
                },
            ));
        }
        Ok(Expr::Const(Value::Int(n)))
    }

    fn sleep_argument(&mut self, arg: Option<Argument>) -> ParseResult<Expr> {
        let Some(arg) = arg else {
            return Err(self.missing_named("sleep", "seconds"));
        };
        let Some(value) = arg.expr.as_const() else {
            return Ok(arg.expr);
        };

        let seconds = value
            .to_f64()
            .map_err(|e| ValidationError::new(arg.line, arg.column, e.into()))?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ValidationError::new(
                arg.line,
                arg.column,
                ValidationErrorKind::ArgumentOutOfRange {
                    function: "sleep".into(),
                    argument: "seconds".into(),
                    message: format!("must be a finite non-negative number, got {}", seconds),
                },
            ));
        }
        if seconds > LONG_SLEEP_SECONDS {
            self.warnings.push(CompileWarning {
                line: arg.line,
                message: format!("sleep of {}s is longer than an hour", seconds),
            });
        }
        Ok(arg.expr)
    }

    fn filename_argument(&self, arg: Option<Argument>) -> ParseResult<Expr> {
        let Some(arg) = arg else {
            return Err(self.missing_named("play_sound", "filename"));
        };
        if let Some(value) = arg.expr.as_const() {
            value
                .as_str()
                .map_err(|e| ValidationError::new(arg.line, arg.column, e.into()))?;
        }
        Ok(arg.expr)
    }

    fn volume_argument(&self, arg: Option<Argument>) -> ParseResult<Expr> {
        let Some(arg) = arg else {
            return Ok(Expr::Const(Value::Float(1.0)));
        };
        let Some(value) = arg.expr.as_const() else {
            return Ok(arg.expr);
        };

        let volume = value
            .to_f64()
            .map_err(|e| ValidationError::new(arg.line, arg.column, e.into()))?;
        if !(0.0..=1.0).contains(&volume) {
            return Err(ValidationError::new(
                arg.line,
                arg.column,
                ValidationErrorKind::ArgumentOutOfRange {
                    function: "play_sound".into(),
                    argument: "volume".into(),
                    message: format!("must be between 0.0 and 1.0, got {}", volume),
                },
            ));
        }
        Ok(arg.expr)
    }

    fn missing(&self, op: &Operation, argument: &str) -> ValidationError {
        self.missing_named(op.name, argument)
    }

    fn missing_named(&self, function: &str, argument: &str) -> ValidationError {
        self.error(ValidationErrorKind::MissingArgument {
            function: function.into(),
            argument: argument.into(),
        })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn enter(&mut self) -> ParseResult<()> {
        self.expr_depth += 1;
        if self.expr_depth > self.limits.max_nesting_depth {
            return Err(self.error(ValidationErrorKind::NestingTooDeep(
                self.limits.max_nesting_depth,
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.expr_depth = self.expr_depth.saturating_sub(1);
    }

    fn expression(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let expr = self.not_expression();
        self.leave();
        expr
    }

    fn not_expression(&mut self) -> ParseResult<Expr> {
        if matches!(self.kind(), TokenKind::Name(n) if n == "not") {
            let token = self.advance();
            self.enter()?;
            let operand = self.not_expression();
            self.leave();
            return self.fold_unary(UnaryOp::Not, operand?, &token);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let left = self.arithmetic()?;
        let op = match self.kind() {
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::NotEq,
            TokenKind::Less => BinaryOp::Less,
            TokenKind::LessEq => BinaryOp::LessEq,
            TokenKind::Greater => BinaryOp::Greater,
            TokenKind::GreaterEq => BinaryOp::GreaterEq,
            _ => return Ok(left),
        };
        let token = self.advance();
        let right = self.arithmetic()?;
        let expr = self.fold_binary(op, left, right, &token)?;

        if matches!(
            self.kind(),
            TokenKind::EqEq
                | TokenKind::NotEq
                | TokenKind::Less
                | TokenKind::LessEq
                | TokenKind::Greater
                | TokenKind::GreaterEq
        ) {
            return Err(self.unexpected("a single comparison"));
        }
        Ok(expr)
    }

    fn arithmetic(&mut self) -> ParseResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            let token = self.advance();
            let right = self.term()?;
            left = self.fold_binary(op, left, right, &token)?;
        }
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::DoubleSlash => BinaryOp::FloorDiv,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            let token = self.advance();
            let right = self.factor()?;
            left = self.fold_binary(op, left, right, &token)?;
        }
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let op = match self.kind() {
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.atom(),
        };
        let token = self.advance();
        self.enter()?;
        let operand = self.factor();
        self.leave();
        self.fold_unary(op, operand?, &token)
    }

    fn atom(&mut self) -> ParseResult<Expr> {
        let token = self.current().clone();
        let expr = match &token.kind {
            TokenKind::Int(n) => Expr::Const(Value::Int(*n)),
            TokenKind::Float(x) => Expr::Const(Value::Float(*x)),
            TokenKind::Str(s) => Expr::Const(Value::Str(s.as_str().into())),
            TokenKind::Name(name) => return self.name_atom(name.clone(), &token),
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(TokenKind::RightParen, "')'")?;
                self.reject_postfix()?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected("an expression")),
        };
        self.advance();
        self.reject_postfix()?;
        Ok(expr)
    }

    fn name_atom(&mut self, name: String, token: &Token) -> ParseResult<Expr> {
        self.advance();
        let expr = match name.as_str() {
            "True" => Expr::Const(Value::Int(1)),
            "False" => Expr::Const(Value::Int(0)),
            _ if operation(&name).is_some() || name == "range" => {
                return Err(self.error_at(token, ValidationErrorKind::CallAsValue(name)));
            }
            _ if FORBIDDEN_KEYWORDS.contains(&name.as_str()) => {
                return Err(self.error_at(token, ValidationErrorKind::ForbiddenKeyword(name)));
            }
            _ => match self.lookup(&name) {
                Some(slot) => Expr::Var(slot),
                None => {
                    return Err(self.error_at(token, ValidationErrorKind::UnknownName(name)));
                }
            },
        };
        self.reject_postfix()?;
        Ok(expr)
    }

    /// Calls, attribute access and subscripts on a value
    fn reject_postfix(&self) -> ParseResult<()> {
        match self.kind() {
            TokenKind::LeftParen => Err(self.error(ValidationErrorKind::IndirectCall)),
            TokenKind::Dot => Err(self.error(ValidationErrorKind::AttributeAccess)),
            TokenKind::LeftBracket => Err(self.error(ValidationErrorKind::Subscript)),
            _ => Ok(()),
        }
    }

    fn fold_unary(&self, op: UnaryOp, operand: Expr, token: &Token) -> ParseResult<Expr> {
        match operand {
            Expr::Const(value) => apply_unary(op, &value)
                .map(Expr::Const)
                .map_err(|e| self.error_at(token, e.into())),
            operand => Ok(Expr::Unary(op, Box::new(operand))),
        }
    }

    fn fold_binary(&self, op: BinaryOp, left: Expr, right: Expr, token: &Token) -> ParseResult<Expr> {
        match (left, right) {
            (Expr::Const(a), Expr::Const(b)) => apply_binary(op, &a, &b)
                .map(Expr::Const)
                .map_err(|e| self.error_at(token, e.into())),
            (left, right) => Ok(Expr::Binary(op, Box::new(left), Box::new(right))),
        }
    }
}

/// Number of values `range(start, stop, step)` yields
pub(crate) fn range_len(start: i64, stop: i64, step: i64) -> u64 {
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let len = if step > 0 && start < stop {
        (stop - start - 1) / step + 1
    } else if step < 0 && start > stop {
        (start - stop - 1) / -step + 1
    } else {
        0
    };
    u64::try_from(len).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_len() {
        assert_eq!(range_len(0, 10, 1), 10);
        assert_eq!(range_len(0, 256, 10), 26);
        assert_eq!(range_len(255, -1, -10), 26);
        assert_eq!(range_len(5, 0, 1), 0);
        assert_eq!(range_len(0, 0, 1), 0);
        assert_eq!(range_len(i64::MIN, i64::MAX, 1), u64::MAX);
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("import"));
        assert!(is_reserved("sleep"));
        assert!(is_reserved("range"));
        assert!(!is_reserved("brightness"));
    }
}
