//! Tokenizer
//!
//! Produces an indentation-aware token stream: `Indent`/`Dedent` mark block
//! structure, `Newline` ends a logical line. Newlines inside brackets are
//! ignored, so long calls may span lines.

use std::fmt;

use crate::script::error::{ValidationError, ValidationErrorKind};
use crate::script::Deadline;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    // Identifiers and literals
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    EqEq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Assign,
    Dot,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    Semicolon,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Name(name) => write!(f, "{:?}", name),
            TokenKind::Int(n) => write!(f, "{}", n),
            TokenKind::Float(x) => write!(f, "{}", x),
            TokenKind::Str(s) => write!(f, "string {:?}", s),
            TokenKind::Plus => f.write_str("'+'"),
            TokenKind::Minus => f.write_str("'-'"),
            TokenKind::Star => f.write_str("'*'"),
            TokenKind::Slash => f.write_str("'/'"),
            TokenKind::DoubleSlash => f.write_str("'//'"),
            TokenKind::Percent => f.write_str("'%'"),
            TokenKind::EqEq => f.write_str("'=='"),
            TokenKind::NotEq => f.write_str("'!='"),
            TokenKind::Less => f.write_str("'<'"),
            TokenKind::LessEq => f.write_str("'<='"),
            TokenKind::Greater => f.write_str("'>'"),
            TokenKind::GreaterEq => f.write_str("'>='"),
            TokenKind::Assign => f.write_str("'='"),
            TokenKind::Dot => f.write_str("'.'"),
            TokenKind::LeftParen => f.write_str("'('"),
            TokenKind::RightParen => f.write_str("')'"),
            TokenKind::LeftBracket => f.write_str("'['"),
            TokenKind::RightBracket => f.write_str("']'"),
            TokenKind::Comma => f.write_str("','"),
            TokenKind::Colon => f.write_str("':'"),
            TokenKind::Semicolon => f.write_str("';'"),
            TokenKind::Newline => f.write_str("end of line"),
            TokenKind::Indent => f.write_str("indent"),
            TokenKind::Dedent => f.write_str("dedent"),
            TokenKind::Eof => f.write_str("end of script"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

struct Tokenizer<'a> {
    chars: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    bracket_depth: usize,
    /// Open block widths as (tabs to 8 columns, tabs as 1 column)
    indents: Vec<(usize, usize)>,
    tokens: Vec<Token>,
    deadline: &'a Deadline,
}

impl<'a> Tokenizer<'a> {
    fn new(source: &str, deadline: &'a Deadline) -> Self {
        Self {
            chars: source.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            bracket_depth: 0,
            indents: vec![(0, 0)],
            tokens: Vec::new(),
            deadline,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        if self.current() == Some('\n') {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.position += 1;
    }

    fn error(&self, kind: ValidationErrorKind) -> ValidationError {
        ValidationError::new(self.line, self.column, kind)
    }

    fn push(&mut self, kind: TokenKind, line: usize, column: usize) {
        self.tokens.push(Token { kind, line, column });
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            match ch {
                ' ' | '\t' | '\r' | '\x0c' => self.advance(),
                '\\' if self.peek() == Some('\n') => {
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn skip_comment(&mut self) {
        if self.current() == Some('#') {
            while let Some(ch) = self.current() {
                if ch == '\n' {
                    break;
                }
                self.advance();
            }
        }
    }

    /// Measure a new line's indentation and emit Indent/Dedent tokens.
    /// Returns false for blank and comment-only lines.
    fn read_indentation(&mut self) -> Result<bool, ValidationError> {
        let mut width = 0;
        let mut alt_width = 0;
        while let Some(ch) = self.current() {
            match ch {
                ' ' => {
                    width += 1;
                    alt_width += 1;
                }
                '\t' => {
                    width = (width / 8 + 1) * 8;
                    alt_width += 1;
                }
                '\r' | '\x0c' => {}
                _ => break,
            }
            self.advance();
        }

        match self.current() {
            None => return Ok(false),
            Some('\n') => {
                self.advance();
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(false);
            }
            _ => {}
        }

        // Tabs and spaces must order the lines the same way under both
        // tab widths, otherwise the block structure depends on the editor
        let inconsistent = ValidationErrorKind::InconsistentIndentation;
        let (top, alt_top) = self.top_indent();
        if width > top {
            if alt_width <= alt_top {
                return Err(self.error(inconsistent));
            }
            self.indents.push((width, alt_width));
            self.push(TokenKind::Indent, self.line, 1);
        } else {
            while width < self.top_indent().0 {
                self.indents.pop();
                self.push(TokenKind::Dedent, self.line, 1);
            }
            if (width, alt_width) != self.top_indent() {
                return Err(self.error(inconsistent));
            }
        }
        Ok(true)
    }

    fn top_indent(&self) -> (usize, usize) {
        self.indents.last().copied().unwrap_or((0, 0))
    }

    fn read_number(&mut self) -> Result<TokenKind, ValidationError> {
        let start = self.position;
        let mut is_float = false;

        while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        if self.current() == Some('.') {
            is_float = true;
            self.advance();
            while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.current(), Some('e' | 'E')) {
            is_float = true;
            self.advance();
            if matches!(self.current(), Some('+' | '-')) {
                self.advance();
            }
            while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        while matches!(self.current(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.advance();
        }

        let text: String = self.chars[start..self.position].iter().collect();
        let invalid = || ValidationErrorKind::InvalidNumber(text.clone());
        if is_float {
            text.parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .map(TokenKind::Float)
                .ok_or_else(|| self.error(invalid()))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|_| self.error(invalid()))
        }
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while matches!(self.current(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.advance();
        }
        self.chars[start..self.position].iter().collect()
    }

    fn read_string(&mut self) -> Result<String, ValidationError> {
        let quote = self.current();
        self.advance();
        let mut value = String::new();

        loop {
            match self.current() {
                None | Some('\n') => {
                    return Err(self.error(ValidationErrorKind::UnterminatedString));
                }
                Some(c) if Some(c) == quote => {
                    self.advance();
                    return Ok(value);
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some(c @ ('\\' | '\'' | '"')) => value.push(c),
                        Some('\n') => {}
                        Some(c) => {
                            value.push('\\');
                            value.push(c);
                        }
                        None => {
                            return Err(self.error(ValidationErrorKind::UnterminatedString));
                        }
                    }
                    self.advance();
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
    }

    fn single(&mut self, kind: TokenKind) {
        let (line, column) = (self.line, self.column);
        self.advance();
        self.push(kind, line, column);
    }

    fn double(&mut self, kind: TokenKind) {
        let (line, column) = (self.line, self.column);
        self.advance();
        self.advance();
        self.push(kind, line, column);
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ValidationError> {
        let mut at_line_start = true;

        loop {
            if at_line_start && self.bracket_depth == 0 {
                self.deadline.check(self.line, self.column)?;
                if !self.read_indentation()? {
                    if self.current().is_none() {
                        break;
                    }
                    continue;
                }
                at_line_start = false;
            }

            self.skip_whitespace();
            self.skip_comment();

            let (line, column) = (self.line, self.column);
            let Some(ch) = self.current() else {
                break;
            };

            match ch {
                '\n' => {
                    self.advance();
                    if self.bracket_depth == 0 {
                        self.push(TokenKind::Newline, line, column);
                        at_line_start = true;
                    }
                }
                '0'..='9' => {
                    let kind = self.read_number()?;
                    self.push(kind, line, column);
                }
                '.' if matches!(self.peek(), Some(c) if c.is_ascii_digit()) => {
                    let kind = self.read_number()?;
                    self.push(kind, line, column);
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let name = self.read_identifier();
                    self.push(TokenKind::Name(name), line, column);
                }
                '\'' | '"' => {
                    let value = self.read_string()?;
                    self.push(TokenKind::Str(value), line, column);
                }
                '(' | '[' => {
                    self.bracket_depth += 1;
                    self.single(if ch == '(' {
                        TokenKind::LeftParen
                    } else {
                        TokenKind::LeftBracket
                    });
                }
                ')' | ']' => {
                    self.bracket_depth = self.bracket_depth.saturating_sub(1);
                    self.single(if ch == ')' {
                        TokenKind::RightParen
                    } else {
                        TokenKind::RightBracket
                    });
                }
                '/' if self.peek() == Some('/') => self.double(TokenKind::DoubleSlash),
                '=' if self.peek() == Some('=') => self.double(TokenKind::EqEq),
                '!' if self.peek() == Some('=') => self.double(TokenKind::NotEq),
                '<' if self.peek() == Some('=') => self.double(TokenKind::LessEq),
                '>' if self.peek() == Some('=') => self.double(TokenKind::GreaterEq),
                '+' => self.single(TokenKind::Plus),
                '-' => self.single(TokenKind::Minus),
                '*' => self.single(TokenKind::Star),
                '/' => self.single(TokenKind::Slash),
                '%' => self.single(TokenKind::Percent),
                '<' => self.single(TokenKind::Less),
                '>' => self.single(TokenKind::Greater),
                '=' => self.single(TokenKind::Assign),
                '.' => self.single(TokenKind::Dot),
                ',' => self.single(TokenKind::Comma),
                ':' => self.single(TokenKind::Colon),
                ';' => self.single(TokenKind::Semicolon),
                other => return Err(self.error(ValidationErrorKind::UnexpectedCharacter(other))),
            }
        }

        let (line, column) = (self.line, self.column);
        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline) | Some(TokenKind::Dedent)
        ) {
            self.push(TokenKind::Newline, line, column);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, line, column);
        }
        self.push(TokenKind::Eof, line, column);
        Ok(self.tokens)
    }
}

/// Split source text into tokens
pub(crate) fn tokenize(source: &str, deadline: &Deadline) -> Result<Vec<Token>, ValidationError> {
    Tokenizer::new(source, deadline).tokenize()
}
