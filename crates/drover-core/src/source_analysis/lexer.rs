// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Lexical analysis for Drover source code.
//!
//! The lexer is not a standalone pass: it shares the [`Context`] with the
//! parser, because several lexing decisions need parser state and several
//! tokens carry parsed trees:
//!
//! - Interpolations inside double-quoted strings and heredocs re-enter the
//!   expression parser mid-token; the resulting token's value is the
//!   pre-built concatenation expression.
//! - Heredoc bodies are captured from lines *after* the current one; the
//!   lexer records where the body ended and jumps over it when ordinary
//!   scanning reaches the end of the declaration line.
//! - `/` starts a regexp only where the previous token cannot have ended an
//!   expression; otherwise it is division.
//!
//! The parser half of [`Context`] lives in the [`parser`](super::parser)
//! module; this file owns token scanning and the public [`Lexer`] facade
//! used by token-level tests.

use std::sync::Arc;

use ecow::EcoString;

use crate::ast::Expression;
use crate::factory::{DefaultFactory, ExpressionFactory};

use super::parser::ParserOptions;
use super::reader::StringReader;
use super::{Locator, ParseError, ParseIssue, Span, TokenKind, TokenValue};

type Result<T> = std::result::Result<T, ParseError>;

/// The shared lexer/parser state: reader, locator, current token, options,
/// namestack, and the definition list collected for the program node.
pub(crate) struct Context {
    pub(crate) reader: StringReader,
    pub(crate) locator: Arc<Locator>,
    pub(crate) factory: Box<dyn ExpressionFactory>,
    pub(crate) options: ParserOptions,
    pub(crate) current_token: TokenKind,
    pub(crate) token_value: TokenValue,
    pub(crate) token_start_pos: usize,
    /// The token preceding the current one; drives the regexp/division and
    /// subscript/list decisions.
    pub(crate) last_token: TokenKind,
    /// Radix of the most recent integer token.
    pub(crate) radix: u32,
    /// Where scanning resumes once the current line ends; set while heredoc
    /// bodies are pending below the declaration line.
    pub(crate) next_line_start: Option<usize>,
    /// EPP: currently scanning literal template text.
    pub(crate) epp_in_text: bool,
    /// EPP: a `-%>` asked for the next newline to be dropped.
    pub(crate) epp_trim_newline: bool,
    /// Alternates bare `|` tokens between `Pipe` and `PipeEnd`.
    pub(crate) expect_pipe_end: bool,
    pub(crate) name_stack: Vec<EcoString>,
    pub(crate) definitions: Vec<Expression>,
}

/// Escape processing requested by a heredoc declaration.
#[derive(Debug, Clone, Default)]
struct HeredocEscapes {
    enabled: bool,
    all: bool,
    flags: Vec<char>,
}

impl HeredocEscapes {
    fn allows(&self, flag: char) -> bool {
        self.enabled && (self.all || self.flags.contains(&flag))
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_lower_word_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'
}

impl Context {
    pub(crate) fn new(options: ParserOptions, factory: Box<dyn ExpressionFactory>) -> Self {
        let epp = options.epp_mode;
        Self {
            reader: StringReader::new(EcoString::new()),
            locator: Arc::new(Locator::new("", "")),
            factory,
            options,
            current_token: TokenKind::End,
            token_value: TokenValue::None,
            token_start_pos: 0,
            last_token: TokenKind::End,
            radix: 10,
            next_line_start: None,
            epp_in_text: epp,
            epp_trim_newline: false,
            expect_pipe_end: false,
            name_stack: Vec::new(),
            definitions: Vec::new(),
        }
    }

    /// Prepares the context for a fresh parse of `source`.
    pub(crate) fn reset(&mut self, filename: &str, source: &str) {
        let text: EcoString = source.into();
        self.reader = StringReader::new(text.clone());
        self.locator = Arc::new(Locator::new(filename, text));
        self.current_token = TokenKind::End;
        self.token_value = TokenValue::None;
        self.token_start_pos = 0;
        self.last_token = TokenKind::End;
        self.radix = 10;
        self.next_line_start = None;
        self.epp_in_text = self.options.epp_mode;
        self.epp_trim_newline = false;
        self.expect_pipe_end = false;
        self.name_stack.clear();
        self.definitions.clear();
    }

    // ========================================================================
    // Positions and errors
    // ========================================================================

    /// Current reader position (the end of the current token).
    pub(crate) fn pos(&self) -> usize {
        self.reader.pos()
    }

    /// Repositions the reader; the current token becomes stale until the
    /// next [`Context::next_token`].
    pub(crate) fn set_pos(&mut self, pos: usize) {
        self.reader.set_pos(pos);
    }

    pub(crate) fn span(&self, offset: usize, length: usize) -> Span {
        Span::new(Arc::clone(&self.locator), offset, length)
    }

    /// Span from `start` to the current reader position.
    pub(crate) fn span_from(&self, start: usize) -> Span {
        self.span(start, self.reader.pos() - start)
    }

    pub(crate) fn error_at(&self, offset: usize, issue: ParseIssue) -> ParseError {
        ParseError::new(issue, self.span(offset, 0))
    }

    /// An error at the current reader position.
    pub(crate) fn error(&self, issue: ParseIssue) -> ParseError {
        self.error_at(self.reader.pos(), issue)
    }

    // ========================================================================
    // Token accessors
    // ========================================================================

    /// The current token's string form: its payload when it carries one,
    /// its spelling otherwise.
    pub(crate) fn token_string(&self) -> EcoString {
        match &self.token_value {
            TokenValue::String(s) => s.clone(),
            _ => self.current_token.text().into(),
        }
    }

    /// Fails with `PARSE_EXPECTED_TOKEN` unless the current token is `token`,
    /// rewinding to the token start so the issue points at the offender.
    pub(crate) fn assert_token(&mut self, token: TokenKind) -> Result<()> {
        if self.current_token == token {
            Ok(())
        } else {
            self.reader.set_pos(self.token_start_pos);
            Err(self.error_at(
                self.token_start_pos,
                ParseIssue::ParseExpectedToken {
                    expected: token.text().into(),
                    actual: self.current_token.text().into(),
                },
            ))
        }
    }

    /// Replaces the current token without re-lexing. Used when a speculative
    /// production hands a consumed `{` back to the outer grammar.
    pub(crate) fn set_token(&mut self, token: TokenKind) {
        self.current_token = token;
        self.token_value = TokenValue::None;
    }

    fn set_simple(&mut self, token: TokenKind) {
        self.current_token = token;
    }

    fn set_string_token(&mut self, token: TokenKind, value: impl Into<EcoString>) {
        self.current_token = token;
        self.token_value = TokenValue::String(value.into());
    }

    // ========================================================================
    // Scanning
    // ========================================================================

    /// Advances to the next token.
    pub(crate) fn next_token(&mut self) -> Result<()> {
        if self.options.epp_mode && self.epp_in_text {
            return self.scan_epp_text();
        }
        self.last_token = self.current_token;
        let ws = self.skip_white()?;
        self.token_start_pos = self.reader.pos();
        self.token_value = TokenValue::None;
        match self.reader.peek() {
            None => {
                self.current_token = TokenKind::End;
                Ok(())
            }
            Some(c) => self.scan_token(c, ws),
        }
    }

    /// Skips whitespace and comments. Crossing a newline while a heredoc
    /// body is pending jumps scanning past that body.
    fn skip_white(&mut self) -> Result<bool> {
        let mut skipped = false;
        loop {
            match self.reader.peek() {
                Some('\n') => {
                    skipped = true;
                    self.reader.advance();
                    if let Some(next_line) = self.next_line_start.take() {
                        self.reader.set_pos(next_line);
                    }
                }
                Some(' ' | '\t' | '\r') => {
                    skipped = true;
                    self.reader.advance();
                }
                Some('#') => {
                    skipped = true;
                    self.reader.advance_while(|c| c != '\n');
                }
                Some('/') if self.reader.peek2() == Some('*') => {
                    skipped = true;
                    let start = self.reader.pos();
                    self.reader.advance();
                    self.reader.advance();
                    loop {
                        match self.reader.peek() {
                            None => {
                                return Err(
                                    self.error_at(start, ParseIssue::LexUnterminatedComment)
                                );
                            }
                            Some('*') if self.reader.peek2() == Some('/') => {
                                self.reader.advance();
                                self.reader.advance();
                                break;
                            }
                            _ => self.reader.advance(),
                        }
                    }
                }
                _ => return Ok(skipped),
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn scan_token(&mut self, c: char, ws: bool) -> Result<()> {
        match c {
            '(' => {
                self.reader.advance();
                self.set_simple(if ws {
                    TokenKind::WsLeftParen
                } else {
                    TokenKind::LeftParen
                });
            }
            ')' => {
                self.reader.advance();
                self.set_simple(TokenKind::RightParen);
            }
            '[' => {
                self.reader.advance();
                self.set_simple(if !ws && self.last_token.may_terminate_expression() {
                    TokenKind::LeftBracket
                } else {
                    TokenKind::ListStart
                });
            }
            ']' => {
                self.reader.advance();
                self.set_simple(TokenKind::RightBracket);
            }
            '{' => {
                self.reader.advance();
                self.set_simple(if self.last_token == TokenKind::Question {
                    TokenKind::SelBrace
                } else {
                    TokenKind::LeftBrace
                });
            }
            '}' => {
                self.reader.advance();
                self.set_simple(TokenKind::RightBrace);
            }
            ',' => {
                self.reader.advance();
                self.set_simple(TokenKind::Comma);
            }
            ';' => {
                self.reader.advance();
                self.set_simple(TokenKind::Semicolon);
            }
            '?' => {
                self.reader.advance();
                self.set_simple(TokenKind::Question);
            }
            '.' => {
                self.reader.advance();
                self.set_simple(TokenKind::Dot);
            }
            ':' => {
                self.reader.advance();
                if self.reader.peek() == Some(':') {
                    self.reader.advance();
                    self.scan_qualified_after_colons()?;
                } else {
                    self.set_simple(TokenKind::Colon);
                }
            }
            '=' => {
                self.reader.advance();
                match self.reader.peek() {
                    Some('=') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::Equal);
                    }
                    Some('~') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::Match);
                    }
                    Some('>') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::FarrowOp);
                    }
                    _ => self.set_simple(TokenKind::Assign),
                }
            }
            '+' => {
                self.reader.advance();
                match self.reader.peek() {
                    Some('=') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::AddAssign);
                    }
                    Some('>') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::ParrowOp);
                    }
                    _ => self.set_simple(TokenKind::Add),
                }
            }
            '-' => {
                if self.options.epp_mode && self.reader.starts_with("-%>") {
                    self.reader.advance();
                    self.reader.advance();
                    self.reader.advance();
                    self.epp_in_text = true;
                    self.epp_trim_newline = true;
                    return self.scan_epp_text();
                }
                self.reader.advance();
                match self.reader.peek() {
                    Some('=') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::SubtractAssign);
                    }
                    Some('>') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::InEdge);
                    }
                    _ => self.set_simple(TokenKind::Subtract),
                }
            }
            '*' => {
                self.reader.advance();
                self.set_simple(TokenKind::Multiply);
            }
            '/' => {
                if self.last_token.may_terminate_expression() {
                    self.reader.advance();
                    self.set_simple(TokenKind::Divide);
                } else {
                    self.scan_regexp()?;
                }
            }
            '%' => {
                if self.options.epp_mode && self.reader.peek2() == Some('>') {
                    self.reader.advance();
                    self.reader.advance();
                    self.epp_in_text = true;
                    self.epp_trim_newline = false;
                    return self.scan_epp_text();
                }
                self.reader.advance();
                self.set_simple(TokenKind::Remainder);
            }
            '!' => {
                self.reader.advance();
                match self.reader.peek() {
                    Some('=') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::NotEqual);
                    }
                    Some('~') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::NotMatch);
                    }
                    _ => self.set_simple(TokenKind::Not),
                }
            }
            '~' => {
                self.reader.advance();
                if self.reader.peek() == Some('>') {
                    self.reader.advance();
                    self.set_simple(TokenKind::InEdgeSub);
                } else {
                    return Err(self.error_at(
                        self.token_start_pos,
                        ParseIssue::LexInvalidOperator { op: "~".into() },
                    ));
                }
            }
            '<' => {
                self.reader.advance();
                match self.reader.peek() {
                    Some('=') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::LessEqual);
                    }
                    Some('|') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::LeftCollect);
                    }
                    Some('-') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::OutEdge);
                    }
                    Some('~') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::OutEdgeSub);
                    }
                    Some('<') => {
                        self.reader.advance();
                        if self.reader.peek() == Some('|') {
                            self.reader.advance();
                            self.set_simple(TokenKind::LeftLeftCollect);
                        } else {
                            self.set_simple(TokenKind::LeftShift);
                        }
                    }
                    _ => self.set_simple(TokenKind::Less),
                }
            }
            '>' => {
                self.reader.advance();
                match self.reader.peek() {
                    Some('=') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::GreaterEqual);
                    }
                    Some('>') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::RightShift);
                    }
                    _ => self.set_simple(TokenKind::Greater),
                }
            }
            '|' => {
                self.reader.advance();
                if self.reader.peek() == Some('>') {
                    self.reader.advance();
                    if self.reader.peek() == Some('>') {
                        self.reader.advance();
                        self.set_simple(TokenKind::RightRightCollect);
                    } else {
                        self.set_simple(TokenKind::RightCollect);
                    }
                } else if self.expect_pipe_end {
                    self.expect_pipe_end = false;
                    self.set_simple(TokenKind::PipeEnd);
                } else {
                    self.expect_pipe_end = true;
                    self.set_simple(TokenKind::Pipe);
                }
            }
            '@' => {
                self.reader.advance();
                match self.reader.peek() {
                    Some('@') => {
                        self.reader.advance();
                        self.set_simple(TokenKind::AtAt);
                    }
                    Some('(') => {
                        self.reader.advance();
                        self.scan_heredoc()?;
                    }
                    _ => self.set_simple(TokenKind::At),
                }
            }
            '"' => self.scan_double_quoted_string()?,
            '\'' => self.scan_single_quoted_string()?,
            '`' => {
                if self.options.handle_backtick_strings {
                    self.scan_backtick_string()?;
                } else {
                    return Err(
                        self.error_at(self.token_start_pos, ParseIssue::LexUnexpectedChar { ch: c })
                    );
                }
            }
            '$' => self.scan_variable()?,
            '0'..='9' => self.scan_number()?,
            'a'..='z' | '_' => self.scan_name()?,
            'A'..='Z' => self.scan_type_name()?,
            _ => {
                return Err(
                    self.error_at(self.token_start_pos, ParseIssue::LexUnexpectedChar { ch: c })
                );
            }
        }
        Ok(())
    }

    // ========================================================================
    // Names and keywords
    // ========================================================================

    fn scan_name(&mut self) -> Result<()> {
        let start = self.token_start_pos;
        loop {
            self.reader.advance_while(is_word_char);
            if !self.reader.starts_with("::") {
                break;
            }
            match self.name_start_after_colons() {
                NameStart::Lower => {
                    self.reader.advance();
                    self.reader.advance();
                }
                NameStart::Upper => {
                    return Err(self.error_at(
                        start,
                        ParseIssue::LexInvalidName {
                            name: self.reader.slice(start, self.reader.pos()).into(),
                        },
                    ));
                }
                NameStart::None => {
                    return Err(self
                        .error_at(self.reader.pos(), ParseIssue::LexDoubleColonNotFollowedByName));
                }
            }
        }
        let word = self.reader.slice(start, self.reader.pos());
        if !word.contains("::") {
            if let Some(kind) = self.keyword_kind(word) {
                if kind == TokenKind::Boolean {
                    self.current_token = TokenKind::Boolean;
                    self.token_value = TokenValue::Boolean(word == "true");
                } else {
                    self.set_simple(kind);
                }
                return Ok(());
            }
        }
        let word: EcoString = word.into();
        self.set_string_token(TokenKind::Identifier, word);
        Ok(())
    }

    fn scan_type_name(&mut self) -> Result<()> {
        let start = self.token_start_pos;
        loop {
            self.reader.advance_while(is_word_char);
            if !self.reader.starts_with("::") {
                break;
            }
            match self.name_start_after_colons() {
                NameStart::Upper => {
                    self.reader.advance();
                    self.reader.advance();
                }
                NameStart::Lower => {
                    return Err(self.error_at(
                        start,
                        ParseIssue::LexInvalidTypeName {
                            name: self.reader.slice(start, self.reader.pos()).into(),
                        },
                    ));
                }
                NameStart::None => {
                    return Err(self
                        .error_at(self.reader.pos(), ParseIssue::LexDoubleColonNotFollowedByName));
                }
            }
        }
        let name: EcoString = self.reader.slice(start, self.reader.pos()).into();
        self.set_string_token(TokenKind::TypeName, name);
        Ok(())
    }

    /// Continues a name that began with `::` (the global scope anchor).
    /// Keywords never apply to anchored names.
    fn scan_qualified_after_colons(&mut self) -> Result<()> {
        let start = self.token_start_pos;
        match self.reader.peek() {
            Some(c) if c.is_ascii_lowercase() || c == '_' => {
                loop {
                    self.reader.advance_while(is_word_char);
                    if !self.reader.starts_with("::") {
                        break;
                    }
                    match self.name_start_after_colons() {
                        NameStart::Lower => {
                            self.reader.advance();
                            self.reader.advance();
                        }
                        NameStart::Upper => {
                            return Err(self.error_at(
                                start,
                                ParseIssue::LexInvalidName {
                                    name: self.reader.slice(start, self.reader.pos()).into(),
                                },
                            ));
                        }
                        NameStart::None => {
                            return Err(self.error_at(
                                self.reader.pos(),
                                ParseIssue::LexDoubleColonNotFollowedByName,
                            ));
                        }
                    }
                }
                let name: EcoString = self.reader.slice(start, self.reader.pos()).into();
                self.set_string_token(TokenKind::Identifier, name);
                Ok(())
            }
            Some(c) if c.is_ascii_uppercase() => self.scan_type_name(),
            _ => Err(self.error_at(self.reader.pos(), ParseIssue::LexDoubleColonNotFollowedByName)),
        }
    }

    fn name_start_after_colons(&self) -> NameStart {
        let rest = self.reader.slice(self.reader.pos(), self.reader.text().len());
        match rest[2..].chars().next() {
            Some(c) if c.is_ascii_lowercase() || c == '_' => NameStart::Lower,
            Some(c) if c.is_ascii_uppercase() => NameStart::Upper,
            _ => NameStart::None,
        }
    }

    fn keyword_kind(&self, word: &str) -> Option<TokenKind> {
        let kind = match word {
            "true" | "false" => TokenKind::Boolean,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "in" => TokenKind::In,
            "case" => TokenKind::Case,
            "if" => TokenKind::If,
            "elsif" => TokenKind::Elsif,
            "else" => TokenKind::Else,
            "unless" => TokenKind::Unless,
            "class" => TokenKind::Class,
            "type" => TokenKind::Type,
            "function" => TokenKind::Function,
            "node" => TokenKind::Node,
            "define" => TokenKind::Define,
            "application" => TokenKind::Application,
            "site" => TokenKind::Site,
            "produces" => TokenKind::Produces,
            "consumes" => TokenKind::Consumes,
            "inherits" => TokenKind::Inherits,
            "undef" => TokenKind::Undef,
            "default" => TokenKind::Default,
            "attr" => TokenKind::Attr,
            "private" => TokenKind::Private,
            "plan" if self.options.tasks_enabled => TokenKind::Plan,
            "actor" if self.options.actors_enabled => TokenKind::Actor,
            _ => return None,
        };
        Some(kind)
    }

    // ========================================================================
    // Numbers
    // ========================================================================

    fn scan_number(&mut self) -> Result<()> {
        let start = self.token_start_pos;
        let first = self.reader.next().unwrap_or('0');
        self.radix = 10;

        if first == '0' {
            match self.reader.peek() {
                Some('x' | 'X') => {
                    self.reader.advance();
                    let digits = self.reader.pos();
                    self.reader.advance_while(|c| c.is_ascii_hexdigit());
                    if self.reader.pos() == digits {
                        return Err(self.error(ParseIssue::LexHexdigitExpected));
                    }
                    self.radix = 16;
                    return self.finish_integer(start, digits, 16);
                }
                Some('0'..='9') if !self.float_follows() => {
                    let digits = self.reader.pos();
                    self.reader.advance_while(|c| matches!(c, '0'..='7'));
                    if matches!(self.reader.peek(), Some('8' | '9')) {
                        return Err(self.error(ParseIssue::LexOctaldigitExpected));
                    }
                    self.radix = 8;
                    return self.finish_integer(start, digits, 8);
                }
                _ => {}
            }
        }

        self.reader.advance_while(|c| c.is_ascii_digit());

        let mut is_float = false;
        if self.reader.peek() == Some('.') && self.reader.peek2().is_some_and(|c| c.is_ascii_digit())
        {
            is_float = true;
            self.reader.advance();
            self.reader.advance_while(|c| c.is_ascii_digit());
        }
        if matches!(self.reader.peek(), Some('e' | 'E')) && self.exponent_follows() {
            is_float = true;
            self.reader.advance();
            if matches!(self.reader.peek(), Some('+' | '-')) {
                self.reader.advance();
            }
            let digits = self.reader.pos();
            self.reader.advance_while(|c| c.is_ascii_digit());
            if self.reader.pos() == digits {
                return Err(self.error(ParseIssue::LexDigitExpected));
            }
        }

        let text = self.reader.slice(start, self.reader.pos());
        if is_float {
            let value: f64 = text.parse().map_err(|_| {
                self.error_at(start, ParseIssue::LexInvalidNumber { text: text.into() })
            })?;
            self.current_token = TokenKind::Float;
            self.token_value = TokenValue::Float(value);
            Ok(())
        } else {
            self.finish_integer(start, start, 10)
        }
    }

    /// True when the digits after a leading `0` actually spell a float
    /// (`0.5`, `09e2` is still an octal error, but `0e2` is a float).
    fn float_follows(&self) -> bool {
        let rest = &self.reader.text()[self.reader.pos()..];
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        matches!(rest[digits..].chars().next(), Some('.' | 'e' | 'E'))
    }

    fn exponent_follows(&self) -> bool {
        let rest = &self.reader.text()[self.reader.pos()..];
        let mut chars = rest.chars();
        chars.next(); // e / E
        match chars.next() {
            Some(c) if c.is_ascii_digit() => true,
            Some('+' | '-') => chars.next().is_some_and(|c| c.is_ascii_digit()),
            _ => false,
        }
    }

    fn finish_integer(&mut self, start: usize, digits_start: usize, radix: u32) -> Result<()> {
        let digits = self.reader.slice(digits_start, self.reader.pos());
        let value = i64::from_str_radix(digits, radix).map_err(|_| {
            self.error_at(
                start,
                ParseIssue::LexInvalidNumber {
                    text: self.reader.slice(start, self.reader.pos()).into(),
                },
            )
        })?;
        self.current_token = TokenKind::Integer;
        self.token_value = TokenValue::Integer(value);
        Ok(())
    }

    // ========================================================================
    // Variables
    // ========================================================================

    fn scan_variable(&mut self) -> Result<()> {
        let start = self.token_start_pos;
        self.reader.advance(); // $
        match self.reader.peek() {
            Some(c) if c.is_ascii_digit() => {
                let digits = self.reader.pos();
                self.reader.advance_while(|c| c.is_ascii_digit());
                let value: i64 = self
                    .reader
                    .slice(digits, self.reader.pos())
                    .parse()
                    .map_err(|_| {
                        self.error_at(
                            start,
                            ParseIssue::LexInvalidNumber {
                                text: self.reader.slice(start, self.reader.pos()).into(),
                            },
                        )
                    })?;
                self.current_token = TokenKind::Variable;
                self.token_value = TokenValue::Integer(value);
                Ok(())
            }
            Some(c) if c.is_ascii_lowercase() || c == '_' || c == ':' => {
                let name = self.scan_variable_name()?;
                self.set_string_token(TokenKind::Variable, name);
                Ok(())
            }
            _ => Err(self.error_at(
                start,
                ParseIssue::LexInvalidName {
                    name: self.reader.slice(start, self.reader.pos()).into(),
                },
            )),
        }
    }

    /// Scans a variable's name: optionally `::`-anchored, lowercase
    /// segments joined by `::`. The reader sits on the first name
    /// character (or the anchor).
    fn scan_variable_name(&mut self) -> Result<EcoString> {
        let start = self.reader.pos();
        if self.reader.starts_with("::") {
            self.reader.advance();
            self.reader.advance();
        }
        if !self
            .reader
            .peek()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        {
            return Err(self.error(ParseIssue::LexDoubleColonNotFollowedByName));
        }
        loop {
            self.reader.advance_while(is_lower_word_char);
            if self.reader.starts_with("::")
                && self
                    .reader
                    .text()
                    .get(self.reader.pos() + 2..)
                    .and_then(|r| r.chars().next())
                    .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
            {
                self.reader.advance();
                self.reader.advance();
            } else {
                break;
            }
        }
        Ok(self.reader.slice(start, self.reader.pos()).into())
    }

    // ========================================================================
    // Strings
    // ========================================================================

    fn scan_single_quoted_string(&mut self) -> Result<()> {
        let start = self.token_start_pos;
        self.reader.advance(); // '
        let mut buf = String::new();
        loop {
            match self.reader.next() {
                None => return Err(self.error_at(start, ParseIssue::LexUnterminatedString)),
                Some('\'') => break,
                Some('\\') => match self.reader.next() {
                    None => return Err(self.error_at(start, ParseIssue::LexUnterminatedString)),
                    Some('\\') => buf.push('\\'),
                    Some('\'') => buf.push('\''),
                    Some(c) => {
                        buf.push('\\');
                        buf.push(c);
                    }
                },
                Some(c) => buf.push(c),
            }
        }
        self.set_string_token(TokenKind::String, buf);
        Ok(())
    }

    fn scan_backtick_string(&mut self) -> Result<()> {
        let start = self.token_start_pos;
        self.reader.advance(); // `
        let content_start = self.reader.pos();
        self.reader.advance_while(|c| c != '`');
        if self.reader.at_end() {
            return Err(self.error_at(start, ParseIssue::LexUnterminatedString));
        }
        let value: EcoString = self.reader.slice(content_start, self.reader.pos()).into();
        self.reader.advance(); // `
        self.set_string_token(TokenKind::String, value);
        Ok(())
    }

    /// Scans a double-quoted string. Without interpolations the result is a
    /// plain `String` token; with them, a `ConcatenatedString` token whose
    /// value is the pre-built concatenation expression.
    fn scan_double_quoted_string(&mut self) -> Result<()> {
        let start = self.token_start_pos;
        self.reader.advance(); // "
        let mut segments: Vec<Expression> = Vec::new();
        let mut buf = String::new();
        let mut seg_start = self.reader.pos();
        loop {
            let Some(c) = self.reader.next() else {
                return Err(self.error_at(start, ParseIssue::LexUnterminatedString));
            };
            match c {
                '"' => break,
                '\\' => self.scan_double_quote_escape(start, &mut buf)?,
                '$' => {
                    let dollar = self.reader.pos() - 1;
                    if let Some(segment) = self.scan_interpolation(dollar)? {
                        if !buf.is_empty() {
                            let text = std::mem::take(&mut buf);
                            let span = self.span(seg_start, dollar - seg_start);
                            let lit = self.factory.string(text.into(), span);
                            segments.push(lit);
                        }
                        segments.push(segment);
                        seg_start = self.reader.pos();
                    } else {
                        buf.push('$');
                    }
                }
                _ => buf.push(c),
            }
        }
        if segments.is_empty() {
            self.set_string_token(TokenKind::String, buf);
        } else {
            if !buf.is_empty() {
                let end = self.reader.pos() - 1; // before the closing quote
                let span = self.span(seg_start, end - seg_start);
                let lit = self.factory.string(buf.into(), span);
                segments.push(lit);
            }
            let span = self.span_from(start);
            let cs = self.factory.concatenated_string(segments, span);
            self.current_token = TokenKind::ConcatenatedString;
            self.token_value = TokenValue::Expression(cs);
        }
        Ok(())
    }

    fn scan_double_quote_escape(&mut self, string_start: usize, buf: &mut String) -> Result<()> {
        match self.reader.next() {
            None => Err(self.error_at(string_start, ParseIssue::LexUnterminatedString)),
            Some('\\') => {
                buf.push('\\');
                Ok(())
            }
            Some('\'') => {
                buf.push('\'');
                Ok(())
            }
            Some('"') => {
                buf.push('"');
                Ok(())
            }
            Some('$') => {
                buf.push('$');
                Ok(())
            }
            Some('n') => {
                buf.push('\n');
                Ok(())
            }
            Some('r') => {
                buf.push('\r');
                Ok(())
            }
            Some('t') => {
                buf.push('\t');
                Ok(())
            }
            Some('s') => {
                buf.push(' ');
                Ok(())
            }
            Some('u') => {
                let c = self.scan_unicode_escape()?;
                buf.push(c);
                Ok(())
            }
            Some('x') if self.options.handle_hex_escapes => {
                let c = self.scan_hex_escape()?;
                buf.push(c);
                Ok(())
            }
            Some(other) => {
                buf.push('\\');
                buf.push(other);
                Ok(())
            }
        }
    }

    fn scan_unicode_escape(&mut self) -> Result<char> {
        let start = self.reader.pos();
        let code = if self.reader.peek() == Some('{') {
            self.reader.advance();
            let digits = self.reader.pos();
            self.reader.advance_while(|c| c.is_ascii_hexdigit());
            let hex = self.reader.slice(digits, self.reader.pos()).to_string();
            if self.reader.peek() != Some('}') || hex.is_empty() || hex.len() > 6 {
                return Err(self.error_at(start, ParseIssue::LexMalformedUnicodeEscape));
            }
            self.reader.advance();
            u32::from_str_radix(&hex, 16)
                .map_err(|_| self.error_at(start, ParseIssue::LexMalformedUnicodeEscape))?
        } else {
            let digits = self.reader.pos();
            for _ in 0..4 {
                if !self.reader.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                    return Err(self.error_at(start, ParseIssue::LexMalformedUnicodeEscape));
                }
                self.reader.advance();
            }
            let hex = self.reader.slice(digits, self.reader.pos());
            u32::from_str_radix(hex, 16)
                .map_err(|_| self.error_at(start, ParseIssue::LexMalformedUnicodeEscape))?
        };
        char::from_u32(code).ok_or_else(|| self.error_at(start, ParseIssue::LexMalformedUnicodeEscape))
    }

    fn scan_hex_escape(&mut self) -> Result<char> {
        let start = self.reader.pos();
        for _ in 0..2 {
            if !self.reader.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                return Err(self.error_at(start, ParseIssue::LexMalformedHexEscape));
            }
            self.reader.advance();
        }
        let hex = self.reader.slice(start, self.reader.pos());
        let code = u32::from_str_radix(hex, 16)
            .map_err(|_| self.error_at(start, ParseIssue::LexMalformedHexEscape))?;
        char::from_u32(code).ok_or_else(|| self.error_at(start, ParseIssue::LexMalformedHexEscape))
    }

    /// Handles `$` inside a string or heredoc body. The reader sits just
    /// after the `$`. Returns the interpolated segment, or `None` when the
    /// `$` is literal text.
    fn scan_interpolation(&mut self, dollar: usize) -> Result<Option<Expression>> {
        match self.reader.peek() {
            Some('{') => {
                self.reader.advance();
                let expr = self.parse_interpolated_expression()?;
                let span = self.span(dollar, self.reader.pos() - dollar);
                let text = self.factory.text(expr, span);
                Ok(Some(text))
            }
            Some(c)
                if c.is_ascii_lowercase()
                    || c == '_'
                    || (c == ':' && self.reader.starts_with("::")) =>
            {
                let name_start = self.reader.pos();
                let name = self.scan_variable_name()?;
                let name_span = self.span(name_start, name.len());
                let qn = self.factory.qualified_name(name, name_span);
                let var_span = self.span(dollar, self.reader.pos() - dollar);
                let var = self.factory.variable(qn, var_span.clone());
                let text = self.factory.text(var, var_span);
                Ok(Some(text))
            }
            Some(c) if c.is_ascii_digit() => {
                let digits = self.reader.pos();
                self.reader.advance_while(|ch| ch.is_ascii_digit());
                let value: i64 = self
                    .reader
                    .slice(digits, self.reader.pos())
                    .parse()
                    .map_err(|_| {
                        self.error_at(
                            dollar,
                            ParseIssue::LexInvalidNumber {
                                text: self.reader.slice(dollar, self.reader.pos()).into(),
                            },
                        )
                    })?;
                let num_span = self.span(digits, self.reader.pos() - digits);
                let num = self.factory.integer(value, 10, num_span);
                let var_span = self.span(dollar, self.reader.pos() - dollar);
                let var = self.factory.variable(num, var_span.clone());
                let text = self.factory.text(var, var_span);
                Ok(Some(text))
            }
            _ => Ok(None),
        }
    }

    // ========================================================================
    // Regular expressions
    // ========================================================================

    fn scan_regexp(&mut self) -> Result<()> {
        let start = self.token_start_pos;
        self.reader.advance(); // /
        let mut buf = String::new();
        loop {
            match self.reader.next() {
                None | Some('\n') => {
                    return Err(self.error_at(start, ParseIssue::LexUnterminatedRegexp));
                }
                Some('/') => break,
                Some('\\') => match self.reader.next() {
                    None => return Err(self.error_at(start, ParseIssue::LexUnterminatedRegexp)),
                    Some('/') => buf.push('/'),
                    Some(c) => {
                        buf.push('\\');
                        buf.push(c);
                    }
                },
                Some(c) => buf.push(c),
            }
        }
        self.set_string_token(TokenKind::Regexp, buf);
        Ok(())
    }

    // ========================================================================
    // Heredocs
    // ========================================================================

    /// Scans a heredoc declaration `@("TAG":syntax/escapes)` and captures
    /// its body from the lines below the current one. The reader continues
    /// on the declaration line; [`Context::skip_white`] jumps past the body
    /// when the line ends.
    #[allow(clippy::too_many_lines)]
    fn scan_heredoc(&mut self) -> Result<()> {
        let start = self.token_start_pos; // at '@'
        let src = self.reader.text_handle();

        let mut tag: EcoString = EcoString::new();
        let mut syntax: EcoString = EcoString::new();
        let mut syntax_seen = false;
        let mut escapes: Option<Vec<char>> = None;
        let mut interpolate = false;

        loop {
            self.reader.advance_while(|c| c == ' ' || c == '\t');
            match self.reader.peek() {
                None | Some('\n') => {
                    return Err(self.error_at(start, ParseIssue::LexHeredocDeclUnterminated));
                }
                Some(')') => {
                    self.reader.advance();
                    break;
                }
                Some('"') => {
                    if !tag.is_empty() {
                        return Err(self.error_at(start, ParseIssue::LexHeredocDeclUnterminated));
                    }
                    self.reader.advance();
                    let tag_start = self.reader.pos();
                    self.reader.advance_while(|c| c != '"' && c != '\n');
                    if self.reader.peek() != Some('"') {
                        return Err(self.error_at(start, ParseIssue::LexHeredocDeclUnterminated));
                    }
                    tag = self.reader.slice(tag_start, self.reader.pos()).into();
                    self.reader.advance();
                    if tag.is_empty() {
                        return Err(self.error_at(start, ParseIssue::LexHeredocEmptyTag));
                    }
                    interpolate = true;
                }
                Some(':') => {
                    if syntax_seen {
                        return Err(self.error_at(start, ParseIssue::LexHeredocMultipleSyntax));
                    }
                    self.reader.advance();
                    let syn_start = self.reader.pos();
                    self.reader.advance_while(is_word_char);
                    syntax = self.reader.slice(syn_start, self.reader.pos()).into();
                    syntax_seen = true;
                }
                Some('/') => {
                    if escapes.is_some() {
                        return Err(self.error_at(start, ParseIssue::LexHeredocMultipleEscape));
                    }
                    self.reader.advance();
                    let mut flags = Vec::new();
                    while let Some(c) = self.reader.peek() {
                        if matches!(c, ')' | ':' | ' ' | '\t' | '\n') {
                            break;
                        }
                        if !matches!(c, 't' | 'r' | 'n' | 's' | 'u' | 'L' | '$') {
                            return Err(self
                                .error_at(self.reader.pos(), ParseIssue::LexHeredocIllegalEscape { ch: c }));
                        }
                        flags.push(c);
                        self.reader.advance();
                    }
                    escapes = Some(flags);
                }
                Some(_) => {
                    if !tag.is_empty() {
                        return Err(self.error_at(start, ParseIssue::LexHeredocDeclUnterminated));
                    }
                    let tag_start = self.reader.pos();
                    self.reader
                        .advance_while(|c| !matches!(c, ':' | '/' | ')' | ' ' | '\t' | '\n'));
                    tag = self.reader.slice(tag_start, self.reader.pos()).into();
                }
            }
        }
        if tag.is_empty() {
            return Err(self.error_at(start, ParseIssue::LexHeredocEmptyTag));
        }

        let after_decl = self.reader.pos();

        // The body begins on the line after the declaration, or after a
        // previous heredoc's body when several share a line.
        let body_start = match self.next_line_start.take() {
            Some(pos) => pos,
            None => match src[after_decl..].find('\n') {
                Some(i) => after_decl + i + 1,
                None => return Err(self.error_at(start, ParseIssue::LexHeredocUnterminated)),
            },
        };

        // Locate the end-marker line.
        let mut line_start = body_start;
        let (marker_start, marker_end, margin, trim_trailing) = loop {
            if line_start >= src.len() {
                return Err(self.error_at(start, ParseIssue::LexHeredocUnterminated));
            }
            let line_end = src[line_start..]
                .find('\n')
                .map_or(src.len(), |i| line_start + i);
            if let Some((margin, trim)) = heredoc_end_marker(&src[line_start..line_end], &tag) {
                break (line_start, line_end, margin, trim);
            }
            line_start = line_end + 1;
        };

        let escapes = heredoc_escape_set(escapes);
        let text_expr =
            self.heredoc_text(body_start, marker_start, margin, &escapes, interpolate, trim_trailing)?;

        let span = self.span(start, after_decl - start);
        let syntax_tag = syntax;
        let heredoc = self.factory.heredoc(text_expr, syntax_tag, span);

        self.next_line_start = Some((marker_end + 1).min(src.len()));
        self.reader.set_pos(after_decl);
        self.current_token = TokenKind::Heredoc;
        self.token_value = TokenValue::Expression(heredoc);
        Ok(())
    }

    /// Builds the heredoc body expression from the source region
    /// `[start, end)`, applying margin stripping, escapes, and
    /// interpolation. Positions of interpolated segments point at the real
    /// source.
    fn heredoc_text(
        &mut self,
        start: usize,
        end: usize,
        margin: Option<usize>,
        escapes: &HeredocEscapes,
        interpolate: bool,
        trim_trailing: bool,
    ) -> Result<Expression> {
        let saved_pos = self.reader.pos();
        self.reader.set_pos(start);

        let mut segments: Vec<Expression> = Vec::new();
        let mut buf = String::new();
        let mut seg_start = start;
        let mut at_line_start = true;

        let result = loop {
            if self.reader.pos() >= end {
                break Ok(());
            }
            if at_line_start {
                if let Some(margin) = margin {
                    let mut stripped = 0;
                    while stripped < margin
                        && self.reader.pos() < end
                        && matches!(self.reader.peek(), Some(' ' | '\t'))
                    {
                        self.reader.advance();
                        stripped += 1;
                    }
                }
                at_line_start = false;
            }
            let Some(c) = self.reader.next() else {
                break Ok(());
            };
            match c {
                '\n' => {
                    buf.push('\n');
                    at_line_start = true;
                }
                '\\' if escapes.enabled && self.reader.pos() < end => {
                    match self.reader.next() {
                        Some('t') if escapes.allows('t') => buf.push('\t'),
                        Some('r') if escapes.allows('r') => buf.push('\r'),
                        Some('n') if escapes.allows('n') => buf.push('\n'),
                        Some('s') if escapes.allows('s') => buf.push(' '),
                        Some('$') if escapes.allows('$') => buf.push('$'),
                        Some('u') if escapes.allows('u') => match self.scan_unicode_escape() {
                            Ok(u) => buf.push(u),
                            Err(e) => break Err(e),
                        },
                        Some('\n') if escapes.allows('L') => at_line_start = true,
                        Some('\r') if escapes.allows('L') && self.reader.peek() == Some('\n') => {
                            self.reader.advance();
                            at_line_start = true;
                        }
                        Some('\\') => buf.push('\\'),
                        Some(other) => {
                            buf.push('\\');
                            buf.push(other);
                            if other == '\n' {
                                at_line_start = true;
                            }
                        }
                        None => buf.push('\\'),
                    }
                }
                '$' if interpolate => {
                    let dollar = self.reader.pos() - 1;
                    match self.scan_interpolation(dollar) {
                        Ok(Some(segment)) => {
                            if !buf.is_empty() {
                                let text = std::mem::take(&mut buf);
                                let span = self.span(seg_start, dollar - seg_start);
                                let lit = self.factory.string(text.into(), span);
                                segments.push(lit);
                            }
                            segments.push(segment);
                            seg_start = self.reader.pos();
                        }
                        Ok(None) => buf.push('$'),
                        Err(e) => break Err(e),
                    }
                }
                _ => buf.push(c),
            }
        };
        self.reader.set_pos(saved_pos);
        result?;

        if trim_trailing {
            if buf.ends_with('\n') {
                buf.pop();
                if buf.ends_with('\r') {
                    buf.pop();
                }
            }
        }

        if segments.is_empty() {
            let span = self.span(start, end - start);
            Ok(self.factory.string(buf.into(), span))
        } else {
            if !buf.is_empty() {
                let span = self.span(seg_start, end - seg_start);
                let lit = self.factory.string(buf.into(), span);
                segments.push(lit);
            }
            let span = self.span(start, end - start);
            Ok(self.factory.concatenated_string(segments, span))
        }
    }

    // ========================================================================
    // EPP text mode
    // ========================================================================

    /// Scans literal template text up to the next `<%` tag, handling the
    /// `<%%` and `%%>` escapes, `<%#` comments, and the trim markers. Emits
    /// a `RenderString`, a `RenderExpr`, or delegates to expression
    /// scanning once a tag switches modes.
    fn scan_epp_text(&mut self) -> Result<()> {
        self.last_token = self.current_token;
        self.token_value = TokenValue::None;
        if self.epp_trim_newline {
            self.epp_trim_newline = false;
            if self.reader.peek() == Some('\r') && self.reader.peek2() == Some('\n') {
                self.reader.advance();
                self.reader.advance();
            } else if self.reader.peek() == Some('\n') {
                self.reader.advance();
            }
        }
        self.token_start_pos = self.reader.pos();
        let mut text = String::new();
        loop {
            match self.reader.peek() {
                None => {
                    if text.is_empty() {
                        self.epp_in_text = false;
                        self.current_token = TokenKind::End;
                    } else {
                        self.set_string_token(TokenKind::RenderString, text);
                    }
                    return Ok(());
                }
                Some('<') if self.reader.peek2() == Some('%') => {
                    if self.reader.starts_with("<%%") {
                        self.reader.advance();
                        self.reader.advance();
                        self.reader.advance();
                        text.push_str("<%");
                        continue;
                    }
                    if self.reader.starts_with("<%#") {
                        let comment_start = self.reader.pos();
                        self.reader.advance();
                        self.reader.advance();
                        self.reader.advance();
                        loop {
                            if self.reader.at_end() {
                                return Err(self
                                    .error_at(comment_start, ParseIssue::LexUnbalancedEppComment));
                            }
                            if self.reader.starts_with("%>") {
                                self.reader.advance();
                                self.reader.advance();
                                break;
                            }
                            self.reader.advance();
                        }
                        continue;
                    }
                    if self.reader.starts_with("<%-") {
                        while text.ends_with(' ') || text.ends_with('\t') {
                            text.pop();
                        }
                    }
                    if !text.is_empty() {
                        // Emit the text; the tag is handled on the next call.
                        self.set_string_token(TokenKind::RenderString, text);
                        return Ok(());
                    }
                    self.reader.advance();
                    self.reader.advance();
                    match self.reader.peek() {
                        Some('=') => {
                            self.reader.advance();
                            self.epp_in_text = false;
                            self.current_token = TokenKind::RenderExpr;
                            return Ok(());
                        }
                        Some('-') => {
                            self.reader.advance();
                            self.epp_in_text = false;
                            return self.next_token();
                        }
                        _ => {
                            self.epp_in_text = false;
                            return self.next_token();
                        }
                    }
                }
                Some('%') if self.reader.starts_with("%%>") => {
                    self.reader.advance();
                    self.reader.advance();
                    self.reader.advance();
                    text.push_str("%>");
                }
                Some(c) => {
                    self.reader.advance();
                    text.push(c);
                }
            }
        }
    }
}

enum NameStart {
    Lower,
    Upper,
    None,
}

/// Recognizes a heredoc end-marker line: `ws* ('|' ws*)? ('-' ws*)? TAG ws*`.
/// Returns the margin (byte width of the indentation before `|`) and the
/// trailing-newline-trim flag.
fn heredoc_end_marker(line: &str, tag: &str) -> Option<(Option<usize>, bool)> {
    let trimmed = line.trim_start_matches([' ', '\t']);
    let lead = line.len() - trimmed.len();
    let mut margin = None;
    let mut trim = false;
    let mut rest = trimmed;
    if let Some(after) = rest.strip_prefix('|') {
        margin = Some(lead);
        rest = after.trim_start_matches([' ', '\t']);
    }
    if let Some(after) = rest.strip_prefix('-') {
        trim = true;
        rest = after.trim_start_matches([' ', '\t']);
    }
    let rest = rest.strip_suffix('\r').unwrap_or(rest);
    if rest.trim_end_matches([' ', '\t']) == tag {
        Some((margin, trim))
    } else {
        None
    }
}

fn heredoc_escape_set(flags: Option<Vec<char>>) -> HeredocEscapes {
    match flags {
        None => HeredocEscapes::default(),
        Some(flags) if flags.is_empty() => HeredocEscapes {
            enabled: true,
            all: true,
            flags,
        },
        Some(flags) => HeredocEscapes {
            enabled: true,
            all: false,
            flags,
        },
    }
}

/// Token-level access to the lexer, for tests and external tooling.
///
/// The contract mirrors the parser's own use: `next_token` scans and makes
/// the result current; `set_pos` invalidates the current token and requires
/// a `next_token` before the lexer is queried again.
pub struct Lexer {
    ctx: Context,
}

impl Lexer {
    /// Creates a lexer over `source` with default options.
    #[must_use]
    pub fn new(filename: &str, source: &str) -> Self {
        Self::with_options(filename, source, ParserOptions::default())
    }

    /// Creates a lexer with explicit options (backtick strings, hex
    /// escapes, EPP mode, reserved keywords).
    #[must_use]
    pub fn with_options(filename: &str, source: &str, options: ParserOptions) -> Self {
        let mut ctx = Context::new(options, Box::new(DefaultFactory));
        ctx.reset(filename, source);
        Lexer { ctx }
    }

    /// The current token.
    #[must_use]
    pub fn current_token(&self) -> TokenKind {
        self.ctx.current_token
    }

    /// Scans the next token and returns it.
    pub fn next_token(&mut self) -> Result<TokenKind> {
        self.ctx.next_token()?;
        Ok(self.ctx.current_token)
    }

    /// Repositions the reader. The current token is invalidated; call
    /// [`Lexer::next_token`] before querying again.
    pub fn set_pos(&mut self, pos: usize) {
        self.ctx.set_pos(pos);
        self.ctx.current_token = TokenKind::End;
        self.ctx.token_value = TokenValue::None;
        self.ctx.last_token = TokenKind::End;
    }

    /// Byte offset where the current token starts.
    #[must_use]
    pub fn token_start_pos(&self) -> usize {
        self.ctx.token_start_pos
    }

    /// The current token's payload.
    #[must_use]
    pub fn token_value(&self) -> &TokenValue {
        &self.ctx.token_value
    }

    /// The current token's string form.
    #[must_use]
    pub fn token_string(&self) -> EcoString {
        self.ctx.token_string()
    }

    /// Fails with a positioned issue unless the current token is `token`.
    pub fn assert_token(&mut self, token: TokenKind) -> Result<()> {
        self.ctx.assert_token(token)
    }

    /// A `LEX_UNEXPECTED_TOKEN` issue for the current token.
    #[must_use]
    pub fn syntax_error(&self) -> ParseError {
        self.ctx.error_at(
            self.ctx.token_start_pos,
            ParseIssue::LexUnexpectedToken {
                token: self.ctx.current_token.text().into(),
            },
        )
    }
}

impl std::fmt::Debug for Lexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lexer")
            .field("current_token", &self.ctx.current_token)
            .field("token_start_pos", &self.ctx.token_start_pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new("", source);
        let mut out = Vec::new();
        loop {
            let t = lexer.next_token().unwrap_or_else(|e| panic!("lex error: {e}"));
            if t == TokenKind::End {
                return out;
            }
            out.push(t);
        }
    }

    #[test]
    fn operators_and_punctuation() {
        assert_eq!(
            kinds("-> <- ~> <~ => +> == != <= >= << >> =~ !~"),
            vec![
                TokenKind::InEdge,
                TokenKind::OutEdge,
                TokenKind::InEdgeSub,
                TokenKind::OutEdgeSub,
                TokenKind::FarrowOp,
                TokenKind::ParrowOp,
                TokenKind::Equal,
                TokenKind::NotEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::LeftShift,
                TokenKind::RightShift,
                TokenKind::Match,
                TokenKind::NotMatch,
            ]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("class undef notify"),
            vec![TokenKind::Class, TokenKind::Undef, TokenKind::Identifier]
        );
    }

    #[test]
    fn plan_keyword_requires_tasks_option() {
        assert_eq!(kinds("plan"), vec![TokenKind::Identifier]);
        let mut lexer = Lexer::with_options(
            "",
            "plan",
            ParserOptions {
                tasks_enabled: true,
                ..ParserOptions::default()
            },
        );
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Plan);
    }

    #[test]
    fn qualified_names() {
        let mut lexer = Lexer::new("", "a::b::c Foo::Bar ::top");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Identifier);
        assert_eq!(lexer.token_string(), "a::b::c");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::TypeName);
        assert_eq!(lexer.token_string(), "Foo::Bar");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Identifier);
        assert_eq!(lexer.token_string(), "::top");
    }

    #[test]
    fn mixed_case_qualified_name_is_invalid() {
        let mut lexer = Lexer::new("", "a::Bad");
        let err = lexer.next_token().unwrap_err();
        assert_eq!(err.code(), "LEX_INVALID_NAME");
    }

    #[test]
    fn numbers_carry_radix() {
        let mut lexer = Lexer::new("", "0x1F 010 42 3.14 2e3");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Integer);
        assert_eq!(*lexer.token_value(), TokenValue::Integer(31));
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Integer);
        assert_eq!(*lexer.token_value(), TokenValue::Integer(8));
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Integer);
        assert_eq!(*lexer.token_value(), TokenValue::Integer(42));
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Float);
        assert_eq!(*lexer.token_value(), TokenValue::Float(3.14));
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Float);
        assert_eq!(*lexer.token_value(), TokenValue::Float(2000.0));
    }

    #[test]
    fn octal_with_bad_digit_fails() {
        let mut lexer = Lexer::new("", "089");
        let err = lexer.next_token().unwrap_err();
        assert_eq!(err.code(), "LEX_OCTALDIGIT_EXPECTED");
    }

    #[test]
    fn zero_float_is_not_octal() {
        let mut lexer = Lexer::new("", "0.5");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Float);
        assert_eq!(*lexer.token_value(), TokenValue::Float(0.5));
    }

    #[test]
    fn variables() {
        let mut lexer = Lexer::new("", "$x $a::b $0");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Variable);
        assert_eq!(lexer.token_string(), "x");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Variable);
        assert_eq!(lexer.token_string(), "a::b");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Variable);
        assert_eq!(*lexer.token_value(), TokenValue::Integer(0));
    }

    #[test]
    fn single_quoted_string_escapes() {
        let mut lexer = Lexer::new("", r"'it\'s \\ a \n path'");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::String);
        assert_eq!(lexer.token_string(), "it's \\ a \\n path");
    }

    #[test]
    fn double_quoted_string_without_interpolation() {
        let mut lexer = Lexer::new("", r##""a\tb\n""##);
        assert_eq!(lexer.next_token().unwrap(), TokenKind::String);
        assert_eq!(lexer.token_string(), "a\tb\n");
    }

    #[test]
    fn double_quoted_string_with_interpolation() {
        let mut lexer = Lexer::new("", r##""show the ${n}""##);
        assert_eq!(lexer.next_token().unwrap(), TokenKind::ConcatenatedString);
        let TokenValue::Expression(e) = lexer.token_value() else {
            panic!("expected expression value");
        };
        assert_eq!(
            e.to_pn().to_json(),
            r##"{"^":["concat","show the ",{"^":["str",{"^":["var","n"]}]}]}"##
        );
    }

    #[test]
    fn dollar_name_interpolation() {
        let mut lexer = Lexer::new("", r##""hi $name!""##);
        assert_eq!(lexer.next_token().unwrap(), TokenKind::ConcatenatedString);
        let TokenValue::Expression(e) = lexer.token_value() else {
            panic!("expected expression value");
        };
        assert_eq!(
            e.to_pn().to_json(),
            r##"{"^":["concat","hi ",{"^":["str",{"^":["var","name"]}]},"!"]}"##
        );
    }

    #[test]
    fn literal_dollar_stays_text() {
        let mut lexer = Lexer::new("", r##""cost: $5""##);
        assert_eq!(lexer.next_token().unwrap(), TokenKind::ConcatenatedString);
        // `$5` interpolates the numeric match variable; `$ ` would not.
        let mut lexer = Lexer::new("", r##""100 $ rate""##);
        assert_eq!(lexer.next_token().unwrap(), TokenKind::String);
        assert_eq!(lexer.token_string(), "100 $ rate");
    }

    #[test]
    fn escaped_interpolation_is_literal() {
        let mut lexer = Lexer::new("", r##""no \${escape} here""##);
        assert_eq!(lexer.next_token().unwrap(), TokenKind::String);
        assert_eq!(lexer.token_string(), "no ${escape} here");
    }

    #[test]
    fn hex_escape_requires_option() {
        let mut lexer = Lexer::new("", r##""\x41""##);
        assert_eq!(lexer.next_token().unwrap(), TokenKind::String);
        assert_eq!(lexer.token_string(), "\\x41");

        let mut lexer = Lexer::with_options(
            "",
            r##""\x41""##,
            ParserOptions {
                handle_hex_escapes: true,
                ..ParserOptions::default()
            },
        );
        assert_eq!(lexer.next_token().unwrap(), TokenKind::String);
        assert_eq!(lexer.token_string(), "A");
    }

    #[test]
    fn backtick_string_requires_option() {
        let mut lexer = Lexer::new("", "`raw`");
        assert_eq!(lexer.next_token().unwrap_err().code(), "LEX_UNEXPECTED_CHAR");

        let mut lexer = Lexer::with_options(
            "",
            r"`raw \n text`",
            ParserOptions {
                handle_backtick_strings: true,
                ..ParserOptions::default()
            },
        );
        assert_eq!(lexer.next_token().unwrap(), TokenKind::String);
        assert_eq!(lexer.token_string(), "raw \\n text");
    }

    #[test]
    fn regexp_vs_division() {
        assert_eq!(
            kinds("$a / $b"),
            vec![TokenKind::Variable, TokenKind::Divide, TokenKind::Variable]
        );
        let mut lexer = Lexer::new("", "$x =~ /^foo.*/");
        lexer.next_token().unwrap();
        lexer.next_token().unwrap();
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Regexp);
        assert_eq!(lexer.token_string(), "^foo.*");
    }

    #[test]
    fn subscript_vs_list_start() {
        assert_eq!(
            kinds("$a[1]"),
            vec![
                TokenKind::Variable,
                TokenKind::LeftBracket,
                TokenKind::Integer,
                TokenKind::RightBracket
            ]
        );
        assert_eq!(
            kinds("[1]"),
            vec![TokenKind::ListStart, TokenKind::Integer, TokenKind::RightBracket]
        );
        assert_eq!(
            kinds("notice [1]")[1],
            TokenKind::ListStart
        );
    }

    #[test]
    fn paren_kinds_depend_on_whitespace() {
        assert_eq!(kinds("foo()")[1], TokenKind::LeftParen);
        assert_eq!(kinds("foo ()")[1], TokenKind::WsLeftParen);
    }

    #[test]
    fn selector_brace() {
        assert_eq!(
            kinds("$a ? { }"),
            vec![
                TokenKind::Variable,
                TokenKind::Question,
                TokenKind::SelBrace,
                TokenKind::RightBrace
            ]
        );
    }

    #[test]
    fn pipes_alternate() {
        assert_eq!(
            kinds("|$x|"),
            vec![
                TokenKind::Pipe,
                TokenKind::Variable,
                TokenKind::PipeEnd
            ]
        );
    }

    #[test]
    fn collector_delimiters() {
        assert_eq!(
            kinds("<| |> <<| |>>"),
            vec![
                TokenKind::LeftCollect,
                TokenKind::RightCollect,
                TokenKind::LeftLeftCollect,
                TokenKind::RightRightCollect
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("1 # line comment\n/* block\ncomment */ 2"),
            vec![TokenKind::Integer, TokenKind::Integer]
        );
    }

    #[test]
    fn unterminated_block_comment() {
        let mut lexer = Lexer::new("", "/* never ends");
        assert_eq!(lexer.next_token().unwrap_err().code(), "LEX_UNTERMINATED_COMMENT");
    }

    #[test]
    fn heredoc_plain() {
        let mut lexer = Lexer::new("", "@(END)\nline one\nline two\nEND\n");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Heredoc);
        let TokenValue::Expression(e) = lexer.token_value() else {
            panic!("expected expression value");
        };
        let Expression::Heredoc { syntax, text, .. } = e else {
            panic!("expected heredoc, got {e:?}");
        };
        assert_eq!(syntax, "");
        assert!(
            matches!(text.as_ref(), Expression::String { value, .. } if value == "line one\nline two\n")
        );
        // The body is skipped once the declaration line ends.
        assert_eq!(lexer.next_token().unwrap(), TokenKind::End);
    }

    #[test]
    fn heredoc_with_margin_and_trim() {
        let mut lexer = Lexer::new("", "@(END)\n    a\n    b\n    | - END\n");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Heredoc);
        let TokenValue::Expression(e) = lexer.token_value() else {
            panic!("expected expression value");
        };
        let Expression::Heredoc { text, .. } = e else {
            panic!("expected heredoc");
        };
        assert!(matches!(text.as_ref(), Expression::String { value, .. } if value == "a\nb"));
    }

    #[test]
    fn heredoc_syntax_tag() {
        let mut lexer = Lexer::new("", "@(END:json)\n{}\nEND\n");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Heredoc);
        let TokenValue::Expression(Expression::Heredoc { syntax, .. }) = lexer.token_value() else {
            panic!("expected heredoc value");
        };
        assert_eq!(syntax, "json");
    }

    #[test]
    fn heredoc_quoted_tag_interpolates() {
        let mut lexer = Lexer::new("", "@(\"END\")\nhello ${who}\nEND\n");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Heredoc);
        let TokenValue::Expression(Expression::Heredoc { text, .. }) = lexer.token_value() else {
            panic!("expected heredoc value");
        };
        assert!(matches!(text.as_ref(), Expression::ConcatenatedString { .. }));
    }

    #[test]
    fn heredoc_escape_flags() {
        let mut lexer = Lexer::new("", "@(END/t)\na\\tb\\nc\nEND\n");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Heredoc);
        let TokenValue::Expression(Expression::Heredoc { text, .. }) = lexer.token_value() else {
            panic!("expected heredoc value");
        };
        // \t enabled, \n untouched.
        assert!(
            matches!(text.as_ref(), Expression::String { value, .. } if value == "a\tb\\nc\n")
        );
    }

    #[test]
    fn heredoc_continues_declaration_line() {
        let mut lexer = Lexer::new("", "@(ONE) + @(TWO)\none\nONE\ntwo\nTWO\n");
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Heredoc);
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Add);
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Heredoc);
        let TokenValue::Expression(Expression::Heredoc { text, .. }) = lexer.token_value() else {
            panic!("expected heredoc value");
        };
        assert!(matches!(text.as_ref(), Expression::String { value, .. } if value == "two\n"));
        assert_eq!(lexer.next_token().unwrap(), TokenKind::End);
    }

    #[test]
    fn heredoc_unterminated() {
        let mut lexer = Lexer::new("", "@(END)\nno marker here");
        assert_eq!(lexer.next_token().unwrap_err().code(), "LEX_HEREDOC_UNTERMINATED");
    }

    #[test]
    fn heredoc_bad_escape_flag() {
        let mut lexer = Lexer::new("", "@(END/q)\nx\nEND\n");
        assert_eq!(
            lexer.next_token().unwrap_err().code(),
            "LEX_HEREDOC_ILLEGAL_ESCAPE"
        );
    }

    #[test]
    fn set_pos_invalidates_current_token() {
        let mut lexer = Lexer::new("", "alpha beta");
        lexer.next_token().unwrap();
        let start = lexer.token_start_pos();
        lexer.next_token().unwrap();
        assert_eq!(lexer.token_string(), "beta");
        lexer.set_pos(start);
        assert_eq!(lexer.current_token(), TokenKind::End);
        assert_eq!(lexer.next_token().unwrap(), TokenKind::Identifier);
        assert_eq!(lexer.token_string(), "alpha");
    }

    #[test]
    fn syntax_error_reports_current_token() {
        let mut lexer = Lexer::new("", "=>");
        lexer.next_token().unwrap();
        let err = lexer.syntax_error();
        assert_eq!(err.code(), "LEX_UNEXPECTED_TOKEN");
        assert_eq!(err.to_string(), "unexpected token '=>' (line: 1, column: 1)");
    }
}
