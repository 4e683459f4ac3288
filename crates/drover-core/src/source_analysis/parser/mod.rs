// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Recursive descent parser for Drover source code.
//!
//! The parser is the other half of the lexing [`Context`]: grammar methods
//! and scanning methods operate on the same state, which is what lets
//! interpolated strings re-enter the expression grammar and lets the parser
//! rewind the reader and re-lex after context-sensitive decisions (resource
//! shape discrimination, the statement-call hash form).
//!
//! # Precedence
//!
//! Precedence is implemented by method layering, lowest-binding first:
//!
//! | Layer | Operators |
//! |-------|-----------|
//! | `relationship` | `->` `<-` `~>` `<~` |
//! | `assignment` | `=` `+=` `-=` (right-assoc) |
//! | `resource` | an atom followed by `{` |
//! | `expression` | postfix `produces`/`consumes` |
//! | `select_expression` | `?` selectors |
//! | `or_expression` / `and_expression` | `or`, `and` |
//! | `compare` / `equal` / `shift` / `additive` / `multiplicative` | binary operators |
//! | `match_expression` / `in_expression` | `=~` `!~`, `in` |
//! | `unary_expression` | prefix `-` `+` `!` `*` `@` `@@` |
//! | `primary_expression` | postfix calls, collectors, access, `.` |
//! | `atom_expression` | literals, keywords, grouping |
//!
//! # Failure model
//!
//! The parse is fail-fast: every production returns
//! `Result<Expression, ParseError>` and the first issue unwinds the whole
//! descent. No partial tree escapes on error.

use ecow::EcoString;

use crate::ast::{Expression, ResourceForm};
use crate::factory::{DefaultFactory, ExpressionFactory};

use super::lexer::Context;
use super::{ParseError, ParseIssue, TokenKind, TokenValue};

mod declarations;
mod resources;

#[cfg(test)]
mod property_tests;

pub(crate) type Result<T> = std::result::Result<T, ParseError>;

/// A grammar production usable with [`Context::expressions`].
type Producer = fn(&mut Context) -> Result<Expression>;

/// Names that become function calls when followed by a non-parenthesized
/// argument at statement position.
pub(crate) fn is_statement_call(name: &str) -> bool {
    matches!(
        name,
        "require"
            | "realize"
            | "include"
            | "contain"
            | "tag"
            | "debug"
            | "info"
            | "notice"
            | "warning"
            | "err"
            | "fail"
            | "import"
            | "break"
            | "next"
            | "return"
    )
}

/// Grammar and lexer extensions, all off by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParserOptions {
    /// Backtick-delimited raw strings.
    pub handle_backtick_strings: bool,
    /// `\xNN` escapes in double-quoted strings.
    pub handle_hex_escapes: bool,
    /// Reserves the `actor` keyword.
    pub actors_enabled: bool,
    /// Reserves the `plan` keyword.
    pub tasks_enabled: bool,
    /// Treat source as template text with embedded expressions.
    pub epp_mode: bool,
}

/// Parses Drover source text into an AST.
///
/// A parser owns its context and may be reused: each call to
/// [`Parser::parse`] resets the reader, locator, and definition list.
///
/// # Examples
///
/// ```
/// use drover_core::source_analysis::Parser;
///
/// let mut parser = Parser::new();
/// let ast = parser.parse("site.dv", "notice 'hello'", false).unwrap();
/// assert!(matches!(ast, drover_core::ast::Expression::Program { .. }));
/// ```
pub struct Parser {
    ctx: Context,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// A parser with default options and the canonical factory.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(ParserOptions::default())
    }

    /// A parser with explicit options.
    #[must_use]
    pub fn with_options(options: ParserOptions) -> Self {
        Self::with_factory(options, Box::new(DefaultFactory))
    }

    /// A parser constructing nodes through a custom factory.
    #[must_use]
    pub fn with_factory(options: ParserOptions, factory: Box<dyn ExpressionFactory>) -> Self {
        Parser {
            ctx: Context::new(options, factory),
        }
    }

    /// Parses `source`. The file name is used in issue positions and may be
    /// empty.
    ///
    /// With `single_expression` set, the result is the bare expression (or
    /// `undef` for empty input); otherwise it is a
    /// [`Program`](Expression::Program) wrapping the top-level block and the
    /// collected definitions.
    pub fn parse(
        &mut self,
        filename: &str,
        source: &str,
        single_expression: bool,
    ) -> std::result::Result<Expression, ParseError> {
        self.ctx.reset(filename, source);
        let body = if self.ctx.options.epp_mode {
            self.ctx.parse_epp_top()?
        } else {
            self.ctx.next_token()?;
            self.ctx.parse_until(TokenKind::End, single_expression)?
        };
        if single_expression {
            return Ok(body);
        }
        let definitions = std::mem::take(&mut self.ctx.definitions);
        let span = self.ctx.span(0, self.ctx.pos());
        Ok(self.ctx.factory.program(body, definitions, span))
    }
}

impl Context {
    // ========================================================================
    // Blocks and statements
    // ========================================================================

    /// Parses expressions until `end_token`. In single-expression mode the
    /// result is one expression (or `undef` when the input is empty);
    /// otherwise a block with statement calls promoted.
    pub(crate) fn parse_until(
        &mut self,
        end_token: TokenKind,
        single_expression: bool,
    ) -> Result<Expression> {
        let start = self.token_start_pos;
        if single_expression {
            if self.current_token == end_token {
                let span = self.span(start, 0);
                return Ok(self.factory.undef(span));
            }
            let expr = self.relationship()?;
            self.assert_token(end_token)?;
            return Ok(expr);
        }
        let mut expressions = Vec::with_capacity(10);
        while self.current_token != end_token {
            expressions.push(self.syntactic_statement()?);
            if self.current_token == TokenKind::Semicolon {
                self.next_token()?;
            }
        }
        let statements = self.transform_calls(expressions)?;
        let span = self.span(start, self.pos() - start);
        Ok(self.factory.block(statements, span))
    }

    /// One statement: a relationship expression, or several of them joined
    /// by commas (which only statement-call promotion may consume).
    fn syntactic_statement(&mut self) -> Result<Expression> {
        let expr = self.relationship()?;
        if self.current_token != TokenKind::Comma {
            return Ok(expr);
        }
        let start = expr.byte_offset();
        let mut elements = vec![expr];
        while self.current_token == TokenKind::Comma {
            self.next_token()?;
            elements.push(self.relationship()?);
        }
        Ok(Expression::CommaSeparatedList {
            span: self.span(start, self.pos() - start),
            elements,
        })
    }

    /// Scans adjacent statements pairwise and merges a statement-call name
    /// with its following argument into a call. An ordinary named call left
    /// in statement position loses its `rval_required` flag. A surviving
    /// comma-separated list means an extraneous comma between statements.
    fn transform_calls(&mut self, exprs: Vec<Expression>) -> Result<Vec<Expression>> {
        if exprs.is_empty() {
            return Ok(exprs);
        }
        let mut result = Vec::with_capacity(exprs.len());
        let mut it = exprs.into_iter();
        let mut memo = it.next();
        while let Some(expr) = it.next() {
            let m = memo.take().expect("statement present");
            let promote = matches!(
                &m,
                Expression::QualifiedName { name, .. } if is_statement_call(name)
            ) && !matches!(expr, Expression::KeyedEntry { .. });
            if promote {
                let mut expr = expr;
                if let Expression::CallNamedFunction { rval_required, .. } = &mut expr {
                    *rval_required = true;
                }
                let start = m.byte_offset();
                let end = expr.byte_offset() + expr.byte_length();
                let args = match expr {
                    Expression::CommaSeparatedList { elements, .. } => elements,
                    other => vec![other],
                };
                let span = self.span(start, end - start);
                result.push(self.factory.call_named(m, false, args, None, span));
                memo = it.next();
            } else {
                let mut m = m;
                if let Expression::CallNamedFunction { rval_required, .. } = &mut m {
                    *rval_required = false;
                }
                result.push(m);
                memo = Some(expr);
            }
        }
        if let Some(mut m) = memo {
            if let Expression::CallNamedFunction { rval_required, .. } = &mut m {
                *rval_required = false;
            }
            result.push(m);
        }
        for expr in &result {
            if let Expression::CommaSeparatedList { elements, .. } = expr {
                // The comma's position is estimated to be right after the
                // first statement in the list.
                let first = &elements[0];
                let p = first.byte_offset() + first.byte_length();
                return Err(self.error_at(p, ParseIssue::ParseExtraneousComma));
            }
        }
        Ok(result)
    }

    /// Comma-separated productions terminated by `end_token` (consumed).
    pub(crate) fn expressions(
        &mut self,
        end_token: TokenKind,
        producer: Producer,
    ) -> Result<Vec<Expression>> {
        let mut exprs = Vec::with_capacity(4);
        loop {
            if self.current_token == end_token {
                self.next_token()?;
                return Ok(exprs);
            }
            exprs.push(producer(self)?);
            if self.current_token != TokenKind::Comma {
                if self.current_token != end_token {
                    self.set_pos(self.token_start_pos);
                    return Err(self.error_at(
                        self.token_start_pos,
                        ParseIssue::ParseExpectedOneOfTokens {
                            expected: format!(
                                "'{}' or '{}'",
                                TokenKind::Comma.text(),
                                end_token.text()
                            )
                            .into(),
                            actual: self.current_token.text().into(),
                        },
                    ));
                }
                self.next_token()?;
                return Ok(exprs);
            }
            self.next_token()?;
        }
    }

    // ========================================================================
    // List, hash, and argument helpers
    // ========================================================================

    pub(crate) fn array_expression(&mut self) -> Result<Vec<Expression>> {
        let exprs = self.expressions(TokenKind::RightBracket, Context::collection_entry)?;
        Ok(self.join_hash_entries(exprs))
    }

    pub(crate) fn hash_expression(&mut self) -> Result<Vec<Expression>> {
        self.expressions(TokenKind::RightBrace, Context::keyed_entry)
    }

    pub(crate) fn arguments(&mut self) -> Result<Vec<Expression>> {
        let exprs = self.expressions(TokenKind::RightParen, Context::argument)?;
        Ok(self.join_hash_entries(exprs))
    }

    fn collection_entry(&mut self) -> Result<Expression> {
        self.argument()
    }

    /// An argument: a relationship expression, optionally keyed with `=>`.
    fn argument(&mut self) -> Result<Expression> {
        let expr = self.handle_keyword(Context::relationship)?;
        if self.current_token == TokenKind::FarrowOp {
            self.next_token()?;
            let value = self.handle_keyword(Context::relationship)?;
            let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
            return Ok(self.factory.keyed_entry(expr, value, span));
        }
        Ok(expr)
    }

    fn hash_entry(&mut self) -> Result<Expression> {
        self.handle_keyword(Context::relationship)
    }

    fn keyed_entry(&mut self) -> Result<Expression> {
        let key = self.hash_entry()?;
        if self.current_token != TokenKind::FarrowOp {
            return Err(self.error(ParseIssue::ParseExpectedFarrowAfterKey));
        }
        self.next_token()?;
        let value = self.hash_entry()?;
        let span = self.span(key.byte_offset(), self.pos() - key.byte_offset());
        Ok(self.factory.keyed_entry(key, value, span))
    }

    /// Keywords that double as bare words in value positions.
    fn handle_keyword(&mut self, next: Producer) -> Result<Expression> {
        match self.current_token {
            TokenKind::Type
            | TokenKind::Function
            | TokenKind::Plan
            | TokenKind::Actor
            | TokenKind::Application
            | TokenKind::Consumes
            | TokenKind::Produces
            | TokenKind::Site => {
                let start = self.token_start_pos;
                let name = self.token_string();
                let span = self.span(start, self.pos() - start);
                let mut expr = self.factory.qualified_name(name, span);
                self.next_token()?;
                if self.current_token == TokenKind::LeftParen {
                    expr = self.call_function_expression(expr)?;
                }
                Ok(expr)
            }
            _ => next(self),
        }
    }

    /// Converts consecutive keyed entries in an argument or array list into
    /// implicit hash literals; non-entry elements stay at the top level.
    fn join_hash_entries(&self, exprs: Vec<Expression>) -> Vec<Expression> {
        if exprs
            .iter()
            .any(|e| matches!(e, Expression::KeyedEntry { .. }))
        {
            self.process_hash_entries(exprs)
        } else {
            exprs
        }
    }

    fn process_hash_entries(&self, exprs: Vec<Expression>) -> Vec<Expression> {
        let mut result = Vec::with_capacity(exprs.len());
        let mut collector: Vec<Expression> = Vec::new();
        for expr in exprs {
            if matches!(expr, Expression::KeyedEntry { .. }) {
                collector.push(expr);
            } else {
                if !collector.is_empty() {
                    result.push(self.hash_without_braces(std::mem::take(&mut collector)));
                }
                result.push(expr);
            }
        }
        if !collector.is_empty() {
            result.push(self.hash_without_braces(collector));
        }
        result
    }

    fn hash_without_braces(&self, entries: Vec<Expression>) -> Expression {
        let start = entries[0].byte_offset();
        let last = entries.last().expect("entries not empty");
        let end = last.byte_offset() + last.byte_length();
        let span = self.span(start, end - start);
        self.factory.hash(entries, span)
    }

    // ========================================================================
    // Precedence layers
    // ========================================================================

    pub(crate) fn relationship(&mut self) -> Result<Expression> {
        let mut expr = self.assignment()?;
        loop {
            match self.current_token {
                TokenKind::InEdge
                | TokenKind::InEdgeSub
                | TokenKind::OutEdge
                | TokenKind::OutEdgeSub => {
                    let op = self.token_string();
                    self.next_token()?;
                    let rhs = self.assignment()?;
                    let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
                    expr = self.factory.rel_op(op, expr, rhs, span);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn assignment(&mut self) -> Result<Expression> {
        let expr = self.resource()?;
        match self.current_token {
            TokenKind::Assign | TokenKind::AddAssign | TokenKind::SubtractAssign => {
                let op = self.token_string();
                self.next_token()?;
                let rhs = self.assignment()?;
                let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
                Ok(self.factory.assignment(op, expr, rhs, span))
            }
            _ => Ok(expr),
        }
    }

    fn resource(&mut self) -> Result<Expression> {
        let expr = self.expression()?;
        if self.current_token == TokenKind::LeftBrace {
            let start = expr.byte_offset();
            return self.resource_expression(start, expr, ResourceForm::Regular);
        }
        Ok(expr)
    }

    /// The capability-mapping layer: at most one `produces`/`consumes`
    /// postfix, and only for a class-naming left operand.
    pub(crate) fn expression(&mut self) -> Result<Expression> {
        let expr = self.select_expression()?;
        if matches!(
            self.current_token,
            TokenKind::Produces | TokenKind::Consumes
        ) && matches!(
            expr,
            Expression::QualifiedName { .. }
                | Expression::QualifiedReference { .. }
                | Expression::ReservedWord { .. }
                | Expression::Access { .. }
        ) {
            let kind = self.token_string();
            return self.capability_mapping(expr, kind);
        }
        Ok(expr)
    }

    fn select_expression(&mut self) -> Result<Expression> {
        let mut expr = self.or_expression()?;
        while self.current_token == TokenKind::Question {
            expr = self.selectors_expression(expr)?;
        }
        Ok(expr)
    }

    fn or_expression(&mut self) -> Result<Expression> {
        let expr = self.and_expression()?;
        if self.current_token == TokenKind::Or {
            self.next_token()?;
            let rhs = self.or_expression()?;
            let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
            return Ok(self.factory.or(expr, rhs, span));
        }
        Ok(expr)
    }

    fn and_expression(&mut self) -> Result<Expression> {
        let expr = self.compare_expression()?;
        if self.current_token == TokenKind::And {
            self.next_token()?;
            let rhs = self.and_expression()?;
            let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
            return Ok(self.factory.and(expr, rhs, span));
        }
        Ok(expr)
    }

    fn compare_expression(&mut self) -> Result<Expression> {
        let expr = self.equal_expression()?;
        match self.current_token {
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => {
                let op = self.token_string();
                self.next_token()?;
                let rhs = self.compare_expression()?;
                let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
                Ok(self.factory.comparison(op, expr, rhs, span))
            }
            _ => Ok(expr),
        }
    }

    fn equal_expression(&mut self) -> Result<Expression> {
        let expr = self.shift_expression()?;
        match self.current_token {
            TokenKind::Equal | TokenKind::NotEqual => {
                let op = self.token_string();
                self.next_token()?;
                let rhs = self.equal_expression()?;
                let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
                Ok(self.factory.comparison(op, expr, rhs, span))
            }
            _ => Ok(expr),
        }
    }

    fn shift_expression(&mut self) -> Result<Expression> {
        let expr = self.additive_expression()?;
        match self.current_token {
            TokenKind::LeftShift | TokenKind::RightShift => {
                let op = self.token_string();
                self.next_token()?;
                let rhs = self.shift_expression()?;
                let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
                Ok(self.factory.arithmetic(op, expr, rhs, span))
            }
            _ => Ok(expr),
        }
    }

    fn additive_expression(&mut self) -> Result<Expression> {
        let expr = self.multiplicative_expression()?;
        match self.current_token {
            TokenKind::Add | TokenKind::Subtract => {
                let op = self.token_string();
                self.next_token()?;
                let rhs = self.additive_expression()?;
                let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
                Ok(self.factory.arithmetic(op, expr, rhs, span))
            }
            _ => Ok(expr),
        }
    }

    fn multiplicative_expression(&mut self) -> Result<Expression> {
        let expr = self.match_expression()?;
        match self.current_token {
            TokenKind::Multiply | TokenKind::Divide | TokenKind::Remainder => {
                let op = self.token_string();
                self.next_token()?;
                let rhs = self.multiplicative_expression()?;
                let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
                Ok(self.factory.arithmetic(op, expr, rhs, span))
            }
            _ => Ok(expr),
        }
    }

    fn match_expression(&mut self) -> Result<Expression> {
        let expr = self.in_expression()?;
        match self.current_token {
            TokenKind::Match | TokenKind::NotMatch => {
                let op = self.token_string();
                self.next_token()?;
                let rhs = self.match_expression()?;
                let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
                Ok(self.factory.match_expression(op, expr, rhs, span))
            }
            _ => Ok(expr),
        }
    }

    fn in_expression(&mut self) -> Result<Expression> {
        let expr = self.unary_expression()?;
        if self.current_token == TokenKind::In {
            self.next_token()?;
            let rhs = self.in_expression()?;
            let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
            return Ok(self.factory.in_expression(expr, rhs, span));
        }
        Ok(expr)
    }

    fn unary_expression(&mut self) -> Result<Expression> {
        let unary_start = self.token_start_pos;
        match self.current_token {
            TokenKind::Subtract => {
                // `-` directly before a digit folds into the literal.
                if self.reader.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.next_token()?;
                    match &mut self.token_value {
                        TokenValue::Integer(v) => *v = -*v,
                        TokenValue::Float(v) => *v = -*v,
                        _ => {}
                    }
                    let mut expr = self.primary_expression()?;
                    expr.update_span(unary_start, self.pos() - unary_start);
                    return Ok(expr);
                }
                self.next_token()?;
                let expr = self.primary_expression()?;
                let span = self.span_from(unary_start);
                Ok(self.factory.negate(expr, span))
            }
            TokenKind::Add => {
                // `+` exists only as a sign on numeric literals.
                if self.reader.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.next_token()?;
                    let mut expr = self.primary_expression()?;
                    expr.update_span(unary_start, self.pos() - unary_start);
                    return Ok(expr);
                }
                Err(self.error_at(
                    unary_start,
                    ParseIssue::LexUnexpectedToken { token: "+".into() },
                ))
            }
            TokenKind::Not => {
                self.next_token()?;
                let expr = self.unary_expression()?;
                let span = self.span_from(unary_start);
                Ok(self.factory.not(expr, span))
            }
            TokenKind::Multiply => {
                self.next_token()?;
                let expr = self.unary_expression()?;
                let span = self.span_from(unary_start);
                Ok(self.factory.unfold(expr, span))
            }
            TokenKind::At | TokenKind::AtAt => {
                let form = if self.current_token == TokenKind::AtAt {
                    ResourceForm::Exported
                } else {
                    ResourceForm::Virtual
                };
                self.next_token()?;
                let expr = self.primary_expression()?;
                self.assert_token(TokenKind::LeftBrace)?;
                self.resource_expression(unary_start, expr, form)
            }
            _ => self.primary_expression(),
        }
    }

    fn primary_expression(&mut self) -> Result<Expression> {
        let mut expr = self.atom_expression()?;
        loop {
            match self.current_token {
                TokenKind::LeftParen | TokenKind::Pipe => {
                    expr = self.call_function_expression(expr)?;
                }
                TokenKind::LeftCollect | TokenKind::LeftLeftCollect => {
                    expr = self.collect_expression(expr)?;
                }
                TokenKind::LeftBracket => {
                    self.next_token()?;
                    let keys = self.array_expression()?;
                    let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
                    expr = self.factory.access(expr, keys, span);
                }
                TokenKind::Dot => {
                    self.next_token()?;
                    let rhs = if self.current_token == TokenKind::Type {
                        let name = self.token_string();
                        let span = self.span_from(self.token_start_pos);
                        let qn = self.factory.qualified_name(name, span);
                        self.next_token()?;
                        qn
                    } else {
                        self.atom_expression()?
                    };
                    let span = self.span(expr.byte_offset(), self.pos() - expr.byte_offset());
                    expr = self.factory.named_access(expr, rhs, span);
                }
                _ => {
                    if matches!(expr, Expression::NamedAccess { .. }) {
                        // A trailing named-access chain is a method call.
                        let start = expr.byte_offset();
                        let length = expr.byte_length();
                        expr = self.convert_lhs_to_call(expr, Vec::new(), None, start, length);
                    }
                    return Ok(expr);
                }
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn atom_expression(&mut self) -> Result<Expression> {
        let atom_start = self.token_start_pos;
        match self.current_token {
            TokenKind::LeftParen | TokenKind::WsLeftParen => {
                self.next_token()?;
                let inner = self.relationship()?;
                self.assert_token(TokenKind::RightParen)?;
                let span = self.span_from(atom_start);
                let expr = self.factory.parenthesized(inner, span);
                self.next_token()?;
                Ok(expr)
            }
            TokenKind::LeftBracket | TokenKind::ListStart => {
                self.next_token()?;
                let elements = self.array_expression()?;
                let span = self.span_from(atom_start);
                Ok(self.factory.array(elements, span))
            }
            TokenKind::LeftBrace => {
                self.next_token()?;
                let entries = self.hash_expression()?;
                let span = self.span_from(atom_start);
                Ok(self.factory.hash(entries, span))
            }
            TokenKind::Boolean => {
                let value = matches!(self.token_value, TokenValue::Boolean(true));
                let span = self.span_from(atom_start);
                self.next_token()?;
                Ok(self.factory.boolean(value, span))
            }
            TokenKind::Integer => {
                let TokenValue::Integer(value) = self.token_value else {
                    return Err(self.unexpected_token());
                };
                let radix = self.radix;
                let span = self.span_from(atom_start);
                self.next_token()?;
                Ok(self.factory.integer(value, radix, span))
            }
            TokenKind::Float => {
                let TokenValue::Float(value) = self.token_value else {
                    return Err(self.unexpected_token());
                };
                let span = self.span_from(atom_start);
                self.next_token()?;
                Ok(self.factory.float(value, span))
            }
            TokenKind::String => {
                let value = self.token_string();
                let span = self.span_from(atom_start);
                self.next_token()?;
                Ok(self.factory.string(value, span))
            }
            TokenKind::Attr | TokenKind::Private => {
                let name = self.token_string();
                let span = self.span_from(atom_start);
                self.next_token()?;
                Ok(self.factory.reserved_word(name, false, span))
            }
            TokenKind::Default => {
                let span = self.span_from(atom_start);
                self.next_token()?;
                Ok(self.factory.default_literal(span))
            }
            TokenKind::Heredoc | TokenKind::ConcatenatedString => {
                let TokenValue::Expression(expr) = std::mem::take(&mut self.token_value) else {
                    return Err(self.unexpected_token());
                };
                self.next_token()?;
                Ok(expr)
            }
            TokenKind::Regexp => {
                let pattern = self.token_string();
                let span = self.span_from(atom_start);
                self.next_token()?;
                Ok(self.factory.regexp(pattern, span))
            }
            TokenKind::Undef => {
                let span = self.span_from(atom_start);
                self.next_token()?;
                Ok(self.factory.undef(span))
            }
            TokenKind::TypeName => {
                let name = self.token_string();
                let span = self.span_from(atom_start);
                self.next_token()?;
                Ok(self.factory.qualified_reference(name, span))
            }
            TokenKind::Identifier => {
                let name = self.token_string();
                let span = self.span_from(atom_start);
                self.next_token()?;
                Ok(self.factory.qualified_name(name, span))
            }
            TokenKind::Variable => {
                let value = std::mem::take(&mut self.token_value);
                self.next_token()?;
                let name = match value {
                    TokenValue::String(s) => {
                        let span = self.span(atom_start + 1, s.len());
                        self.factory.qualified_name(s, span)
                    }
                    TokenValue::Integer(i) => {
                        let span = self.span(atom_start + 1, self.pos() - (atom_start + 1));
                        self.factory.integer(i, 10, span)
                    }
                    _ => return Err(self.unexpected_token()),
                };
                let span = self.span(atom_start, self.pos() - atom_start);
                Ok(self.factory.variable(name, span))
            }
            TokenKind::Case => self.case_expression(),
            TokenKind::If => self.if_expression(false),
            TokenKind::Unless => self.if_expression(true),
            TokenKind::Class => {
                let name = self.token_string();
                self.next_token()?;
                if self.current_token == TokenKind::LeftBrace {
                    // A `class { 'name': }` resource.
                    let span = self.span(atom_start, self.pos() - atom_start);
                    Ok(self.factory.qualified_name(name, span))
                } else {
                    self.class_expression(atom_start)
                }
            }
            TokenKind::Type => {
                let name = self.token_string();
                self.next_token()?;
                if self.current_token == TokenKind::TypeName {
                    self.type_alias_or_definition()
                } else {
                    // Not a type definition; `type` is just a bare word here.
                    let span = self.span(atom_start, self.pos() - atom_start);
                    Ok(self.factory.qualified_name(name, span))
                }
            }
            TokenKind::Plan => self.plan_definition(false),
            TokenKind::Actor => self.plan_definition(true),
            TokenKind::Function => self.function_definition(),
            TokenKind::Node => self.node_definition(),
            TokenKind::Define => self.resource_definition(false),
            TokenKind::Application => self.resource_definition(true),
            TokenKind::Site => self.site_definition(),
            TokenKind::RenderString => {
                let value = self.token_string();
                let span = self.span_from(atom_start);
                self.next_token()?;
                Ok(self.factory.render_string(value, span))
            }
            TokenKind::RenderExpr => {
                self.next_token()?;
                let expr = self.expression()?;
                let span = self.span(atom_start, self.pos() - atom_start);
                Ok(self.factory.render_expression(expr, span))
            }
            _ => Err(self.unexpected_token()),
        }
    }

    /// `LEX_UNEXPECTED_TOKEN` for the current token, rewound to its start.
    fn unexpected_token(&mut self) -> ParseError {
        self.set_pos(self.token_start_pos);
        self.error_at(
            self.token_start_pos,
            ParseIssue::LexUnexpectedToken {
                token: self.current_token.text().into(),
            },
        )
    }

    // ========================================================================
    // Conditionals and selectors
    // ========================================================================

    fn if_expression(&mut self, unless: bool) -> Result<Expression> {
        let start = self.token_start_pos;
        self.next_token()?;
        let condition = self.or_expression()?;
        self.assert_token(TokenKind::LeftBrace)?;
        self.next_token()?;
        let then_part = self.parse_until(TokenKind::RightBrace, false)?;
        self.next_token()?;

        let else_part = match self.current_token {
            TokenKind::Else => {
                self.next_token()?;
                self.assert_token(TokenKind::LeftBrace)?;
                self.next_token()?;
                let e = self.parse_until(TokenKind::RightBrace, false)?;
                self.next_token()?;
                e
            }
            TokenKind::Elsif => {
                if unless {
                    return Err(self.error(ParseIssue::ParseElsifInUnless));
                }
                self.if_expression(false)?
            }
            _ => {
                let span = self.span(self.token_start_pos, 0);
                self.factory.nop(span)
            }
        };

        let span = self.span_from(start);
        if unless {
            Ok(self
                .factory
                .unless_expression(condition, then_part, else_part, span))
        } else {
            Ok(self
                .factory
                .if_expression(condition, then_part, else_part, span))
        }
    }

    fn selectors_expression(&mut self, test: Expression) -> Result<Expression> {
        self.next_token()?;
        let selectors = if self.current_token == TokenKind::SelBrace {
            self.next_token()?;
            self.expressions(TokenKind::RightBrace, Context::selector_entry)?
        } else {
            vec![self.selector_entry()?]
        };
        let span = self.span(test.byte_offset(), self.pos() - test.byte_offset());
        Ok(self.factory.select(test, selectors, span))
    }

    fn selector_entry(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        let key = self.expression()?;
        self.assert_token(TokenKind::FarrowOp)?;
        self.next_token()?;
        let value = self.expression()?;
        let span = self.span_from(start);
        Ok(self.factory.selector(key, value, span))
    }

    fn case_expression(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        self.next_token()?;
        let test = self.expression()?;
        self.assert_token(TokenKind::LeftBrace)?;
        self.next_token()?;
        let options = self.case_options()?;
        let span = self.span_from(start);
        Ok(self.factory.case_expression(test, options, span))
    }

    fn case_options(&mut self) -> Result<Vec<Expression>> {
        let mut options = Vec::with_capacity(4);
        loop {
            options.push(self.case_option()?);
            if self.current_token == TokenKind::RightBrace {
                self.next_token()?;
                return Ok(options);
            }
        }
    }

    fn case_option(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        let values = self.expressions(TokenKind::Colon, Context::expression)?;
        self.assert_token(TokenKind::LeftBrace)?;
        self.next_token()?;
        let body = self.parse_until(TokenKind::RightBrace, false)?;
        self.next_token()?;
        let span = self.span_from(start);
        Ok(self.factory.when(values, body, span))
    }

    // ========================================================================
    // Calls and lambdas
    // ========================================================================

    fn call_function_expression(&mut self, functor: Expression) -> Result<Expression> {
        let mut args = Vec::new();
        if self.current_token != TokenKind::Pipe {
            self.next_token()?;
            args = self.arguments()?;
        }
        let mut block = None;
        if self.current_token == TokenKind::Pipe {
            block = Some(self.lambda()?);
        }
        let start = functor.byte_offset();
        if matches!(functor, Expression::NamedAccess { .. }) {
            let length = self.pos() - start;
            return Ok(self.convert_lhs_to_call(functor, args, block, start, length));
        }
        let span = self.span(start, self.pos() - start);
        Ok(self.factory.call_named(functor, true, args, block, span))
    }

    /// Rebuilds a named-access chain as a method call, converting nested
    /// chains from the inside out.
    fn convert_lhs_to_call(
        &self,
        access: Expression,
        args: Vec<Expression>,
        lambda: Option<Expression>,
        start: usize,
        length: usize,
    ) -> Expression {
        let Expression::NamedAccess { span, lhs, rhs } = access else {
            let span = self.span(start, length);
            return self.factory.call_method(access, args, lambda, span);
        };
        let lhs = *lhs;
        let functor = if matches!(lhs, Expression::NamedAccess { .. }) {
            let inner_start = lhs.byte_offset();
            let inner_length = lhs.byte_length();
            let converted = self.convert_lhs_to_call(lhs, Vec::new(), None, inner_start, inner_length);
            self.factory.named_access(converted, *rhs, span)
        } else {
            self.factory.named_access(lhs, *rhs, span)
        };
        let span = self.span(start, length);
        self.factory.call_method(functor, args, lambda, span)
    }

    pub(crate) fn lambda(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        let parameters = self.lambda_parameter_list()?;
        let return_type = if self.current_token == TokenKind::RightShift {
            self.next_token()?;
            Some(self.parameter_type()?)
        } else {
            None
        };
        self.assert_token(TokenKind::LeftBrace)?;
        self.next_token()?;
        let body = self.parse_until(TokenKind::RightBrace, false)?;
        self.next_token()?;
        let span = self.span_from(start);
        Ok(self.factory.lambda(parameters, body, return_type, span))
    }

    // ========================================================================
    // Interpolation re-entry
    // ========================================================================

    /// Parses the expression inside `${...}`. The reader sits just past the
    /// opening brace; on return it sits just past the closing one. Token
    /// state is saved and restored on both success and error paths, since
    /// the caller is mid-token.
    pub(crate) fn parse_interpolated_expression(&mut self) -> Result<Expression> {
        let saved_token = self.current_token;
        let saved_value = std::mem::take(&mut self.token_value);
        let saved_start = self.token_start_pos;
        let saved_last = self.last_token;
        let saved_radix = self.radix;
        let saved_pipe = self.expect_pipe_end;

        self.last_token = TokenKind::End;
        self.expect_pipe_end = false;
        let result = self.interpolated_body();

        self.current_token = saved_token;
        self.token_value = saved_value;
        self.token_start_pos = saved_start;
        self.last_token = saved_last;
        self.radix = saved_radix;
        self.expect_pipe_end = saved_pipe;

        result.map(|expr| self.interpolated_to_variable(expr))
    }

    fn interpolated_body(&mut self) -> Result<Expression> {
        self.next_token()?;
        let expr = self.relationship()?;
        self.assert_token(TokenKind::RightBrace)?;
        Ok(expr)
    }

    /// `${name}` means the variable `$name`, and `${name[k]}` indexes it;
    /// anything else is taken as written.
    fn interpolated_to_variable(&self, expr: Expression) -> Expression {
        match expr {
            Expression::QualifiedName { .. } | Expression::Integer { .. } => {
                let span = expr.span().clone();
                self.factory.variable(expr, span)
            }
            Expression::Access {
                span,
                operand,
                keys,
            } => {
                let operand = self.interpolated_to_variable(*operand);
                self.factory.access(operand, keys, span)
            }
            other => other,
        }
    }

    // ========================================================================
    // EPP top level
    // ========================================================================

    /// Parses a whole EPP template: leading text, an optional `|params|`
    /// header, then alternating text and expressions until the end of
    /// input. The result is an EPP expression inside a lambda.
    pub(crate) fn parse_epp_top(&mut self) -> Result<Expression> {
        self.next_token()?;
        let mut text: Option<EcoString> = None;
        if self.current_token == TokenKind::RenderString {
            text = Some(self.token_string());
            self.next_token()?;
        }

        if self.current_token == TokenKind::End {
            // No expressions in the template at all.
            let span = self.span(0, self.pos());
            let rs = self.factory.render_string(text.unwrap_or_default(), span);
            return Ok(self.as_epp_lambda(rs));
        }

        if self.current_token == TokenKind::Pipe {
            if text.as_ref().is_some_and(|t| !t.is_empty()) {
                return Err(self.error_at(
                    self.token_start_pos,
                    ParseIssue::ParseIllegalEppParameters,
                ));
            }
            let parameters = self.lambda_parameter_list()?;
            let body = self.parse_until(TokenKind::End, false)?;
            let span = self.span(0, self.pos());
            let epp = self.factory.epp_expression(parameters, body, span);
            return Ok(self.as_epp_lambda(epp));
        }

        let mut expressions = Vec::with_capacity(10);
        if let Some(t) = text {
            if !t.is_empty() {
                let span = self.span(0, self.token_start_pos);
                expressions.push(self.factory.render_string(t, span));
            }
        }
        loop {
            if self.current_token == TokenKind::End {
                let statements = self.transform_calls(expressions)?;
                let span = self.span(0, self.pos());
                let block = self.factory.block(statements, span);
                return Ok(self.as_epp_lambda(block));
            }
            expressions.push(self.expression()?);
        }
    }

    fn as_epp_lambda(&mut self, expr: Expression) -> Expression {
        if let Expression::Lambda { body, .. } = &expr {
            if matches!(body.as_ref(), Expression::EppExpression { .. }) {
                return expr;
            }
        }
        let span = self.span(0, self.pos());
        let body = if matches!(expr, Expression::Block { .. }) {
            expr
        } else {
            self.factory.block(vec![expr], span.clone())
        };
        self.factory.epp_expression(Vec::new(), body, span)
    }
}
