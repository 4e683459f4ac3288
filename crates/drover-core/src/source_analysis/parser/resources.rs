// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Resource expressions, attribute operations, and collectors.
//!
//! A `{` after a primary may open a resource instance, resource defaults, a
//! resource override, or an ordinary hash literal; which one is decided by
//! the shape of the primary and whether a title colon follows. Getting that
//! wrong is recoverable only by rewinding the reader and re-lexing, which is
//! why these productions manipulate positions directly.

use ecow::EcoString;

use crate::ast::{Expression, ResourceForm};

use super::super::lexer::Context;
use super::super::{ParseIssue, TokenKind};
use super::{is_statement_call, Result};

/// What a `{` after a primary expression can mean.
enum ResourceShape {
    /// A qualified name: a resource instance declaration with titles.
    Resource,
    /// A type reference (or `Resource[Type]`): defaults, no titles.
    Defaults,
    /// Any other access expression: an override of existing resources.
    Override,
    /// Not a resource at all; the brace belongs to the outer grammar.
    NotResource,
}

fn resource_shape(expr: &Expression) -> ResourceShape {
    match expr {
        Expression::QualifiedName { .. } => ResourceShape::Resource,
        Expression::QualifiedReference { .. } => ResourceShape::Defaults,
        Expression::Access { operand, keys, .. } => {
            if keys.len() == 1
                && matches!(
                    operand.as_ref(),
                    Expression::QualifiedReference { name, .. } if name == "Resource"
                )
            {
                ResourceShape::Defaults
            } else {
                ResourceShape::Override
            }
        }
        _ => ResourceShape::NotResource,
    }
}

impl Context {
    /// Parses the `{ ... }` following a primary, deciding between a resource
    /// declaration, defaults, an override, a statement-call hash argument,
    /// and handing the brace back as a hash literal. The current token is
    /// the `{`.
    pub(crate) fn resource_expression(
        &mut self,
        start: usize,
        first: Expression,
        form: ResourceForm,
    ) -> Result<Expression> {
        let bodies_start = self.pos();
        self.next_token()?;
        let title_start = self.pos();

        // A leading `* =>` is an attribute splat, never a title.
        let mut first_title = None;
        if self.current_token != TokenKind::Multiply {
            first_title = Some(self.expression()?);
        }

        let expr;
        if self.current_token == TokenKind::Colon {
            let title = first_title.expect("title expression before colon");
            let bodies = self.resource_bodies(title)?;
            let span = self.span(start, self.pos() - start);
            expr = self.factory.resource(form, first, bodies, span);
        } else {
            self.set_pos(title_start);
            match resource_shape(&first) {
                ResourceShape::Resource => {
                    // Only a statement-call name followed by a hash makes
                    // sense without a title; it becomes a call with one
                    // literal-hash argument.
                    if let Expression::QualifiedName { name, .. } = &first {
                        if is_statement_call(name) {
                            self.set_pos(bodies_start);
                            self.next_token()?;
                            let entries = self.hash_expression()?;
                            let hash_span = self.span(bodies_start, self.pos() - bodies_start);
                            let hash = self.factory.hash(entries, hash_span);
                            let span = self.span(start, self.pos() - start);
                            return Ok(self.factory.call_named(first, true, vec![hash], None, span));
                        }
                        let name = name.clone();
                        self.set_pos(start);
                        return Err(
                            self.error_at(start, ParseIssue::ParseResourceWithoutTitle { name })
                        );
                    }
                    self.set_pos(start);
                    return Err(self.error_at(
                        start,
                        ParseIssue::ParseResourceWithoutTitle {
                            name: EcoString::new(),
                        },
                    ));
                }
                ResourceShape::Defaults => {
                    self.set_pos(bodies_start);
                    self.next_token()?;
                    let operations = self.attribute_operations()?;
                    let span = self.span(start, self.pos() - start);
                    expr = self.factory.resource_defaults(form, first, operations, span);
                }
                ResourceShape::Override => {
                    self.set_pos(bodies_start);
                    self.next_token()?;
                    let operations = self.attribute_operations()?;
                    let span = self.span(start, self.pos() - start);
                    expr = self.factory.resource_override(form, first, operations, span);
                }
                ResourceShape::NotResource => {
                    // Not a resource statement. Hand the `{` back so the
                    // outer grammar parses it as a hash literal.
                    self.set_pos(bodies_start);
                    self.set_token(TokenKind::LeftBrace);
                    self.token_start_pos = bodies_start.saturating_sub(1);
                    return Ok(first);
                }
            }
        }

        self.assert_token(TokenKind::RightBrace)?;
        self.next_token()?;
        Ok(expr)
    }

    fn resource_bodies(&mut self, title: Expression) -> Result<Vec<Expression>> {
        let mut result = Vec::with_capacity(1);
        let mut title = Some(title);
        loop {
            if self.current_token == TokenKind::RightBrace {
                return Ok(result);
            }
            let t = title.take().expect("resource body title");
            result.push(self.resource_body(t)?);
            if self.current_token != TokenKind::Semicolon {
                return Ok(result);
            }
            self.next_token()?;
            if self.current_token != TokenKind::RightBrace {
                title = Some(self.expression()?);
            }
        }
    }

    fn resource_body(&mut self, title: Expression) -> Result<Expression> {
        if self.current_token != TokenKind::Colon {
            self.set_pos(title.byte_offset());
            return Err(self.error_at(title.byte_offset(), ParseIssue::ParseExpectedTitle));
        }
        self.next_token()?;
        let operations = self.attribute_operations()?;
        let span = self.span(title.byte_offset(), self.pos() - title.byte_offset());
        Ok(self.factory.resource_body(title, operations, span))
    }

    pub(crate) fn attribute_operations(&mut self) -> Result<Vec<Expression>> {
        let mut result = Vec::with_capacity(5);
        loop {
            match self.current_token {
                TokenKind::Semicolon | TokenKind::RightBrace => return Ok(result),
                _ => {
                    result.push(self.attribute_operation()?);
                    if self.current_token != TokenKind::Comma {
                        return Ok(result);
                    }
                    self.next_token()?;
                }
            }
        }
    }

    fn attribute_operation(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        if self.current_token == TokenKind::Multiply {
            self.next_token()?;
            self.assert_token(TokenKind::FarrowOp)?;
            self.next_token()?;
            let value = self.expression()?;
            let span = self.span(start, self.pos() - start);
            return Ok(self.factory.attributes_op(value, span));
        }

        let name = self.attribute_name()?;
        match self.current_token {
            TokenKind::FarrowOp | TokenKind::ParrowOp => {
                let op = self.token_string();
                self.next_token()?;
                let value = self.expression()?;
                let span = self.span(start, self.pos() - start);
                Ok(self.factory.attribute_op(op, name, value, span))
            }
            _ => Err(self.error(ParseIssue::ParseInvalidAttribute)),
        }
    }

    fn attribute_name(&mut self) -> Result<EcoString> {
        match self.identifier()? {
            Some(name) => Ok(name),
            None => Err(self.error(ParseIssue::ParseExpectedAttributeName)),
        }
    }

    /// An identifier, or any keyword usable as one. Restores the reader
    /// position when the current token is neither.
    pub(crate) fn identifier(&mut self) -> Result<Option<EcoString>> {
        if self.current_token == TokenKind::Identifier {
            let name = self.token_string();
            self.next_token()?;
            return Ok(Some(name));
        }
        if let Some(word) = self.keyword() {
            self.next_token()?;
            return Ok(Some(word));
        }
        self.set_pos(self.token_start_pos);
        Ok(None)
    }

    /// The current token's keyword text, if it is a keyword other than a
    /// boolean literal.
    pub(crate) fn keyword(&self) -> Option<EcoString> {
        if self.current_token == TokenKind::Boolean {
            return None;
        }
        self.current_token.keyword().map(Into::into)
    }

    /// Parses `<| query |>` or `<<| query |>>` plus optional attribute
    /// operations into a collect expression.
    pub(crate) fn collect_expression(&mut self, lhs: Expression) -> Result<Expression> {
        let query_start = self.token_start_pos;
        let collect_query = if self.current_token == TokenKind::LeftCollect {
            self.next_token()?;
            let query_expr = if self.current_token == TokenKind::RightCollect {
                let span = self.span(self.token_start_pos, 0);
                self.factory.nop(span)
            } else {
                let e = self.expression()?;
                self.assert_token(TokenKind::RightCollect)?;
                e
            };
            self.next_token()?;
            let span = self.span(query_start, self.pos() - query_start);
            self.factory.virtual_query(query_expr, span)
        } else {
            self.next_token()?;
            let query_expr = if self.current_token == TokenKind::RightRightCollect {
                let span = self.span(query_start, self.token_start_pos - query_start);
                self.factory.nop(span)
            } else {
                let e = self.expression()?;
                self.assert_token(TokenKind::RightRightCollect)?;
                e
            };
            self.next_token()?;
            let span = self.span(query_start, self.pos() - query_start);
            self.factory.exported_query(query_expr, span)
        };

        let operations = if self.current_token == TokenKind::LeftBrace {
            self.next_token()?;
            let ops = self.attribute_operations()?;
            self.assert_token(TokenKind::RightBrace)?;
            self.next_token()?;
            ops
        } else {
            Vec::new()
        };
        let span = self.span(lhs.byte_offset(), self.pos() - lhs.byte_offset());
        Ok(self.factory.collect(lhs, collect_query, operations, span))
    }
}

#[cfg(test)]
mod tests {
    use super::super::Parser;

    fn parse_json(source: &str) -> String {
        Parser::new()
            .parse("", source, false)
            .unwrap_or_else(|e| panic!("parse failed: {e}"))
            .to_pn()
            .to_json()
    }

    fn parse_err_code(source: &str) -> &'static str {
        Parser::new()
            .parse("", source, false)
            .expect_err("expected parse failure")
            .code()
    }

    #[test]
    fn resource_with_multiple_bodies() {
        assert_eq!(
            parse_json("user { 'alice': uid => 1; 'bob': uid => 2 }"),
            concat!(
                r##"{"^":["block",{"^":["resource",{"#":["type",{"^":["qn","user"]},"bodies",["##,
                r##"{"#":["title","alice","ops",[{"^":["=>","uid",1]}]]},"##,
                r##"{"#":["title","bob","ops",[{"^":["=>","uid",2]}]]}]]}]}]}"##
            )
        );
    }

    #[test]
    fn resource_with_array_title() {
        assert_eq!(
            parse_json("file { ['/a', '/b']: ensure => present }"),
            concat!(
                r##"{"^":["block",{"^":["resource",{"#":["type",{"^":["qn","file"]},"bodies",["##,
                r##"{"#":["title",["/a","/b"],"ops",[{"^":["=>","ensure",{"^":["qn","present"]}]}]]}]]}]}]}"##
            )
        );
    }

    #[test]
    fn plus_arrow_and_splat_attributes() {
        assert_eq!(
            parse_json("File['/a'] { mode +> 'x', * => $extra }"),
            concat!(
                r##"{"^":["block",{"^":["resource-override",{"#":["resources",{"^":["access",{"^":["qr","File"]},"/a"]},"##,
                r##""ops",[{"^":["+>","mode","x"]},{"^":["splat-hash",{"^":["var","extra"]}]}]]}]}]}"##
            )
        );
    }

    #[test]
    fn resource_defaults_from_type_reference() {
        assert_eq!(
            parse_json("File { owner => 'root' }"),
            r##"{"^":["block",{"^":["resource-defaults",{"#":["type",{"^":["qr","File"]},"ops",[{"^":["=>","owner","root"]}]]}]}]}"##
        );
    }

    #[test]
    fn resource_reference_defaults() {
        // Resource[File] { ... } is defaults, not an override.
        assert_eq!(
            parse_json("Resource[File] { owner => 'root' }"),
            concat!(
                r##"{"^":["block",{"^":["resource-defaults",{"#":["type","##,
                r##"{"^":["access",{"^":["qr","Resource"]},{"^":["qr","File"]}]},"ops",[{"^":["=>","owner","root"]}]]}]}]}"##
            )
        );
    }

    #[test]
    fn keyword_attribute_names() {
        assert_eq!(
            parse_json("file { '/a': unless => 1 }"),
            concat!(
                r##"{"^":["block",{"^":["resource",{"#":["type",{"^":["qn","file"]},"bodies",["##,
                r##"{"#":["title","/a","ops",[{"^":["=>","unless",1]}]]}]]}]}]}"##
            )
        );
    }

    #[test]
    fn statement_call_hash_form() {
        // `notice { 'a' => 1 }` re-parses the brace group as a hash argument.
        assert_eq!(
            parse_json("notice { 'a' => 1 }"),
            concat!(
                r##"{"^":["block",{"^":["invoke",{"#":["functor",{"^":["qn","notice"]},"##,
                r##""args",[{"^":["hash",{"^":["=>","a",1]}]}]]}]}]}"##
            )
        );
    }

    #[test]
    fn resource_without_title_is_an_error() {
        assert_eq!(
            parse_err_code("file { mode => '0644' }"),
            "PARSE_RESOURCE_WITHOUT_TITLE"
        );
    }

    #[test]
    fn second_body_requires_title() {
        assert_eq!(
            parse_err_code("file { '/a': ; mode => 1 }"),
            "PARSE_EXPECTED_TITLE"
        );
    }

    #[test]
    fn attribute_without_arrow_is_invalid() {
        assert_eq!(
            parse_err_code("file { '/a': mode '0644' }"),
            "PARSE_INVALID_ATTRIBUTE"
        );
    }

    #[test]
    fn non_resource_brace_is_a_hash_statement() {
        // `$x { 'a' => 1 }` is two statements: a variable, then a hash.
        assert_eq!(
            parse_json("$x { 'a' => 1 }"),
            r##"{"^":["block",{"^":["var","x"]},{"^":["hash",{"^":["=>","a",1]}]}]}"##
        );
    }

    #[test]
    fn virtual_and_exported_collectors() {
        assert_eq!(
            parse_json("@user { 'a': } User <| |> { gid => 'x' }"),
            concat!(
                r##"{"^":["block","##,
                r##"{"^":["resource",{"#":["type",{"^":["qn","user"]},"bodies",[{"#":["title","a","ops",[]]}],"form","virtual"]}]},"##,
                r##"{"^":["collect",{"#":["type",{"^":["qr","User"]},"query",{"^":["virtual-query"]},"ops",[{"^":["=>","gid","x"]}]]}]}]}"##
            )
        );
    }

    #[test]
    fn collector_query_expression() {
        assert_eq!(
            parse_json("File <<| tag == 'web' |>>"),
            concat!(
                r##"{"^":["block",{"^":["collect",{"#":["type",{"^":["qr","File"]},"##,
                r##""query",{"^":["exported-query",{"^":["==",{"^":["qn","tag"]},"web"]}]}]}]}]}"##
            )
        );
    }
}
