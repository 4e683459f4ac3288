// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Definition productions: classes, defined types, applications, nodes,
//! sites, functions, plans, and the `type` family.
//!
//! Every production here registers its node with [`Context::add_definition`]
//! so the program node can carry the definition list in source order.
//! `class`, `plan`, and `actor` push their names onto the namestack; names
//! declared inside them qualify with `::`.

use ecow::EcoString;

use crate::ast::Expression;

use super::super::lexer::Context;
use super::super::{ParseIssue, TokenKind, TokenValue};
use super::Result;

impl Context {
    /// Appends the definition to the program's list and hands it back for
    /// the enclosing block. The list stores its own copy: AST ownership is
    /// strictly tree-shaped.
    pub(crate) fn add_definition(&mut self, expr: Expression) -> Expression {
        self.definitions.push(expr.clone());
        expr
    }

    /// Joins the namestack and `name` with `::`.
    pub(crate) fn qualified_name_joined(&self, name: &str) -> EcoString {
        if self.name_stack.is_empty() {
            return name.into();
        }
        let mut joined = String::new();
        for part in &self.name_stack {
            joined.push_str(part);
            joined.push_str("::");
        }
        joined.push_str(name);
        joined.into()
    }

    // ========================================================================
    // type aliases, definitions, and mappings
    // ========================================================================

    /// Parses what follows `type` when a type name is present: an alias
    /// (`type X = ...`), a definition (`type X { ... }`, optionally with
    /// `inherits`), or a mapping (`type X[y] = ...`).
    pub(crate) fn type_alias_or_definition(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        let type_expr = self.parameter_type()?;

        let fqr_name = match &type_expr {
            Expression::QualifiedReference { name, .. } => name.clone(),
            _ => {
                if matches!(type_expr, Expression::Access { .. })
                    && self.current_token == TokenKind::Assign
                {
                    self.next_token()?;
                    let mapping = self.expression()?;
                    let span = self.span_from(start);
                    let tm = self.factory.type_mapping(type_expr, mapping, span);
                    return Ok(self.add_definition(tm));
                }
                return Err(self.error(ParseIssue::ParseExpectedTypeNameAfterType));
            }
        };

        match self.current_token {
            TokenKind::Assign => {
                self.next_token()?;
                let body = self.type_alias_body()?;
                let span = self.span_from(start);
                let alias = self.factory.type_alias(fqr_name, body, span);
                Ok(self.add_definition(alias))
            }
            TokenKind::Inherits => {
                self.next_token()?;
                let parent = match self.type_name()? {
                    Some(Expression::QualifiedReference { name, .. }) => name,
                    _ => return Err(self.error(ParseIssue::ParseInheritsMustBeTypeName)),
                };
                self.assert_token(TokenKind::LeftBrace)?;
                self.type_definition_body(start, fqr_name, Some(parent))
            }
            TokenKind::LeftBrace => self.type_definition_body(start, fqr_name, None),
            _ => Err(self.error_at(
                self.reader.pos(),
                ParseIssue::LexUnexpectedToken {
                    token: self.current_token.text().into(),
                },
            )),
        }
    }

    /// The right-hand side of a type alias, with the shorthand rewrites:
    /// `Y { ... }` becomes `Object[{parent => Y, ...}]`, a bare hash becomes
    /// `Object[{...}]`, and a one-element list becomes `Object[elem]`.
    fn type_alias_body(&mut self) -> Result<Expression> {
        let body_start = self.token_start_pos;
        let body = self.expression()?;

        if self.current_token == TokenKind::LeftBrace {
            if let Expression::QualifiedReference {
                name: parent_name,
                span: parent_span,
                ..
            } = &body
            {
                let parent_name = parent_name.clone();
                let parent_span = parent_span.clone();
                let hash = self.expression()?;
                if parent_name == "Object" || parent_name == "TypeSet" {
                    let span = self.span(body_start, self.pos() - body_start);
                    return Ok(self.factory.access(body, vec![hash], span));
                }
                let entries = match hash {
                    Expression::Hash { entries, .. } => entries,
                    other => vec![other],
                };
                let parent_key = self.factory.string("parent".into(), parent_span.clone());
                let parent_entry = self.factory.keyed_entry(parent_key, body, parent_span);
                let mut all = vec![parent_entry];
                all.extend(entries);
                let hash_span = self.span(body_start, self.pos() - body_start);
                let merged = self.factory.hash(all, hash_span);
                let object = self
                    .factory
                    .qualified_reference("Object".into(), self.span(body_start, 0));
                let span = self.span(body_start, self.pos() - body_start);
                return Ok(self.factory.access(object, vec![merged], span));
            }
        }

        match body {
            Expression::List { elements, .. } if elements.len() == 1 => {
                let object = self
                    .factory
                    .qualified_reference("Object".into(), self.span(body_start, 0));
                let span = self.span(body_start, self.pos() - body_start);
                Ok(self.factory.access(object, elements, span))
            }
            hash @ Expression::Hash { .. } => {
                let object = self
                    .factory
                    .qualified_reference("Object".into(), self.span(body_start, 0));
                let span = self.span(body_start, self.pos() - body_start);
                Ok(self.factory.access(object, vec![hash], span))
            }
            other => Ok(other),
        }
    }

    fn type_definition_body(
        &mut self,
        start: usize,
        name: EcoString,
        parent: Option<EcoString>,
    ) -> Result<Expression> {
        self.next_token()?; // consume {
        let body = self.parse_until(TokenKind::RightBrace, false)?;
        self.next_token()?;
        let span = self.span_from(start);
        let td = self.factory.type_definition(name, parent, body, span);
        Ok(self.add_definition(td))
    }

    // ========================================================================
    // functions and plans
    // ========================================================================

    pub(crate) fn function_definition(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        self.next_token()?;
        let name = match self.current_token {
            TokenKind::Identifier | TokenKind::TypeName => self.token_string(),
            _ => {
                self.set_pos(self.token_start_pos);
                return Err(self.error_at(
                    self.token_start_pos,
                    ParseIssue::ParseExpectedNameAfterFunction,
                ));
            }
        };
        self.next_token()?;
        let parameters = self.parameter_list()?;
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
        let function = self.factory.function(name, parameters, body, return_type, span);
        Ok(self.add_definition(function))
    }

    /// Parses a `plan` definition, or an `actor` definition when `actor` is
    /// set; both share the shape and differ only in the flag carried by the
    /// node.
    pub(crate) fn plan_definition(&mut self, actor: bool) -> Result<Expression> {
        let start = self.token_start_pos;
        self.next_token()?;
        let name = match self.current_token {
            TokenKind::Identifier | TokenKind::TypeName => self.token_string(),
            _ => {
                self.set_pos(self.token_start_pos);
                let issue = if actor {
                    ParseIssue::ParseExpectedActionName
                } else {
                    ParseIssue::ParseExpectedNameAfterPlan
                };
                return Err(self.error_at(self.token_start_pos, issue));
            }
        };
        self.next_token()?;

        self.name_stack.push(name.clone());
        let parameters = self.parameter_list()?;
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
        self.name_stack.pop();

        let span = self.span_from(start);
        let plan = self
            .factory
            .plan(name, parameters, body, return_type, actor, span);
        Ok(self.add_definition(plan))
    }

    // ========================================================================
    // nodes
    // ========================================================================

    pub(crate) fn node_definition(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        self.next_token()?;
        let host_matches = self.hostnames()?;
        let parent = if self.current_token == TokenKind::Inherits {
            self.next_token()?;
            Some(self.hostname()?)
        } else {
            None
        };
        self.assert_token(TokenKind::LeftBrace)?;
        self.next_token()?;
        let body = self.parse_until(TokenKind::RightBrace, false)?;
        self.next_token()?;
        let span = self.span_from(start);
        let node = self.factory.node(host_matches, parent, body, span);
        Ok(self.add_definition(node))
    }

    fn hostnames(&mut self) -> Result<Vec<Expression>> {
        let mut hostnames = Vec::with_capacity(4);
        loop {
            hostnames.push(self.hostname()?);
            if self.current_token != TokenKind::Comma {
                return Ok(hostnames);
            }
            self.next_token()?;
            if matches!(
                self.current_token,
                TokenKind::Inherits | TokenKind::LeftBrace
            ) {
                return Ok(hostnames);
            }
        }
    }

    fn hostname(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        match self.current_token {
            TokenKind::Identifier
            | TokenKind::TypeName
            | TokenKind::Integer
            | TokenKind::Float => self.dotted_name(),
            TokenKind::Regexp => {
                let pattern = self.token_string();
                let span = self.span_from(start);
                self.next_token()?;
                Ok(self.factory.regexp(pattern, span))
            }
            TokenKind::String => {
                let value = self.token_string();
                let span = self.span_from(start);
                self.next_token()?;
                Ok(self.factory.string(value, span))
            }
            TokenKind::Default => {
                let span = self.span_from(start);
                self.next_token()?;
                Ok(self.factory.default_literal(span))
            }
            TokenKind::ConcatenatedString | TokenKind::Heredoc => {
                let TokenValue::Expression(e) = std::mem::take(&mut self.token_value) else {
                    return Err(self.error(ParseIssue::ParseExpectedHostname));
                };
                self.next_token()?;
                Ok(e)
            }
            _ => Err(self.error(ParseIssue::ParseExpectedHostname)),
        }
    }

    /// A dotted hostname: name and number segments joined by `.`, collected
    /// into one string literal.
    fn dotted_name(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        let mut names: Vec<String> = Vec::with_capacity(8);
        loop {
            match self.current_token {
                TokenKind::Identifier | TokenKind::TypeName => {
                    names.push(self.token_string().to_string());
                }
                TokenKind::Integer => {
                    let TokenValue::Integer(v) = self.token_value else {
                        return Err(self.error(ParseIssue::ParseExpectedNameOrNumberAfterDot));
                    };
                    names.push(v.to_string());
                }
                TokenKind::Float => {
                    let TokenValue::Float(v) = self.token_value else {
                        return Err(self.error(ParseIssue::ParseExpectedNameOrNumberAfterDot));
                    };
                    names.push(v.to_string());
                }
                _ => return Err(self.error(ParseIssue::ParseExpectedNameOrNumberAfterDot)),
            }
            self.next_token()?;
            if self.current_token != TokenKind::Dot {
                let span = self.span_from(start);
                return Ok(self.factory.string(names.join(".").into(), span));
            }
            self.next_token()?;
        }
    }

    // ========================================================================
    // parameters and types
    // ========================================================================

    pub(crate) fn parameter_list(&mut self) -> Result<Vec<Expression>> {
        match self.current_token {
            TokenKind::LeftParen | TokenKind::WsLeftParen => {
                self.next_token()?;
                self.expressions(TokenKind::RightParen, Context::parameter)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Parameters between `|` and `|`; the current token is the opening
    /// pipe.
    pub(crate) fn lambda_parameter_list(&mut self) -> Result<Vec<Expression>> {
        self.next_token()?;
        self.expressions(TokenKind::PipeEnd, Context::parameter)
    }

    pub(crate) fn parameter(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        let type_expr = if self.current_token == TokenKind::TypeName {
            Some(self.parameter_type()?)
        } else {
            None
        };

        let captures_rest = self.current_token == TokenKind::Multiply;
        if captures_rest {
            self.next_token()?;
        }

        if self.current_token != TokenKind::Variable {
            return Err(self.error(ParseIssue::ParseExpectedVariable));
        }
        let TokenValue::String(name) = std::mem::take(&mut self.token_value) else {
            return Err(self.error(ParseIssue::ParseExpectedVariable));
        };
        self.next_token()?;

        let value = if self.current_token == TokenKind::Assign {
            self.next_token()?;
            Some(self.expression()?)
        } else {
            None
        };
        let span = self.span_from(start);
        Ok(self
            .factory
            .parameter(name, value, type_expr, captures_rest, span))
    }

    /// A type name, optionally parameterized: `Integer`, `Integer[2,3]`.
    pub(crate) fn parameter_type(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        let Some(type_name) = self.type_name()? else {
            return Err(self.error(ParseIssue::ParseExpectedTypeName));
        };
        if self.current_token == TokenKind::LeftBracket {
            self.next_token()?;
            let type_args = self.array_expression()?;
            let span = self.span(start, self.pos() - start);
            return Ok(self.factory.access(type_name, type_args, span));
        }
        Ok(type_name)
    }

    pub(crate) fn type_name(&mut self) -> Result<Option<Expression>> {
        if self.current_token == TokenKind::TypeName {
            let name = self.token_string();
            let span = self.span_from(self.token_start_pos);
            let qr = self.factory.qualified_reference(name, span);
            self.next_token()?;
            return Ok(Some(qr));
        }
        Ok(None)
    }

    // ========================================================================
    // classes, capability mappings, sites, defined types
    // ========================================================================

    /// Parses a class definition; the `class` keyword has already been
    /// consumed and `start` is its position.
    pub(crate) fn class_expression(&mut self, start: usize) -> Result<Expression> {
        let mut name = self.class_name()?;
        if let Some(stripped) = name.strip_prefix("::") {
            name = stripped.into();
        }

        self.name_stack.push(name.clone());
        let parameters = self.parameter_list()?;
        let parent = if self.current_token == TokenKind::Inherits {
            self.next_token()?;
            if self.current_token == TokenKind::Default {
                self.next_token()?;
                Some("default".into())
            } else {
                Some(self.class_name()?)
            }
        } else {
            None
        };
        self.assert_token(TokenKind::LeftBrace)?;
        self.next_token()?;
        let body = self.parse_until(TokenKind::RightBrace, false)?;
        self.next_token()?;
        self.name_stack.pop();

        let qualified = self.qualified_name_joined(&name);
        let span = self.span_from(start);
        let class = self
            .factory
            .class_definition(qualified, parameters, parent, body, span);
        Ok(self.add_definition(class))
    }

    fn class_name(&mut self) -> Result<EcoString> {
        match self.current_token {
            TokenKind::TypeName | TokenKind::Identifier => {
                let name = self.token_string();
                self.next_token()?;
                Ok(name)
            }
            TokenKind::String | TokenKind::ConcatenatedString => {
                self.set_pos(self.token_start_pos);
                Err(self.error_at(self.token_start_pos, ParseIssue::ParseQuotedNotValidName))
            }
            TokenKind::Class => {
                self.set_pos(self.token_start_pos);
                Err(self.error_at(self.token_start_pos, ParseIssue::ParseClassNotValidHere))
            }
            _ => {
                self.set_pos(self.token_start_pos);
                Err(self.error_at(self.token_start_pos, ParseIssue::ParseExpectedClassName))
            }
        }
    }

    /// `component produces|consumes Capability { mappings }`. The current
    /// token is the `produces`/`consumes` keyword.
    pub(crate) fn capability_mapping(
        &mut self,
        component: Expression,
        kind: EcoString,
    ) -> Result<Expression> {
        let start = self.token_start_pos;
        self.next_token()?;
        let capability_name = self.class_name()?;
        self.assert_token(TokenKind::LeftBrace)?;
        self.next_token()?;
        let mappings = self.attribute_operations()?;
        self.assert_token(TokenKind::RightBrace)?;
        self.next_token()?;

        let component = match component {
            // Reserved words are lowercase-only names here.
            Expression::ReservedWord { name, span, .. } => {
                let qualified = self.qualified_name_joined(&name);
                self.factory.qualified_name(qualified, span)
            }
            other => other,
        };
        let capability = self.qualified_name_joined(&capability_name);
        let span = self.span_from(start);
        let mapping = self
            .factory
            .capability_mapping(kind, component, capability, mappings, span);
        Ok(self.add_definition(mapping))
    }

    pub(crate) fn site_definition(&mut self) -> Result<Expression> {
        let start = self.token_start_pos;
        self.next_token()?;
        self.assert_token(TokenKind::LeftBrace)?;
        self.next_token()?;
        let body = self.parse_until(TokenKind::RightBrace, false)?;
        self.next_token()?;
        let span = self.span_from(start);
        let site = self.factory.site(body, span);
        Ok(self.add_definition(site))
    }

    /// `define name(params) { body }`, or the application form.
    pub(crate) fn resource_definition(&mut self, application: bool) -> Result<Expression> {
        let start = self.token_start_pos;
        self.next_token()?;
        let name = self.class_name()?;
        let parameters = self.parameter_list()?;
        self.assert_token(TokenKind::LeftBrace)?;
        self.next_token()?;
        let body = self.parse_until(TokenKind::RightBrace, false)?;
        self.next_token()?;
        let span = self.span_from(start);
        let definition = if application {
            self.factory.application(name, parameters, body, span)
        } else {
            self.factory.definition(name, parameters, body, span)
        };
        Ok(self.add_definition(definition))
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Parser, ParserOptions};
    use crate::ast::Expression;

    fn parse(source: &str) -> Expression {
        Parser::new()
            .parse("", source, false)
            .unwrap_or_else(|e| panic!("parse failed: {e}"))
    }

    fn definitions(source: &str) -> Vec<Expression> {
        let Expression::Program { definitions, .. } = parse(source) else {
            panic!("expected program");
        };
        definitions
    }

    #[test]
    fn class_parameters_with_types_and_defaults() {
        let defs = definitions("class ntp(String $servers = 'pool', Boolean $enable = true) { }");
        let Expression::Class { parameters, .. } = &defs[0] else {
            panic!("expected class");
        };
        assert_eq!(parameters.len(), 2);
        assert!(matches!(
            &parameters[0],
            Expression::Parameter { name, value: Some(_), type_expr: Some(_), captures_rest: false, .. }
                if name == "servers"
        ));
    }

    #[test]
    fn global_scope_anchor_is_stripped_from_class_names() {
        let defs = definitions("class ::ntp { }");
        assert!(matches!(&defs[0], Expression::Class { name, .. } if name == "ntp"));
    }

    #[test]
    fn class_inherits_default() {
        let defs = definitions("class a inherits default { }");
        assert!(matches!(
            &defs[0],
            Expression::Class { parent: Some(p), .. } if p == "default"
        ));
    }

    #[test]
    fn function_return_type_is_parameterized() {
        let defs = definitions("function f() >> Array[Integer] { [] }");
        let Expression::Function {
            return_type: Some(rt),
            ..
        } = &defs[0]
        else {
            panic!("expected function with return type");
        };
        assert!(matches!(rt.as_ref(), Expression::Access { .. }));
    }

    #[test]
    fn capability_mapping_qualifies_inside_class() {
        let defs = definitions("class db { Db produces Sql { } }");
        // Inner definitions register first.
        assert!(matches!(
            &defs[0],
            Expression::CapabilityMapping { capability, .. } if capability == "db::Sql"
        ));
    }

    #[test]
    fn plan_names_qualify_nested_classes() {
        let mut parser = Parser::with_options(ParserOptions {
            tasks_enabled: true,
            ..ParserOptions::default()
        });
        let ast = parser
            .parse("", "plan deploy { class web { } }", false)
            .unwrap();
        let Expression::Program { definitions, .. } = ast else {
            panic!("expected program");
        };
        assert!(matches!(
            &definitions[0],
            Expression::Class { name, .. } if name == "deploy::web"
        ));
        assert!(matches!(
            &definitions[1],
            Expression::Plan { name, .. } if name == "deploy"
        ));
    }

    #[test]
    fn node_inherits_regexp() {
        let defs = definitions("node /web\\d+/ inherits default { }");
        let Expression::NodeDefinition {
            host_matches,
            parent: Some(parent),
            ..
        } = &defs[0]
        else {
            panic!("expected node with parent");
        };
        assert!(matches!(&host_matches[0], Expression::Regexp { .. }));
        assert!(matches!(parent.as_ref(), Expression::Default { .. }));
    }

    #[test]
    fn define_with_parameters() {
        let defs = definitions("define limits::entry($domain, $type = '-') { }");
        let Expression::ResourceTypeDefinition {
            name, parameters, ..
        } = &defs[0]
        else {
            panic!("expected defined type");
        };
        assert_eq!(name, "limits::entry");
        assert_eq!(parameters.len(), 2);
        assert!(matches!(
            &parameters[1],
            Expression::Parameter { name, .. } if name == "type"
        ));
    }

    #[test]
    fn type_alias_requires_type_name() {
        let err = Parser::new()
            .parse("", "type X = ", false)
            .expect_err("missing body");
        assert_eq!(err.code(), "LEX_UNEXPECTED_TOKEN");
        let err = Parser::new()
            .parse("", "type Foo inherits bar { }", false)
            .expect_err("lowercase parent");
        assert_eq!(err.code(), "PARSE_INHERITS_MUST_BE_TYPE_NAME");
    }
}
