// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! The AST construction protocol.
//!
//! The parser never instantiates [`Expression`] variants directly; every
//! node goes through an [`ExpressionFactory`]. The trait has one named
//! constructor per variant, each with a default body producing the canonical
//! node, so [`DefaultFactory`] is an empty struct and alternative factories
//! override only the constructors they care about (instrumentation,
//! interning, construction-time validation).
//!
//! Factories receive fully built operands plus the node's [`Span`]; they
//! must not retain references to operands (ownership moves into the new
//! node) and must be stateless or internally synchronized when shared
//! between parsers.

use ecow::EcoString;

use crate::ast::{Expression, ResourceForm, Span};

/// One constructor per AST variant.
#[allow(clippy::too_many_arguments)]
pub trait ExpressionFactory: Send + Sync {
    /// `operand[keys...]`
    fn access(&self, operand: Expression, keys: Vec<Expression>, span: Span) -> Expression {
        Expression::Access {
            span,
            operand: Box::new(operand),
            keys,
        }
    }

    /// `lhs and rhs`
    fn and(&self, lhs: Expression, rhs: Expression, span: Span) -> Expression {
        Expression::And {
            span,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `application name(params) { body }`
    fn application(
        &self,
        name: EcoString,
        parameters: Vec<Expression>,
        body: Expression,
        span: Span,
    ) -> Expression {
        Expression::Application {
            span,
            name,
            parameters,
            body: Box::new(body),
        }
    }

    /// `lhs op rhs` for `+ - * / % << >>`
    fn arithmetic(
        &self,
        op: EcoString,
        lhs: Expression,
        rhs: Expression,
        span: Span,
    ) -> Expression {
        Expression::Arithmetic {
            span,
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `[elements...]`
    fn array(&self, elements: Vec<Expression>, span: Span) -> Expression {
        Expression::List { span, elements }
    }

    /// `lhs op rhs` for `= += -=`
    fn assignment(
        &self,
        op: EcoString,
        lhs: Expression,
        rhs: Expression,
        span: Span,
    ) -> Expression {
        Expression::Assignment {
            span,
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `name => value` / `name +> value`
    fn attribute_op(
        &self,
        op: EcoString,
        name: EcoString,
        value: Expression,
        span: Span,
    ) -> Expression {
        Expression::AttributeOp {
            span,
            op,
            name,
            value: Box::new(value),
        }
    }

    /// `* => hash`
    fn attributes_op(&self, expr: Expression, span: Span) -> Expression {
        Expression::AttributesOp {
            span,
            expr: Box::new(expr),
        }
    }

    /// A statement sequence.
    fn block(&self, statements: Vec<Expression>, span: Span) -> Expression {
        Expression::Block { span, statements }
    }

    /// `true` / `false`
    fn boolean(&self, value: bool, span: Span) -> Expression {
        Expression::Boolean { span, value }
    }

    /// `receiver.name(args) |...| { }`
    fn call_method(
        &self,
        functor: Expression,
        args: Vec<Expression>,
        lambda: Option<Expression>,
        span: Span,
    ) -> Expression {
        Expression::CallMethod {
            span,
            functor: Box::new(functor),
            args,
            lambda: lambda.map(Box::new),
        }
    }

    /// `functor(args) |...| { }`
    fn call_named(
        &self,
        functor: Expression,
        rval_required: bool,
        args: Vec<Expression>,
        lambda: Option<Expression>,
        span: Span,
    ) -> Expression {
        Expression::CallNamedFunction {
            span,
            functor: Box::new(functor),
            args,
            lambda: lambda.map(Box::new),
            rval_required,
        }
    }

    /// `component produces|consumes Capability { mappings }`
    fn capability_mapping(
        &self,
        kind: EcoString,
        component: Expression,
        capability: EcoString,
        mappings: Vec<Expression>,
        span: Span,
    ) -> Expression {
        Expression::CapabilityMapping {
            span,
            kind,
            component: Box::new(component),
            capability,
            mappings,
        }
    }

    /// `case test { options }`
    fn case_expression(&self, test: Expression, options: Vec<Expression>, span: Span) -> Expression {
        Expression::Case {
            span,
            test: Box::new(test),
            options,
        }
    }

    /// `class name(params) inherits parent { body }`
    fn class_definition(
        &self,
        name: EcoString,
        parameters: Vec<Expression>,
        parent: Option<EcoString>,
        body: Expression,
        span: Span,
    ) -> Expression {
        Expression::Class {
            span,
            name,
            parameters,
            parent,
            body: Box::new(body),
        }
    }

    /// `Type <| query |> { operations }`
    fn collect(
        &self,
        resource_type: Expression,
        query: Expression,
        operations: Vec<Expression>,
        span: Span,
    ) -> Expression {
        Expression::Collect {
            span,
            resource_type: Box::new(resource_type),
            query: Box::new(query),
            operations,
        }
    }

    /// `lhs op rhs` for `== != < <= > >=`
    fn comparison(
        &self,
        op: EcoString,
        lhs: Expression,
        rhs: Expression,
        span: Span,
    ) -> Expression {
        Expression::Comparison {
            span,
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// An interpolated string's segment sequence.
    fn concatenated_string(&self, segments: Vec<Expression>, span: Span) -> Expression {
        Expression::ConcatenatedString { span, segments }
    }

    /// `default`
    fn default_literal(&self, span: Span) -> Expression {
        Expression::Default { span }
    }

    /// `define name(params) { body }`
    fn definition(
        &self,
        name: EcoString,
        parameters: Vec<Expression>,
        body: Expression,
        span: Span,
    ) -> Expression {
        Expression::ResourceTypeDefinition {
            span,
            name,
            parameters,
            body: Box::new(body),
        }
    }

    /// An EPP template: the body wrapped in an [`Expression::EppExpression`]
    /// inside a lambda carrying the template parameters.
    fn epp_expression(
        &self,
        parameters: Vec<Expression>,
        body: Expression,
        span: Span,
    ) -> Expression {
        let epp = Expression::EppExpression {
            span: span.clone(),
            parameters_specified: !parameters.is_empty(),
            body: Box::new(body),
        };
        self.lambda(parameters, epp, None, span)
    }

    /// `<<| query |>>`
    fn exported_query(&self, query: Expression, span: Span) -> Expression {
        Expression::ExportedQuery {
            span,
            query: Box::new(query),
        }
    }

    /// A float literal.
    fn float(&self, value: f64, span: Span) -> Expression {
        Expression::Float { span, value }
    }

    /// `function name(params) >> Type { body }`
    fn function(
        &self,
        name: EcoString,
        parameters: Vec<Expression>,
        body: Expression,
        return_type: Option<Expression>,
        span: Span,
    ) -> Expression {
        Expression::Function {
            span,
            name,
            parameters,
            body: Box::new(body),
            return_type: return_type.map(Box::new),
        }
    }

    /// `{entries...}`
    fn hash(&self, entries: Vec<Expression>, span: Span) -> Expression {
        Expression::Hash { span, entries }
    }

    /// A heredoc wrapping its body text.
    fn heredoc(&self, text: Expression, syntax: EcoString, span: Span) -> Expression {
        Expression::Heredoc {
            span,
            syntax,
            text: Box::new(text),
        }
    }

    /// `if test { then } else { else }`
    fn if_expression(
        &self,
        test: Expression,
        then_part: Expression,
        else_part: Expression,
        span: Span,
    ) -> Expression {
        Expression::If {
            span,
            test: Box::new(test),
            then_part: Box::new(then_part),
            else_part: Box::new(else_part),
        }
    }

    /// `lhs in rhs`
    fn in_expression(&self, lhs: Expression, rhs: Expression, span: Span) -> Expression {
        Expression::In {
            span,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// An integer literal with its radix.
    fn integer(&self, value: i64, radix: u32, span: Span) -> Expression {
        Expression::Integer { span, value, radix }
    }

    /// `key => value`
    fn keyed_entry(&self, key: Expression, value: Expression, span: Span) -> Expression {
        Expression::KeyedEntry {
            span,
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    /// `|params| >> Type { body }`
    fn lambda(
        &self,
        parameters: Vec<Expression>,
        body: Expression,
        return_type: Option<Expression>,
        span: Span,
    ) -> Expression {
        Expression::Lambda {
            span,
            parameters,
            body: Box::new(body),
            return_type: return_type.map(Box::new),
        }
    }

    /// `lhs =~ rhs` / `lhs !~ rhs`
    fn match_expression(
        &self,
        op: EcoString,
        lhs: Expression,
        rhs: Expression,
        span: Span,
    ) -> Expression {
        Expression::Match {
            span,
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `lhs.rhs`
    fn named_access(&self, lhs: Expression, rhs: Expression, span: Span) -> Expression {
        Expression::NamedAccess {
            span,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `- expr`
    fn negate(&self, expr: Expression, span: Span) -> Expression {
        Expression::UnaryMinus {
            span,
            expr: Box::new(expr),
        }
    }

    /// `node matches inherits parent { body }`
    fn node(
        &self,
        host_matches: Vec<Expression>,
        parent: Option<Expression>,
        body: Expression,
        span: Span,
    ) -> Expression {
        Expression::NodeDefinition {
            span,
            host_matches,
            parent: parent.map(Box::new),
            body: Box::new(body),
        }
    }

    /// An empty placeholder.
    fn nop(&self, span: Span) -> Expression {
        Expression::Nop { span }
    }

    /// `! expr`
    fn not(&self, expr: Expression, span: Span) -> Expression {
        Expression::Not {
            span,
            expr: Box::new(expr),
        }
    }

    /// `lhs or rhs`
    fn or(&self, lhs: Expression, rhs: Expression, span: Span) -> Expression {
        Expression::Or {
            span,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// A function/lambda/class parameter.
    fn parameter(
        &self,
        name: EcoString,
        value: Option<Expression>,
        type_expr: Option<Expression>,
        captures_rest: bool,
        span: Span,
    ) -> Expression {
        Expression::Parameter {
            span,
            name,
            value: value.map(Box::new),
            type_expr: type_expr.map(Box::new),
            captures_rest,
        }
    }

    /// `( expr )`
    fn parenthesized(&self, expr: Expression, span: Span) -> Expression {
        Expression::Parenthesized {
            span,
            expr: Box::new(expr),
        }
    }

    /// `plan name(params) { body }`, or the actor form when `actor` is set.
    fn plan(
        &self,
        name: EcoString,
        parameters: Vec<Expression>,
        body: Expression,
        return_type: Option<Expression>,
        actor: bool,
        span: Span,
    ) -> Expression {
        Expression::Plan {
            span,
            name,
            parameters,
            body: Box::new(body),
            return_type: return_type.map(Box::new),
            actor,
        }
    }

    /// The top-level program node.
    fn program(&self, body: Expression, definitions: Vec<Expression>, span: Span) -> Expression {
        Expression::Program {
            span,
            body: Box::new(body),
            definitions,
        }
    }

    /// A lowercase-leading name.
    fn qualified_name(&self, name: EcoString, span: Span) -> Expression {
        Expression::QualifiedName { span, name }
    }

    /// A capitalized type name; the downcased form is computed here.
    fn qualified_reference(&self, name: EcoString, span: Span) -> Expression {
        let downcased_name = name.to_lowercase().into();
        Expression::QualifiedReference {
            span,
            name,
            downcased_name,
        }
    }

    /// `/pattern/`
    fn regexp(&self, pattern: EcoString, span: Span) -> Expression {
        Expression::Regexp { span, pattern }
    }

    /// `lhs -> rhs` and the other relationship operators.
    fn rel_op(&self, op: EcoString, lhs: Expression, rhs: Expression, span: Span) -> Expression {
        Expression::Relationship {
            span,
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `<%= expr %>`
    fn render_expression(&self, expr: Expression, span: Span) -> Expression {
        Expression::RenderExpression {
            span,
            expr: Box::new(expr),
        }
    }

    /// Literal template text.
    fn render_string(&self, value: EcoString, span: Span) -> Expression {
        Expression::RenderString { span, value }
    }

    /// A reserved word in a value position.
    fn reserved_word(&self, name: EcoString, future: bool, span: Span) -> Expression {
        Expression::ReservedWord { span, name, future }
    }

    /// `type { title: ..., ... }`
    fn resource(
        &self,
        form: ResourceForm,
        type_name: Expression,
        bodies: Vec<Expression>,
        span: Span,
    ) -> Expression {
        Expression::Resource {
            span,
            form,
            type_name: Box::new(type_name),
            bodies,
        }
    }

    /// One `title: operations` resource body.
    fn resource_body(
        &self,
        title: Expression,
        operations: Vec<Expression>,
        span: Span,
    ) -> Expression {
        Expression::ResourceBody {
            span,
            title: Box::new(title),
            operations,
        }
    }

    /// `Type { operations }`
    fn resource_defaults(
        &self,
        form: ResourceForm,
        type_ref: Expression,
        operations: Vec<Expression>,
        span: Span,
    ) -> Expression {
        Expression::ResourceDefaults {
            span,
            form,
            type_ref: Box::new(type_ref),
            operations,
        }
    }

    /// `Type[title] { operations }`
    fn resource_override(
        &self,
        form: ResourceForm,
        resources: Expression,
        operations: Vec<Expression>,
        span: Span,
    ) -> Expression {
        Expression::ResourceOverride {
            span,
            form,
            resources: Box::new(resources),
            operations,
        }
    }

    /// `test ? { selectors }`
    fn select(&self, lhs: Expression, selectors: Vec<Expression>, span: Span) -> Expression {
        Expression::Select {
            span,
            lhs: Box::new(lhs),
            selectors,
        }
    }

    /// One `key => value` selector arm.
    fn selector(&self, key: Expression, value: Expression, span: Span) -> Expression {
        Expression::Selector {
            span,
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    /// `site { body }`
    fn site(&self, body: Expression, span: Span) -> Expression {
        Expression::SiteDefinition {
            span,
            body: Box::new(body),
        }
    }

    /// A string literal.
    fn string(&self, value: EcoString, span: Span) -> Expression {
        Expression::String { span, value }
    }

    /// String conversion of an interpolated segment.
    fn text(&self, expr: Expression, span: Span) -> Expression {
        Expression::Text {
            span,
            expr: Box::new(expr),
        }
    }

    /// `type Name = type-expression`
    fn type_alias(&self, name: EcoString, type_expr: Expression, span: Span) -> Expression {
        Expression::TypeAlias {
            span,
            name,
            type_expr: Box::new(type_expr),
        }
    }

    /// `type Name inherits Parent { body }`
    fn type_definition(
        &self,
        name: EcoString,
        parent: Option<EcoString>,
        body: Expression,
        span: Span,
    ) -> Expression {
        Expression::TypeDefinition {
            span,
            name,
            parent,
            body: Box::new(body),
        }
    }

    /// `type Runtime[lang] = mapping`
    fn type_mapping(&self, type_expr: Expression, mapping: Expression, span: Span) -> Expression {
        Expression::TypeMapping {
            span,
            type_expr: Box::new(type_expr),
            mapping: Box::new(mapping),
        }
    }

    /// `undef`
    fn undef(&self, span: Span) -> Expression {
        Expression::Undef { span }
    }

    /// `* expr`
    fn unfold(&self, expr: Expression, span: Span) -> Expression {
        Expression::Unfold {
            span,
            expr: Box::new(expr),
        }
    }

    /// `unless test { then } else { else }`
    fn unless_expression(
        &self,
        test: Expression,
        then_part: Expression,
        else_part: Expression,
        span: Span,
    ) -> Expression {
        Expression::Unless {
            span,
            test: Box::new(test),
            then_part: Box::new(then_part),
            else_part: Box::new(else_part),
        }
    }

    /// `$name`
    fn variable(&self, expr: Expression, span: Span) -> Expression {
        Expression::Variable {
            span,
            expr: Box::new(expr),
        }
    }

    /// `<| query |>`
    fn virtual_query(&self, query: Expression, span: Span) -> Expression {
        Expression::VirtualQuery {
            span,
            query: Box::new(query),
        }
    }

    /// One `values: { body }` case option.
    fn when(&self, values: Vec<Expression>, then_part: Expression, span: Span) -> Expression {
        Expression::When {
            span,
            values,
            then_part: Box::new(then_part),
        }
    }
}

/// The canonical factory: every constructor is the trait default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFactory;

impl ExpressionFactory for DefaultFactory {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::source_analysis::Locator;

    use super::*;

    fn span() -> Span {
        Span::new(Arc::new(Locator::new("f.dv", "Foo::Bar")), 0, 8)
    }

    #[test]
    fn qualified_reference_downcases() {
        let f = DefaultFactory;
        let qr = f.qualified_reference("Foo::Bar".into(), span());
        let Expression::QualifiedReference {
            name,
            downcased_name,
            ..
        } = qr
        else {
            panic!("expected qualified reference");
        };
        assert_eq!(name, "Foo::Bar");
        assert_eq!(downcased_name, "foo::bar");
    }

    #[test]
    fn epp_expression_wraps_in_lambda() {
        let f = DefaultFactory;
        let body = f.block(Vec::new(), span());
        let epp = f.epp_expression(Vec::new(), body, span());
        let Expression::Lambda {
            parameters, body, ..
        } = epp
        else {
            panic!("expected lambda wrapper");
        };
        assert!(parameters.is_empty());
        assert!(matches!(
            *body,
            Expression::EppExpression {
                parameters_specified: false,
                ..
            }
        ));
    }

    #[test]
    fn overriding_a_constructor_instruments_nodes() {
        struct Folding;
        impl ExpressionFactory for Folding {
            fn string(&self, value: EcoString, span: Span) -> Expression {
                Expression::String {
                    span,
                    value: value.to_uppercase().into(),
                }
            }
        }
        let e = Folding.string("quiet".into(), span());
        assert!(matches!(e, Expression::String { value, .. } if value == "QUIET"));
    }
}
