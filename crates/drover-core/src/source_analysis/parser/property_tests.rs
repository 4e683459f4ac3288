// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Property-based tests for the parser.

use proptest::prelude::*;

use crate::ast::Expression;

use super::Parser;

/// Every node's span must lie within its parent's span.
fn assert_spans_nest(expr: &Expression) {
    for child in expr.children() {
        assert!(
            expr.span().contains(child.span()),
            "child span {:?} escapes parent span {:?}",
            child.span(),
            expr.span()
        );
        assert_spans_nest(child);
    }
}

/// A small expression grammar for generated sources: literals, variables,
/// binary operators, arrays, and parentheses.
fn expr_source() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (0i64..1000).prop_map(|n| n.to_string()),
        "[a-z][a-z0-9_]{0,6}".prop_map(|v| format!("${v}")),
        "[a-z][a-z0-9]{0,6}".prop_map(|s| format!("'{s}'")),
        Just("true".to_string()),
        Just("undef".to_string()),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("{a} + {b}")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("{a} * {b}")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("{a} == {b}")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("{a} and {b}")),
            prop::collection::vec(inner.clone(), 1..4)
                .prop_map(|items| format!("[{}]", items.join(", "))),
            inner.prop_map(|e| format!("({e})")),
        ]
    })
}

proptest! {
    /// Spans nest, and the root program covers the whole source.
    #[test]
    fn spans_nest_and_root_covers_source(source in expr_source()) {
        let mut parser = Parser::new();
        let ast = parser.parse("prop.dv", &source, false).unwrap();
        prop_assert_eq!(ast.byte_offset(), 0);
        prop_assert_eq!(ast.byte_length(), source.len());
        assert_spans_nest(&ast);
    }

    /// Qualified references always carry their lowercased form.
    #[test]
    fn qualified_references_downcase(
        a in "[A-Z][a-zA-Z0-9]{0,6}",
        b in "[A-Z][a-zA-Z0-9]{0,6}",
    ) {
        let source = format!("{a}::{b}");
        let mut parser = Parser::new();
        let ast = parser.parse("", &source, true).unwrap();
        let Expression::QualifiedReference { name, downcased_name, .. } = ast else {
            panic!("expected qualified reference");
        };
        prop_assert_eq!(name.as_str(), source.as_str());
        let lowered = source.to_lowercase();
        prop_assert_eq!(downcased_name.as_str(), lowered.as_str());
    }

    /// `N + M` preserves each literal's radix.
    #[test]
    fn addition_preserves_radix(n in 0i64..4096, m in 0i64..4096) {
        let source = format!("{n:#x} + 0{m:o}");
        let mut parser = Parser::new();
        let ast = parser.parse("", &source, true).unwrap();
        let Expression::Arithmetic { op, lhs, rhs, .. } = ast else {
            panic!("expected arithmetic expression");
        };
        prop_assert_eq!(op.as_str(), "+");
        prop_assert!(
            matches!(*lhs, Expression::Integer { value, radix: 16, .. } if value == n),
            "expected hex integer literal"
        );
        prop_assert!(
            matches!(*rhs, Expression::Integer { value, radix: 8, .. } if value == m),
            "expected octal integer literal"
        );
    }

    /// A statement-call name followed by a non-entry argument becomes a
    /// terminal call with `rval_required` cleared.
    #[test]
    fn statement_calls_promote(
        name in prop::sample::select(vec![
            "require", "realize", "include", "contain", "tag", "debug", "info",
            "notice", "warning", "err", "fail", "import", "break", "next", "return",
        ]),
        arg in "[a-z][a-z0-9]{0,8}",
    ) {
        let source = format!("{name} '{arg}'");
        let mut parser = Parser::new();
        let ast = parser.parse("", &source, false).unwrap();
        let Expression::Program { body, .. } = ast else {
            panic!("expected program");
        };
        let Expression::Block { statements, .. } = *body else {
            panic!("expected block");
        };
        prop_assert_eq!(statements.len(), 1);
        let Expression::CallNamedFunction { functor, args, rval_required, .. } = &statements[0] else {
            panic!("expected promoted call");
        };
        prop_assert!(!rval_required);
        prop_assert!(
            matches!(functor.as_ref(), Expression::QualifiedName { name: n, .. } if n == name),
            "expected qualified name functor"
        );
        prop_assert!(
            matches!(&args[0], Expression::String { value, .. } if value == &arg),
            "expected string argument"
        );
    }

    /// `-N` folds the sign into the literal; `- $x` negates.
    #[test]
    fn negative_literals_fold(n in 1i64..100_000) {
        let source = format!("-{n}");
        let mut parser = Parser::new();
        let ast = parser.parse("", &source, true).unwrap();
        prop_assert!(
            matches!(ast, Expression::Integer { value, .. } if value == -n),
            "expected folded negative integer literal"
        );

        let spaced = format!("- {n}");
        let ast = parser.parse("", &spaced, true).unwrap();
        prop_assert!(
            matches!(ast, Expression::UnaryMinus { .. }),
            "expected unary minus expression"
        );
    }

    /// PN projection is deterministic: parsing the same source twice gives
    /// PN-equal trees.
    #[test]
    fn projection_is_stable(source in expr_source()) {
        let mut parser = Parser::new();
        let first = parser.parse("", &source, false).unwrap().to_pn();
        let second = parser.parse("", &source, false).unwrap().to_pn();
        prop_assert_eq!(first, second);
    }
}
