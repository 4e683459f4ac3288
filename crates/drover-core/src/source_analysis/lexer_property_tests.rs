// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Property-based tests for the lexer.

use proptest::prelude::*;

use super::{Lexer, TokenKind, TokenValue};

/// Drains the lexer, returning the kinds seen. Errors end the drain; the
/// property under test is usually totality, not success.
fn drain(source: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new("prop.dv", source);
    let mut kinds = Vec::new();
    for _ in 0..(source.len() + 2) {
        match lexer.next_token() {
            Ok(TokenKind::End) | Err(_) => break,
            Ok(kind) => kinds.push(kind),
        }
    }
    kinds
}

proptest! {
    /// The lexer never panics and never loops: any printable input drains
    /// within one token per byte.
    #[test]
    fn lexing_is_total(source in "[ -~\n\t]{0,80}") {
        drain(&source);
    }

    #[test]
    fn identifiers_round_trip(name in "[a-z][a-z0-9_]{0,12}") {
        let mut lexer = Lexer::new("", &name);
        let kind = lexer.next_token().unwrap();
        // Keywords lex as themselves, everything else as an identifier.
        if kind == TokenKind::Identifier {
            let token_string = lexer.token_string();
            prop_assert_eq!(token_string.as_str(), name.as_str());
        } else {
            prop_assert_eq!(kind.text(), name.as_str());
        }
        prop_assert_eq!(lexer.next_token().unwrap(), TokenKind::End);
    }

    #[test]
    fn decimal_integers_round_trip(value in 0i64..=i64::MAX) {
        let source = value.to_string();
        let mut lexer = Lexer::new("", &source);
        prop_assert_eq!(lexer.next_token().unwrap(), TokenKind::Integer);
        prop_assert_eq!(lexer.token_value(), &TokenValue::Integer(value));
    }

    #[test]
    fn hex_integers_round_trip(value in 0i64..=0xFFFF_FFFFi64) {
        let source = format!("0x{value:x}");
        let mut lexer = Lexer::new("", &source);
        prop_assert_eq!(lexer.next_token().unwrap(), TokenKind::Integer);
        prop_assert_eq!(lexer.token_value(), &TokenValue::Integer(value));
    }

    #[test]
    fn plain_single_quoted_strings_round_trip(content in "[a-zA-Z0-9 .,:=-]{0,40}") {
        let source = format!("'{content}'");
        let mut lexer = Lexer::new("", &source);
        prop_assert_eq!(lexer.next_token().unwrap(), TokenKind::String);
        let token_string = lexer.token_string();
        prop_assert_eq!(token_string.as_str(), content.as_str());
    }

    #[test]
    fn variables_round_trip(name in "[a-z][a-z0-9_]{0,12}") {
        let source = format!("${name}");
        let mut lexer = Lexer::new("", &source);
        prop_assert_eq!(lexer.next_token().unwrap(), TokenKind::Variable);
        let token_string = lexer.token_string();
        prop_assert_eq!(token_string.as_str(), name.as_str());
    }

    /// Token start positions are monotonically increasing and in bounds.
    #[test]
    fn token_positions_are_monotonic(source in "[a-z0-9 +*()\\[\\]{}=<>,.$'\"-]{0,60}") {
        let mut lexer = Lexer::new("", &source);
        let mut last = 0usize;
        for _ in 0..(source.len() + 2) {
            match lexer.next_token() {
                Ok(TokenKind::End) | Err(_) => break,
                Ok(_) => {
                    let start = lexer.token_start_pos();
                    prop_assert!(start >= last);
                    prop_assert!(start < source.len());
                    last = start;
                }
            }
        }
    }
}
