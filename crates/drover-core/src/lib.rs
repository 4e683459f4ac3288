// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! Core parser for the Drover configuration language.
//!
//! Drover is a declarative configuration/automation language with imperative
//! expressions, resource declarations, classes and defined types, functions,
//! plans, node definitions, lambdas, type aliases, regular expressions,
//! embedded templating (EPP), interpolated strings, heredocs, capability
//! mappings, and collector expressions.
//!
//! This crate turns Drover source text into an abstract syntax tree. It
//! contains no evaluator, pretty-printer, or file I/O; those live in
//! downstream crates that consume the AST.
//!
//! # Architecture
//!
//! - [`source_analysis`] - the fused lexer/parser. Lexing decisions depend on
//!   parser context (interpolated strings re-enter the expression parser,
//!   heredoc bodies are captured after the enclosing line ends), so both
//!   halves operate on one shared context.
//! - [`ast`] - positioned, immutable AST nodes.
//! - [`factory`] - the construction protocol: one named constructor per node
//!   variant, so alternative factories can instrument tree construction
//!   without touching the grammar.
//! - [`pn`] - the PN (parsed-node) projection used for serialization and
//!   tree diffing.
//!
//! # Example
//!
//! ```
//! use drover_core::source_analysis::Parser;
//!
//! let mut parser = Parser::new();
//! let ast = parser.parse("site.dv", "$greeting = 'hello'", false).unwrap();
//! assert_eq!(ast.to_pn().to_json(), r##"{"^":["block",{"^":["=",{"^":["var","greeting"]},"hello"]}]}"##);
//! ```

pub mod ast;
pub mod factory;
pub mod pn;
pub mod source_analysis;
