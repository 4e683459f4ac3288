// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! The PN (parsed-node) projection.
//!
//! PN is a compact, tree-shaped rendition of the AST used for serialization
//! and diffing: calls render as `{"^": [tag, args...]}`, maps as
//! `{"#": [k1, v1, ...]}`, lists as JSON arrays, and literals as bare JSON
//! scalars. Two ASTs are considered equivalent when their PN projections
//! are equal, which is what the round-trip tests compare.

use ecow::EcoString;
use serde_json::Value;

use crate::ast::{Expression, ResourceForm};

/// A parsed-node tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Pn {
    /// JSON `null` (projects `undef`).
    Null,
    /// A boolean literal.
    Bool(bool),
    /// An integer literal.
    Int(i64),
    /// A float literal. Whole floats render without a fraction, matching
    /// the canonical encoder.
    Float(f64),
    /// A string literal.
    Str(EcoString),
    /// A JSON array.
    List(Vec<Pn>),
    /// Keyed entries, rendered as `{"#": [k1, v1, ...]}`.
    Map(Vec<(EcoString, Pn)>),
    /// A tagged call, rendered as `{"^": [tag, args...]}`.
    Call(EcoString, Vec<Pn>),
}

impl Pn {
    /// Converts to a `serde_json` value.
    #[must_use]
    pub fn to_data(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => {
                // Whole floats render as integers: `Float[0.0]` projects to 0.
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 9e15 {
                    #[allow(clippy::cast_possible_truncation)]
                    let whole = *f as i64;
                    Value::from(whole)
                } else {
                    serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number)
                }
            }
            Self::Str(s) => Value::from(s.as_str()),
            Self::List(items) => Value::Array(items.iter().map(Pn::to_data).collect()),
            Self::Map(entries) => {
                let mut flat = Vec::with_capacity(entries.len() * 2);
                for (k, v) in entries {
                    flat.push(Value::from(k.as_str()));
                    flat.push(v.to_data());
                }
                let mut obj = serde_json::Map::new();
                obj.insert("#".to_string(), Value::Array(flat));
                Value::Object(obj)
            }
            Self::Call(tag, args) => {
                let mut list = Vec::with_capacity(args.len() + 1);
                list.push(Value::from(tag.as_str()));
                list.extend(args.iter().map(Pn::to_data));
                let mut obj = serde_json::Map::new();
                obj.insert("^".to_string(), Value::Array(list));
                Value::Object(obj)
            }
        }
    }

    /// Compact JSON rendering of the projection.
    #[must_use]
    pub fn to_json(&self) -> String {
        self.to_data().to_string()
    }
}

fn call(tag: &str, args: Vec<Pn>) -> Pn {
    Pn::Call(tag.into(), args)
}

fn entry(key: &str, value: Pn) -> (EcoString, Pn) {
    (key.into(), value)
}

fn pns(exprs: &[Expression]) -> Vec<Pn> {
    exprs.iter().map(Expression::to_pn).collect()
}

/// A body rendered as a statement list: blocks flatten, nops vanish,
/// anything else is a single-element list.
fn body_list(body: &Expression) -> Vec<Pn> {
    match body {
        Expression::Block { statements, .. } => pns(statements),
        Expression::Nop { .. } => Vec::new(),
        other => vec![other.to_pn()],
    }
}

/// The `{name => {type?, splat?, value?}}` map of a parameter list.
fn params_map(parameters: &[Expression]) -> Pn {
    let mut entries = Vec::with_capacity(parameters.len());
    for p in parameters {
        if let Expression::Parameter { name, .. } = p {
            entries.push((name.clone(), p.to_pn()));
        }
    }
    Pn::Map(entries)
}

/// Map entries shared by functions, plans, defines, and applications.
fn definition_entries(
    name: &EcoString,
    parameters: &[Expression],
    body: &Expression,
) -> Vec<(EcoString, Pn)> {
    let mut entries = vec![entry("name", Pn::Str(name.clone()))];
    if !parameters.is_empty() {
        entries.push(entry("params", params_map(parameters)));
    }
    entries.push(entry("body", Pn::List(body_list(body))));
    entries
}

fn call_entries(
    functor: &Expression,
    args: &[Expression],
    lambda: Option<&Expression>,
) -> Vec<(EcoString, Pn)> {
    let mut entries = vec![
        entry("functor", functor.to_pn()),
        entry("args", Pn::List(pns(args))),
    ];
    if let Some(block) = lambda {
        entries.push(entry("block", block.to_pn()));
    }
    entries
}

const fn form_name(form: ResourceForm) -> Option<&'static str> {
    match form {
        ResourceForm::Regular => None,
        ResourceForm::Virtual => Some("virtual"),
        ResourceForm::Exported => Some("exported"),
    }
}

impl Expression {
    /// Projects this node (and its subtree) to PN form.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn to_pn(&self) -> Pn {
        match self {
            Self::Undef { .. } => Pn::Null,
            Self::Default { .. } => call("default", Vec::new()),
            Self::Boolean { value, .. } => Pn::Bool(*value),
            Self::Integer { value, .. } => Pn::Int(*value),
            Self::Float { value, .. } => Pn::Float(*value),
            Self::String { value, .. } => Pn::Str(value.clone()),
            Self::Regexp { pattern, .. } => call("regexp", vec![Pn::Str(pattern.clone())]),
            Self::ConcatenatedString { segments, .. } => call("concat", pns(segments)),
            Self::Heredoc { syntax, text, .. } => {
                let mut entries = Vec::new();
                if !syntax.is_empty() {
                    entries.push(entry("syntax", Pn::Str(syntax.clone())));
                }
                entries.push(entry("text", text.to_pn()));
                call("heredoc", vec![Pn::Map(entries)])
            }
            Self::List { elements, .. } | Self::CommaSeparatedList { elements, .. } => {
                Pn::List(pns(elements))
            }
            Self::Hash { entries, .. } => call("hash", pns(entries)),

            Self::QualifiedName { name, .. } => call("qn", vec![Pn::Str(name.clone())]),
            Self::QualifiedReference { name, .. } => call("qr", vec![Pn::Str(name.clone())]),
            Self::ReservedWord { name, .. } => call("reserved", vec![Pn::Str(name.clone())]),

            Self::UnaryMinus { expr, .. } => call("-", vec![expr.to_pn()]),
            Self::Not { expr, .. } => call("!", vec![expr.to_pn()]),
            Self::Unfold { expr, .. } => call("unfold", vec![expr.to_pn()]),
            Self::Parenthesized { expr, .. } => call("paren", vec![expr.to_pn()]),
            Self::Text { expr, .. } => call("str", vec![expr.to_pn()]),
            Self::Variable { expr, .. } => {
                let name = match expr.as_ref() {
                    Self::QualifiedName { name, .. } => Pn::Str(name.clone()),
                    Self::Integer { value, .. } => Pn::Int(*value),
                    other => other.to_pn(),
                };
                call("var", vec![name])
            }
            Self::RenderExpression { expr, .. } => call("render", vec![expr.to_pn()]),
            Self::RenderString { value, .. } => call("render-s", vec![Pn::Str(value.clone())]),

            Self::And { lhs, rhs, .. } => call("and", vec![lhs.to_pn(), rhs.to_pn()]),
            Self::Or { lhs, rhs, .. } => call("or", vec![lhs.to_pn(), rhs.to_pn()]),
            Self::In { lhs, rhs, .. } => call("in", vec![lhs.to_pn(), rhs.to_pn()]),
            Self::Comparison { op, lhs, rhs, .. }
            | Self::Arithmetic { op, lhs, rhs, .. }
            | Self::Match { op, lhs, rhs, .. }
            | Self::Assignment { op, lhs, rhs, .. }
            | Self::Relationship { op, lhs, rhs, .. } => {
                call(op, vec![lhs.to_pn(), rhs.to_pn()])
            }
            Self::NamedAccess { lhs, rhs, .. } => call(".", vec![lhs.to_pn(), rhs.to_pn()]),
            Self::Access { operand, keys, .. } => {
                let mut args = vec![operand.to_pn()];
                args.extend(pns(keys));
                call("access", args)
            }

            Self::Block { statements, .. } => call("block", pns(statements)),
            Self::KeyedEntry { key, value, .. } | Self::Selector { key, value, .. } => {
                call("=>", vec![key.to_pn(), value.to_pn()])
            }
            Self::AttributeOp {
                op, name, value, ..
            } => call(op, vec![Pn::Str(name.clone()), value.to_pn()]),
            Self::AttributesOp { expr, .. } => call("splat-hash", vec![expr.to_pn()]),
            Self::Select { lhs, selectors, .. } => {
                call("?", vec![lhs.to_pn(), Pn::List(pns(selectors))])
            }
            Self::Case { test, options, .. } => {
                call("case", vec![test.to_pn(), Pn::List(pns(options))])
            }
            Self::When {
                values, then_part, ..
            } => call(
                "when",
                vec![Pn::List(pns(values)), Pn::List(body_list(then_part))],
            ),
            Self::If {
                test,
                then_part,
                else_part,
                ..
            } => call("if", conditional_entries(test, then_part, else_part)),
            Self::Unless {
                test,
                then_part,
                else_part,
                ..
            } => call("unless", conditional_entries(test, then_part, else_part)),
            Self::Nop { .. } => call("nop", Vec::new()),

            Self::CallNamedFunction {
                functor,
                args,
                lambda,
                rval_required,
                ..
            } => {
                let tag = if *rval_required { "call" } else { "invoke" };
                call(
                    tag,
                    vec![Pn::Map(call_entries(functor, args, lambda.as_deref()))],
                )
            }
            Self::CallMethod {
                functor,
                args,
                lambda,
                ..
            } => call(
                "call-method",
                vec![Pn::Map(call_entries(functor, args, lambda.as_deref()))],
            ),
            Self::Lambda {
                parameters,
                body,
                return_type,
                ..
            } => {
                let mut entries = Vec::new();
                if !parameters.is_empty() {
                    entries.push(entry("params", params_map(parameters)));
                }
                entries.push(entry("body", Pn::List(body_list(body))));
                if let Some(rt) = return_type {
                    entries.push(entry("returns", rt.to_pn()));
                }
                call("lambda", vec![Pn::Map(entries)])
            }

            Self::Resource {
                form,
                type_name,
                bodies,
                ..
            } => {
                let mut entries = vec![
                    entry("type", type_name.to_pn()),
                    entry("bodies", Pn::List(pns(bodies))),
                ];
                if let Some(f) = form_name(*form) {
                    entries.push(entry("form", Pn::Str(f.into())));
                }
                call("resource", vec![Pn::Map(entries)])
            }
            Self::ResourceBody {
                title, operations, ..
            } => Pn::Map(vec![
                entry("title", title.to_pn()),
                entry("ops", Pn::List(pns(operations))),
            ]),
            Self::ResourceDefaults {
                form,
                type_ref,
                operations,
                ..
            } => {
                let mut entries = vec![
                    entry("type", type_ref.to_pn()),
                    entry("ops", Pn::List(pns(operations))),
                ];
                if let Some(f) = form_name(*form) {
                    entries.push(entry("form", Pn::Str(f.into())));
                }
                call("resource-defaults", vec![Pn::Map(entries)])
            }
            Self::ResourceOverride {
                form,
                resources,
                operations,
                ..
            } => {
                let mut entries = vec![
                    entry("resources", resources.to_pn()),
                    entry("ops", Pn::List(pns(operations))),
                ];
                if let Some(f) = form_name(*form) {
                    entries.push(entry("form", Pn::Str(f.into())));
                }
                call("resource-override", vec![Pn::Map(entries)])
            }
            Self::Collect {
                resource_type,
                query,
                operations,
                ..
            } => {
                let mut entries = vec![
                    entry("type", resource_type.to_pn()),
                    entry("query", query.to_pn()),
                ];
                if !operations.is_empty() {
                    entries.push(entry("ops", Pn::List(pns(operations))));
                }
                call("collect", vec![Pn::Map(entries)])
            }
            Self::VirtualQuery { query, .. } => match query.as_ref() {
                Self::Nop { .. } => call("virtual-query", Vec::new()),
                q => call("virtual-query", vec![q.to_pn()]),
            },
            Self::ExportedQuery { query, .. } => match query.as_ref() {
                Self::Nop { .. } => call("exported-query", Vec::new()),
                q => call("exported-query", vec![q.to_pn()]),
            },

            Self::Class {
                name,
                parameters,
                parent,
                body,
                ..
            } => {
                let mut entries = vec![entry("name", Pn::Str(name.clone()))];
                if !parameters.is_empty() {
                    entries.push(entry("params", params_map(parameters)));
                }
                if let Some(p) = parent {
                    entries.push(entry("parent", Pn::Str(p.clone())));
                }
                entries.push(entry("body", Pn::List(body_list(body))));
                call("class", vec![Pn::Map(entries)])
            }
            Self::ResourceTypeDefinition {
                name,
                parameters,
                body,
                ..
            } => call(
                "define",
                vec![Pn::Map(definition_entries(name, parameters, body))],
            ),
            Self::Application {
                name,
                parameters,
                body,
                ..
            } => call(
                "application",
                vec![Pn::Map(definition_entries(name, parameters, body))],
            ),
            Self::NodeDefinition {
                host_matches,
                parent,
                body,
                ..
            } => {
                let mut entries = vec![entry("matches", Pn::List(pns(host_matches)))];
                if let Some(p) = parent {
                    entries.push(entry("parent", p.to_pn()));
                }
                entries.push(entry("body", Pn::List(body_list(body))));
                call("node", vec![Pn::Map(entries)])
            }
            Self::SiteDefinition { body, .. } => call("site", vec![Pn::List(body_list(body))]),
            Self::Function {
                name,
                parameters,
                body,
                return_type,
                ..
            } => {
                let mut entries = definition_entries(name, parameters, body);
                if let Some(rt) = return_type {
                    entries.push(entry("returns", rt.to_pn()));
                }
                call("function", vec![Pn::Map(entries)])
            }
            Self::Plan {
                name,
                parameters,
                body,
                return_type,
                actor,
                ..
            } => {
                let mut entries = definition_entries(name, parameters, body);
                if let Some(rt) = return_type {
                    entries.push(entry("returns", rt.to_pn()));
                }
                if *actor {
                    entries.push(entry("actor", Pn::Bool(true)));
                }
                call("plan", vec![Pn::Map(entries)])
            }
            Self::TypeAlias {
                name, type_expr, ..
            } => call("type-alias", vec![Pn::Str(name.clone()), type_expr.to_pn()]),
            Self::TypeDefinition {
                name, parent, body, ..
            } => call(
                "type-definition",
                vec![
                    Pn::Str(name.clone()),
                    Pn::Str(parent.clone().unwrap_or_default()),
                    Pn::List(body_list(body)),
                ],
            ),
            Self::TypeMapping {
                type_expr, mapping, ..
            } => call("type-mapping", vec![type_expr.to_pn(), mapping.to_pn()]),
            Self::CapabilityMapping {
                kind,
                component,
                capability,
                mappings,
                ..
            } => call(
                kind,
                vec![Pn::Map(vec![
                    entry("component", component.to_pn()),
                    entry("capability", Pn::Str(capability.clone())),
                    entry("mappings", Pn::List(pns(mappings))),
                ])],
            ),
            Self::EppExpression { body, .. } => call(
                "epp",
                vec![Pn::Map(vec![entry("body", Pn::List(body_list(body)))])],
            ),
            Self::Parameter {
                value,
                type_expr,
                captures_rest,
                ..
            } => {
                let mut entries = Vec::new();
                if let Some(t) = type_expr {
                    entries.push(entry("type", t.to_pn()));
                }
                if *captures_rest {
                    entries.push(entry("splat", Pn::Bool(true)));
                }
                if let Some(v) = value {
                    entries.push(entry("value", v.to_pn()));
                }
                Pn::Map(entries)
            }
            Self::Program { body, .. } => body.to_pn(),
        }
    }
}

fn conditional_entries(
    test: &Expression,
    then_part: &Expression,
    else_part: &Expression,
) -> Vec<Pn> {
    let mut entries = vec![entry("test", test.to_pn())];
    let then_list = body_list(then_part);
    if !then_list.is_empty() {
        entries.push(entry("then", Pn::List(then_list)));
    }
    let else_list = body_list(else_part);
    if !else_list.is_empty() {
        entries.push(entry("else", Pn::List(else_list)));
    }
    vec![Pn::Map(entries)]
}

#[cfg(test)]
mod tests {
    use crate::source_analysis::Parser;

    use super::*;

    fn parse_json(source: &str) -> String {
        let mut parser = Parser::new();
        parser
            .parse("", source, false)
            .unwrap_or_else(|e| panic!("parse failed: {e}"))
            .to_pn()
            .to_json()
    }

    #[test]
    fn pn_data_shapes() {
        let pn = Pn::Call(
            "=>".into(),
            vec![Pn::Str("mode".into()), Pn::Str("0640".into())],
        );
        assert_eq!(pn.to_json(), r##"{"^":["=>","mode","0640"]}"##);

        let map = Pn::Map(vec![("title".into(), Pn::Str("/tmp/foo".into()))]);
        assert_eq!(map.to_json(), r##"{"#":["title","/tmp/foo"]}"##);

        assert_eq!(Pn::List(vec![Pn::Int(1), Pn::Bool(true)]).to_json(), "[1,true]");
        assert_eq!(Pn::Null.to_json(), "null");
    }

    #[test]
    fn whole_floats_render_as_integers() {
        assert_eq!(Pn::Float(0.0).to_json(), "0");
        assert_eq!(Pn::Float(3.0).to_json(), "3");
        assert_eq!(Pn::Float(3.14).to_json(), "3.14");
    }

    // The manifest fixture from the original test corpus; the expected JSON
    // must match byte for byte.
    #[test]
    fn manifest_projection() {
        let source = "file { '/tmp/foo':\n  \
                        mode => '0640',\n  \
                        ensure => present;\n\
                      '/tmp/bar':\n  \
                        mode => '0640',\n  \
                        ensure => present;\n\
                      }\n\
                      \n\
                      $rootgroup = $facts['os']['family'] ? 'Solaris' => 'wheel'\n\
                      \n\
                      function foo(Integer[2,3] $in, String $n = 'vi') >> Float[0.0] {\n    \
                        notice(\"show the ${n}\")\n  \
                        $in * 3.14\n\
                      }";
        let expected = concat!(
            r##"{"^":["block",{"^":["resource",{"#":["type",{"^":["qn","file"]},"bodies",[{"#":["title","/tmp/foo","ops",[{"^":["=>","mode","0640"]},{"^":["=>","ensure",{"^":["qn","present"]}]}]]},{"#":["title","/tmp/bar","ops",[{"^":["=>","mode","0640"]},{"^":["=>","ensure",{"^":["qn","present"]}]}]]}]]}]},"##,
            r##"{"^":["=",{"^":["var","rootgroup"]},{"^":["?",{"^":["access",{"^":["access",{"^":["var","facts"]},"os"]},"family"]},[{"^":["=>","Solaris","wheel"]}]]}]},"##,
            r##"{"^":["function",{"#":["name","foo","params",{"#":["in",{"#":["type",{"^":["access",{"^":["qr","Integer"]},2,3]}]},"n",{"#":["type",{"^":["qr","String"]},"value","vi"]}]},"body",[{"^":["invoke",{"#":["functor",{"^":["qn","notice"]},"args",[{"^":["concat","show the ",{"^":["str",{"^":["var","n"]}]}]}]]}]},{"^":["*",{"^":["var","in"]},3.14]}],"returns",{"^":["access",{"^":["qr","Float"]},0]}]}]}]}"##,
        );
        assert_eq!(parse_json(source), expected);
    }

    #[test]
    fn exported_resource_carries_form() {
        assert_eq!(
            parse_json("@@file { '/tmp/x': }"),
            r##"{"^":["block",{"^":["resource",{"#":["type",{"^":["qn","file"]},"bodies",[{"#":["title","/tmp/x","ops",[]]}],"form","exported"]}]}]}"##
        );
    }

    #[test]
    fn virtual_resource_carries_form() {
        assert_eq!(
            parse_json("@file { '/tmp/x': }"),
            r##"{"^":["block",{"^":["resource",{"#":["type",{"^":["qn","file"]},"bodies",[{"#":["title","/tmp/x","ops",[]]}],"form","virtual"]}]}]}"##
        );
    }

    #[test]
    fn type_alias_projection() {
        assert_eq!(
            parse_json("type Foo = Integer"),
            r##"{"^":["block",{"^":["type-alias","Foo",{"^":["qr","Integer"]}]}]}"##
        );
    }

    #[test]
    fn negative_literal_folds_into_integer() {
        assert_eq!(parse_json("-5"), r##"{"^":["block",-5]}"##);
        assert_eq!(
            parse_json("- $x"),
            r##"{"^":["block",{"^":["-",{"^":["var","x"]}]}]}"##
        );
    }

    #[test]
    fn statement_call_promotion() {
        assert_eq!(
            parse_json("notice 'hello'"),
            r##"{"^":["block",{"^":["invoke",{"#":["functor",{"^":["qn","notice"]},"args",["hello"]]}]}]}"##
        );
    }

    #[test]
    fn collector_projection() {
        assert_eq!(
            parse_json("User <| title == 'admin' |>"),
            r##"{"^":["block",{"^":["collect",{"#":["type",{"^":["qr","User"]},"query",{"^":["virtual-query",{"^":["==",{"^":["qn","title"]},"admin"]}]}]}]}]}"##
        );
        assert_eq!(
            parse_json("User <<| |>>"),
            r##"{"^":["block",{"^":["collect",{"#":["type",{"^":["qr","User"]},"query",{"^":["exported-query"]}]}]}]}"##
        );
    }

    #[test]
    fn if_else_projection() {
        assert_eq!(
            parse_json("if $a { 1 } else { 2 }"),
            r##"{"^":["block",{"^":["if",{"#":["test",{"^":["var","a"]},"then",[1],"else",[2]]}]}]}"##
        );
    }

    #[test]
    fn case_projection() {
        assert_eq!(
            parse_json("case $os { 'linux': { 1 } default: { 2 } }"),
            concat!(
                r##"{"^":["block",{"^":["case",{"^":["var","os"]},"##,
                r##"[{"^":["when",["linux"],[1]]},{"^":["when",[{"^":["default"]}],[2]]}]]}]}"##
            )
        );
    }
}
