//! `print`: a pure, deterministic GraphQL document printer (`spec.md` §4.5).
//!
//! Every sub-query the executor sends upstream is produced by this function, rendering directly
//! from a [`NormalizedSelectionSet`] (see `operation.rs`) rather than from `apollo_compiler`'s own
//! AST — the planner builds each step's selection in normalized form, including synthetic `id`
//! fields that never existed in the client's document, so printing from the normalized tree is
//! the only representation that covers both.

use apollo_compiler::ast::{OperationType, Value};
use itertools::Itertools;
use std::fmt::Write as _;

use super::operation::{NormalizedField, NormalizedSelection, NormalizedSelectionSet};

/// Declares one variable the printed document will need a `$name: Type` definition for.
#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub name: String,
    pub ty: String,
}

/// Prints one operation as a complete, executable GraphQL document.
///
/// `variables` must cover every variable referenced transitively under `selection_set`
/// (`spec.md` §4.5's "variable definitions" guarantee) — the planner computes this via
/// `operation::field_variables` while building each `PlanStep`.
pub fn print_document(
    operation_type: OperationType,
    operation_name: Option<&str>,
    variables: &[VariableDecl],
    selection_set: &NormalizedSelectionSet,
) -> String {
    let mut out = String::new();
    match operation_type {
        OperationType::Query => out.push_str("query"),
        OperationType::Mutation => out.push_str("mutation"),
        OperationType::Subscription => out.push_str("subscription"),
    }
    if let Some(name) = operation_name {
        let _ = write!(out, " {name}");
    }
    if !variables.is_empty() {
        out.push('(');
        let decls = variables
            .iter()
            .map(|v| format!("${}: {}", v.name, v.ty))
            .join(", ");
        out.push_str(&decls);
        out.push(')');
    }
    out.push(' ');
    print_selection_set(&mut out, selection_set, 0);
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn print_selection_set(out: &mut String, selection_set: &NormalizedSelectionSet, depth: usize) {
    out.push_str("{\n");
    for selection in selection_set.selections.values() {
        let NormalizedSelection::Field(field) = selection;
        print_field(out, field, depth + 1);
    }
    indent(out, depth);
    out.push('}');
    if depth > 0 {
        out.push('\n');
    }
}

fn print_field(out: &mut String, field: &NormalizedField, depth: usize) {
    indent(out, depth);
    if let Some(alias) = &field.alias {
        if alias != &field.name {
            let _ = write!(out, "{alias}: ");
        }
    }
    out.push_str(&field.name);
    if !field.arguments.is_empty() {
        out.push('(');
        let args = field
            .arguments
            .iter()
            .map(|arg| format!("{}: {}", arg.name, print_value(&arg.value)))
            .join(", ");
        out.push_str(&args);
        out.push(')');
    }
    if field.selection_set.is_empty() {
        out.push('\n');
    } else {
        out.push(' ');
        print_selection_set(out, &field.selection_set, depth);
        out.push('\n');
    }
}

/// Prints one GraphQL value literal. Covers variable, int, float, string, boolean, null (the
/// literal `null`), enum, list, and object, recursing for list/object (`spec.md` §4.5).
pub fn print_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Enum(name) => name.to_string(),
        Value::Variable(name) => format!("${name}"),
        Value::String(s) => format!("{:?}", s),
        Value::Float(f) => f.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::List(items) => {
            let inner = items.iter().map(|v| print_value(v)).join(", ");
            format!("[{inner}]")
        }
        Value::Object(fields) => {
            let inner = fields
                .iter()
                .map(|(name, v)| format!("{name}: {}", print_value(v)))
                .join(", ");
            format!("{{{inner}}}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::operation::apply_fragments;
    use apollo_compiler::{ExecutableDocument, Name, Node};
    use apollo_compiler::executable::Fragment;
    use std::collections::HashMap;

    fn normalize(schema_sdl: &str, query: &str) -> NormalizedSelectionSet {
        let schema = apollo_compiler::Schema::parse_and_validate(schema_sdl, "s.graphql").unwrap();
        let doc = ExecutableDocument::parse_and_validate(&schema, query, "q.graphql").unwrap();
        let op = doc.operations.get(None).unwrap();
        let fragments: HashMap<Name, Node<Fragment>> = doc.fragments.clone().into_iter().collect();
        apply_fragments(&op.selection_set, &fragments)
    }

    #[test]
    fn prints_alias_only_when_different_from_field_name() {
        let set = normalize("type Query { t: T } type T { v: Int }", "query { renamed: t { v } }");
        let printed = print_document(OperationType::Query, None, &[], &set);
        assert!(printed.contains("renamed: t"));
    }

    #[test]
    fn printing_is_stable_across_repeated_calls() {
        let set = normalize("type Query { t: T } type T { v: Int }", "query { t { v } }");
        let a = print_document(OperationType::Query, None, &[], &set);
        let b = print_document(OperationType::Query, None, &[], &set);
        assert_eq!(a, b);
    }

    #[test]
    fn prints_synthetic_field_without_alias() {
        let mut set = normalize("type Query { t: T } type T { v: Int }", "query { t { v } }");
        let NormalizedSelection::Field(t) = set.selections.get_mut("t").unwrap();
        t.selection_set.insert(NormalizedField::synthetic_scalar("id"));
        let printed = print_document(OperationType::Query, None, &[], &set);
        assert!(printed.contains("id\n"));
    }
}
