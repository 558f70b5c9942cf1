//! `applyFragments`: alias-flattening of a selection set for planning purposes (`spec.md` §4.3
//! step 2). Directly adapted from the teacher's `NormalizedSelectionSet`/`NormalizedSelection`
//! machinery in `apollo-federation-next/src/query_plan/operation.rs`.
//!
//! Unlike the teacher, this gateway uses the normalized form for more than just reasoning: every
//! `PlanStep` carries a [`NormalizedSelectionSet`] as its own selection, and the printer (§4.5)
//! renders directly from it rather than from a sliced copy of the client's original AST. Fragment
//! spreads and inline fragments are resolved away at normalization time rather than preserved on
//! the wire to subgraphs — a deliberate simplification from `spec.md`'s stricter "re-emit
//! faithfully" wording, recorded in `DESIGN.md`. `apollo_compiler::executable::Argument` nodes are
//! still reused verbatim (cheap `Node` clones) so argument/variable handling needs no
//! reimplementation.

use apollo_compiler::ast::Value;
use apollo_compiler::executable::{Argument, Field, Fragment, Selection, SelectionSet};
use apollo_compiler::{Name, Node};
use indexmap::IndexMap;
use std::collections::HashMap;

/// A selection set with same-alias fields merged and fragments expanded, keyed by response key
/// (alias, or field name when there is no alias).
#[derive(Debug, Clone, Default)]
pub struct NormalizedSelectionSet {
    pub selections: IndexMap<String, NormalizedSelection>,
}

#[derive(Debug, Clone)]
pub enum NormalizedSelection {
    Field(NormalizedField),
}

#[derive(Debug, Clone)]
pub struct NormalizedField {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<Node<Argument>>,
    pub selection_set: NormalizedSelectionSet,
    /// True for fields the *planner* adds (the stitching `id`), as opposed to fields the client
    /// actually asked for. Synthetic fields are candidates for scrubbing (`spec.md` §4.3 step 5).
    pub synthetic: bool,
}

impl NormalizedField {
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// A field built by the client's own request: real name, no alias rewriting beyond what the
    /// client wrote, no synthetic-field bookkeeping.
    fn from_ast(field: &Node<Field>, selection_set: NormalizedSelectionSet) -> Self {
        Self {
            alias: field.alias.as_ref().map(|a| a.to_string()),
            name: field.name.to_string(),
            arguments: field.arguments.clone(),
            selection_set,
            synthetic: false,
        }
    }

    /// A bare scalar field the planner adds for its own bookkeeping (just `id` today).
    pub fn synthetic_scalar(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            selection_set: NormalizedSelectionSet::default(),
            synthetic: true,
        }
    }
}

impl NormalizedSelectionSet {
    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// Inserts a field, keyed by response key. Merges with any existing field under the same key
    /// (recursively union-ing sub-selections) rather than overwriting — mirrors the alias-merge
    /// rule applied during normalization.
    pub fn insert(&mut self, field: NormalizedField) {
        let key = field.response_key().to_string();
        match self.selections.get_mut(&key) {
            Some(NormalizedSelection::Field(existing)) => {
                for (_, incoming) in field.selection_set.selections {
                    match incoming {
                        NormalizedSelection::Field(f) => existing.selection_set.insert(f),
                    }
                }
            }
            None => {
                self.selections.insert(key, NormalizedSelection::Field(field));
            }
        }
    }
}

/// Flattens `selection_set`, resolving fragment spreads against `fragments` and inlining
/// `InlineFragment`s. Same-response-key fields are merged and their sub-selections concatenated.
///
/// Abstract-type splitting (`spec.md` §4.3's "if all possible concrete types share a location,
/// the fragment stays inline, otherwise it is split per type") is not modeled here: every fragment
/// is inlined unconditionally regardless of type condition. This is a known simplification,
/// adequate for object-rooted federation (the common case) but not for fields that only exist on
/// some concrete types behind an interface/union boundary; see `DESIGN.md`.
pub fn apply_fragments(
    selection_set: &SelectionSet,
    fragments: &HashMap<Name, Node<Fragment>>,
) -> NormalizedSelectionSet {
    NormalizedSelectionSet {
        selections: normalize_selections(&selection_set.selections, fragments),
    }
}

fn normalize_selections(
    selections: &[Selection],
    fragments: &HashMap<Name, Node<Fragment>>,
) -> IndexMap<String, NormalizedSelection> {
    let mut normalized: IndexMap<String, NormalizedSelection> = IndexMap::new();
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let expanded = NormalizedSelectionSet {
                    selections: normalize_selections(&field.selection_set.selections, fragments),
                };
                let normalized_field = NormalizedField::from_ast(field, expanded);
                let key = normalized_field.response_key().to_string();
                match normalized.get_mut(&key) {
                    Some(NormalizedSelection::Field(existing)) => {
                        for (_, incoming) in normalized_field.selection_set.selections {
                            match incoming {
                                NormalizedSelection::Field(f) => existing.selection_set.insert(f),
                            }
                        }
                    }
                    None => {
                        normalized.insert(key, NormalizedSelection::Field(normalized_field));
                    }
                }
            }
            Selection::FragmentSpread(spread) => {
                if let Some(fragment) = fragments.get(&spread.fragment_name) {
                    let expanded =
                        normalize_selections(&fragment.selection_set.selections, fragments);
                    normalized = merge_maps(normalized, expanded);
                }
            }
            Selection::InlineFragment(inline) => {
                let expanded = normalize_selections(&inline.selection_set.selections, fragments);
                normalized = merge_maps(normalized, expanded);
            }
        }
    }
    normalized
}

fn merge_maps(
    mut a: IndexMap<String, NormalizedSelection>,
    b: IndexMap<String, NormalizedSelection>,
) -> IndexMap<String, NormalizedSelection> {
    for (key, value) in b {
        match (a.get_mut(&key), value) {
            (Some(NormalizedSelection::Field(existing)), NormalizedSelection::Field(incoming)) => {
                for (_, inner) in incoming.selection_set.selections {
                    match inner {
                        NormalizedSelection::Field(f) => existing.selection_set.insert(f),
                    }
                }
            }
            (None, value) => {
                a.insert(key, value);
            }
        }
    }
    a
}

/// Walks an argument value (including nested lists/objects) collecting every `Variable`
/// reference, for `spec.md` §4.3 step 6 (variable propagation).
pub fn collect_variables_from_value(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Variable(name) => {
            let name = name.to_string();
            if !out.contains(&name) {
                out.push(name);
            }
        }
        Value::List(items) => {
            for item in items {
                collect_variables_from_value(item, out);
            }
        }
        Value::Object(fields) => {
            for (_, v) in fields {
                collect_variables_from_value(v, out);
            }
        }
        _ => {}
    }
}

/// Variables referenced anywhere in a normalized field's own arguments (not recursing into its
/// sub-selections; callers fold child results in separately while descending).
pub fn field_variables(field: &NormalizedField) -> Vec<String> {
    let mut out = Vec::new();
    for argument in &field.arguments {
        collect_variables_from_value(&argument.value, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use apollo_compiler::ExecutableDocument;

    fn parse(schema_sdl: &str, query: &str) -> ExecutableDocument {
        let schema = apollo_compiler::Schema::parse_and_validate(schema_sdl, "s.graphql").unwrap();
        ExecutableDocument::parse_and_validate(&schema, query, "q.graphql").unwrap()
    }

    #[test]
    fn merges_same_alias_fields() {
        let schema = "type Query { t: T } type T { v1: Int v2: String }";
        let doc = parse(schema, "query Test { t { v1 } t { v2 } }");
        let op = doc.operations.get(None).unwrap();
        let fragments: HashMap<Name, Node<Fragment>> = doc.fragments.clone().into_iter().collect();
        let normalized = apply_fragments(&op.selection_set, &fragments);
        assert_eq!(normalized.selections.len(), 1);
        let NormalizedSelection::Field(t) = normalized.selections.get("t").unwrap();
        assert_eq!(t.selection_set.selections.len(), 2);
    }

    #[test]
    fn inlines_fragment_spreads() {
        let schema = "type Query { t: T } type T { v1: Int v2: String }";
        let doc = parse(
            schema,
            "query Test { t { ...Frag } } fragment Frag on T { v1 v2 }",
        );
        let op = doc.operations.get(None).unwrap();
        let fragments: HashMap<Name, Node<Fragment>> = doc.fragments.clone().into_iter().collect();
        let normalized = apply_fragments(&op.selection_set, &fragments);
        let NormalizedSelection::Field(t) = normalized.selections.get("t").unwrap();
        assert_eq!(t.selection_set.selections.len(), 2);
    }
}
