//! Query planner (`spec.md` §4.3): turns a parsed client operation, the merged schema, and the
//! field-location index into one [`QueryPlan`] per operation in the document.

use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::ast::OperationType;
use apollo_compiler::executable::{ExecutableDocument, Fragment};
use apollo_compiler::{Name, Node};
use indexmap::IndexMap;

use crate::error::GatewayError;
use crate::location::{FieldLocationMap, INTERNAL_LOCATION};
use crate::plan::operation::{apply_fragments, field_variables, NormalizedField, NormalizedSelection, NormalizedSelectionSet};
use crate::plan::{OperationKind, Path, PlanStep, QueryPlan};
use crate::queryer::QueryerFactory;
use crate::schema::Schema;

/// Builds [`QueryPlan`]s for every operation in a validated client document.
///
/// Holds everything planning needs that doesn't change per-request: the merged schema, the
/// field-location index, the factory used to bind a [`Queryer`](crate::queryer::Queryer) to a
/// chosen URL, and an optional global location-priority override (`spec.md` §4.3's pluggable
/// priority list).
pub struct Planner {
    schema: Arc<Schema>,
    locations: Arc<FieldLocationMap>,
    queryer_factory: QueryerFactory,
    location_priority: Option<Vec<String>>,
}

struct Descended {
    kept: NormalizedSelectionSet,
    dependents: Vec<Arc<PlanStep>>,
    synthetic_ids: Vec<Path>,
}

impl Planner {
    pub fn new(
        schema: Arc<Schema>,
        locations: Arc<FieldLocationMap>,
        queryer_factory: QueryerFactory,
        location_priority: Option<Vec<String>>,
    ) -> Self {
        Self {
            schema,
            locations,
            queryer_factory,
            location_priority,
        }
    }

    /// Builds one [`QueryPlan`] per operation in `document` (`spec.md` §3's "one per operation in
    /// the document").
    pub fn build_plans(&self, document: &ExecutableDocument) -> Result<Vec<QueryPlan>, GatewayError> {
        let fragments: HashMap<Name, Node<Fragment>> =
            document.fragments.clone().into_iter().collect();

        document
            .operations
            .iter()
            .map(|op| self.build_plan(op, &fragments))
            .collect()
    }

    fn build_plan(
        &self,
        op: &Node<apollo_compiler::executable::Operation>,
        fragments: &HashMap<Name, Node<Fragment>>,
    ) -> Result<QueryPlan, GatewayError> {
        let operation_name = op.name.as_ref().map(|n| n.to_string());
        let root_type = self.root_type_name(op.operation_type)?;
        let normalized = apply_fragments(&op.selection_set, fragments);

        let variable_types: HashMap<String, String> = op
            .variables
            .iter()
            .map(|v| (v.name.to_string(), v.ty.to_string()))
            .collect();

        let root_steps = match op.operation_type {
            OperationType::Mutation => self.build_mutation_steps(&root_type, normalized)?,
            OperationType::Query | OperationType::Subscription => {
                self.build_query_steps(&root_type, normalized)?
            }
        };

        Ok(QueryPlan {
            operation_name,
            root_steps,
            variable_types,
        })
    }

    fn root_type_name(&self, operation_type: OperationType) -> Result<String, GatewayError> {
        match operation_type {
            OperationType::Query => Ok(self.schema.query_type.clone()),
            OperationType::Mutation => self.schema.mutation_type.clone().ok_or_else(|| {
                GatewayError::BadRequest("schema defines no mutation type".to_string())
            }),
            OperationType::Subscription => self.schema.subscription_type.clone().ok_or_else(|| {
                GatewayError::BadRequest("schema defines no subscription type".to_string())
            }),
        }
    }

    /// Root-service selection for `Query`/`Subscription` (`spec.md` §4.3 step 3): top-level
    /// fields are grouped by their chosen location (order among root steps does not matter for
    /// non-mutation operations), one root [`PlanStep`] per distinct location.
    fn build_query_steps(
        &self,
        root_type: &str,
        normalized: NormalizedSelectionSet,
    ) -> Result<Vec<Arc<PlanStep>>, GatewayError> {
        let mut groups: IndexMap<String, NormalizedSelectionSet> = IndexMap::new();
        for selection in normalized.selections.values() {
            let NormalizedSelection::Field(field) = selection;
            let location = self.choose_root_location(root_type, &field.name)?;
            groups.entry(location).or_default().insert(field.clone());
        }

        let mut steps = Vec::with_capacity(groups.len());
        for (location, group) in groups {
            let descended = self.descend(&location, root_type, &group, &Path::root())?;
            steps.push(Arc::new(self.finish_step(
                root_type.to_string(),
                &location,
                descended,
                Path::root(),
                false,
                OperationKind::Query,
            )));
        }
        Ok(steps)
    }

    /// Top-level `Mutation` selections must run serially in document order (`spec.md` §5): each
    /// field becomes its own step regardless of shared location, chained as a left-spine via
    /// `then`.
    fn build_mutation_steps(
        &self,
        root_type: &str,
        normalized: NormalizedSelectionSet,
    ) -> Result<Vec<Arc<PlanStep>>, GatewayError> {
        let mut steps = Vec::new();
        for selection in normalized.selections.values() {
            let NormalizedSelection::Field(field) = selection;
            let location = self.choose_root_location(root_type, &field.name)?;
            let mut single = NormalizedSelectionSet::default();
            single.insert(field.clone());
            let descended = self.descend(&location, root_type, &single, &Path::root())?;
            steps.push(self.finish_step(
                root_type.to_string(),
                &location,
                descended,
                Path::root(),
                false,
                OperationKind::Mutation,
            ));
        }

        let mut chained: Option<PlanStep> = None;
        for mut step in steps.into_iter().rev() {
            if let Some(next) = chained.take() {
                step.then.push(Arc::new(next));
            }
            chained = Some(step);
        }
        Ok(chained.map(Arc::new).into_iter().collect())
    }

    fn finish_step(
        &self,
        parent_type: String,
        location: &str,
        descended: Descended,
        insertion_point: Path,
        is_entity_fetch: bool,
        operation_kind: OperationKind,
    ) -> PlanStep {
        let variables_used = collect_variables(&descended.kept);
        PlanStep {
            parent_type,
            selection_set: descended.kept,
            queryer: (self.queryer_factory)(location),
            insertion_point,
            is_entity_fetch,
            operation_kind,
            then: descended.dependents,
            variables_used,
            synthetic_ids: descended.synthetic_ids,
        }
    }

    /// The location chosen for a top-level field: the first entry of the priority override (if
    /// any) that owns it, else the first owning location in registration order (`spec.md` §4.3's
    /// tie-break rules, minus the "equal to parent location" case — there is no parent location
    /// above `Query`/`Mutation`).
    fn choose_root_location(&self, parent_type: &str, field: &str) -> Result<String, GatewayError> {
        let locations = self.locations.lookup(parent_type, field)?;
        Ok(self.prioritize(locations))
    }

    fn prioritize(&self, locations: &[String]) -> String {
        if let Some(priority) = &self.location_priority {
            for candidate in priority {
                if locations.iter().any(|l| l == candidate) {
                    return candidate.clone();
                }
            }
        }
        locations[0].clone()
    }

    /// Descends into `selection`, a set of fields rooted at `parent_type`, deciding per field
    /// whether it stays in the step owned by `location` or spawns a dependent step (`spec.md`
    /// §4.3 step 4). Synthetic `id` fields are injected at this level (step 5) whenever at least
    /// one child field spawned a dependent.
    fn descend(
        &self,
        location: &str,
        parent_type: &str,
        selection: &NormalizedSelectionSet,
        insertion_point: &Path,
    ) -> Result<Descended, GatewayError> {
        let mut kept = NormalizedSelectionSet::default();
        let mut dependents = Vec::new();
        let mut synthetic_ids = Vec::new();
        let mut needs_id = false;

        for selection in selection.selections.values() {
            let NormalizedSelection::Field(field) = selection;

            if field.name == "__typename" {
                kept.insert(field.clone());
                continue;
            }

            let locations = self.locations.lookup(parent_type, &field.name)?;

            if locations.iter().any(|l| l == location) {
                let child_type = self.field_core_type(parent_type, &field.name)?;
                let child_insertion = insertion_point.push_field(field.response_key());
                let child = self.descend(location, &child_type, &field.selection_set, &child_insertion)?;
                let mut kept_field = field.clone();
                kept_field.selection_set = child.kept;
                kept.insert(kept_field);
                dependents.extend(child.dependents);
                synthetic_ids.extend(child.synthetic_ids);
            } else {
                let chosen = self.prioritize(locations);
                let child_type = self.field_core_type(parent_type, &field.name)?;
                let field_insertion = insertion_point.push_field(field.response_key());
                let inner = self.descend(&chosen, &child_type, &field.selection_set, &field_insertion)?;
                let step = self.finish_step(
                    child_type,
                    &chosen,
                    inner,
                    field_insertion,
                    true,
                    OperationKind::Query,
                );
                dependents.push(Arc::new(step));
                needs_id = true;
            }
        }

        if needs_id && !kept.selections.contains_key("id") {
            kept.insert(NormalizedField::synthetic_scalar("id"));
            synthetic_ids.push(insertion_point.clone());
        }

        Ok(Descended {
            kept,
            dependents,
            synthetic_ids,
        })
    }

    /// The core (innermost named) type of `(parent_type, field)`, read from the merged schema's
    /// own wire-printed type strings (e.g. `"User"` for a field declared `[User!]!`).
    fn field_core_type(&self, parent_type: &str, field: &str) -> Result<String, GatewayError> {
        let unknown = || GatewayError::UnknownField {
            parent_type: parent_type.to_string(),
            field: field.to_string(),
        };
        let def = self.schema.types.get(parent_type).ok_or_else(unknown)?;
        let fields = def.fields().ok_or_else(unknown)?;
        let field_def = fields.get(field).ok_or_else(unknown)?;
        Ok(named_type_from_wire(&field_def.ty.0))
    }
}

/// Strips `NonNull`/`List` wrapper syntax from a wire-printed type, e.g. `"[User!]!"` -> `"User"`.
fn named_type_from_wire(ty: &str) -> String {
    let mut s = ty.trim();
    loop {
        if let Some(stripped) = s.strip_suffix('!') {
            s = stripped;
            continue;
        }
        if let Some(stripped) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            s = stripped;
            continue;
        }
        break;
    }
    s.to_string()
}

/// Walks a step's kept selection recursively, collecting every variable referenced anywhere in
/// it (`spec.md` §4.3 step 6 / Testable Property 6: "no more, no less").
fn collect_variables(selection: &NormalizedSelectionSet) -> Vec<String> {
    let mut out = Vec::new();
    collect_variables_into(selection, &mut out);
    out
}

fn collect_variables_into(selection: &NormalizedSelectionSet, out: &mut Vec<String>) {
    for value in selection.selections.values() {
        let NormalizedSelection::Field(field) = value;
        for var in field_variables(field) {
            if !out.contains(&var) {
                out.push(var);
            }
        }
        collect_variables_into(&field.selection_set, out);
    }
}

/// Registers the internal pseudo-location for introspection fields so `choose_root_location`
/// resolves them without consulting any remote service (`spec.md` §4.1).
pub fn is_internal_location(location: &str) -> bool {
    location == INTERNAL_LOCATION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge_schemas;
    use crate::queryer::MockQueryer;
    use crate::schema::RemoteSchema;
    use apollo_compiler::ExecutableDocument;
    use std::sync::Arc;

    fn planner_for(remotes: Vec<RemoteSchema>) -> (Planner, Arc<Schema>) {
        let (schema, locations) = merge_schemas(&remotes).unwrap();
        let schema = Arc::new(schema);
        let locations = Arc::new(locations);
        let factory: QueryerFactory = Arc::new(|url: &str| {
            Arc::new(MockQueryer::new(url, serde_json::json!({}))) as Arc<dyn crate::queryer::Queryer>
        });
        (
            Planner::new(schema.clone(), locations, factory, None),
            schema,
        )
    }

    fn parse_op(schema: &Schema, query: &str) -> ExecutableDocument {
        let sdl = schema.to_sdl();
        let parsed = apollo_compiler::Schema::parse_and_validate(sdl, "s.graphql").unwrap();
        ExecutableDocument::parse_and_validate(&parsed, query, "q.graphql").unwrap()
    }

    fn object_schema(query_type: &str, fields: &[(&str, &str, &str)]) -> crate::schema::Schema {
        object_schema_with_mutation(query_type, None, fields)
    }

    fn object_schema_with_mutation(
        query_type: &str,
        mutation_type: Option<&str>,
        fields: &[(&str, &str, &str)],
    ) -> crate::schema::Schema {
        use crate::schema::{FieldDefinition, ObjectTypeDef, TypeDefinition, TypeRef};
        let mut types: IndexMap<String, TypeDefinition> = IndexMap::new();
        for (owner, field, ty) in fields {
            let entry = types
                .entry(owner.to_string())
                .or_insert_with(|| TypeDefinition::Object(ObjectTypeDef::default()));
            if let TypeDefinition::Object(o) = entry {
                o.fields.insert(
                    field.to_string(),
                    FieldDefinition {
                        name: field.to_string(),
                        ty: TypeRef(ty.to_string()),
                        arguments: Vec::new(),
                    },
                );
            }
        }
        types
            .entry(query_type.to_string())
            .or_insert_with(|| TypeDefinition::Object(ObjectTypeDef::default()));
        crate::schema::Schema {
            query_type: query_type.to_string(),
            mutation_type: mutation_type.map(str::to_string),
            subscription_type: None,
            types,
            directives: IndexMap::new(),
        }
    }

    #[test]
    fn single_service_query_plans_one_root_step() {
        let a = RemoteSchema {
            url: "http://a".into(),
            schema: object_schema("Query", &[("Query", "foo", "Boolean")]),
        };
        let (planner, schema) = planner_for(vec![a]);
        let doc = parse_op(&schema, "{ foo }");
        let plans = planner.build_plans(&doc).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].root_steps.len(), 1);
        assert_eq!(plans[0].root_steps[0].then.len(), 0);
    }

    #[test]
    fn object_join_spawns_dependent_step_with_synthetic_id() {
        let a = RemoteSchema {
            url: "http://a".into(),
            schema: object_schema(
                "Query",
                &[
                    ("Query", "allUsers", "[User!]!"),
                    ("User", "firstName", "String"),
                ],
            ),
        };
        let b = RemoteSchema {
            url: "http://b".into(),
            schema: object_schema("Query", &[("User", "lastName", "String")]),
        };
        let (planner, schema) = planner_for(vec![a, b]);
        let doc = parse_op(&schema, "{ allUsers { firstName lastName } }");
        let plans = planner.build_plans(&doc).unwrap();
        let root = &plans[0].root_steps[0];
        assert_eq!(root.then.len(), 1);
        let dependent = &root.then[0];
        assert!(dependent.is_entity_fetch);
        assert_eq!(dependent.parent_type, "User");
        assert_eq!(root.synthetic_ids.len(), 1);
    }

    #[test]
    fn mutation_steps_chain_serially() {
        let a = RemoteSchema {
            url: "http://a".into(),
            schema: object_schema_with_mutation(
                "Query",
                Some("Mutation"),
                &[("Mutation", "createA", "Boolean")],
            ),
        };
        let b = RemoteSchema {
            url: "http://b".into(),
            schema: object_schema_with_mutation(
                "Query",
                Some("Mutation"),
                &[("Mutation", "createB", "Boolean")],
            ),
        };

        let (planner, schema) = planner_for(vec![a, b]);
        let doc = parse_op(&schema, "mutation { createA createB }");
        let plans = planner.build_plans(&doc).unwrap();
        assert_eq!(plans[0].root_steps.len(), 1);
        assert_eq!(plans[0].root_steps[0].then.len(), 1);
    }
}
