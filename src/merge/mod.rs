//! Schema merger (`spec.md` §4.2) and the internal schema it injects last.

use crate::error::GatewayError;
use crate::location::{FieldLocationMap, INTERNAL_LOCATION};
use crate::schema::{
    merge_directive_into, merge_type_into, ArgumentDefinition, FieldDefinition, ObjectTypeDef,
    Schema, TypeDefinition, TypeRef,
};
use indexmap::IndexMap;

/// The gateway's own contribution to the merged schema: `Query.node(id: ID!): Node` plus the
/// introspection meta-fields. Merged last, and registered against [`INTERNAL_LOCATION`].
fn internal_schema() -> Schema {
    let mut query_fields = IndexMap::new();
    query_fields.insert(
        "node".to_string(),
        FieldDefinition {
            name: "node".to_string(),
            ty: TypeRef("Node".to_string()),
            arguments: vec![ArgumentDefinition {
                name: "id".to_string(),
                ty: TypeRef("ID!".to_string()),
            }],
        },
    );

    let mut types = IndexMap::new();
    types.insert(
        "Query".to_string(),
        TypeDefinition::Object(ObjectTypeDef {
            fields: query_fields,
            interfaces: Vec::new(),
        }),
    );
    types.insert(
        "Node".to_string(),
        TypeDefinition::Interface(crate::schema::InterfaceTypeDef {
            fields: IndexMap::new(),
            interfaces: Vec::new(),
        }),
    );

    Schema {
        query_type: "Query".to_string(),
        mutation_type: None,
        subscription_type: None,
        types,
        directives: IndexMap::new(),
    }
}

/// Folds N remote schemas (plus the gateway's internal schema) into one, and computes the
/// field-location index alongside it.
///
/// Per `spec.md` §4.1/§4.2: a type/field present in only one source is copied as-is; a type/field
/// present in several must agree exactly, or merging fails with `SchemaConflict`. Introspection
/// meta-fields and `Query.node` are registered against [`INTERNAL_LOCATION`].
pub fn merge_schemas(
    remotes: &[crate::schema::RemoteSchema],
) -> Result<(Schema, FieldLocationMap), GatewayError> {
    if remotes.is_empty() {
        return Err(GatewayError::NoSources);
    }

    let mut merged = Schema {
        query_type: remotes[0].schema.query_type.clone(),
        mutation_type: None,
        subscription_type: None,
        types: IndexMap::new(),
        directives: IndexMap::new(),
    };
    let mut locations = FieldLocationMap::new();

    for remote in remotes {
        if let Some(m) = &remote.schema.mutation_type {
            merged.mutation_type.get_or_insert_with(|| m.clone());
        }
        if let Some(s) = &remote.schema.subscription_type {
            merged.subscription_type.get_or_insert_with(|| s.clone());
        }

        for incoming in remote.schema.directives.values() {
            merge_directive_into(&mut merged.directives, incoming).map_err(
                |(name, left, right)| GatewayError::SchemaConflict {
                    parent_type: "directive".to_string(),
                    field: name,
                    left,
                    right,
                },
            )?;
        }

        for (type_name, incoming) in &remote.schema.types {
            match merged.types.get_mut(type_name) {
                Some(existing) => {
                    merge_type_into(existing, incoming, type_name).map_err(
                        |(field, left, right)| {
                            let (parent_type, field) = field
                                .split_once('.')
                                .map(|(p, f)| (p.to_string(), f.to_string()))
                                .unwrap_or((type_name.clone(), field));
                            GatewayError::SchemaConflict {
                                parent_type,
                                field,
                                left,
                                right,
                            }
                        },
                    )?;
                }
                None => {
                    merged.types.insert(type_name.clone(), incoming.clone());
                }
            }

            if let Some(fields) = incoming.fields() {
                for field_name in fields.keys() {
                    locations.register(type_name, field_name, remote.url.clone());
                }
            }
        }

        register_typename(&mut locations, &remote.schema, &remote.url);
    }

    // Merge in the internal schema last; its fields are registered against the gateway's own
    // pseudo-location rather than any remote URL.
    let internal = internal_schema();
    for (type_name, incoming) in &internal.types {
        match merged.types.get_mut(type_name) {
            Some(existing) => {
                merge_type_into(existing, incoming, type_name).map_err(
                    |(field, left, right)| {
                        let (parent_type, field) = field
                            .split_once('.')
                            .map(|(p, f)| (p.to_string(), f.to_string()))
                            .unwrap_or((type_name.clone(), field));
                        GatewayError::SchemaConflict {
                            parent_type,
                            field,
                            left,
                            right,
                        }
                    },
                )?;
            }
            None => {
                merged.types.insert(type_name.clone(), incoming.clone());
            }
        }
        if let Some(fields) = incoming.fields() {
            for field_name in fields.keys() {
                locations.register(type_name, field_name, INTERNAL_LOCATION);
            }
        }
    }
    register_typename(&mut locations, &merged, INTERNAL_LOCATION);
    locations.register("Query", "__schema", INTERNAL_LOCATION);
    locations.register("Query", "__type", INTERNAL_LOCATION);

    Ok((merged, locations))
}

/// `__typename` is resolvable on every composite type by whichever service already owns that
/// object, so it is registered against the internal location purely so `lookup` never fails for
/// it; the planner special-cases `__typename` to avoid spawning a step (`spec.md` §4.3).
fn register_typename(locations: &mut FieldLocationMap, schema: &Schema, fallback_url: &str) {
    for (type_name, def) in &schema.types {
        if def.fields().is_some() {
            locations.register(type_name, "__typename", fallback_url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RemoteSchema;

    fn schema_with(type_name: &str, field: &str, ty: &str) -> Schema {
        let mut fields = IndexMap::new();
        fields.insert(
            field.to_string(),
            FieldDefinition {
                name: field.to_string(),
                ty: TypeRef(ty.to_string()),
                arguments: Vec::new(),
            },
        );
        let mut types = IndexMap::new();
        types.insert(
            type_name.to_string(),
            TypeDefinition::Object(ObjectTypeDef {
                fields,
                interfaces: Vec::new(),
            }),
        );
        // every schema needs a Query type for merge to have a query_type
        types.entry("Query".to_string()).or_insert(TypeDefinition::Object(ObjectTypeDef {
            fields: IndexMap::new(),
            interfaces: Vec::new(),
        }));
        Schema {
            query_type: "Query".to_string(),
            mutation_type: None,
            subscription_type: None,
            types,
            directives: IndexMap::new(),
        }
    }

    #[test]
    fn merges_disjoint_fields_from_two_services() {
        let a = RemoteSchema {
            url: "http://a".into(),
            schema: schema_with("User", "firstName", "String"),
        };
        let b = RemoteSchema {
            url: "http://b".into(),
            schema: schema_with("User", "lastName", "String"),
        };
        let (merged, locations) = merge_schemas(&[a, b]).unwrap();
        let user = merged.types.get("User").unwrap();
        assert!(user.fields().unwrap().contains_key("firstName"));
        assert!(user.fields().unwrap().contains_key("lastName"));
        assert_eq!(locations.lookup("User", "firstName").unwrap(), &["http://a"]);
        assert_eq!(locations.lookup("User", "lastName").unwrap(), &["http://b"]);
    }

    #[test]
    fn conflicting_field_types_fail() {
        let a = RemoteSchema {
            url: "http://a".into(),
            schema: schema_with("User", "firstName", "String!"),
        };
        let b = RemoteSchema {
            url: "http://b".into(),
            schema: schema_with("User", "firstName", "Int"),
        };
        let err = merge_schemas(&[a, b]).unwrap_err();
        match err {
            GatewayError::SchemaConflict {
                parent_type,
                field,
                left,
                right,
            } => {
                assert_eq!(parent_type, "User");
                assert_eq!(field, "firstName");
                assert_eq!(left, "String!");
                assert_eq!(right, "Int");
            }
            other => panic!("expected SchemaConflict, got {other:?}"),
        }
    }

    #[test]
    fn agreeing_directive_declarations_merge() {
        let directive = |locations: &[&str]| crate::schema::DirectiveDefinition {
            name: "auth".to_string(),
            locations: locations.iter().map(|s| s.to_string()).collect(),
            arguments: Vec::new(),
        };
        let mut a = schema_with("User", "firstName", "String");
        a.directives.insert("auth".to_string(), directive(&["FIELD_DEFINITION"]));
        let mut b = schema_with("Post", "title", "String");
        b.directives.insert("auth".to_string(), directive(&["FIELD_DEFINITION"]));

        let (merged, _) = merge_schemas(&[
            RemoteSchema { url: "http://a".into(), schema: a },
            RemoteSchema { url: "http://b".into(), schema: b },
        ])
        .unwrap();
        assert!(merged.directives.contains_key("auth"));
    }

    #[test]
    fn conflicting_directive_declarations_fail() {
        let mut a = schema_with("User", "firstName", "String");
        a.directives.insert(
            "auth".to_string(),
            crate::schema::DirectiveDefinition {
                name: "auth".to_string(),
                locations: vec!["FIELD_DEFINITION".to_string()],
                arguments: Vec::new(),
            },
        );
        let mut b = schema_with("Post", "title", "String");
        b.directives.insert(
            "auth".to_string(),
            crate::schema::DirectiveDefinition {
                name: "auth".to_string(),
                locations: vec!["OBJECT".to_string()],
                arguments: Vec::new(),
            },
        );

        let err = merge_schemas(&[
            RemoteSchema { url: "http://a".into(), schema: a },
            RemoteSchema { url: "http://b".into(), schema: b },
        ])
        .unwrap_err();
        match err {
            GatewayError::SchemaConflict { parent_type, field, .. } => {
                assert_eq!(parent_type, "directive");
                assert_eq!(field, "auth");
            }
            other => panic!("expected SchemaConflict, got {other:?}"),
        }
    }

    #[test]
    fn node_field_is_registered_against_internal_location() {
        let a = RemoteSchema {
            url: "http://a".into(),
            schema: schema_with("User", "firstName", "String"),
        };
        let (_, locations) = merge_schemas(&[a]).unwrap();
        assert_eq!(
            locations.lookup("Query", "node").unwrap(),
            &[crate::location::INTERNAL_LOCATION]
        );
    }
}
