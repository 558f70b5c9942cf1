//! Builds a [`Schema`](crate::schema::Schema) from a standard introspection response
//! (`spec.md` §6). Sent to every upstream once at startup.

use crate::error::GatewayError;
use crate::schema::{
    ArgumentDefinition, DirectiveDefinition, EnumTypeDef, FieldDefinition, InputObjectTypeDef,
    InterfaceTypeDef, ObjectTypeDef, Schema, TypeDefinition, TypeRef, UnionTypeDef,
};
use indexmap::IndexMap;
use serde_json::Value;

/// The canonical introspection document sent to each upstream at startup. Kept deliberately
/// minimal: only what §6 requires the gateway to depend on (types, kinds, `ofType` chains for
/// wrapper kinds, root operation type names).
pub const INTROSPECTION_QUERY: &str = r#"
query IntrospectionQuery {
  __schema {
    queryType { name }
    mutationType { name }
    subscriptionType { name }
    directives {
      name
      locations
      args {
        name
        type { ...TypeRef }
      }
    }
    types {
      kind
      name
      fields(includeDeprecated: true) {
        name
        args {
          name
          type { ...TypeRef }
        }
        type { ...TypeRef }
      }
      inputFields {
        name
        type { ...TypeRef }
      }
      interfaces { name }
      enumValues(includeDeprecated: true) { name }
      possibleTypes { name }
    }
  }
}

fragment TypeRef on __Type {
  kind
  name
  ofType {
    kind
    name
    ofType {
      kind
      name
      ofType {
        kind
        name
        ofType {
          kind
          name
          ofType {
            kind
            name
            ofType {
              kind
              name
              ofType {
                kind
                name
              }
            }
          }
        }
      }
    }
  }
}
"#;

fn bad(message: impl Into<String>) -> GatewayError {
    GatewayError::BadRequest(message.into())
}

/// Renders a `__Type` introspection node (with its `ofType` chain) into a wire-format type
/// string, e.g. `{"kind":"NON_NULL","ofType":{"kind":"LIST",...}}` -> `"[User!]!"`.
fn print_type_ref(node: &Value) -> Result<String, GatewayError> {
    let kind = node
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| bad("introspection type missing kind"))?;
    match kind {
        "NON_NULL" => {
            let inner = node
                .get("ofType")
                .ok_or_else(|| bad("NON_NULL type missing ofType"))?;
            Ok(format!("{}!", print_type_ref(inner)?))
        }
        "LIST" => {
            let inner = node
                .get("ofType")
                .ok_or_else(|| bad("LIST type missing ofType"))?;
            Ok(format!("[{}]", print_type_ref(inner)?))
        }
        _ => node
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| bad("named type missing name")),
    }
}

fn parse_arguments(node: &Value) -> Result<Vec<ArgumentDefinition>, GatewayError> {
    let Some(args) = node.get("args").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    args.iter()
        .map(|arg| {
            let name = arg
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| bad("argument missing name"))?
                .to_string();
            let ty = TypeRef(print_type_ref(
                arg.get("type").ok_or_else(|| bad("argument missing type"))?,
            )?);
            Ok(ArgumentDefinition { name, ty })
        })
        .collect()
}

fn parse_fields(node: &Value) -> Result<IndexMap<String, FieldDefinition>, GatewayError> {
    let mut fields = IndexMap::new();
    let Some(list) = node.get("fields").and_then(Value::as_array) else {
        return Ok(fields);
    };
    for field in list {
        let name = field
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| bad("field missing name"))?
            .to_string();
        let ty = TypeRef(print_type_ref(
            field.get("type").ok_or_else(|| bad("field missing type"))?,
        )?);
        let arguments = parse_arguments(field)?;
        fields.insert(
            name.clone(),
            FieldDefinition {
                name,
                ty,
                arguments,
            },
        );
    }
    Ok(fields)
}

fn parse_input_fields(node: &Value) -> Result<IndexMap<String, FieldDefinition>, GatewayError> {
    let mut fields = IndexMap::new();
    let Some(list) = node.get("inputFields").and_then(Value::as_array) else {
        return Ok(fields);
    };
    for field in list {
        let name = field
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| bad("input field missing name"))?
            .to_string();
        let ty = TypeRef(print_type_ref(
            field.get("type").ok_or_else(|| bad("input field missing type"))?,
        )?);
        fields.insert(
            name.clone(),
            FieldDefinition {
                name,
                ty,
                arguments: Vec::new(),
            },
        );
    }
    Ok(fields)
}

fn parse_directives(root: &Value) -> Result<IndexMap<String, DirectiveDefinition>, GatewayError> {
    let mut directives = IndexMap::new();
    let Some(list) = root.get("directives").and_then(Value::as_array) else {
        return Ok(directives);
    };
    for node in list {
        let name = node
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| bad("directive missing name"))?
            .to_string();
        let locations = node
            .get("locations")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let arguments = parse_arguments(node)?;
        directives.insert(
            name.clone(),
            DirectiveDefinition {
                name,
                locations,
                arguments,
            },
        );
    }
    Ok(directives)
}

fn parse_names(node: &Value, key: &str) -> Vec<String> {
    node.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Parses one `types[]` entry of a `__schema` introspection response into a [`TypeDefinition`].
fn parse_type(node: &Value) -> Result<Option<(String, TypeDefinition)>, GatewayError> {
    let kind = node
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| bad("type missing kind"))?;
    let name = node
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| bad("type missing name"))?
        .to_string();

    let definition = match kind {
        "OBJECT" => TypeDefinition::Object(ObjectTypeDef {
            fields: parse_fields(node)?,
            interfaces: parse_names(node, "interfaces"),
        }),
        "INTERFACE" => TypeDefinition::Interface(InterfaceTypeDef {
            fields: parse_fields(node)?,
            interfaces: parse_names(node, "interfaces"),
        }),
        "UNION" => TypeDefinition::Union(UnionTypeDef {
            members: parse_names(node, "possibleTypes"),
        }),
        "ENUM" => TypeDefinition::Enum(EnumTypeDef {
            values: parse_names(node, "enumValues"),
        }),
        "SCALAR" => TypeDefinition::Scalar,
        "INPUT_OBJECT" => TypeDefinition::InputObject(InputObjectTypeDef {
            fields: parse_input_fields(node)?,
        }),
        // LIST/NON_NULL never appear as top-level `types[]` entries; introspection-meta kinds
        // (`__Schema`, `__Type`, ...) are skipped entirely, since the gateway never federates them.
        _ => return Ok(None),
    };
    Ok(Some((name, definition)))
}

/// Parses a full `{"__schema": {...}}` introspection response (as returned by the
/// [`INTROSPECTION_QUERY`]) into a [`Schema`].
pub fn schema_from_introspection(response: &Value) -> Result<Schema, GatewayError> {
    let root = response
        .get("__schema")
        .ok_or_else(|| bad("introspection response missing __schema"))?;

    let query_type = root
        .get("queryType")
        .and_then(|t| t.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| bad("introspection response missing queryType"))?
        .to_string();
    let mutation_type = root
        .get("mutationType")
        .and_then(|t| t.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let subscription_type = root
        .get("subscriptionType")
        .and_then(|t| t.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut types = IndexMap::new();
    if let Some(list) = root.get("types").and_then(Value::as_array) {
        for entry in list {
            if let Some((name, def)) = parse_type(entry)? {
                // Skip the double-underscore introspection meta-types themselves.
                if !name.starts_with("__") {
                    types.insert(name, def);
                }
            }
        }
    }

    let directives = parse_directives(root)?;

    Ok(Schema {
        query_type,
        mutation_type,
        subscription_type,
        types,
        directives,
    })
}

/// Sends [`INTROSPECTION_QUERY`] to `url` via `queryer` and parses the response into a
/// [`RemoteSchema`](crate::schema::RemoteSchema) (`spec.md` §6). The CLI calls this once per
/// configured service at startup.
pub async fn fetch_remote_schema(
    url: &str,
    queryer: &dyn crate::queryer::Queryer,
) -> Result<crate::schema::RemoteSchema, GatewayError> {
    use crate::queryer::QueryerInput;
    let response = queryer
        .query(QueryerInput {
            query: INTROSPECTION_QUERY.to_string(),
            operation_name: Some("IntrospectionQuery".to_string()),
            variables: std::collections::HashMap::new(),
        })
        .await?;
    let schema = schema_from_introspection(&response)?;
    Ok(crate::schema::RemoteSchema {
        url: url.to_string(),
        schema,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_schema() {
        let response = json!({
            "__schema": {
                "queryType": {"name": "Query"},
                "mutationType": null,
                "subscriptionType": null,
                "types": [
                    {
                        "kind": "OBJECT",
                        "name": "Query",
                        "fields": [
                            {
                                "name": "allUsers",
                                "args": [],
                                "type": {
                                    "kind": "NON_NULL",
                                    "name": null,
                                    "ofType": {
                                        "kind": "LIST",
                                        "name": null,
                                        "ofType": {
                                            "kind": "NON_NULL",
                                            "name": null,
                                            "ofType": {"kind": "OBJECT", "name": "User", "ofType": null}
                                        }
                                    }
                                }
                            }
                        ],
                        "interfaces": []
                    },
                    {
                        "kind": "OBJECT",
                        "name": "User",
                        "fields": [
                            {"name": "firstName", "args": [], "type": {"kind": "SCALAR", "name": "String", "ofType": null}}
                        ],
                        "interfaces": []
                    }
                ]
            }
        });
        let schema = schema_from_introspection(&response).unwrap();
        assert_eq!(schema.query_type, "Query");
        let query = schema.types.get("Query").unwrap();
        let field = query.fields().unwrap().get("allUsers").unwrap();
        assert_eq!(field.ty.0, "[User!]!");
    }

    #[test]
    fn parses_directive_declarations() {
        let response = json!({
            "__schema": {
                "queryType": {"name": "Query"},
                "mutationType": null,
                "subscriptionType": null,
                "directives": [
                    {
                        "name": "auth",
                        "locations": ["FIELD_DEFINITION", "OBJECT"],
                        "args": [
                            {"name": "role", "type": {"kind": "SCALAR", "name": "String", "ofType": null}}
                        ]
                    }
                ],
                "types": []
            }
        });
        let schema = schema_from_introspection(&response).unwrap();
        let auth = schema.directives.get("auth").unwrap();
        assert_eq!(auth.locations, vec!["FIELD_DEFINITION", "OBJECT"]);
        assert_eq!(auth.arguments[0].name, "role");
    }

    #[tokio::test]
    async fn fetch_remote_schema_parses_queryer_response() {
        let response = json!({
            "__schema": {
                "queryType": {"name": "Query"},
                "mutationType": null,
                "subscriptionType": null,
                "types": [
                    {
                        "kind": "OBJECT",
                        "name": "Query",
                        "fields": [
                            {"name": "foo", "args": [], "type": {"kind": "SCALAR", "name": "Boolean", "ofType": null}}
                        ],
                        "interfaces": []
                    }
                ]
            }
        });
        let queryer = crate::queryer::MockQueryer::new("http://a", response);
        let remote = fetch_remote_schema("http://a", &queryer).await.unwrap();
        assert_eq!(remote.url, "http://a");
        assert!(remote.schema.types.get("Query").unwrap().fields().unwrap().contains_key("foo"));
    }
}
