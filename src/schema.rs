//! The gateway's own lightweight schema representation.
//!
//! Unlike the teacher crate, which wraps `apollo_compiler::Schema` throughout, this gateway
//! builds its merged schema from upstream **introspection responses** (`spec.md` §6), not SDL
//! text — there is no SDL to parse until we print one ourselves for validating client operations
//! (see [`to_sdl`] and [`crate::plan::operation`]). Keeping this representation separate from
//! `apollo_compiler`'s keeps the merge/conflict logic (which only ever needs type *names* and
//! printed type strings) independent of the parser crate used for client queries.

use indexmap::IndexMap;
use std::fmt;

/// A GraphQL type reference, printed exactly as it appears on the wire (`"String!"`,
/// `"[User!]!"`, `"Int"`). Two field definitions conflict, per `spec.md` §4.2, unless their
/// printed type strings are identical — nullability and list wrapping included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef(pub String);

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentDefinition {
    pub name: String,
    pub ty: TypeRef,
}

/// A schema-level `directive @name(...) on LOCATION, ...` declaration, as distinct from a use of
/// that directive on a particular type or field (`spec.md` §4.2's "directives ... are unioned;
/// disagreements on definition bodies are conflicts" is about these declarations, not about
/// re-emitting every applied `@foo` a service's types happen to carry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveDefinition {
    pub name: String,
    pub locations: Vec<String>,
    pub arguments: Vec<ArgumentDefinition>,
}

impl DirectiveDefinition {
    /// A canonical rendering used both to compare two services' declarations for agreement and
    /// to report a conflict (`spec.md` §7's `SchemaConflict` detail).
    pub fn signature(&self) -> String {
        let args = self
            .arguments
            .iter()
            .map(|a| format!("{}: {}", a.name, a.ty))
            .collect::<Vec<_>>()
            .join(", ");
        let mut locations = self.locations.clone();
        locations.sort();
        format!("@{}({}) on {}", self.name, args, locations.join(" | "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub arguments: Vec<ArgumentDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectTypeDef {
    pub fields: IndexMap<String, FieldDefinition>,
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceTypeDef {
    pub fields: IndexMap<String, FieldDefinition>,
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnionTypeDef {
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumTypeDef {
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputObjectTypeDef {
    pub fields: IndexMap<String, FieldDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDefinition {
    Object(ObjectTypeDef),
    Interface(InterfaceTypeDef),
    Union(UnionTypeDef),
    Enum(EnumTypeDef),
    Scalar,
    InputObject(InputObjectTypeDef),
}

impl TypeDefinition {
    /// The field set of this type, for types that have one (object, interface, input object).
    /// `None` for unions, enums, and scalars.
    pub fn fields(&self) -> Option<&IndexMap<String, FieldDefinition>> {
        match self {
            TypeDefinition::Object(o) => Some(&o.fields),
            TypeDefinition::Interface(i) => Some(&i.fields),
            TypeDefinition::InputObject(i) => Some(&i.fields),
            TypeDefinition::Union(_) | TypeDefinition::Enum(_) | TypeDefinition::Scalar => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            TypeDefinition::Object(_) => "object",
            TypeDefinition::Interface(_) => "interface",
            TypeDefinition::Union(_) => "union",
            TypeDefinition::Enum(_) => "enum",
            TypeDefinition::Scalar => "scalar",
            TypeDefinition::InputObject(_) => "input object",
        }
    }
}

/// One service's schema, as reconstructed from its introspection response. Immutable after
/// startup (`spec.md` §3 Lifecycles).
#[derive(Debug, Clone)]
pub struct Schema {
    pub query_type: String,
    pub mutation_type: Option<String>,
    pub subscription_type: Option<String>,
    pub types: IndexMap<String, TypeDefinition>,
    pub directives: IndexMap<String, DirectiveDefinition>,
}

impl Schema {
    pub fn possible_types(&self, type_name: &str) -> Vec<String> {
        match self.types.get(type_name) {
            Some(TypeDefinition::Object(_)) | None => vec![type_name.to_string()],
            Some(TypeDefinition::Interface(_)) => self
                .types
                .iter()
                .filter_map(|(name, def)| match def {
                    TypeDefinition::Object(o) if o.interfaces.iter().any(|i| i == type_name) => {
                        Some(name.clone())
                    }
                    _ => None,
                })
                .collect(),
            Some(TypeDefinition::Union(u)) => u.members.clone(),
            _ => vec![type_name.to_string()],
        }
    }

    /// Prints this schema as SDL so `apollo_compiler` can parse and validate client operations
    /// against it. Directive declarations and applied directive usages are both omitted from the
    /// printed SDL: client operations never reference a directive by name in a way that requires
    /// it to be declared here, so printing them would only be for faithfulness, not correctness.
    pub fn to_sdl(&self) -> String {
        let mut out = String::new();
        out.push_str("schema {\n");
        out.push_str(&format!("  query: {}\n", self.query_type));
        if let Some(m) = &self.mutation_type {
            out.push_str(&format!("  mutation: {}\n", m));
        }
        if let Some(s) = &self.subscription_type {
            out.push_str(&format!("  subscription: {}\n", s));
        }
        out.push_str("}\n\n");

        for (name, def) in &self.types {
            match def {
                TypeDefinition::Object(o) => {
                    out.push_str(&format!("type {}", name));
                    write_implements(&mut out, &o.interfaces);
                    out.push_str(" {\n");
                    write_fields(&mut out, &o.fields);
                    out.push_str("}\n\n");
                }
                TypeDefinition::Interface(i) => {
                    out.push_str(&format!("interface {}", name));
                    write_implements(&mut out, &i.interfaces);
                    out.push_str(" {\n");
                    write_fields(&mut out, &i.fields);
                    out.push_str("}\n\n");
                }
                TypeDefinition::Union(u) => {
                    out.push_str(&format!("union {} = {}\n\n", name, u.members.join(" | ")));
                }
                TypeDefinition::Enum(e) => {
                    out.push_str(&format!("enum {} {{\n", name));
                    for v in &e.values {
                        out.push_str(&format!("  {}\n", v));
                    }
                    out.push_str("}\n\n");
                }
                TypeDefinition::Scalar => {
                    out.push_str(&format!("scalar {}\n\n", name));
                }
                TypeDefinition::InputObject(i) => {
                    out.push_str(&format!("input {} {{\n", name));
                    write_fields(&mut out, &i.fields);
                    out.push_str("}\n\n");
                }
            }
        }
        out
    }
}

fn write_implements(out: &mut String, interfaces: &[String]) {
    if !interfaces.is_empty() {
        out.push_str(&format!(" implements {}", interfaces.join(" & ")));
    }
}

fn write_fields(out: &mut String, fields: &IndexMap<String, FieldDefinition>) {
    for field in fields.values() {
        if field.arguments.is_empty() {
            out.push_str(&format!("  {}: {}\n", field.name, field.ty));
        } else {
            let args = field
                .arguments
                .iter()
                .map(|a| format!("{}: {}", a.name, a.ty))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("  {}({}): {}\n", field.name, args, field.ty));
        }
    }
}

/// One remote service's introspected schema. Input to the system; immutable after startup.
#[derive(Debug, Clone)]
pub struct RemoteSchema {
    pub url: String,
    pub schema: Schema,
}

/// Raised when two services disagree on the exact definition of a shared type or field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("conflicting definitions for {type_name}: {detail}")]
pub struct SchemaConflictDetail {
    pub type_name: String,
    pub detail: String,
}

/// Checks that a type definition freshly contributed by a service agrees with what's already
/// merged, returning the conflicting field (if any) for the caller to turn into a
/// `GatewayError::SchemaConflict`.
pub(crate) fn merge_type_into(
    merged: &mut TypeDefinition,
    incoming: &TypeDefinition,
    type_name: &str,
) -> Result<(), (String, String, String)> {
    match (merged, incoming) {
        (TypeDefinition::Object(m), TypeDefinition::Object(i)) => {
            merge_fields(&mut m.fields, &i.fields, type_name)?;
            for iface in &i.interfaces {
                if !m.interfaces.contains(iface) {
                    m.interfaces.push(iface.clone());
                }
            }
            Ok(())
        }
        (TypeDefinition::Interface(m), TypeDefinition::Interface(i)) => {
            merge_fields(&mut m.fields, &i.fields, type_name)?;
            Ok(())
        }
        (TypeDefinition::InputObject(m), TypeDefinition::InputObject(i)) => {
            merge_fields(&mut m.fields, &i.fields, type_name)?;
            Ok(())
        }
        (TypeDefinition::Union(m), TypeDefinition::Union(i)) => {
            for member in &i.members {
                if !m.members.contains(member) {
                    m.members.push(member.clone());
                }
            }
            Ok(())
        }
        (TypeDefinition::Enum(m), TypeDefinition::Enum(i)) => {
            for value in &i.values {
                if !m.values.contains(value) {
                    m.values.push(value.clone());
                }
            }
            Ok(())
        }
        (TypeDefinition::Scalar, TypeDefinition::Scalar) => Ok(()),
        (m, i) => Err((
            type_name.to_string(),
            m.kind_name().to_string(),
            i.kind_name().to_string(),
        )),
    }
}

/// Unions a freshly contributed directive definition into what's already merged. Two services
/// declaring the same directive name must agree on its signature (locations and argument types)
/// or merging fails (`spec.md` §4.2).
pub(crate) fn merge_directive_into(
    merged: &mut IndexMap<String, DirectiveDefinition>,
    incoming: &DirectiveDefinition,
) -> Result<(), (String, String, String)> {
    match merged.get(&incoming.name) {
        Some(existing) if existing.signature() != incoming.signature() => Err((
            incoming.name.clone(),
            existing.signature(),
            incoming.signature(),
        )),
        Some(_) => Ok(()),
        None => {
            merged.insert(incoming.name.clone(), incoming.clone());
            Ok(())
        }
    }
}

fn merge_fields(
    merged: &mut IndexMap<String, FieldDefinition>,
    incoming: &IndexMap<String, FieldDefinition>,
    type_name: &str,
) -> Result<(), (String, String, String)> {
    for (name, field) in incoming {
        match merged.get(name) {
            Some(existing) if existing.ty != field.ty => {
                return Err((
                    format!("{}.{}", type_name, name),
                    existing.ty.0.clone(),
                    field.ty.0.clone(),
                ));
            }
            Some(_) => {}
            None => {
                merged.insert(name.clone(), field.clone());
            }
        }
    }
    Ok(())
}
