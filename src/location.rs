//! Field-location index: `(ParentType, FieldName) -> [ServiceUrl]`.
//!
//! See `spec.md` §4.1. Built in two passes by the merger (one pass per remote schema, then one
//! pass for the internal schema) and read-only for the lifetime of the gateway after that.

use crate::error::GatewayError;
use indexmap::IndexMap;

/// The pseudo-location of fields the gateway answers itself (introspection meta-fields, and any
/// fields contributed by the internal schema such as `node(id: ID!)`).
pub const INTERNAL_LOCATION: &str = "@internal";

/// Key type for the index. A plain `String` of the form `"ParentType.fieldName"` would also work,
/// but a struct key keeps `register`/`lookup` call sites from accidentally formatting it
/// differently in two places.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub parent_type: String,
    pub field: String,
}

impl FieldKey {
    pub fn new(parent_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            parent_type: parent_type.into(),
            field: field.into(),
        }
    }
}

/// Maps every `Type.field` in the merged schema to the ordered list of service URLs that can
/// resolve it. Order is insertion order and is significant: it is the default tie-break when the
/// planner must pick among several owning services (`spec.md` §4.3).
#[derive(Debug, Clone, Default)]
pub struct FieldLocationMap {
    locations: IndexMap<FieldKey, Vec<String>>,
}

impl FieldLocationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `url` to the locations for `(parent, field)`, unless it is already the last entry
    /// for that key. Registering the same URL twice non-consecutively is allowed and meaningful:
    /// it means the field is resolvable at that service from more than one composition pass.
    pub fn register(&mut self, parent: &str, field: &str, url: impl Into<String>) {
        let key = FieldKey::new(parent, field);
        let url = url.into();
        let entry = self.locations.entry(key).or_default();
        if entry.last() != Some(&url) {
            entry.push(url);
        }
    }

    /// Locations for `(parent, field)`, in priority order, or `UnknownField` if the field was
    /// never registered.
    pub fn lookup(&self, parent: &str, field: &str) -> Result<&[String], GatewayError> {
        self.locations
            .get(&FieldKey::new(parent, field))
            .map(Vec::as_slice)
            .ok_or_else(|| GatewayError::UnknownField {
                parent_type: parent.to_string(),
                field: field.to_string(),
            })
    }

    pub fn contains(&self, parent: &str, field: &str) -> bool {
        self.locations.contains_key(&FieldKey::new(parent, field))
    }

    /// Returns a new map whose entries are the per-key union of `self` and `other`, preferring
    /// `self`'s ordering for keys present in both.
    pub fn concat(&self, other: &FieldLocationMap) -> FieldLocationMap {
        let mut merged = self.clone();
        for (key, urls) in &other.locations {
            let entry = merged.locations.entry(key.clone()).or_default();
            for url in urls {
                if !entry.contains(url) {
                    entry.push(url.clone());
                }
            }
        }
        merged
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_dedupes_consecutive_same_url() {
        let mut map = FieldLocationMap::new();
        map.register("Query", "foo", "http://a");
        map.register("Query", "foo", "http://a");
        assert_eq!(map.lookup("Query", "foo").unwrap(), &["http://a"]);
    }

    #[test]
    fn register_keeps_repeated_url_if_not_consecutive() {
        let mut map = FieldLocationMap::new();
        map.register("Query", "foo", "http://a");
        map.register("Query", "foo", "http://b");
        map.register("Query", "foo", "http://a");
        assert_eq!(
            map.lookup("Query", "foo").unwrap(),
            &["http://a", "http://b", "http://a"]
        );
    }

    #[test]
    fn lookup_missing_is_unknown_field() {
        let map = FieldLocationMap::new();
        let err = map.lookup("Query", "foo").unwrap_err();
        assert!(matches!(err, GatewayError::UnknownField { .. }));
    }

    #[test]
    fn concat_unions_preserving_self_order_first() {
        let mut a = FieldLocationMap::new();
        a.register("Query", "foo", "http://a");
        let mut b = FieldLocationMap::new();
        b.register("Query", "foo", "http://b");
        b.register("Query", "bar", "http://c");
        let merged = a.concat(&b);
        assert_eq!(
            merged.lookup("Query", "foo").unwrap(),
            &["http://a", "http://b"]
        );
        assert_eq!(merged.lookup("Query", "bar").unwrap(), &["http://c"]);
    }
}
