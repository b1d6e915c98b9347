//! Shared data models: type names, metadata items, and the per-run
//! multi-type map exchanged between the retriever, deployer, and store.
//!
//! A [`MetadataItem`] exists in two representations over its lifecycle:
//! the **remote form** (environment-bound, reference fields named
//! `r__<type>_id` holding opaque ids) and the **portable form**
//! (reference fields named `r__<type>_key` holding stable keys, suitable
//! for version control and cross-environment reuse). Items are never
//! mutated in place across pipeline phases; each phase derives a new
//! value from the previous one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::REFERENCE_FIELD_PREFIX;

/// Stable identifier of a metadata type, e.g. `dataExtension`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(String);

impl TypeName {
    /// The wire-format name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TypeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for TypeName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a reference field carries a portable key or an opaque id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// `r__<type>_key` - portable form
    Key,
    /// `r__<type>_id` - remote form
    Id,
}

/// Parse a field name against the reference-field naming convention.
///
/// Returns the target type and the kind of identifier the field holds,
/// or `None` for ordinary business fields.
pub fn parse_reference_field(name: &str) -> Option<(TypeName, RefKind)> {
    let rest = name.strip_prefix(REFERENCE_FIELD_PREFIX)?;
    if let Some(type_name) = rest.strip_suffix("_key") {
        (!type_name.is_empty()).then(|| (TypeName::from(type_name), RefKind::Key))
    } else if let Some(type_name) = rest.strip_suffix("_id") {
        (!type_name.is_empty()).then(|| (TypeName::from(type_name), RefKind::Id))
    } else {
        None
    }
}

/// Build a reference field name for the given target type and kind.
pub fn reference_field_name(type_name: &TypeName, kind: RefKind) -> String {
    let suffix = match kind {
        RefKind::Key => "key",
        RefKind::Id => "id",
    };
    format!("{REFERENCE_FIELD_PREFIX}{type_name}_{suffix}")
}

/// A non-fatal condition recorded against an item during a run.
///
/// Diagnostics never abort processing; they surface in the run report so
/// the operator can judge whether e.g. an unresolved cross-reference
/// matters for their use case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Field the condition was observed on, when field-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Human-readable description
    pub message: String,
}

/// A single instance of a metadata type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataItem {
    /// The item's type
    pub type_name: TypeName,
    /// Stable key; primary identity once retrieved
    pub key: String,
    /// Field name to value, the item's full business payload
    pub fields: Map<String, Value>,
    /// Non-fatal conditions recorded during the current run; not persisted
    #[serde(skip, default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl MetadataItem {
    /// Create an item from a field map.
    pub fn new(type_name: TypeName, key: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            type_name,
            key: key.into(),
            fields,
            diagnostics: Vec::new(),
        }
    }

    /// Look up one field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Derive a new item with one field replaced (or inserted).
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    /// Derive a new item with one field removed.
    #[must_use]
    pub fn without_field(mut self, field: &str) -> Self {
        self.fields.remove(field);
        self
    }

    /// Record a field-scoped diagnostic.
    pub fn push_diagnostic(&mut self, field: Option<&str>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            field: field.map(str::to_string),
            message: message.into(),
        });
    }

    /// The field map as a JSON object value, e.g. for persistence or as
    /// a remote request body.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Names of all fields matching the reference naming convention.
    pub fn reference_fields(&self) -> Vec<(String, TypeName, RefKind)> {
        self.fields
            .keys()
            .filter_map(|name| {
                parse_reference_field(name).map(|(t, k)| (name.clone(), t, k))
            })
            .collect()
    }
}

/// Mapping from type name to key to item; the unit of exchange between
/// the retriever/deployer and the file store. Owned exclusively by the
/// run that constructs it.
pub type MultiTypeMap = BTreeMap<TypeName, BTreeMap<String, MetadataItem>>;

/// Insert an item into a multi-type map under its own type and key.
pub fn insert_item(map: &mut MultiTypeMap, item: MetadataItem) {
    map.entry(item.type_name.clone()).or_default().insert(item.key.clone(), item);
}
