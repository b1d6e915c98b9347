//! Type schema registry: the static, declarative description of every
//! supported metadata type.
//!
//! The registry is data, not behavior. It is consulted by every other
//! component - the planner reads dependency edges, the resolver reads
//! id/key field names, the retriever and deployer read field rules and
//! hook wiring - and never derives state from a run. It is immutable
//! after construction.
//!
//! The built-in type set for the target marketing platform lives in
//! [`builtin`]; tests construct small registries of their own.

pub mod builtin;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{MetasyncError, Result};
use crate::item::TypeName;

/// Similarity ceiling for "did you mean" suggestions on unknown type
/// names, as a percentage of the target name's length.
const SUGGESTION_THRESHOLD_PERCENT: usize = 50;

/// Per-field capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRule {
    /// Field may be sent on create
    pub creatable: bool,
    /// Field may be sent on update
    pub updatable: bool,
    /// Field is returned by retrieval and persisted locally
    pub retrievable: bool,
    /// Field participates in market-variable substitution
    pub templatable: bool,
    /// Field is excluded from the deploy diff (the API rewrites it, or
    /// rejects updates that echo its current value)
    pub skip_validation: bool,
}

impl Default for FieldRule {
    fn default() -> Self {
        Self {
            creatable: true,
            updatable: true,
            retrievable: true,
            templatable: false,
            skip_validation: false,
        }
    }
}

impl FieldRule {
    /// Rule for a read-only field the API assigns (ids, audit stamps).
    pub fn read_only() -> Self {
        Self {
            creatable: false,
            updatable: false,
            retrievable: true,
            templatable: false,
            skip_validation: true,
        }
    }

    /// Default rule with `templatable` set.
    pub fn templatable() -> Self {
        Self {
            templatable: true,
            ..Self::default()
        }
    }
}

/// How a type's list endpoint pages its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pagination {
    /// Single response, no paging
    None,
    /// REST-style page cursor
    Rest,
    /// Legacy SOAP continue-request token
    Soap,
}

/// Descriptor for types whose code payload is extracted to a sibling
/// file in the local store (scripts, queries, asset source).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeExtraction {
    /// Field holding the code payload
    pub field: String,
    /// File extension for the extracted sibling file (no dot)
    pub extension: String,
}

/// Static description of one supported metadata type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// Stable type identifier, e.g. `dataExtension`
    pub type_name: TypeName,
    /// Field holding the stable portable key. `None` means the key is
    /// fixed by the platform and the engine synthesizes one from
    /// `name_field`.
    pub key_field: Option<String>,
    /// Environment-specific identifier field, e.g. a numeric ObjectID
    pub id_field: String,
    /// Human-readable name field, used for cache warming and for key
    /// synthesis when `key_field` is absent
    pub name_field: String,
    /// Types that must exist before this type can be deployed
    #[serde(default)]
    pub dependencies: Vec<TypeName>,
    /// Declared break-edge allow-list: dependencies that are resolved
    /// best-effort and excluded from ordering (see the order planner)
    #[serde(default)]
    pub soft_dependencies: Vec<TypeName>,
    /// Whether a bare retrieve with no type selector includes this type
    pub retrieved_by_default: bool,
    /// Paging mode of the list endpoint
    pub pagination: Pagination,
    /// Field rules; fields absent from this map get [`FieldRule::default`]
    #[serde(default)]
    pub fields: BTreeMap<String, FieldRule>,
    /// Raw API field name to referenced type. The retriever normalizes
    /// these into `r__<type>_id` reference fields; the deployer restores
    /// the raw names before the remote write.
    #[serde(default)]
    pub references: BTreeMap<String, TypeName>,
    /// Code extraction descriptor, for types that carry one
    #[serde(default)]
    pub extract: Option<CodeExtraction>,
}

impl TypeDefinition {
    /// The minimal field list for cache-warming retrievals: id, key (when
    /// present), and name.
    pub fn cache_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.id_field.as_str(), self.name_field.as_str()];
        if let Some(key_field) = &self.key_field {
            if !fields.contains(&key_field.as_str()) {
                fields.insert(1, key_field);
            }
        }
        fields
    }

    /// Extract the stable key from a raw remote object, synthesizing one
    /// from the name field for fixed-key types.
    pub fn key_of(&self, obj: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
        match &self.key_field {
            Some(key_field) => obj.get(key_field).and_then(|v| v.as_str()).map(str::to_string),
            None => obj.get(&self.name_field).and_then(|v| v.as_str()).map(synthesize_key),
        }
    }

    /// Whether `other` is a hard dependency of this type.
    pub fn depends_on(&self, other: &TypeName) -> bool {
        self.dependencies.contains(other)
    }
}

/// Synthesize a portable key from a display name for fixed-key types.
fn synthesize_key(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// Immutable lookup table of [`TypeDefinition`]s.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: BTreeMap<TypeName, TypeDefinition>,
}

impl TypeRegistry {
    /// Build a registry from an explicit definition set. Intended for
    /// tests; production code uses [`TypeRegistry::builtin`].
    pub fn new(definitions: impl IntoIterator<Item = TypeDefinition>) -> Self {
        Self {
            types: definitions.into_iter().map(|d| (d.type_name.clone(), d)).collect(),
        }
    }

    /// The registry of built-in marketing-platform types.
    pub fn builtin() -> Self {
        Self::new(builtin::definitions())
    }

    /// Look up one type. Unknown names fail with
    /// [`MetasyncError::UnknownType`], carrying a nearest-match
    /// suggestion when one is close enough.
    pub fn get(&self, type_name: &TypeName) -> Result<&TypeDefinition> {
        self.types.get(type_name).ok_or_else(|| MetasyncError::UnknownType {
            type_name: type_name.to_string(),
            suggestion: self.closest_name(type_name.as_str()),
        })
    }

    /// Iterate all known definitions, ordered by type name.
    pub fn all(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }

    /// Types included in a bare retrieve with no selector.
    pub fn retrieved_by_default(&self) -> Vec<TypeName> {
        self.types
            .values()
            .filter(|d| d.retrieved_by_default)
            .map(|d| d.type_name.clone())
            .collect()
    }

    /// The rule for one field of one type. Fields absent from the schema
    /// get the default rule.
    pub fn field_rule(&self, type_name: &TypeName, field: &str) -> Result<FieldRule> {
        let def = self.get(type_name)?;
        Ok(def.fields.get(field).copied().unwrap_or_default())
    }

    fn closest_name(&self, wanted: &str) -> Option<String> {
        self.types
            .keys()
            .map(|t| (strsim::levenshtein(wanted, t.as_str()), t))
            .min_by_key(|(d, _)| *d)
            .filter(|(d, t)| *d * 100 <= t.as_str().len() * SUGGESTION_THRESHOLD_PERCENT)
            .map(|(_, t)| t.to_string())
    }
}
