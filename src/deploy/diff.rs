//! Field-level comparison between a local item and its remote twin, and
//! payload shaping for the eventual write.

use serde_json::{Map, Value};

use crate::client::RemoteObject;
use crate::constants::REFERENCE_FIELD_PREFIX;
use crate::item::MetadataItem;
use crate::registry::{FieldRule, TypeDefinition};

/// Whether the remote write is a create or an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

fn rule_for(def: &TypeDefinition, field: &str) -> FieldRule {
    def.fields.get(field).copied().unwrap_or_default()
}

/// Whether any updatable field of `local` differs from the remote state.
///
/// Fields marked `skip_validation` are excluded - the API silently
/// rewrites them, so comparing would cause spurious update churn.
/// Callers pass `local` in raw remote form (reference fields restored
/// to their raw API names), so a reference move counts like any other
/// change. Residual convention-named reference fields have no raw
/// mapping and therefore no remote counterpart to compare against;
/// those are excluded.
pub fn needs_update(def: &TypeDefinition, local: &MetadataItem, remote: &RemoteObject) -> bool {
    local.fields.iter().any(|(field, value)| {
        if field.starts_with(REFERENCE_FIELD_PREFIX) {
            return false;
        }
        let rule = rule_for(def, field);
        if rule.skip_validation || !rule.updatable {
            return false;
        }
        remote.get(field) != Some(value)
    })
}

/// Build the request body for a write, keeping only the fields the API
/// accepts in that mode. Residual unresolved reference fields are never
/// sent; the caller has already recorded diagnostics for them.
pub fn body_for(def: &TypeDefinition, item: &MetadataItem, mode: WriteMode) -> Value {
    let mut body = Map::new();
    for (field, value) in &item.fields {
        if field.starts_with(REFERENCE_FIELD_PREFIX) {
            continue;
        }
        let rule = rule_for(def, field);
        let allowed = match mode {
            WriteMode::Create => rule.creatable,
            WriteMode::Update => rule.updatable && !rule.skip_validation,
        };
        if allowed {
            body.insert(field.clone(), value.clone());
        }
    }
    Value::Object(body)
}
