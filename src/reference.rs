//! Reference resolution: bidirectional translation between
//! environment-specific ids and portable keys.
//!
//! A [`ReferenceResolver`] is owned by and scoped to a single retrieve or
//! deploy run, threaded explicitly through the pipeline - there is no
//! process-global cache, so concurrent runs (and tests) never observe
//! each other's state. Caches are populated lazily per type from
//! minimal-field list calls and never persisted: ids are
//! environment-specific and can change between runs.
//!
//! A cache miss is not automatically fatal. `resolve_item_references`
//! leaves the field untouched and records a diagnostic on the item;
//! callers decide whether the unresolved reference blocks that item
//! (deploy of a hard dependency) or is merely logged (retrieval of an
//! orphaned reference).

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::client::{ListOptions, RemoteClient, list_all};
use crate::core::{MetasyncError, Result};
use crate::item::{MetadataItem, RefKind, TypeName, reference_field_name};
use crate::registry::{TypeDefinition, TypeRegistry};

/// Which representation a reference rewrite targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Rewrite `r__<type>_id` fields to `r__<type>_key` (persisting locally).
    ToPortable,
    /// Rewrite `r__<type>_key` fields to `r__<type>_id` (writing to remote).
    ToRemote,
}

#[derive(Debug, Default)]
struct TypeCache {
    id_to_key: HashMap<String, String>,
    key_to_id: HashMap<String, String>,
}

/// Per-run id/key translation cache.
pub struct ReferenceResolver<'a> {
    registry: &'a TypeRegistry,
    caches: DashMap<TypeName, TypeCache>,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            caches: DashMap::new(),
        }
    }

    /// Warm the cache for every type in `types` not already cached this
    /// run. Idempotent per run; issues one minimal-field list call per
    /// cold type. A type whose list call fails stays cold and is
    /// reported, not raised - its references degrade to diagnostics.
    pub async fn warm<C: RemoteClient>(&self, client: &C, types: &[TypeName]) -> Result<()> {
        for type_name in types {
            if self.caches.contains_key(type_name) {
                continue;
            }
            let def = self.registry.get(type_name)?;
            let fields = def.cache_fields().iter().map(|f| (*f).to_string()).collect();
            let objects =
                match list_all(client, type_name, &ListOptions::cache_fields(fields)).await {
                    Ok(objects) => objects,
                    Err(e) => {
                        warn!(%type_name, error = %e, "cache warm failed; references to this type will not resolve");
                        continue;
                    }
                };

            let mut cache = TypeCache::default();
            for obj in objects {
                let Some(id) = obj.get(&def.id_field).and_then(id_string) else {
                    continue;
                };
                let Some(key) = def.key_of(&obj) else {
                    continue;
                };
                cache.id_to_key.insert(id.clone(), key.clone());
                cache.key_to_id.insert(key, id);
            }
            debug!(%type_name, entries = cache.id_to_key.len(), "reference cache warmed");
            self.caches.insert(type_name.clone(), cache);
        }
        Ok(())
    }

    /// Whether the cache for a type has been populated this run.
    pub fn is_warm(&self, type_name: &TypeName) -> bool {
        self.caches.contains_key(type_name)
    }

    /// Translate an environment-specific id to a portable key.
    pub fn id_to_key(&self, type_name: &TypeName, id: &str) -> Result<String> {
        self.caches
            .get(type_name)
            .and_then(|c| c.id_to_key.get(id).cloned())
            .ok_or_else(|| MetasyncError::ReferenceNotFound {
                type_name: type_name.clone(),
                lookup: id.to_string(),
            })
    }

    /// Translate a portable key to the environment-specific id.
    pub fn key_to_id(&self, type_name: &TypeName, key: &str) -> Result<String> {
        self.caches
            .get(type_name)
            .and_then(|c| c.key_to_id.get(key).cloned())
            .ok_or_else(|| MetasyncError::ReferenceNotFound {
                type_name: type_name.clone(),
                lookup: key.to_string(),
            })
    }

    /// Insert a freshly created id/key mapping, so dependent types later
    /// in the same run resolve against it immediately.
    pub fn record(&self, type_name: &TypeName, id: impl Into<String>, key: impl Into<String>) {
        let mut cache = self.caches.entry(type_name.clone()).or_default();
        let (id, key) = (id.into(), key.into());
        cache.id_to_key.insert(id.clone(), key.clone());
        cache.key_to_id.insert(key, id);
    }

    /// Rewrite every reference field of `item` in the given direction.
    ///
    /// Fields already in the target representation are left alone, so
    /// the rewrite is idempotent. Unresolvable references are left
    /// untouched and flagged on the item's diagnostic list.
    pub fn resolve_item_references(&self, item: MetadataItem, direction: Direction) -> MetadataItem {
        let mut out = item;
        for (field, target_type, kind) in out.reference_fields() {
            let rewrite = match (direction, kind) {
                (Direction::ToPortable, RefKind::Id) => RefKind::Key,
                (Direction::ToRemote, RefKind::Key) => RefKind::Id,
                // Already in the target representation.
                _ => continue,
            };
            let Some(raw) = out.get(&field).and_then(id_string) else {
                out.push_diagnostic(Some(&field), "reference value is not a scalar");
                continue;
            };
            let resolved = match rewrite {
                RefKind::Key => self.id_to_key(&target_type, &raw),
                RefKind::Id => self.key_to_id(&target_type, &raw),
            };
            match resolved {
                Ok(value) => {
                    out = out
                        .without_field(&field)
                        .with_field(reference_field_name(&target_type, rewrite), Value::String(value));
                }
                Err(e) => {
                    debug!(type_name = %out.type_name, key = %out.key, field, error = %e, "reference left unresolved");
                    out.push_diagnostic(Some(&field), e.to_string());
                }
            }
        }
        out
    }
}

/// The distinct set of types referenced by any of `types`, i.e. the
/// caches a run must warm before resolving their items.
///
/// Raw-field mappings alone are not enough: local items may carry
/// convention-named `r__<type>_key` fields toward any declared
/// dependency, so hard and soft dependencies are warmed too.
pub fn reference_targets(registry: &TypeRegistry, types: &[TypeName]) -> Result<Vec<TypeName>> {
    let mut targets = std::collections::BTreeSet::new();
    for type_name in types {
        let def = registry.get(type_name)?;
        targets.extend(def.references.values().cloned());
        targets.extend(def.dependencies.iter().cloned());
        targets.extend(def.soft_dependencies.iter().cloned());
    }
    Ok(targets.into_iter().collect())
}

/// Rename raw API reference fields (e.g. `CategoryID`) to the
/// convention-named `r__<type>_id` form, ahead of portable resolution.
pub fn normalize_raw_references(def: &TypeDefinition, item: MetadataItem) -> MetadataItem {
    let mut out = item;
    for (raw_field, target) in &def.references {
        if let Some(value) = out.get(raw_field).cloned() {
            out = out
                .without_field(raw_field)
                .with_field(reference_field_name(target, RefKind::Id), value);
        }
    }
    out
}

/// Restore raw API field names from `r__<type>_id` fields, ahead of the
/// remote write. Inverse of [`normalize_raw_references`].
pub fn restore_raw_references(def: &TypeDefinition, item: MetadataItem) -> MetadataItem {
    let mut out = item;
    for (raw_field, target) in &def.references {
        let conventional = reference_field_name(target, RefKind::Id);
        if let Some(value) = out.get(&conventional).cloned() {
            out = out.without_field(&conventional).with_field(raw_field.clone(), value);
        }
    }
    out
}

/// Render a scalar id value as a string; remote APIs use numbers and
/// strings interchangeably for ids.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn registry() -> TypeRegistry {
        TypeRegistry::builtin()
    }

    fn item_with(fields: &[(&str, Value)]) -> MetadataItem {
        let mut map = Map::new();
        for (k, v) in fields {
            map.insert((*k).to_string(), v.clone());
        }
        MetadataItem::new(TypeName::from("emailSendDefinition"), "welcome", map)
    }

    #[test]
    fn record_then_lookup_both_directions() {
        let registry = registry();
        let resolver = ReferenceResolver::new(&registry);
        let de = TypeName::from("dataExtension");
        resolver.record(&de, "abc-123", "DE1");
        assert_eq!(resolver.id_to_key(&de, "abc-123").unwrap(), "DE1");
        assert_eq!(resolver.key_to_id(&de, "DE1").unwrap(), "abc-123");
    }

    #[test]
    fn misses_are_not_found_errors() {
        let registry = registry();
        let resolver = ReferenceResolver::new(&registry);
        let err = resolver.id_to_key(&TypeName::from("folder"), "999").unwrap_err();
        assert!(matches!(err, MetasyncError::ReferenceNotFound { .. }));
    }

    #[test]
    fn to_portable_rewrites_id_fields() {
        let registry = registry();
        let resolver = ReferenceResolver::new(&registry);
        resolver.record(&TypeName::from("senderProfile"), "42", "default-sender");

        let item = item_with(&[("r__senderProfile_id", json!("42"))]);
        let resolved = resolver.resolve_item_references(item, Direction::ToPortable);
        assert_eq!(resolved.get("r__senderProfile_key").unwrap(), "default-sender");
        assert!(resolved.get("r__senderProfile_id").is_none());
        assert!(resolved.diagnostics.is_empty());
    }

    #[test]
    fn resolution_is_idempotent_on_portable_items() {
        let registry = registry();
        let resolver = ReferenceResolver::new(&registry);
        resolver.record(&TypeName::from("senderProfile"), "42", "default-sender");

        let item = item_with(&[("r__senderProfile_id", json!("42"))]);
        let once = resolver.resolve_item_references(item, Direction::ToPortable);
        let twice = resolver.resolve_item_references(once.clone(), Direction::ToPortable);
        assert_eq!(once, twice);
    }

    #[test]
    fn unresolvable_references_are_flagged_not_fatal() {
        let registry = registry();
        let resolver = ReferenceResolver::new(&registry);

        let item = item_with(&[("r__senderProfile_key", json!("missing"))]);
        let resolved = resolver.resolve_item_references(item, Direction::ToRemote);
        // Field untouched, diagnostic recorded.
        assert_eq!(resolved.get("r__senderProfile_key").unwrap(), "missing");
        assert_eq!(resolved.diagnostics.len(), 1);
        assert_eq!(resolved.diagnostics[0].field.as_deref(), Some("r__senderProfile_key"));
    }

    #[test]
    fn warm_targets_cover_declared_dependencies() {
        let registry = registry();
        let targets =
            reference_targets(&registry, &[TypeName::from("automation")]).unwrap();
        assert!(targets.contains(&TypeName::from("folder")));
        // Hard and soft dependencies are warmed even when the only
        // reference toward them is a convention-named key field.
        assert!(targets.contains(&TypeName::from("query")));
        assert!(targets.contains(&TypeName::from("triggeredSend")));
    }

    #[test]
    fn raw_reference_round_trip() {
        let registry = registry();
        let def = registry.get(&TypeName::from("dataExtension")).unwrap();
        let mut fields = Map::new();
        fields.insert("CategoryID".into(), json!(1234));
        fields.insert("Name".into(), json!("DE One"));
        let item = MetadataItem::new(TypeName::from("dataExtension"), "DE1", fields);

        let normalized = normalize_raw_references(def, item);
        assert_eq!(normalized.get("r__folder_id").unwrap(), &json!(1234));
        assert!(normalized.get("CategoryID").is_none());

        let restored = restore_raw_references(def, normalized);
        assert_eq!(restored.get("CategoryID").unwrap(), &json!(1234));
        assert!(restored.get("r__folder_id").is_none());
    }

    #[test]
    fn numeric_ids_resolve_like_strings() {
        let registry = registry();
        let resolver = ReferenceResolver::new(&registry);
        resolver.record(&TypeName::from("folder"), "1234", "shared_items");

        let mut fields = Map::new();
        fields.insert("r__folder_id".into(), json!(1234));
        let item = MetadataItem::new(TypeName::from("dataExtension"), "DE1", fields);
        let resolved = resolver.resolve_item_references(item, Direction::ToPortable);
        assert_eq!(resolved.get("r__folder_key").unwrap(), "shared_items");
    }
}
