//! Per-type hook points: polymorphic behavior dispatched by type name.
//!
//! Each metadata type may customize three points of the pipeline:
//! `post_retrieve` (shape or drop an item after retrieval),
//! `pre_deploy` (shape the payload before the remote write), and
//! `post_deploy` (extra work after a successful write; the id/key cache
//! update itself is done unconditionally by the deployer). All three
//! default to no-ops.
//!
//! Dispatch is a strategy table keyed by type name rather than an
//! inheritance chain, so the schema data in the registry stays separate
//! from behavior.

use serde_json::Value;
use std::collections::HashMap;
use tracing::trace;

use crate::client::RemoteObject;
use crate::constants::EXTRACT_SENTINEL_PREFIX;
use crate::core::Result;
use crate::item::{MetadataItem, TypeName};
use crate::reference::ReferenceResolver;
use crate::registry::{TypeDefinition, TypeRegistry};
use crate::store::LocalStore;

/// Collaborators available to hook implementations.
pub struct HookContext<'a> {
    pub registry: &'a TypeRegistry,
    pub store: &'a dyn LocalStore,
    pub resolver: &'a ReferenceResolver<'a>,
}

/// Optional per-type behavior. Every method defaults to the identity.
pub trait TypeHooks: Send + Sync {
    /// Shape an item after retrieval. Returning `Ok(None)` drops the
    /// item (e.g. system-generated objects that must not be synced).
    fn post_retrieve(
        &self,
        _ctx: &HookContext<'_>,
        _def: &TypeDefinition,
        item: MetadataItem,
    ) -> Result<Option<MetadataItem>> {
        Ok(Some(item))
    }

    /// Shape the payload immediately before the remote write.
    fn pre_deploy(
        &self,
        _ctx: &HookContext<'_>,
        _def: &TypeDefinition,
        item: MetadataItem,
    ) -> Result<MetadataItem> {
        Ok(item)
    }

    /// Extra work after a successful create or update.
    fn post_deploy(
        &self,
        _ctx: &HookContext<'_>,
        _def: &TypeDefinition,
        _item: &MetadataItem,
        _remote: &RemoteObject,
    ) -> Result<()> {
        Ok(())
    }
}

struct NoopHooks;

impl TypeHooks for NoopHooks {}

static NOOP: NoopHooks = NoopHooks;

/// Strategy table mapping type names to their hooks.
pub struct HookRegistry {
    hooks: HashMap<TypeName, Box<dyn TypeHooks>>,
}

impl HookRegistry {
    /// An empty table; every type gets the no-op hooks.
    pub fn empty() -> Self {
        Self {
            hooks: HashMap::new(),
        }
    }

    /// The built-in wiring: code extraction for types declaring an
    /// extraction descriptor, system-folder filtering for folders.
    pub fn builtin(registry: &TypeRegistry) -> Self {
        let mut table = Self::empty();
        for def in registry.all() {
            if def.extract.is_some() {
                table.register(def.type_name.clone(), CodeExtractionHooks);
            }
        }
        table.register(TypeName::from("folder"), FolderHooks);
        table
    }

    /// Install hooks for one type, replacing any previous entry.
    pub fn register(&mut self, type_name: TypeName, hooks: impl TypeHooks + 'static) {
        self.hooks.insert(type_name, Box::new(hooks));
    }

    /// The hooks for a type; the no-op set when none are registered.
    pub fn get(&self, type_name: &TypeName) -> &dyn TypeHooks {
        self.hooks.get(type_name).map_or(&NOOP as &dyn TypeHooks, Box::as_ref)
    }
}

/// Hooks for types whose code payload lives in a sibling file locally.
///
/// On retrieve, the payload field is written to `<key>.<ext>` and the
/// JSON keeps a `file://<key>.<ext>` sentinel; on deploy, the sentinel
/// is replaced with the file's content again.
pub struct CodeExtractionHooks;

impl TypeHooks for CodeExtractionHooks {
    fn post_retrieve(
        &self,
        ctx: &HookContext<'_>,
        def: &TypeDefinition,
        item: MetadataItem,
    ) -> Result<Option<MetadataItem>> {
        let Some(extract) = &def.extract else {
            return Ok(Some(item));
        };
        let Some(code) = item.get(&extract.field).and_then(Value::as_str).map(str::to_string)
        else {
            return Ok(Some(item));
        };
        ctx.store.write_text(&item.type_name, &item.key, &extract.extension, &code)?;
        let sentinel = format!("{EXTRACT_SENTINEL_PREFIX}{}.{}", item.key, extract.extension);
        trace!(type_name = %item.type_name, key = %item.key, "extracted code payload");
        Ok(Some(item.with_field(extract.field.clone(), Value::String(sentinel))))
    }

    fn pre_deploy(
        &self,
        ctx: &HookContext<'_>,
        def: &TypeDefinition,
        item: MetadataItem,
    ) -> Result<MetadataItem> {
        let Some(extract) = &def.extract else {
            return Ok(item);
        };
        let is_sentinel = item
            .get(&extract.field)
            .and_then(Value::as_str)
            .is_some_and(|v| v.starts_with(EXTRACT_SENTINEL_PREFIX));
        if !is_sentinel {
            return Ok(item);
        }
        let code = ctx
            .store
            .read_text(&item.type_name, &item.key, &extract.extension)?
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!(
                        "extracted code file {}.{} is missing for {} '{}'",
                        item.key, extract.extension, item.type_name, item.key
                    ),
                )
            })?;
        Ok(item.with_field(extract.field.clone(), Value::String(code)))
    }
}

/// Folder-specific filtering: platform-managed system folders are
/// excluded from the local representation.
pub struct FolderHooks;

impl TypeHooks for FolderHooks {
    fn post_retrieve(
        &self,
        _ctx: &HookContext<'_>,
        _def: &TypeDefinition,
        item: MetadataItem,
    ) -> Result<Option<MetadataItem>> {
        let editable = item.get("IsEditable").and_then(Value::as_bool).unwrap_or(true);
        if !editable {
            trace!(key = %item.key, "dropping system folder");
            return Ok(None);
        }
        Ok(Some(item))
    }
}
