//! Retrieval pipeline: remote objects to the local portable form.
//!
//! Types are processed strictly in dependency order so the reference
//! cache is warm before dependents resolve against it. Within a type,
//! explicit-key retrievals fan out concurrently up to the configured
//! ceiling; full-type retrievals page through the list endpoint.
//!
//! Failure semantics: a single item's failure is caught, recorded with
//! type and key context, and excluded from the result set - it never
//! aborts sibling items or other types. A type-level failure (the list
//! endpoint itself erroring) aborts only that type; already-completed
//! types remain valid.

use futures::StreamExt;
use futures::stream;
use tracing::{debug, info, warn};

use crate::client::{ApiError, ListOptions, RemoteClient, RemoteObject, list_all};
use crate::constants::{MAX_PARALLEL_ITEM_CALLS, effective_concurrency};
use crate::core::{CancelToken, ItemResult, OutcomeKind, Phase, Result, RunReport};
use crate::graph::OrderPlanner;
use crate::hooks::{HookContext, HookRegistry};
use crate::item::{MetadataItem, MultiTypeMap, TypeName, insert_item};
use crate::reference::{Direction, ReferenceResolver, normalize_raw_references};
use crate::registry::{TypeDefinition, TypeRegistry};
use crate::selector::Selector;
use crate::store::LocalStore;

/// Result of fetching one remote object, before local processing.
enum Fetched {
    Object(RemoteObject),
    /// An explicitly requested key that the remote environment lacks.
    Missing(String),
    Error(String, ApiError),
}

/// Pulls remote objects and persists them in portable form.
pub struct Retriever<'a> {
    registry: &'a TypeRegistry,
    hooks: &'a HookRegistry,
    concurrency: usize,
}

impl<'a> Retriever<'a> {
    pub fn new(registry: &'a TypeRegistry, hooks: &'a HookRegistry) -> Self {
        Self {
            registry,
            hooks,
            concurrency: MAX_PARALLEL_ITEM_CALLS,
        }
    }

    /// Bound the per-type fan-out. Zero and values above the remote
    /// API's ceiling downgrade to serial.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = effective_concurrency(concurrency);
        self
    }

    /// Retrieve every selected type, in dependency order, and persist
    /// the items to `store` keyed by `(type, key)`.
    pub async fn retrieve_types<C: RemoteClient>(
        &self,
        client: &C,
        store: &dyn LocalStore,
        resolver: &ReferenceResolver<'a>,
        selector: &Selector,
        cancel: &CancelToken,
    ) -> Result<(MultiTypeMap, RunReport)> {
        selector.validate(self.registry)?;
        let plan = OrderPlanner::new(self.registry).plan(&selector.type_names())?;
        info!(types = plan.order.len(), "retrieval order planned");

        self.warm_reference_targets(client, resolver, &plan.order).await?;

        let mut report = RunReport::start();
        let mut result = MultiTypeMap::new();

        for type_name in &plan.order {
            if cancel.is_cancelled() {
                debug!("cancellation requested; no further types retrieved");
                break;
            }
            let def = self.registry.get(type_name)?;
            let objects = match self.fetch_objects(client, def, selector, cancel).await {
                Ok(objects) => objects,
                Err(e) => {
                    warn!(%type_name, error = %e, "type-level retrieval failed");
                    report.record_type_abort(type_name, e.to_string());
                    continue;
                }
            };

            let ctx = HookContext {
                registry: self.registry,
                store,
                resolver,
            };
            for fetched in objects {
                match fetched {
                    Fetched::Object(obj) => {
                        self.process_object(&ctx, store, resolver, def, obj, &mut report, &mut result);
                    }
                    Fetched::Missing(key) => {
                        report.record(ItemResult {
                            type_name: type_name.clone(),
                            key,
                            kind: OutcomeKind::Failed,
                            phase: Phase::Retrieve,
                            message: Some("not found in remote environment".into()),
                        });
                    }
                    Fetched::Error(key, e) => {
                        report.record(ItemResult {
                            type_name: type_name.clone(),
                            key,
                            kind: OutcomeKind::Failed,
                            phase: Phase::Retrieve,
                            message: Some(e.to_string()),
                        });
                    }
                }
            }
        }

        report.finish();
        Ok((result, report))
    }

    /// Minimal-field retrieval used exclusively for cache warming; never
    /// triggers per-item hooks.
    pub async fn retrieve_for_cache<C: RemoteClient>(
        &self,
        client: &C,
        type_name: &TypeName,
    ) -> Result<Vec<RemoteObject>> {
        let def = self.registry.get(type_name)?;
        let fields = def.cache_fields().iter().map(|f| (*f).to_string()).collect();
        let objects = list_all(client, type_name, &ListOptions::cache_fields(fields)).await?;
        Ok(objects)
    }

    async fn warm_reference_targets<C: RemoteClient>(
        &self,
        client: &C,
        resolver: &ReferenceResolver<'a>,
        order: &[TypeName],
    ) -> Result<()> {
        let targets = crate::reference::reference_targets(self.registry, order)?;
        resolver.warm(client, &targets).await
    }

    async fn fetch_objects<C: RemoteClient>(
        &self,
        client: &C,
        def: &TypeDefinition,
        selector: &Selector,
        cancel: &CancelToken,
    ) -> Result<Vec<Fetched>, ApiError> {
        match selector.keys_for(&def.type_name) {
            // Explicit keys fan out as individual gets, concurrently.
            Some(keys) => {
                let fetches = stream::iter(keys.iter().cloned())
                    .map(|key| async move {
                        if cancel.is_cancelled() {
                            return None;
                        }
                        Some(match client.get(&def.type_name, &key).await {
                            Ok(obj) => Fetched::Object(obj),
                            Err(ApiError::NotFound(_)) => Fetched::Missing(key),
                            Err(e) => Fetched::Error(key, e),
                        })
                    })
                    .buffer_unordered(self.concurrency)
                    .collect::<Vec<_>>()
                    .await;
                Ok(fetches.into_iter().flatten().collect())
            }
            None => {
                let objects = list_all(client, &def.type_name, &ListOptions::default()).await?;
                Ok(objects.into_iter().map(Fetched::Object).collect())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_object(
        &self,
        ctx: &HookContext<'_>,
        store: &dyn LocalStore,
        resolver: &ReferenceResolver<'a>,
        def: &TypeDefinition,
        obj: RemoteObject,
        report: &mut RunReport,
        result: &mut MultiTypeMap,
    ) {
        let Some(key) = def.key_of(&obj) else {
            report.record(ItemResult {
                type_name: def.type_name.clone(),
                key: def
                    .key_field
                    .as_deref()
                    .map_or_else(|| "<unnamed>".to_string(), |f| format!("<missing {f}>")),
                kind: OutcomeKind::Failed,
                phase: Phase::Retrieve,
                message: Some("remote object carries no usable key".into()),
            });
            return;
        };

        let item = MetadataItem::new(def.type_name.clone(), key.clone(), obj);
        let outcome = self.normalize_and_persist(ctx, store, resolver, def, item);
        match outcome {
            Ok(Some(item)) => {
                for diagnostic in &item.diagnostics {
                    warn!(
                        type_name = %def.type_name,
                        key = %item.key,
                        field = diagnostic.field.as_deref().unwrap_or("-"),
                        "{}",
                        diagnostic.message
                    );
                }
                report.record(ItemResult {
                    type_name: def.type_name.clone(),
                    key: item.key.clone(),
                    kind: OutcomeKind::Retrieved,
                    phase: Phase::Retrieve,
                    message: (!item.diagnostics.is_empty())
                        .then(|| format!("{} unresolved reference(s)", item.diagnostics.len())),
                });
                insert_item(result, item);
            }
            Ok(None) => {
                debug!(type_name = %def.type_name, key, "item dropped by post-retrieve hook");
            }
            Err(e) => {
                report.record(ItemResult {
                    type_name: def.type_name.clone(),
                    key,
                    kind: OutcomeKind::Failed,
                    phase: Phase::Persist,
                    message: Some(e.to_string()),
                });
            }
        }
    }

    fn normalize_and_persist(
        &self,
        ctx: &HookContext<'_>,
        store: &dyn LocalStore,
        resolver: &ReferenceResolver<'a>,
        def: &TypeDefinition,
        item: MetadataItem,
    ) -> Result<Option<MetadataItem>> {
        let item = normalize_raw_references(def, item);
        let Some(item) = self.hooks.get(&def.type_name).post_retrieve(ctx, def, item)? else {
            return Ok(None);
        };
        let item = resolver.resolve_item_references(item, Direction::ToPortable);
        store.write(&item)?;
        Ok(Some(item))
    }
}
