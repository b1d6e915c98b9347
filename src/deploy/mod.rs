//! Deployment pipeline: local portable items to the remote environment.
//!
//! Types deploy strictly in dependency order; within a type, item writes
//! fan out concurrently up to the configured ceiling. Each item walks a
//! small state machine: load, resolve outbound references, diff against
//! the remote state, pre-deploy hook, write (with bounded retry for
//! transient failures), post-deploy bookkeeping. Terminal states per
//! item are `deployed`, `skipped` (no-op diff), `blocked` (unresolved
//! hard dependency), and `failed` (terminal error).
//!
//! An item whose hard dependency resolves against a type scheduled later
//! in the same run is parked and retried once that type completes; if it
//! still does not resolve it fails permanently for the run. Soft
//! (declared break-edge) references are best-effort: when they cannot be
//! resolved even on the deferred pass, the field is dropped from the
//! payload with a diagnostic instead of failing the item.
//!
//! Completed work is never rolled back. Partial success is reported
//! explicitly in the returned [`RunReport`].

pub mod diff;

use futures::StreamExt;
use futures::stream;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};

use crate::client::{ApiError, RemoteClient, RemoteObject};
use crate::constants::{
    MAX_BACKOFF_DELAY_MS, MAX_PARALLEL_ITEM_CALLS, MAX_REMOTE_ATTEMPTS, REMOTE_CALL_TIMEOUT,
    STARTING_BACKOFF_DELAY_MS, effective_concurrency,
};
use crate::core::{CancelToken, ItemResult, OutcomeKind, Phase, Result, RunReport};
use crate::graph::OrderPlanner;
use crate::hooks::{HookContext, HookRegistry};
use crate::item::{MetadataItem, MultiTypeMap, RefKind, TypeName, insert_item};
use crate::reference::{Direction, ReferenceResolver, restore_raw_references};
use crate::registry::{TypeDefinition, TypeRegistry};
use crate::selector::Selector;
use crate::store::LocalStore;
use diff::{WriteMode, body_for, needs_update};

/// Pushes local portable items to the remote environment.
pub struct Deployer<'a> {
    registry: &'a TypeRegistry,
    hooks: &'a HookRegistry,
    concurrency: usize,
}

/// What to do with an item after outbound resolution.
enum Disposition {
    /// All hard references resolved; deploy now.
    Ready(MetadataItem),
    /// Waiting for a type later in the run order; retry after it completes.
    Park(TypeName, MetadataItem),
    /// Hard dependency unresolvable in this run.
    Block(MetadataItem, Vec<String>),
}

impl<'a> Deployer<'a> {
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

    /// Deploy every selected item in dependency-safe order; returns the
    /// successfully deployed items and the full run report.
    pub async fn deploy<C: RemoteClient>(
        &self,
        client: &C,
        store: &dyn LocalStore,
        resolver: &ReferenceResolver<'a>,
        selector: &Selector,
        cancel: &CancelToken,
    ) -> Result<(MultiTypeMap, RunReport)> {
        selector.validate(self.registry)?;
        let plan = OrderPlanner::new(self.registry).plan(&selector.type_names())?;
        info!(types = plan.order.len(), deferred_edges = plan.deferred.len(), "deploy order planned");

        let targets = crate::reference::reference_targets(self.registry, &plan.order)?;
        resolver.warm(client, &targets).await?;

        let mut report = RunReport::start();
        let mut result = MultiTypeMap::new();
        // Items waiting on a type later in the order, keyed by that type.
        let mut parked: BTreeMap<TypeName, Vec<MetadataItem>> = BTreeMap::new();

        for (position, type_name) in plan.order.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("cancellation requested; no further types deployed");
                break;
            }
            let def = self.registry.get(type_name)?;
            let items = self.load_local(store, def, selector, &mut report);
            let remaining = &plan.order[position + 1..];
            self.deploy_batch(
                client, store, resolver, items, remaining, false, &mut parked, &mut report,
                &mut result, cancel,
            )
            .await?;

            // Deferred pass: items that were waiting for this type.
            if let Some(waiting) = parked.remove(type_name) {
                debug!(%type_name, count = waiting.len(), "retrying items parked on this type");
                self.deploy_batch(
                    client, store, resolver, waiting, remaining, true, &mut parked, &mut report,
                    &mut result, cancel,
                )
                .await?;
            }
        }

        // Whatever is still parked waited on a type that never completed.
        for (awaited, items) in parked {
            for item in items {
                report.record(ItemResult {
                    type_name: item.type_name.clone(),
                    key: item.key,
                    kind: OutcomeKind::Blocked,
                    phase: Phase::Resolve,
                    message: Some(format!("dependency type '{awaited}' never completed")),
                });
            }
        }

        report.finish();
        info!(%report, success = report.is_success(), "deploy run finished");
        Ok((result, report))
    }

    fn load_local(
        &self,
        store: &dyn LocalStore,
        def: &TypeDefinition,
        selector: &Selector,
        report: &mut RunReport,
    ) -> Vec<MetadataItem> {
        match selector.keys_for(&def.type_name) {
            Some(keys) => {
                let mut items = Vec::new();
                for key in keys {
                    match store.read(&def.type_name, key) {
                        Ok(Some(item)) => items.push(item),
                        Ok(None) => report.record(ItemResult {
                            type_name: def.type_name.clone(),
                            key: key.clone(),
                            kind: OutcomeKind::Failed,
                            phase: Phase::Resolve,
                            message: Some("not found in local store".into()),
                        }),
                        Err(e) => report.record(ItemResult {
                            type_name: def.type_name.clone(),
                            key: key.clone(),
                            kind: OutcomeKind::Failed,
                            phase: Phase::Resolve,
                            message: Some(e.to_string()),
                        }),
                    }
                }
                items
            }
            None => match store.read_all(&def.type_name) {
                Ok(items) => items.into_values().collect(),
                Err(e) => {
                    warn!(type_name = %def.type_name, error = %e, "local store read failed");
                    report.record_type_abort(&def.type_name, e.to_string());
                    Vec::new()
                }
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn deploy_batch<C: RemoteClient>(
        &self,
        client: &C,
        store: &dyn LocalStore,
        resolver: &ReferenceResolver<'a>,
        items: Vec<MetadataItem>,
        remaining_order: &[TypeName],
        final_pass: bool,
        parked: &mut BTreeMap<TypeName, Vec<MetadataItem>>,
        report: &mut RunReport,
        result: &mut MultiTypeMap,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut ready = Vec::new();
        for item in items {
            let def = self.registry.get(&item.type_name)?;
            let resolved = resolver.resolve_item_references(item, Direction::ToRemote);
            match self.classify(def, resolved, remaining_order, final_pass) {
                Disposition::Ready(item) => ready.push(item),
                Disposition::Park(awaited, item) => {
                    debug!(type_name = %item.type_name, key = %item.key, %awaited, "parked until dependency type completes");
                    parked.entry(awaited).or_default().push(item);
                }
                Disposition::Block(item, unresolved) => {
                    let kind = if final_pass { OutcomeKind::Failed } else { OutcomeKind::Blocked };
                    report.record(ItemResult {
                        type_name: item.type_name.clone(),
                        key: item.key,
                        kind,
                        phase: Phase::Resolve,
                        message: Some(format!("unresolved hard reference(s): {}", unresolved.join(", "))),
                    });
                }
            }
        }

        let outcomes = stream::iter(ready)
            .map(|item| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let def = self.registry.get(&item.type_name).ok()?;
                let ctx = HookContext {
                    registry: self.registry,
                    store,
                    resolver,
                };
                Some(self.deploy_item(client, &ctx, resolver, def, item).await)
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        for outcome in outcomes.into_iter().flatten() {
            let (item_result, deployed) = outcome;
            report.record(item_result);
            if let Some(item) = deployed {
                insert_item(result, item);
            }
        }
        Ok(())
    }

    /// Decide what to do with a resolved item based on its remaining
    /// unresolved (`r__<type>_key`) reference fields.
    fn classify(
        &self,
        def: &TypeDefinition,
        mut item: MetadataItem,
        remaining_order: &[TypeName],
        final_pass: bool,
    ) -> Disposition {
        let mut hard_unresolved = Vec::new();
        let mut soft_fields = Vec::new();
        let mut latest_awaitable: Option<(usize, TypeName)> = None;

        for (field, target, kind) in item.reference_fields() {
            if kind != RefKind::Key {
                continue;
            }
            if !final_pass {
                if let Some(pos) = remaining_order.iter().position(|t| *t == target) {
                    // The target type deploys later this run; wait for it.
                    if latest_awaitable.as_ref().is_none_or(|(p, _)| pos > *p) {
                        latest_awaitable = Some((pos, target.clone()));
                    }
                    continue;
                }
            }
            if def.depends_on(&target) {
                hard_unresolved.push(field);
            } else {
                soft_fields.push(field);
            }
        }

        if let Some((_, awaited)) = latest_awaitable {
            return Disposition::Park(awaited, item);
        }
        if !hard_unresolved.is_empty() {
            return Disposition::Block(item, hard_unresolved);
        }
        for field in soft_fields {
            item.push_diagnostic(Some(&field), "soft reference unresolved; field not deployed");
            item = item.without_field(&field);
        }
        Disposition::Ready(item)
    }

    /// Run one item through diff, hooks, and the remote write.
    async fn deploy_item<C: RemoteClient>(
        &self,
        client: &C,
        ctx: &HookContext<'_>,
        resolver: &ReferenceResolver<'a>,
        def: &TypeDefinition,
        item: MetadataItem,
    ) -> (ItemResult, Option<MetadataItem>) {
        let type_name = item.type_name.clone();
        let key = item.key.clone();
        let fail = |phase: Phase, message: String| {
            (
                ItemResult {
                    type_name: type_name.clone(),
                    key: key.clone(),
                    kind: OutcomeKind::Failed,
                    phase,
                    message: Some(message),
                },
                None,
            )
        };

        // Restore raw reference field names first, so the diff compares
        // reference moves (e.g. a folder change) like any other field.
        let item = restore_raw_references(def, item);

        // Diff against the current remote state to pick create vs update.
        let mode = match with_remote_retry(|| client.get(&type_name, &key)).await {
            Ok(remote) => {
                if needs_update(def, &item, &remote) {
                    WriteMode::Update
                } else {
                    return (
                        ItemResult {
                            type_name,
                            key,
                            kind: OutcomeKind::Skipped,
                            phase: Phase::Diff,
                            message: None,
                        },
                        None,
                    );
                }
            }
            Err(ApiError::NotFound(_)) => WriteMode::Create,
            Err(e) => return fail(Phase::Diff, e.to_string()),
        };

        let shaped = match self.hooks.get(&type_name).pre_deploy(ctx, def, item.clone()) {
            Ok(shaped) => shaped,
            Err(e) => return fail(Phase::Deploy, e.to_string()),
        };
        let body = body_for(def, &shaped, mode);

        let written = match mode {
            WriteMode::Create => {
                with_remote_retry(|| client.create(&type_name, &body)).await
            }
            WriteMode::Update => {
                with_remote_retry(|| client.update(&type_name, &key, &body)).await
            }
        };
        let remote = match written {
            Ok(remote) => remote,
            Err(e) => return fail(Phase::Deploy, e.to_string()),
        };

        self.post_deploy(ctx, resolver, def, &shaped, &remote);

        (
            ItemResult {
                type_name,
                key,
                kind: OutcomeKind::Deployed,
                phase: Phase::Deploy,
                message: None,
            },
            Some(item),
        )
    }

    /// Record the fresh id/key mapping so dependent types in the same
    /// run resolve against it immediately, then run the type's hook.
    fn post_deploy(
        &self,
        ctx: &HookContext<'_>,
        resolver: &ReferenceResolver<'a>,
        def: &TypeDefinition,
        item: &MetadataItem,
        remote: &RemoteObject,
    ) {
        match remote.get(&def.id_field) {
            Some(serde_json::Value::String(id)) => {
                resolver.record(&def.type_name, id.clone(), item.key.clone());
            }
            Some(serde_json::Value::Number(id)) => {
                resolver.record(&def.type_name, id.to_string(), item.key.clone());
            }
            _ => debug!(type_name = %def.type_name, key = %item.key, "write response carries no id"),
        }
        if let Err(e) = self.hooks.get(&def.type_name).post_deploy(ctx, def, item, remote) {
            warn!(type_name = %def.type_name, key = %item.key, error = %e, "post-deploy hook failed");
        }
    }
}

/// Run a remote call under the per-call deadline and the engine's retry
/// policy: transient failures retry with capped exponential backoff up
/// to the attempt budget, a timeout is retried exactly once, everything
/// else is terminal.
async fn with_remote_retry<T, F, Fut>(mut call: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut timeout_retried = false;
    let strategy = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
        .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS))
        .take(MAX_REMOTE_ATTEMPTS - 1);
    let attempt = || {
        let fut = call();
        async move {
            match tokio::time::timeout(REMOTE_CALL_TIMEOUT, fut).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout(REMOTE_CALL_TIMEOUT)),
            }
        }
    };
    RetryIf::spawn(strategy, attempt, |e: &ApiError| match e {
        ApiError::Transient(_) => true,
        ApiError::Timeout(_) => !std::mem::replace(&mut timeout_retried, true),
        _ => false,
    })
    .await
}
