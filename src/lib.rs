//! metasync - Metadata Synchronization Engine
//!
//! Synchronizes structured configuration ("metadata") for a multi-tenant
//! marketing platform between a remote API and a local file-based
//! representation, and between tenant environments (dev/stage/prod).
//! The engine guarantees dependency-safe ordering across dozens of
//! cross-referencing object types, translates between environment-bound
//! ids and portable keys, and survives partial failure across thousands
//! of individual API calls without corrupting local state.
//!
//! # Architecture Overview
//!
//! The pipeline is built from a handful of components, leaf-first:
//!
//! - [`registry`] - declarative schema for every supported type: key and
//!   id fields, per-field capability flags, hard and soft dependency
//!   edges, code-extraction descriptors. Pure data, immutable after
//!   construction.
//! - [`graph`] - the order planner: topological ordering over the
//!   declared dependencies with deterministic tie-breaking, cycle
//!   reporting, and a declared soft-edge allow-list instead of ad hoc
//!   cycle special cases.
//! - [`reference`] - per-run id/key resolver, warmed lazily from
//!   minimal-field list calls; unresolvable references degrade to item
//!   diagnostics instead of aborting.
//! - [`retrieve`] - pulls remote objects in dependency order, applies
//!   per-type post-retrieve hooks, rewrites references to portable form,
//!   and persists one file per item.
//! - [`templating`] - market substitution: generalize a concrete item
//!   into a `{{placeholder}}` template and instantiate templates for a
//!   target market, hard-stopping on unresolved placeholders.
//! - [`deploy`] - diffs local items against the remote state, decides
//!   create vs update, shapes payloads through pre-deploy hooks, writes
//!   with bounded retry, and feeds fresh ids back into the resolver so
//!   dependent types resolve within the same run.
//!
//! Transport and storage are collaborators behind traits: the remote
//! API (SOAP and REST alike) is consumed through
//! [`client::RemoteClient`], the portable on-disk layout through
//! [`store::LocalStore`].
//!
//! # Failure Model
//!
//! Setup errors (unknown type names, cyclic hard dependencies) abort a
//! run before any remote mutation. Per-item errors are caught at the
//! item boundary, recorded in the [`core::RunReport`] with type, key,
//! and phase context, and never interrupt sibling items. Runs always
//! complete and report; completed work is never rolled back.
//!
//! # Example
//!
//! ```rust,no_run
//! use metasync::core::CancelToken;
//! use metasync::deploy::Deployer;
//! use metasync::hooks::HookRegistry;
//! use metasync::reference::ReferenceResolver;
//! use metasync::registry::TypeRegistry;
//! use metasync::selector::Selector;
//! use metasync::store::FsStore;
//!
//! # async fn run(client: impl metasync::client::RemoteClient) -> anyhow::Result<()> {
//! let registry = TypeRegistry::builtin();
//! let hooks = HookRegistry::builtin(&registry);
//! let store = FsStore::new("./retrieved");
//! let resolver = ReferenceResolver::new(&registry);
//! let selector = Selector::default_types(&registry);
//!
//! let deployer = Deployer::new(&registry, &hooks);
//! let (_deployed, report) = deployer
//!     .deploy(&client, &store, &resolver, &selector, &CancelToken::new())
//!     .await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod constants;
pub mod core;
pub mod deploy;
pub mod graph;
pub mod hooks;
pub mod item;
pub mod path;
pub mod reference;
pub mod registry;
pub mod retrieve;
pub mod selector;
pub mod store;
pub mod templating;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use self::core::{MetasyncError, Result};
