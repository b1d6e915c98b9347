//! Per-item outcomes and run-level result aggregation.
//!
//! Every retrieve or deploy run produces a [`RunReport`]: a structured
//! summary of what happened to each item, grouped by type. The report is
//! the only channel through which partial failure is communicated - a run
//! always completes and reports, it never unwinds past the item boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::item::TypeName;

/// Terminal state of a single item within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// Item was fetched from the remote environment and persisted locally.
    Retrieved,
    /// Item was created or updated in the remote environment.
    Deployed,
    /// Diff against the remote state was a no-op; nothing was written.
    Skipped,
    /// A hard dependency could not be resolved, and remained unresolved
    /// after the dependency type completed its pass.
    Blocked,
    /// A terminal error was recorded for this item.
    Failed,
}

/// Pipeline phase in which an item reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Retrieve,
    Resolve,
    Diff,
    Deploy,
    Persist,
}

/// Outcome of one item, with enough context to act on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    /// Metadata type of the item
    pub type_name: TypeName,
    /// Stable key of the item
    pub key: String,
    /// Terminal state
    pub kind: OutcomeKind,
    /// Phase in which the terminal state was reached
    pub phase: Phase,
    /// Underlying error or diagnostic message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregated results for one type within a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeReport {
    /// Per-item outcomes, in completion order
    pub items: Vec<ItemResult>,
    /// Set when the type-level operation itself failed (e.g. the list
    /// endpoint errored); item results may be partial in that case.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl TypeReport {
    /// Count items with the given terminal state.
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.items.iter().filter(|i| i.kind == kind).count()
    }
}

/// Structured summary of a full retrieve or deploy run.
///
/// Owned by the run loop; concurrent item workers hand their outcomes
/// back to it rather than writing here directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run started
    pub started: DateTime<Utc>,
    /// When the run finished; set by [`RunReport::finish`]
    pub finished: Option<DateTime<Utc>>,
    /// Per-type results, keyed by type name
    pub types: BTreeMap<TypeName, TypeReport>,
}

impl RunReport {
    /// Start an empty report stamped with the current time.
    pub fn start() -> Self {
        Self {
            started: Utc::now(),
            finished: None,
            types: BTreeMap::new(),
        }
    }

    /// Append one item outcome.
    pub fn record(&mut self, result: ItemResult) {
        self.types.entry(result.type_name.clone()).or_default().items.push(result);
    }

    /// Mark a whole type as aborted (e.g. its list endpoint failed).
    pub fn record_type_abort(&mut self, type_name: &TypeName, message: impl Into<String>) {
        self.types.entry(type_name.clone()).or_default().aborted = Some(message.into());
    }

    /// Stamp the finish time.
    pub fn finish(&mut self) {
        self.finished = Some(Utc::now());
    }

    /// A run succeeds only when no item is failed or blocked and no type
    /// aborted. Skipped no-ops do not count against success.
    pub fn is_success(&self) -> bool {
        self.types.values().all(|t| {
            t.aborted.is_none()
                && t.items
                    .iter()
                    .all(|i| !matches!(i.kind, OutcomeKind::Failed | OutcomeKind::Blocked))
        })
    }

    /// Total number of items with the given terminal state across all types.
    pub fn total(&self, kind: OutcomeKind) -> usize {
        self.types.values().map(|t| t.count(kind)).sum()
    }

    /// All item results for one type, empty if the type never ran.
    pub fn items_for(&self, type_name: &TypeName) -> &[ItemResult] {
        self.types.get(type_name).map_or(&[], |t| t.items.as_slice())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (type_name, report) in &self.types {
            write!(
                f,
                "{type_name}: {} retrieved, {} deployed, {} skipped, {} blocked, {} failed",
                report.count(OutcomeKind::Retrieved),
                report.count(OutcomeKind::Deployed),
                report.count(OutcomeKind::Skipped),
                report.count(OutcomeKind::Blocked),
                report.count(OutcomeKind::Failed),
            )?;
            if let Some(reason) = &report.aborted {
                write!(f, " (type aborted: {reason})")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
