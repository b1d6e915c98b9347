//! Core types and functionality for metasync
//!
//! This module forms the foundation of the crate's type system:
//!
//! - [`error`] - the [`MetasyncError`] enum, the [`ErrorContext`] wrapper
//!   with user-facing suggestions, and automatic conversions from common
//!   standard library errors.
//! - [`outcome`] - per-item terminal states ([`OutcomeKind`]) and the
//!   [`RunReport`] aggregation every retrieve/deploy run produces.
//!
//! # Design Principles
//!
//! Every operation that can fail returns a [`Result`] with meaningful
//! error information. Setup errors (unknown type, cyclic graph) abort the
//! entire operation before any remote mutation occurs; per-item errors
//! are caught at the item boundary and recorded in the run report, never
//! interrupting sibling processing.

pub mod error;
pub mod outcome;

pub use error::{ErrorContext, MetasyncError, Result, user_friendly_error};
pub use outcome::{ItemResult, OutcomeKind, Phase, RunReport, TypeReport};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Run-level cancellation signal.
///
/// Cancelling stops the issuing of *new* item-level remote calls
/// immediately; in-flight calls complete and record their outcome, so
/// state never ends up partially-written without a recorded result.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
