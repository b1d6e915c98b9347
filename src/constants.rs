//! Global constants used throughout the metasync codebase.
//!
//! This module contains timeout durations, retry parameters, and other
//! numeric constants that are used across multiple modules. Defining
//! them centrally improves maintainability and makes magic numbers
//! more discoverable.

use std::time::Duration;

/// Maximum number of item-level remote calls in flight for a single type.
///
/// The remote API documents a per-tenant concurrency ceiling; asking for
/// more parallelism than this downgrades to the ceiling rather than
/// failing the run.
pub const MAX_PARALLEL_ITEM_CALLS: usize = 8;

/// Effective per-type fan-out for a requested worker count.
///
/// Asking for more parallelism than the remote API's documented ceiling
/// downgrades to serial rather than failing the run; zero is treated as
/// serial too.
pub(crate) fn effective_concurrency(requested: usize) -> usize {
    if requested == 0 || requested > MAX_PARALLEL_ITEM_CALLS {
        1
    } else {
        requested
    }
}

/// Maximum number of attempts for a remote call that fails transiently.
///
/// The first attempt plus two retries. Timeouts are special-cased: a
/// timed-out call is retried exactly once before being classified
/// terminal.
pub const MAX_REMOTE_ATTEMPTS: usize = 3;

/// Starting delay for exponential backoff (10ms).
///
/// This is the initial delay used in exponential backoff calculations,
/// which doubles on each retry attempt.
pub const STARTING_BACKOFF_DELAY_MS: u64 = 10;

/// Maximum backoff delay for exponential backoff (500ms).
///
/// Exponential backoff delays are capped at this value to prevent
/// excessive wait times during retry operations.
pub const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// Timeout for a single remote API call (30 seconds).
pub const REMOTE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Field name prefix marking a cross-type reference field.
///
/// Portable items carry `r__<type>_key` fields; remote-form items carry
/// `r__<type>_id` fields. The reference resolver rewrites between the
/// two.
pub const REFERENCE_FIELD_PREFIX: &str = "r__";

/// Sentinel prefix used in place of an extracted code payload.
///
/// Types with extractable code store the payload in a sibling file; the
/// JSON field holds `file://<key>.<ext>` and the pre-deploy hook
/// re-merges the file content before the remote write.
pub const EXTRACT_SENTINEL_PREFIX: &str = "file://";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn over_ceiling_fan_out_downgrades_to_serial() {
        assert_eq!(effective_concurrency(MAX_PARALLEL_ITEM_CALLS + 1), 1);
        assert_eq!(effective_concurrency(0), 1);
        assert_eq!(effective_concurrency(1), 1);
        assert_eq!(effective_concurrency(MAX_PARALLEL_ITEM_CALLS), MAX_PARALLEL_ITEM_CALLS);
    }
}
