//! Remote API client abstraction.
//!
//! The engine does not implement transport. It consumes a collaborator
//! implementing [`RemoteClient`]: four verbs (list, get, create, update)
//! plus cursor-based pagination, abstracting over the fact that some
//! types use a legacy RPC-style protocol and others a resource-oriented
//! HTTP protocol. Authentication, session management, and wire encoding
//! live entirely behind the trait.
//!
//! [`ApiError`] classifies remote failures the way the pipeline needs
//! them: transient errors are retried with bounded backoff, timeouts are
//! retried exactly once, validation errors are terminal and recorded
//! against the single item, and not-found is an expected outcome the
//! deploy diff turns into a create.

use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

use crate::item::TypeName;

/// A raw remote object, exactly as the API returned it.
pub type RemoteObject = Map<String, Value>;

/// Remote call failure, classified for retry handling.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// No object matched the requested id or key.
    #[error("remote object not found: {0}")]
    NotFound(String),

    /// Rate limiting or a transient network failure; retryable.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The call exceeded its deadline; retried exactly once.
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote API rejected the payload; terminal for the item.
    #[error("remote validation failed: {0}")]
    Validation(String),
}

impl ApiError {
    /// Whether the error may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Options for a list call.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Restrict to these keys; `None` lists everything.
    pub keys: Option<Vec<String>>,
    /// Restrict the response to these fields (cache-warming uses the
    /// minimal id/key/name set). `None` returns the full objects.
    pub fields: Option<Vec<String>>,
    /// Pagination cursor from a previous [`Page::next`].
    pub page: Option<String>,
}

impl ListOptions {
    /// Minimal-field options for cache warming.
    pub fn cache_fields(fields: Vec<String>) -> Self {
        Self {
            fields: Some(fields),
            ..Self::default()
        }
    }

    /// Continue from a pagination cursor.
    #[must_use]
    pub fn with_page(mut self, page: Option<String>) -> Self {
        self.page = page;
        self
    }
}

/// One page of a list response.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Objects on this page
    pub items: Vec<RemoteObject>,
    /// Cursor for the next page, `None` when exhausted
    pub next: Option<String>,
}

/// The transport collaborator the engine composes around.
///
/// Implementations are expected to be cheap to call concurrently; the
/// engine bounds its own parallelism. All methods take `&self`.
pub trait RemoteClient: Send + Sync {
    /// List objects of a type, one page at a time.
    fn list(
        &self,
        type_name: &TypeName,
        options: &ListOptions,
    ) -> impl Future<Output = Result<Page, ApiError>> + Send;

    /// Fetch a single object by its stable key.
    fn get(
        &self,
        type_name: &TypeName,
        key: &str,
    ) -> impl Future<Output = Result<RemoteObject, ApiError>> + Send;

    /// Create an object; the returned object carries the freshly
    /// assigned environment-specific id.
    fn create(
        &self,
        type_name: &TypeName,
        body: &Value,
    ) -> impl Future<Output = Result<RemoteObject, ApiError>> + Send;

    /// Update an existing object by key.
    fn update(
        &self,
        type_name: &TypeName,
        key: &str,
        body: &Value,
    ) -> impl Future<Output = Result<RemoteObject, ApiError>> + Send;
}

/// Drain every page of a list call into one vector.
pub async fn list_all<C: RemoteClient>(
    client: &C,
    type_name: &TypeName,
    options: &ListOptions,
) -> Result<Vec<RemoteObject>, ApiError> {
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = client.list(type_name, &options.clone().with_page(cursor)).await?;
        all.extend(page.items);
        match page.next {
            Some(next) => cursor = Some(next),
            None => return Ok(all),
        }
    }
}
