//! Error handling for metasync
//!
//! The error system is built around two types, following the same split
//! used throughout the crate's public surface:
//! 1. [`MetasyncError`] - strongly-typed errors for precise handling in code
//! 2. [`ErrorContext`] - wrapper that adds user-friendly messages and
//!    actionable suggestions for operators reading a failed run
//!
//! # Error Categories
//!
//! - **Setup errors**: [`MetasyncError::UnknownType`],
//!   [`MetasyncError::Cycle`] - fatal, abort before any remote mutation.
//! - **Reference errors**: [`MetasyncError::ReferenceNotFound`] -
//!   recoverable, degrade to a flagged or blocked item.
//! - **Templating errors**: [`MetasyncError::MissingVariable`] - fatal for
//!   the single item being instantiated.
//! - **Remote API errors**: wrapped [`ApiError`], classified as transient
//!   (retried with bounded backoff) or terminal (recorded per item).
//!
//! Common standard library errors are converted automatically:
//! [`std::io::Error`] and [`serde_json::Error`] both map into
//! [`MetasyncError`] variants so `?` works at the store boundary.

use colored::Colorize;
use std::fmt;
use thiserror::Error;

use crate::client::ApiError;
use crate::item::TypeName;

/// Enumerated error types for all failure cases in metasync.
#[derive(Error, Debug)]
pub enum MetasyncError {
    /// A type name was requested that the schema registry does not know.
    ///
    /// Fatal: aborts the run before any work is issued. Carries a
    /// nearest-match suggestion when one is close enough to be useful.
    #[error("unknown metadata type: {type_name}")]
    UnknownType {
        /// The type name that failed lookup
        type_name: String,
        /// Closest known type name, if any is within the similarity threshold
        suggestion: Option<String>,
    },

    /// The dependency graph for the requested types contains a cycle that
    /// is not resolvable by the declared soft edges.
    ///
    /// Fatal: the caller must surface the cycle to the user rather than
    /// guessing an order.
    #[error("circular dependency between metadata types: {}", members.iter().map(std::string::ToString::to_string).collect::<Vec<_>>().join(" -> "))]
    Cycle {
        /// Every member of one offending cycle
        members: Vec<TypeName>,
    },

    /// A reference lookup (id to key, or key to id) missed the cache.
    ///
    /// Recoverable: callers decide whether the miss blocks the specific
    /// item or is merely logged.
    #[error("no {type_name} found for reference '{lookup}'")]
    ReferenceNotFound {
        /// Type the reference points at
        type_name: TypeName,
        /// The id or key that failed to resolve
        lookup: String,
    },

    /// Template instantiation left one or more `{{...}}` tokens unresolved.
    ///
    /// Fatal for the single item: deploying a literally-templated string
    /// would write garbage to the remote environment.
    #[error("unresolved template variable(s): {}", tokens.join(", "))]
    MissingVariable {
        /// Every placeholder that had no value in the variable set
        tokens: Vec<String>,
    },

    /// A field path expression could not be parsed.
    #[error("invalid field path '{expr}': {reason}")]
    InvalidFieldPath {
        /// The offending path expression
        expr: String,
        /// What was wrong with it
        reason: String,
    },

    /// A remote API call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Local store I/O failed.
    #[error("local store error: {0}")]
    Io(#[from] std::io::Error),

    /// An item on disk was not valid JSON.
    #[error("invalid item JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl MetasyncError {
    /// Whether this error aborts the whole run before any remote mutation.
    pub fn is_setup_error(&self) -> bool {
        matches!(self, Self::UnknownType { .. } | Self::Cycle { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = MetasyncError> = std::result::Result<T, E>;

/// User-friendly error wrapper with suggestions and details.
///
/// Wraps any error with an optional actionable suggestion and extra
/// details, rendered with color when displayed on a terminal.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: anyhow::Error,
    /// Actionable suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Wrap an error with no suggestion or details.
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            suggestion: None,
            details: None,
        }
    }

    /// Attach an actionable suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach extra details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{} {}", "error:".red().bold(), self.error);
        if let Some(details) = &self.details {
            eprintln!("  {} {}", "details:".yellow(), details);
        }
        if let Some(suggestion) = &self.suggestion {
            eprintln!("  {} {}", "suggestion:".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(details) = &self.details {
            write!(f, "\n  details: {details}")?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n  suggestion: {suggestion}")?;
        }
        Ok(())
    }
}

/// Convert any error into a user-friendly [`ErrorContext`] with
/// contextual suggestions for the well-known cases.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(e) = error.downcast_ref::<MetasyncError>() {
        match e {
            MetasyncError::UnknownType { suggestion, .. } => {
                let suggestion = suggestion.clone();
                let ctx = ErrorContext::new(error)
                    .with_details("the type schema registry has no entry under this name");
                return match suggestion {
                    Some(s) => ctx.with_suggestion(format!("did you mean '{s}'?")),
                    None => ctx.with_suggestion(
                        "compare against the type names in the schema registry",
                    ),
                };
            }
            MetasyncError::Cycle { .. } => {
                return ErrorContext::new(error).with_suggestion(
                    "declare one edge of the cycle as a soft dependency in the type schema, \
                     or deploy the involved types in separate runs",
                );
            }
            MetasyncError::MissingVariable { .. } => {
                return ErrorContext::new(error)
                    .with_suggestion("add the missing variable(s) to the market definition");
            }
            _ => {}
        }
    }
    ErrorContext::new(error)
}
