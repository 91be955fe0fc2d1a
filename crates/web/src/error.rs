//! Error types of the routing layer.
//!
//! [`WebError`] is the failure currency of dispatch: handlers return it,
//! contexts record it, failure handlers and the router-level exception
//! handler observe it. [`RouteError`] covers route construction mistakes
//! (bad patterns, conflicting criteria) and is surfaced eagerly from the
//! registration builders.

use std::error::Error;

use http::StatusCode;
use relay_core::protocol::ProtocolError;
use thiserror::Error;

/// A dispatch failure: a status code plus an optional underlying error.
///
/// Returning `Err(WebError)` from a handler is the expected way to signal
/// error conditions; the dispatch loop converts it into failure-mode
/// iteration, the same as an explicit `ctx.fail(...)` call.
#[derive(Debug, Error)]
pub enum WebError {
    /// A bare status code, e.g. `fail(403)`.
    #[error("http status {status}")]
    Status { status: StatusCode },

    /// A status code with a human-readable reason.
    #[error("{reason}")]
    Message { status: StatusCode, reason: String },

    /// An unexpected error from a handler or collaborator; reported as 500.
    #[error("internal error: {source}")]
    Internal {
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl WebError {
    pub fn status(status: StatusCode) -> Self {
        Self::Status { status }
    }

    pub fn message<S: ToString>(status: StatusCode, reason: S) -> Self {
        Self::Message { status, reason: reason.to_string() }
    }

    pub fn internal<E: Into<Box<dyn Error + Send + Sync>>>(source: E) -> Self {
        Self::Internal { source: source.into() }
    }

    /// The status code this failure maps to on the wire.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Status { status } | Self::Message { status, .. } => *status,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Box<dyn Error + Send + Sync>> for WebError {
    fn from(source: Box<dyn Error + Send + Sync>) -> Self {
        Self::Internal { source }
    }
}

/// Lets handlers use `?` on response operations.
impl From<ProtocolError> for WebError {
    fn from(source: ProtocolError) -> Self {
        Self::internal(source)
    }
}

/// Route construction errors, raised by the registration builders.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("invalid path parameter name '{name}'")]
    InvalidParamName { name: String },

    #[error("duplicate path parameter name '{name}'")]
    DuplicateParamName { name: String },

    #[error("route path must start with '/': '{path}'")]
    InvalidPath { path: String },

    #[error("route already has a {existing} pattern")]
    ConflictingPattern { existing: &'static str },

    #[error("invalid content type pattern '{pattern}'")]
    InvalidContentType { pattern: String },
}

impl RouteError {
    pub fn invalid_regex<S: ToString>(pattern: S, reason: S) -> Self {
        Self::InvalidRegex { pattern: pattern.to_string(), reason: reason.to_string() }
    }

    pub fn invalid_param_name<S: ToString>(name: S) -> Self {
        Self::InvalidParamName { name: name.to_string() }
    }

    pub fn duplicate_param_name<S: ToString>(name: S) -> Self {
        Self::DuplicateParamName { name: name.to_string() }
    }

    pub fn invalid_path<S: ToString>(path: S) -> Self {
        Self::InvalidPath { path: path.to_string() }
    }

    pub fn conflicting_pattern(existing: &'static str) -> Self {
        Self::ConflictingPattern { existing }
    }

    pub fn invalid_content_type<S: ToString>(pattern: S) -> Self {
        Self::InvalidContentType { pattern: pattern.to_string() }
    }
}
