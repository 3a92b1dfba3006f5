//! Error taxonomy shared by the whole core.
//!
//! Every externally induced failure is mapped onto one of these kinds so that
//! callers can make a retry/abort decision without inspecting provider error
//! strings. Sync loops absorb the retryable kinds and surface the rest.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error kinds.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Token refresh terminally failed or credentials are invalid.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The upstream API rejected the call due to throttling.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network timeout, 5xx, broker hiccup. Safe to retry with backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// An external id disappeared between list and get.
    #[error("not found: {0}")]
    NotFound(String),

    /// A concurrent writer changed the node under us.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The source revoked access to a subresource.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Schema validation failed on a graph write. Fatal for the batch.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// The broker stayed unavailable after retries.
    #[error("messaging failure: {0}")]
    Messaging(String),

    /// Blob upload/download failed; blocks publication.
    #[error("blob storage failure: {0}")]
    Blob(String),

    /// Compression or decompression of a blob payload failed.
    #[error("compression failure: {0}")]
    Compression(String),

    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Encoding/decoding of a wire or storage payload failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Caller handed us something unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unrecoverable internal invariant breach.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn auth(msg: impl Into<String>) -> Self {
        Error::Auth(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Error::RateLimited(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Error::Transient(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Error::PermissionDenied(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Error::IntegrityViolation(msg.into())
    }

    pub fn messaging(msg: impl Into<String>) -> Self {
        Error::Messaging(msg.into())
    }

    pub fn blob(msg: impl Into<String>) -> Self {
        Error::Blob(msg.into())
    }

    pub fn compression(msg: impl Into<String>) -> Self {
        Error::Compression(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Error::Serialization(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Error::Fatal(msg.into())
    }

    /// Whether a retry with backoff can reasonably succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited(_) | Error::Transient(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Error::Transient(err.to_string())
        } else {
            Error::Blob(err.to_string())
        }
    }
}

/// Map an HTTP status from an external service onto the taxonomy.
pub fn error_for_status(status: reqwest::StatusCode, context: &str) -> Error {
    match status.as_u16() {
        401 => Error::Auth(format!("{context}: unauthorized")),
        403 => Error::PermissionDenied(format!("{context}: forbidden")),
        404 => Error::NotFound(format!("{context}: not found")),
        409 => Error::Conflict(format!("{context}: conflict")),
        429 => Error::RateLimited(format!("{context}: too many requests")),
        500..=599 => Error::Transient(format!("{context}: upstream {status}")),
        _ => Error::Blob(format!("{context}: unexpected status {status}")),
    }
}
