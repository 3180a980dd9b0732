use std::time::Duration;

use thiserror::Error;

/// An error that happens when fetching data for a [`Query`](super::Query).
///
/// A single fetch can have many waiters, so this error is cheap to clone and every waiter
/// observes the same value. Errors are never written to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The requested resource does not exist.
    #[error("not found")]
    NotFound,
    /// The request was rejected due to missing permissions.
    ///
    /// The attached string contains the server's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The request did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The request failed due to another problem, like connection loss, DNS resolution, or a
    /// 5xx server response.
    #[error("request failed: {0}")]
    RequestFailed(String),
    /// The server answered, but reported the request as unsuccessful.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The response was received, but could not be understood.
    #[error("malformed: {0}")]
    Malformed(String),
    /// The filters could not be turned into a cache key.
    #[error("invalid filters: {0}")]
    InvalidFilters(String),
    /// An unexpected error, such as a panicking fetch function.
    #[error("internal error")]
    InternalError,
}

impl FetchError {
    /// A short, stable name for this kind of error, used as a metrics tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Timeout(_) => "timeout",
            Self::RequestFailed(_) => "request_failed",
            Self::Rejected(_) => "rejected",
            Self::Malformed(_) => "malformed",
            Self::InvalidFilters(_) => "invalid_filters",
            Self::InternalError => "internal",
        }
    }

    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
