//! Error types.
//!
//! [`Error`] covers construction-time failures: invalid profiles,
//! malformed backoff specs, bad retry options, HTTP client bootstrap.
//! Per-request failures never surface as errors; the delivery entry
//! points convert them into a `PushResult` instead. [`DispatchError`]
//! is the attempt-level failure the result mapper consumes.

use std::time::Duration;
use thiserror::Error;

/// Construction and validation failures.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid backoff spec {spec:?}: {reason}")]
    InvalidBackoffSpec { spec: String, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("invalid profile set: {0}")]
    InvalidProfileSet(String),

    #[error("invalid retry options: {0}")]
    InvalidRetryOptions(String),

    #[error("invalid endpoint group options: {0}")]
    InvalidEndpointGroup(String),

    #[error("failed to build HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    #[error("invalid service account key")]
    ServiceAccountKey(#[source] jsonwebtoken::errors::Error),
}

/// Attempt-level failure raised below the result mapper.
///
/// The variant decides the mapped `resultSource`: an unprocessed request
/// never reached the server and maps to `CLIENT`; everything else maps
/// to `PUSH_PROVIDER`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("request was not sent: {0}")]
    Unprocessed(String),

    #[error("no endpoint available")]
    NoEndpoint,

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("transport failure")]
    Transport(#[source] reqwest::Error),

    #[error("response aggregation failed")]
    Aggregation(#[source] reqwest::Error),
}

impl DispatchError {
    /// Classify a transport error, separating failures that provably
    /// happened before the request reached the server.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() {
            DispatchError::Unprocessed(err.to_string())
        } else if err.is_timeout() {
            DispatchError::Timeout(Duration::ZERO)
        } else {
            DispatchError::Transport(err)
        }
    }

    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Timeout(_))
    }

    pub(crate) fn is_unprocessed(&self) -> bool {
        matches!(self, DispatchError::Unprocessed(_) | DispatchError::NoEndpoint)
    }
}
