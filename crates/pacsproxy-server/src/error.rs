// SPDX-License-Identifier: Apache-2.0

use pacsproxy_model::{DicomJsonError, ValidationError};

/// Failure reported by a [`crate::RetrievalChannel`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed remote response: {0}")]
    Malformed(String),
    #[error("remote transport error: {0}")]
    Transport(String),
    #[error("remote retrieval status {code}: {detail}")]
    Status { code: i64, detail: String },
}

impl From<DicomJsonError> for RemoteError {
    fn from(value: DicomJsonError) -> Self {
        Self::Malformed(value.to_string())
    }
}

/// Outcome failure of a coordinated remote operation.
///
/// `Clone` so that a single outcome can be handed to every joined waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("retrieval timeout after {0} ms")]
    Timeout(u64),
    #[error("retrieval aborted before completion")]
    Aborted,
    #[error("concurrency limiter closed")]
    LimiterClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("content store io error at {path}: {message}")]
    Io { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid identifier: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
    #[error("payload not found after retrieval: {0}")]
    PayloadMissing(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RemoteError> for ServiceError {
    fn from(value: RemoteError) -> Self {
        Self::Retrieve(RetrieveError::Remote(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
