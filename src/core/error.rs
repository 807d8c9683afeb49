//! Error types for broker operations.

use thiserror::Error;

/// Errors produced by the queue engine, the management plane and store backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QrmError {
    /// Malformed or unsatisfiable request; the caller must fix it and resubmit.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// No ledger entry exists for the token.
    #[error("token not found: {0}")]
    TokenNotFound(String),
    /// Backing store timed out or failed. Transient; callers may retry with backoff.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// A selected resource changed under the matcher. Indicates a locking bug.
    #[error("conflict during match: {0}")]
    ConflictDuringMatch(String),
    /// Management write targeted an allocated resource without forcing release.
    #[error("resource busy: {0}")]
    ResourceBusy(String),
    /// Management write targeted an unknown resource.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    /// A stored record could not be decoded or encoded.
    #[error("internal error: {0}")]
    Internal(String),
}

impl QrmError {
    /// Whether the caller is expected to retry the same call later.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<serde_json::Error> for QrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("record codec: {err}"))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
