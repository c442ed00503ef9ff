/// Error types for the interval pool
///
/// - `PoolError` is what `IntervalPool::get` returns: validation failures and
///   upstream failures, nothing else.
/// - `SourceError` is the taxonomy of the external fetch client. The pool never
///   interprets it beyond propagating it unchanged.
/// - `StoreError` covers persistence failures. These are logged and swallowed by
///   the pool and never reach `get` callers.
/// - `StateError` describes why a persisted snapshot was rejected on restore.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited by upstream (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Other(String),
}

impl SourceError {
    /// Whether a host-level retry policy may reasonably retry this error.
    /// The pool itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Network(_) | SourceError::RateLimited { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Upstream(#[from] SourceError),
}

impl PoolError {
    pub fn is_validation(&self) -> bool {
        matches!(self, PoolError::Validation(_))
    }

    /// The upstream error, if this failure came from the fetch client
    pub fn as_upstream(&self) -> Option<&SourceError> {
        match self {
            PoolError::Upstream(e) => Some(e),
            _ => None,
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Rejected pool state: {0}")]
    Rejected(#[from] StateError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Malformed pool state: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported pool state version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Pool state belongs to subject '{found}', expected '{expected}'")]
    SubjectMismatch { found: String, expected: String },

    #[error("Invalid timestamp in pool state: {0}")]
    InvalidTimestamp(String),
}
