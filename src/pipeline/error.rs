//! Error taxonomy for the pipeline
//!
//! Four failure classes with distinct handling policies:
//! - `Transient`: retryable network-level failures, bounded retries
//! - `QuotaExceeded`: local quota rejection, skip the operation this cycle
//! - `DataUnavailable`: missing price/quote, skip the item (not the batch)
//! - `Persistence`: store failures; fatal at startup, logged+skipped in
//!   steady state

use thiserror::Error;

/// Pipeline-wide error type
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Retryable network failure (timeout, 5xx, connection reset)
    #[error("transient network error: {0}")]
    Transient(String),

    /// Daily quota reached; the request was rejected locally without a
    /// network call
    #[error("quota exceeded for provider {0}")]
    QuotaExceeded(String),

    /// A price or quote the pipeline needs is not available right now
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Store read/write failure
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl PipelineError {
    pub fn transient(msg: impl Into<String>) -> Self {
        PipelineError::Transient(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        PipelineError::DataUnavailable(msg.into())
    }

    /// True if a retry within the same cycle can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Transient(e.to_string())
    }
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
