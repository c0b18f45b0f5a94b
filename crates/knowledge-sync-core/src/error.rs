//! Error taxonomy for the sync core.
//!
//! Dispatch failures are per-item data; ledger and source failures abort a
//! run.

use thiserror::Error;

/// Failure returned by a [`Destination`](crate::destination::Destination).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Network error, timeout, rate limit, or destination 5xx.
    #[error("transient dispatch failure: {0}")]
    Transient(String),
    /// Validation failure, destination 4xx, or malformed content.
    #[error("permanent dispatch failure: {0}")]
    Permanent(String),
}

impl DispatchError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DispatchError::Permanent(_))
    }
}

/// Persistence failure in a [`Ledger`](crate::ledger::Ledger).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger row is corrupt: {0}")]
    Corrupt(String),
}

/// Failure returned by a [`SourceConnector`](crate::source::SourceConnector).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("source temporarily unavailable: {0}")]
    Transient(String),
    #[error("source rejected the request: {0}")]
    Permanent(String),
}

/// Fatal error for a whole `run_sync` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("source '{source_name}' failed: {error}")]
    Source {
        source_name: String,
        #[source]
        error: SourceError,
    },
}
