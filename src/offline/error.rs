//! Error taxonomy of the offline core.
//!
//! DAOs and HTTP clients return `anyhow::Result` with context; these types are
//! what crosses the public seams (store initialization, the façade, the cache
//! worker handle). Per-operation and per-collection failures are never raised:
//! they are carried as data in the sync results.

use serde::Serialize;
use thiserror::Error;

pub type OfflineResult<T> = std::result::Result<T, OfflineError>;

#[derive(Debug, Error)]
pub enum OfflineError {
    /// The local database could not be opened or migrated. Callers degrade to
    /// online-only mode.
    #[error("local storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The action needs the remote collaborator and the monitor reports offline.
    #[error("network is offline")]
    Offline,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("cache worker error: {0}")]
    Worker(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// One queued operation the remote rejected (or could not be reached for)
/// during a drain. The operation stays queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSubmissionFailure {
    pub operation_id: String,
    pub collection: String,
    pub record_id: String,
    /// Retry count after this failure was recorded.
    pub retry_count: u32,
    pub message: String,
}

/// A collection whose snapshot could not be pulled. The previous cache for
/// that collection is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullFailure {
    pub collection: String,
    pub message: String,
}
