//! Outbox error types.

use common::DlqEntryId;
use storage::StorageError;
use thiserror::Error;

/// Errors that can occur in outbox operations.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// An error occurred in the storage layer.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The dead-letter entry does not exist.
    #[error("dead-letter entry not found: {0}")]
    DlqEntryNotFound(DlqEntryId),

    /// The dead-letter entry has already been replayed once.
    #[error("dead-letter entry {0} was already reprocessed")]
    AlreadyReprocessed(DlqEntryId),
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;
