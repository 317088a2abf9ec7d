use common::InvalidEnumValue;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored enumeration column held an unknown value.
    #[error("column decode error: {0}")]
    Decode(#[from] InvalidEnumValue),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
