use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A primary-key or unique constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A foreign-key constraint rejected the write.
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
