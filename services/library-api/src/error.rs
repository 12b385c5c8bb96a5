use library_storage::StorageError;
use thiserror::Error;

use crate::entity::EntityKind;

/// Failure of a library operation, classified by kind.
#[derive(Error, Debug)]
pub enum LibraryError {
    /// The request could not be understood.
    #[error("{0}")]
    Malformed(String),

    #[error("{0}")]
    NotFound(String),

    /// The identifier is already taken.
    #[error("{0}")]
    Conflict(String),

    /// An association names a record that does not exist or was deleted.
    #[error("{0}")]
    DanglingReference(String),

    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl LibraryError {
    pub fn not_found(kind: EntityKind, id: i64) -> Self {
        LibraryError::NotFound(format!("{} {} not found", kind, id))
    }

    pub fn conflict(kind: EntityKind, id: i64) -> Self {
        LibraryError::Conflict(format!("{} {} already exists", kind, id))
    }

    pub fn dangling(kind: EntityKind, id: i64) -> Self {
        LibraryError::DanglingReference(format!("{} {} does not exist", kind, id))
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(msg) => LibraryError::Conflict(msg),
            StorageError::ForeignKeyViolation(msg) => LibraryError::DanglingReference(msg),
            StorageError::NotFound(msg) => LibraryError::NotFound(msg),
            other => LibraryError::StoreFailure(other.to_string()),
        }
    }
}
