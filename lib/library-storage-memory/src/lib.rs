//! In-memory implementation for library-storage.
//!
//! Tables live in a shared map of JSON rows keyed by column name. A transaction
//! holds the store lock for its whole lifetime and works on a private copy of
//! the tables, which replaces the shared state on commit. Dropping or rolling
//! back a transaction discards the copy.
//!
//! Primary keys and declared foreign keys are enforced on insert, so the
//! backend reports `StorageError::Conflict` and
//! `StorageError::ForeignKeyViolation` the same way PostgreSQL does.
//!
//! # Usage
//!
//! ```text
//! use library_storage_memory::{MemoryPool, QueryExecutor, TransactionExecutor};
//!
//! let pool = MemoryPool::new();
//! let mut tx = pool.begin_transaction().await?;
//! tx.insert(&row).await?;
//! tx.commit().await?;
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod executor;
mod row;

pub use executor::{MemoryPool, MemoryTransaction};

// Re-export core types for convenience
pub use library_storage::{
    ConnectionConfig, Delete, Filter, Filtered, Order, Query, QueryExecutor,
    RepositoryConnection, RowLock, Storable, StorageDatetime, StorageError, TransactionExecutor,
    Value,
};
