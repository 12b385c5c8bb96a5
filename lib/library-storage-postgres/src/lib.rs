//! PostgreSQL implementation for library-storage.
//!
//! This crate provides PostgreSQL-specific implementations for the library-storage
//! system. It uses serde serialization for binding values, so row types only need
//! to implement `Storable` (via `#[derive(Storable)]`).
//!
//! # Usage
//!
//! ```text
//! use library_storage_postgres::{PgPool, QueryExecutor, TransactionExecutor};
//!
//! let pool = PgPool::connect("postgres://localhost/library").await?;
//! let mut tx = pool.begin_transaction().await?;
//! tx.insert(&row).await?;
//! tx.commit().await?;
//! ```
//!
//! Constraint violations are classified: unique/primary-key violations become
//! `StorageError::Conflict`, foreign-key violations become
//! `StorageError::ForeignKeyViolation`.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod executor;
mod serde_bind;

pub use executor::{PgPool, PgTransaction};
pub use serde_bind::{
    bind_insert_values_tx, bind_update_values_tx, deserialize_row, map_sqlx_error,
};

// Re-export sqlx migration types
pub use sqlx::migrate;
pub use sqlx::migrate::Migrator;

// Re-export core types for convenience
pub use library_storage::{
    ConnectionConfig, Delete, Filter, Filtered, Order, Query, QueryExecutor,
    RepositoryConnection, RowLock, Storable, StorageDatetime, StorageError, TransactionExecutor,
    Value,
};
