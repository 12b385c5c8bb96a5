//! Library Storage - Core traits for relational record storage.
//!
//! This crate provides the database-agnostic foundation the library service is
//! built on: typed table metadata, query builders, and executor traits that
//! concrete backends implement.
//!
//! # Core Concepts
//!
//! - **Storable**: A row type with static table metadata (columns, primary key,
//!   foreign keys), normally derived with `#[derive(Storable)]`.
//! - **Executor**: A backend handle that runs queries. All writes go through a
//!   [`TransactionExecutor`] so that multi-statement operations commit
//!   atomically.
//!
//! # Traits
//!
//! - [`Storable`]: Table metadata for a row type
//! - [`QueryExecutor`]: Pool-level reads and transaction creation
//! - [`TransactionExecutor`]: Reads and writes inside one transaction
//! - [`RepositoryConnection`]: Connection lifecycle (connect, initialize, close)

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

// Lets the derive macro's `library_storage::` paths resolve inside this crate's tests.
extern crate self as library_storage;

mod error;
mod query;
mod repository;
mod storable;
mod time;

pub use error::StorageError;
pub use query::{
    Delete, Filter, Filtered, Order, Query, QueryExecutor, RowLock, TransactionExecutor,
    Value,
};
pub use repository::{ConnectionConfig, RepositoryConnection};
pub use storable::{ForeignKey, Storable};
pub use time::StorageDatetime;

// Re-export derive macro
pub use library_storage_derive::Storable;
