//! Library API - a Book/Author REST service.
//!
//! Books and authors are related many-to-many through the `books_authors`
//! join relation. The crate keeps that relation consistent across partial
//! updates, association replacements, and cascading soft deletes.
//!
//! # Layers
//!
//! - [`store`]: transactional persistence of rows and join rows
//! - [`reconciler`]: replace an association set by minimal diff
//! - [`lifecycle`]: create/read/update/delete, one transaction each
//! - [`http`]: axum routes and status mapping
//!
//! Storage runs on any `library_storage::QueryExecutor`: PostgreSQL in
//! production, the in-memory backend in tests.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod config;
pub mod entity;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod model;
pub mod reconciler;
pub mod store;
pub mod telemetry;

pub use config::{Config, StoreBackend};
pub use entity::{Draft, Entity, EntityKind, Fields, Link};
pub use error::LibraryError;
pub use lifecycle::{Lifecycle, Operation};
pub use model::{
    Association, Author, AuthorFields, AuthorPayload, AuthorRow, Book, BookAuthor, BookFields,
    BookPayload, BookRow, Reference,
};
pub use reconciler::{Reconciliation, reconcile};
pub use store::{RecordStore, StoreTx};
pub use telemetry::LogFormat;
