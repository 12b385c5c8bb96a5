//! Connection lifecycle for storage backends.
//!
//! - `ConnectionConfig`: How to reach the database
//! - `RepositoryConnection`: Connect, initialize (run migrations), close

use async_trait::async_trait;

use crate::StorageError;

/// Connection configuration for database backends.
///
/// This enum is extensible for future authentication methods.
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    /// Connect using a database URL string.
    Url(String),
    // Future: Credentials { host, port, user, pass, database }
}

impl ConnectionConfig {
    /// The URL this configuration points at.
    pub fn url(&self) -> &str {
        match self {
            ConnectionConfig::Url(url) => url,
        }
    }
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

/// Trait for database connection and initialization.
///
/// This trait abstracts the database connection lifecycle, allowing
/// different backends (PostgreSQL, in-memory) to implement their own
/// connection and migration logic. A connected handle is opened once at
/// process start and closed once at shutdown.
#[async_trait]
pub trait RepositoryConnection: Sized + Send + Sync {
    /// Connect to the database using the provided configuration.
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, StorageError>;

    /// Initialize the database schema (run migrations).
    async fn initialize(&self) -> Result<(), StorageError>;

    /// Release the underlying connections.
    async fn close(&self) {}
}
