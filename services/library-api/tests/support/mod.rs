//! Shared fixtures for the integration tests. Everything runs against the
//! in-memory backend.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use library_api::{
    Association, AuthorPayload, BookPayload, Lifecycle, RecordStore, Reference, StoreTx, http,
};
use library_storage::{
    Delete, Query, QueryExecutor, RowLock, Storable, StorageError, TransactionExecutor,
};
use library_storage_memory::{MemoryPool, MemoryTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tracing_subscriber::fmt::MakeWriter;

pub fn store() -> RecordStore<MemoryPool> {
    RecordStore::new(MemoryPool::new())
}

pub fn book(title: &str, pages: i32) -> BookPayload {
    BookPayload {
        title: Some(title.to_string()),
        pages: Some(pages),
        ..Default::default()
    }
}

pub fn author(name: &str) -> AuthorPayload {
    AuthorPayload {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// An association naming existing records by id.
pub fn ids<F: Default>(ids: &[i64]) -> Association<F> {
    ids.iter()
        .map(|id| Reference::id(*id))
        .collect::<Vec<_>>()
        .into()
}

/// Serve the router on an ephemeral port. Returns the base URL and a handle
/// sharing the server's store.
pub async fn spawn_server() -> (String, RecordStore<MemoryPool>) {
    let store = store();
    let app = http::router(Lifecycle::new(store.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), store)
}

/// Lock requests seen by a [`Recording`] transaction, in order.
pub type LockLog = Arc<Mutex<Vec<String>>>;

/// A memory transaction that records every advisory lock (`advisory <key>`)
/// and every locking read (`share <table>` / `update <table>`).
pub struct Recording {
    inner: MemoryTransaction,
    log: LockLog,
}

impl Recording {
    pub async fn begin(pool: &MemoryPool) -> (StoreTx<Recording>, LockLog) {
        let log = LockLog::default();
        let inner = pool.begin_transaction().await.unwrap();
        let tx = Recording {
            inner,
            log: log.clone(),
        };
        (StoreTx::new(tx), log)
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl TransactionExecutor for Recording {
    async fn fetch<T: Storable + DeserializeOwned + Send>(
        &mut self,
        query: Query<T>,
    ) -> Result<Vec<T>, StorageError> {
        match query.lock {
            Some(RowLock::Share) => self.record(format!("share {}", query.table)),
            Some(RowLock::Update) => self.record(format!("update {}", query.table)),
            None => {}
        }
        self.inner.fetch(query).await
    }

    async fn delete<T: Storable + Send>(&mut self, delete: Delete<T>) -> Result<u64, StorageError> {
        self.inner.delete(delete).await
    }

    async fn insert<T: Storable + Serialize + Send + Sync>(
        &mut self,
        item: &T,
    ) -> Result<u64, StorageError> {
        self.inner.insert(item).await
    }

    async fn update<T: Storable + Serialize + Send + Sync>(
        &mut self,
        item: &T,
    ) -> Result<u64, StorageError> {
        self.inner.update(item).await
    }

    async fn acquire_advisory_lock(&mut self, key: &str) -> Result<(), StorageError> {
        self.record(format!("advisory {}", key));
        self.inner.acquire_advisory_lock(key).await
    }

    async fn commit(self) -> Result<(), StorageError> {
        self.inner.commit().await
    }

    async fn rollback(self) -> Result<(), StorageError> {
        self.inner.rollback().await
    }
}

/// Log output captured by [`capture_logs`].
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Route this thread's `info` and louder events into a buffer until the
/// guard drops. Pair with a `current_thread` runtime so spawned tasks log
/// here too.
pub fn capture_logs() -> (Captured, tracing::subscriber::DefaultGuard) {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(captured.clone())
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .finish();
    (captured, tracing::subscriber::set_default(subscriber))
}
