//! In-memory implementation of QueryExecutor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use library_storage::{
    Delete, Query, QueryExecutor, Storable, StorageError, TransactionExecutor,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::row::{self, Row};

/// Every table's rows, in insertion order.
type Tables = HashMap<String, Vec<Row>>;

/// Shared in-memory store implementing QueryExecutor.
///
/// Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryPool {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryPool {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool").finish_non_exhaustive()
    }
}

/// `query.lock` needs no handling: a transaction already holds every table.
fn select<T: Storable>(tables: &Tables, query: &Query<T>) -> Result<Vec<T>, StorageError> {
    let mut rows: Vec<Row> = tables
        .get(&query.table)
        .map(|rows| {
            rows.iter()
                .filter(|r| row::matches_all(r, &query.filters))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    row::sort(&mut rows, &query.order_by);
    if let Some(limit) = query.limit {
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }

    rows.iter().map(row::decode::<T>).collect()
}

#[async_trait]
impl QueryExecutor for MemoryPool {
    type Transaction = MemoryTransaction;

    async fn fetch<T: Storable + DeserializeOwned + Send>(
        &self,
        query: Query<T>,
    ) -> Result<Vec<T>, StorageError> {
        let tables = self.tables.lock().await;
        select(&tables, &query)
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, StorageError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTransaction { guard, working })
    }
}

/// Transaction over a private copy of the tables.
///
/// Holds the store lock until it is committed, rolled back, or dropped, so
/// transactions run one at a time.
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

impl MemoryTransaction {
    fn check_foreign_keys<T: Storable>(&self, row: &Row) -> Result<(), StorageError> {
        for fk in T::foreign_keys() {
            let Some(value) = row.get(fk.column).filter(|v| !v.is_null()) else {
                continue;
            };
            let exists = self
                .working
                .get(fk.table)
                .is_some_and(|rows| rows.iter().any(|r| r.get(fk.references) == Some(value)));
            if !exists {
                return Err(StorageError::ForeignKeyViolation(format!(
                    "{}.{} = {} has no matching {}.{}",
                    T::table_name(),
                    fk.column,
                    value,
                    fk.table,
                    fk.references
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionExecutor for MemoryTransaction {
    async fn fetch<T: Storable + DeserializeOwned + Send>(
        &mut self,
        query: Query<T>,
    ) -> Result<Vec<T>, StorageError> {
        select(&self.working, &query)
    }

    async fn delete<T: Storable + Send>(&mut self, delete: Delete<T>) -> Result<u64, StorageError> {
        let Some(rows) = self.working.get_mut(&delete.table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !row::matches_all(r, &delete.filters));
        Ok((before - rows.len()) as u64)
    }

    async fn insert<T: Storable + Serialize + Send + Sync>(
        &mut self,
        item: &T,
    ) -> Result<u64, StorageError> {
        let new_row = row::encode(item)?;
        let key = T::primary_key();

        let duplicate = self
            .working
            .get(T::table_name())
            .is_some_and(|rows| rows.iter().any(|r| row::same_key(r, &new_row, key)));
        if duplicate {
            return Err(StorageError::Conflict(format!(
                "duplicate key ({}) in {}",
                key.join(", "),
                T::table_name()
            )));
        }
        self.check_foreign_keys::<T>(&new_row)?;

        self.working
            .entry(T::table_name().to_string())
            .or_default()
            .push(new_row);
        Ok(1)
    }

    async fn update<T: Storable + Serialize + Send + Sync>(
        &mut self,
        item: &T,
    ) -> Result<u64, StorageError> {
        let new_row = row::encode(item)?;
        self.check_foreign_keys::<T>(&new_row)?;

        let key = T::primary_key();
        let Some(existing) = self
            .working
            .get_mut(T::table_name())
            .and_then(|rows| rows.iter_mut().find(|r| row::same_key(r, &new_row, key)))
        else {
            return Ok(0);
        };
        *existing = new_row;
        Ok(1)
    }

    async fn acquire_advisory_lock(&mut self, key: &str) -> Result<(), StorageError> {
        // The store lock already serializes transactions.
        tracing::trace!(key, "advisory lock held by transaction");
        Ok(())
    }

    async fn commit(self) -> Result<(), StorageError> {
        let MemoryTransaction { mut guard, working } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StorageError> {
        Ok(())
    }
}
