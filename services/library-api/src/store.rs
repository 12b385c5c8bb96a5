//! Record Store: transactional persistence for books, authors, and the
//! `books_authors` join relation.
//!
//! [`RecordStore`] is the shared handle opened once at startup. Each of its
//! operations runs in its own transaction. [`StoreTx`] exposes the same
//! operations as steps on an open transaction so callers can compose several
//! of them atomically.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use library_storage::{
    ConnectionConfig, Delete, Filtered, Order, Query, QueryExecutor, RepositoryConnection,
    RowLock, StorageDatetime, StorageError, TransactionExecutor,
};
use library_storage_memory::MemoryPool;
use library_storage_postgres::{Migrator, PgPool};

use crate::entity::{Entity, EntityKind};
use crate::error::LibraryError;
use crate::model::{Association, BookAuthor};
use crate::reconciler::{self, Reconciliation};

/// Shared store handle.
#[derive(Debug, Clone)]
pub struct RecordStore<P> {
    pool: P,
    migrations: PathBuf,
}

fn default_migrations() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

impl<P: QueryExecutor> RecordStore<P> {
    pub fn new(pool: P) -> Self {
        Self {
            pool,
            migrations: default_migrations(),
        }
    }

    /// Use migrations from `path` instead of the crate's `migrations/`.
    pub fn with_migrations(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations = path.into();
        self
    }

    /// Open a transaction. Dropping it without committing discards its writes.
    pub async fn transaction(&self) -> Result<StoreTx<P::Transaction>, LibraryError> {
        let tx = self.pool.begin_transaction().await?;
        Ok(StoreTx::new(tx))
    }

    pub async fn create<E: Entity>(
        &self,
        id: Option<i64>,
        fields: &E::Fields,
    ) -> Result<E, LibraryError> {
        let mut tx = self.transaction().await?;
        let result = tx.create::<E>(id, fields).await;
        tx.finish(result).await
    }

    pub async fn get<E: Entity>(&self, id: i64) -> Result<E::Hydrated, LibraryError> {
        let mut tx = self.transaction().await?;
        let result = tx.get::<E>(id).await;
        tx.finish(result).await
    }

    pub async fn list<E: Entity>(&self) -> Result<Vec<E::Hydrated>, LibraryError> {
        let mut tx = self.transaction().await?;
        let result = tx.list::<E>().await;
        tx.finish(result).await
    }

    pub async fn update_fields<E: Entity>(
        &self,
        id: i64,
        fields: &E::Fields,
    ) -> Result<E, LibraryError> {
        let mut tx = self.transaction().await?;
        let result = tx.update_fields::<E>(id, fields).await;
        tx.finish(result).await
    }

    pub async fn replace_associations<E: Entity>(
        &self,
        id: i64,
        association: &Association<<E::Related as Entity>::Fields>,
    ) -> Result<Reconciliation, LibraryError> {
        let mut tx = self.transaction().await?;
        let result = match association {
            Association::Absent => tx.require::<E>(id).await.map(|_| Reconciliation::default()),
            _ => reconciler::reconcile::<E, _>(&mut tx, id, association).await,
        };
        tx.finish(result).await
    }

    /// Returns the number of join rows removed.
    pub async fn soft_delete_cascade<E: Entity>(&self, id: i64) -> Result<u64, LibraryError> {
        let mut tx = self.transaction().await?;
        let result = tx.soft_delete_cascade::<E>(id).await;
        tx.finish(result).await
    }

    /// Raw join rows naming `id` on the entity's own side.
    pub async fn associations<E: Entity>(&self, id: i64) -> Result<Vec<BookAuthor>, LibraryError> {
        let rows = self
            .pool
            .fetch(
                Query::<BookAuthor>::new()
                    .eq(E::LINK.owner_column(), id)
                    .order_by(E::LINK.target_column(), Order::Asc),
            )
            .await?;
        Ok(rows)
    }
}

/// One open store transaction.
///
/// Every write made through it carries the same timestamp.
pub struct StoreTx<T> {
    tx: T,
    now: StorageDatetime,
    id_locks: BTreeSet<EntityKind>,
}

impl<T: TransactionExecutor> StoreTx<T> {
    pub fn new(tx: T) -> Self {
        Self {
            tx,
            now: StorageDatetime::now(),
            id_locks: BTreeSet::new(),
        }
    }

    /// Take the id-allocation locks of `kinds` not already held.
    ///
    /// Locks are always taken in `EntityKind` order. Asking for a kind that
    /// sorts before one already held fails instead of risking a deadlock.
    pub async fn lock_ids(&mut self, kinds: &[EntityKind]) -> Result<(), LibraryError> {
        let wanted: BTreeSet<EntityKind> = kinds
            .iter()
            .copied()
            .filter(|kind| !self.id_locks.contains(kind))
            .collect();
        if let (Some(first), Some(held)) = (wanted.first(), self.id_locks.last()) {
            if first < held {
                return Err(LibraryError::StoreFailure(format!(
                    "{} id lock requested after {} id lock",
                    first, held
                )));
            }
        }
        for kind in wanted {
            self.tx.acquire_advisory_lock(&kind.id_lock_key()).await?;
            self.id_locks.insert(kind);
        }
        Ok(())
    }

    async fn lookup<E: Entity>(
        &mut self,
        id: i64,
        lock: Option<RowLock>,
    ) -> Result<Option<E>, LibraryError> {
        let query = Query::<E>::new().eq("id", id);
        let query = match lock {
            Some(lock) => query.locking(lock),
            None => query,
        };
        Ok(self.tx.fetch_optional(query).await?)
    }

    /// The row with this id, deleted or not.
    pub async fn find_any<E: Entity>(&mut self, id: i64) -> Result<Option<E>, LibraryError> {
        self.lookup::<E>(id, None).await
    }

    /// The row with this id, deleted or not, locked until the transaction ends.
    pub async fn find_any_locked<E: Entity>(
        &mut self,
        id: i64,
        lock: RowLock,
    ) -> Result<Option<E>, LibraryError> {
        self.lookup::<E>(id, Some(lock)).await
    }

    /// The live row with this id, locked until the transaction ends, or `NotFound`.
    pub async fn require_locked<E: Entity>(
        &mut self,
        id: i64,
        lock: RowLock,
    ) -> Result<E, LibraryError> {
        self.find_any_locked::<E>(id, lock)
            .await?
            .filter(|row| !row.is_deleted())
            .ok_or_else(|| LibraryError::not_found(E::KIND, id))
    }

    /// The live row with this id.
    pub async fn find<E: Entity>(&mut self, id: i64) -> Result<Option<E>, LibraryError> {
        Ok(self
            .find_any::<E>(id)
            .await?
            .filter(|row| !row.is_deleted()))
    }

    /// The live row with this id, or `NotFound`.
    pub async fn require<E: Entity>(&mut self, id: i64) -> Result<E, LibraryError> {
        self.find::<E>(id)
            .await?
            .ok_or_else(|| LibraryError::not_found(E::KIND, id))
    }

    /// Insert a new row.
    ///
    /// Ids are allocated as one more than the largest id ever stored,
    /// soft-deleted rows included. A supplied id that is already taken fails
    /// with `Conflict`; an id of zero means "allocate".
    ///
    /// The first create in a transaction takes the id locks of every kind, so
    /// related records created inline later never lock out of order.
    pub async fn create<E: Entity>(
        &mut self,
        id: Option<i64>,
        fields: &E::Fields,
    ) -> Result<E, LibraryError> {
        self.lock_ids(&EntityKind::ALL).await?;

        let id = match id.filter(|id| *id != 0) {
            Some(id) => {
                if self.find_any::<E>(id).await?.is_some() {
                    return Err(LibraryError::conflict(E::KIND, id));
                }
                id
            }
            None => self.next_id::<E>().await?,
        };

        let row = E::new(id, fields, &self.now);
        self.tx.insert(&row).await?;
        tracing::debug!(kind = %E::KIND, id, "record inserted");
        Ok(row)
    }

    async fn next_id<E: Entity>(&mut self) -> Result<i64, LibraryError> {
        let last = self
            .tx
            .fetch_optional(Query::<E>::new().order_by("id", Order::Desc).limit(1))
            .await?;
        match last {
            None => Ok(1),
            Some(row) => row.id().checked_add(1).ok_or_else(|| {
                LibraryError::StoreFailure(format!("{} ids are exhausted", E::KIND))
            }),
        }
    }

    pub async fn get<E: Entity>(&mut self, id: i64) -> Result<E::Hydrated, LibraryError> {
        let row = self.require::<E>(id).await?;
        let mut related = self.related::<E>(&[id]).await?;
        Ok(row.hydrate(related.remove(&id).unwrap_or_default()))
    }

    /// Every live row in insertion order, each with its related rows.
    ///
    /// Rows created in one transaction share `created_at` and fall back to id
    /// order.
    pub async fn list<E: Entity>(&mut self) -> Result<Vec<E::Hydrated>, LibraryError> {
        let rows = self
            .tx
            .fetch(
                Query::<E>::new()
                    .is_null("deleted_at")
                    .order_by("created_at", Order::Asc)
                    .order_by("id", Order::Asc),
            )
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|row| row.id()).collect();
        let mut related = self.related::<E>(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let others = related.remove(&row.id()).unwrap_or_default();
                row.hydrate(others)
            })
            .collect())
    }

    /// Live related rows of each owner, ordered by id.
    async fn related<E: Entity>(
        &mut self,
        owners: &[i64],
    ) -> Result<BTreeMap<i64, Vec<E::Related>>, LibraryError> {
        let link = E::LINK;
        let pairs = self
            .tx
            .fetch(Query::<BookAuthor>::new().r#in(link.owner_column(), owners))
            .await?;
        if pairs.is_empty() {
            return Ok(BTreeMap::new());
        }

        let targets: BTreeSet<i64> = pairs.iter().map(|pair| link.target_of(pair)).collect();
        let rows = self
            .tx
            .fetch(
                Query::<E::Related>::new()
                    .r#in("id", targets.into_iter().collect::<Vec<_>>())
                    .is_null("deleted_at"),
            )
            .await?;
        let by_id: BTreeMap<i64, E::Related> = rows.into_iter().map(|row| (row.id(), row)).collect();

        let mut grouped: BTreeMap<i64, Vec<E::Related>> = BTreeMap::new();
        for pair in &pairs {
            if let Some(row) = by_id.get(&link.target_of(pair)) {
                grouped
                    .entry(link.owner_of(pair))
                    .or_default()
                    .push(row.clone());
            }
        }
        for rows in grouped.values_mut() {
            rows.sort_by_key(|row| row.id());
        }
        Ok(grouped)
    }

    /// Overlay the supplied fields onto the live row. Absent and zero-valued
    /// fields are left as stored.
    pub async fn update_fields<E: Entity>(
        &mut self,
        id: i64,
        fields: &E::Fields,
    ) -> Result<E, LibraryError> {
        let mut row = self.require::<E>(id).await?;
        if row.overlay(fields) {
            row.touch(&self.now);
            self.tx.update(&row).await?;
            tracing::debug!(kind = %E::KIND, id, "fields updated");
        }
        Ok(row)
    }

    /// Bump `updated_at` on the live row.
    pub async fn touch<E: Entity>(&mut self, id: i64) -> Result<(), LibraryError> {
        let mut row = self.require::<E>(id).await?;
        row.touch(&self.now);
        self.tx.update(&row).await?;
        Ok(())
    }

    /// Far-side ids currently linked to `id`.
    pub async fn linked_ids<E: Entity>(&mut self, id: i64) -> Result<BTreeSet<i64>, LibraryError> {
        let link = E::LINK;
        let pairs = self
            .tx
            .fetch(Query::<BookAuthor>::new().eq(link.owner_column(), id))
            .await?;
        Ok(pairs.iter().map(|pair| link.target_of(pair)).collect())
    }

    pub async fn link<E: Entity>(
        &mut self,
        id: i64,
        targets: &BTreeSet<i64>,
    ) -> Result<(), LibraryError> {
        for target in targets {
            self.tx.insert(&E::LINK.pair(id, *target)).await?;
        }
        Ok(())
    }

    /// Returns the number of join rows removed.
    pub async fn unlink<E: Entity>(
        &mut self,
        id: i64,
        targets: &BTreeSet<i64>,
    ) -> Result<u64, LibraryError> {
        if targets.is_empty() {
            return Ok(0);
        }
        let link = E::LINK;
        let removed = self
            .tx
            .delete(
                Delete::<BookAuthor>::new()
                    .eq(link.owner_column(), id)
                    .r#in(link.target_column(), targets.iter().copied().collect::<Vec<_>>()),
            )
            .await?;
        Ok(removed)
    }

    /// Mark the live row deleted, then remove every join row naming it.
    /// Returns the number of join rows removed.
    ///
    /// The row is locked for update first, so a transaction still linking to
    /// it commits before its join rows are collected, and later links see it
    /// deleted.
    pub async fn soft_delete_cascade<E: Entity>(&mut self, id: i64) -> Result<u64, LibraryError> {
        let mut row = self.require_locked::<E>(id, RowLock::Update).await?;
        row.mark_deleted(&self.now);
        self.tx.update(&row).await?;
        let detached = self
            .tx
            .delete(Delete::<BookAuthor>::new().eq(E::LINK.owner_column(), id))
            .await?;
        tracing::debug!(kind = %E::KIND, id, detached, "record soft-deleted");
        Ok(detached)
    }

    pub async fn commit(self) -> Result<(), LibraryError> {
        Ok(self.tx.commit().await?)
    }

    pub async fn rollback(self) -> Result<(), LibraryError> {
        Ok(self.tx.rollback().await?)
    }

    /// Commit on success, roll back on failure, and hand the result back.
    pub async fn finish<R>(self, result: Result<R, LibraryError>) -> Result<R, LibraryError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

fn migration_error(err: impl std::fmt::Display) -> StorageError {
    StorageError::StorageError(format!("migration failed: {}", err))
}

#[async_trait]
impl RepositoryConnection for RecordStore<PgPool> {
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, StorageError> {
        let config = config.into();
        let pool = PgPool::connect(config.url()).await?;
        Ok(Self::new(pool))
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        tracing::info!(path = %self.migrations.display(), "running migrations");
        Migrator::new(self.migrations.clone())
            .await
            .map_err(migration_error)?
            .run(self.pool.inner())
            .await
            .map_err(migration_error)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RepositoryConnection for RecordStore<MemoryPool> {
    async fn connect(_config: impl Into<ConnectionConfig> + Send) -> Result<Self, StorageError> {
        Ok(Self::new(MemoryPool::new()))
    }

    /// Tables are created on first insert.
    async fn initialize(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
