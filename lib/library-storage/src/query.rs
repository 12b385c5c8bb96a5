//! Typed SELECT and DELETE builders and the executor traits that run them.
//!
//! Builders only describe a statement. Each backend translates them: the
//! PostgreSQL executor renders SQL, the in-memory executor evaluates the
//! filters directly against stored rows.

use crate::{Storable, StorageDatetime, StorageError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// A value compared against a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Ints(Vec<i64>),
    Bool(bool),
    Datetime(StorageDatetime),
    Null,
}

macro_rules! value_from {
    ($($source:ty => |$v:ident| $make:expr;)*) => {
        $(
            impl From<$source> for Value {
                fn from($v: $source) -> Self {
                    $make
                }
            }
        )*
    };
}

value_from! {
    &str => |s| Value::String(s.to_owned());
    String => |s| Value::String(s);
    i64 => |n| Value::Int(n);
    bool => |b| Value::Bool(b);
    Vec<i64> => |ids| Value::Ints(ids);
    &[i64] => |ids| Value::Ints(ids.to_vec());
    StorageDatetime => |dt| Value::Datetime(dt);
}

/// One condition of a WHERE clause. Conditions are ANDed together.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq(String, Value),
    /// `column` equals any element of a list value.
    In(String, Value),
    /// `column IS NULL`
    IsNull(String),
}

/// Sort direction of an order-by clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Row lock taken by a SELECT inside a transaction.
///
/// Held until the transaction ends. Backends that serialize whole
/// transactions ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    /// `FOR SHARE`: blocks concurrent updates and deletes of the rows read.
    Share,
    /// `FOR UPDATE`: blocks every other lock on the rows read.
    Update,
}

/// Builders that carry a WHERE clause.
///
/// Implemented by [`Query`] and [`Delete`] so both accept the same conditions.
pub trait Filtered: Sized {
    /// The accumulated conditions.
    fn filters_mut(&mut self) -> &mut Vec<Filter>;

    fn filter(mut self, filter: Filter) -> Self {
        self.filters_mut().push(filter);
        self
    }

    fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(column.into(), value.into()))
    }

    fn r#in(self, column: impl Into<String>, values: impl Into<Value>) -> Self {
        self.filter(Filter::In(column.into(), values.into()))
    }

    fn is_null(self, column: impl Into<String>) -> Self {
        self.filter(Filter::IsNull(column.into()))
    }
}

/// A SELECT over one table, decoded into `T`.
#[derive(Debug, Clone)]
pub struct Query<T> {
    pub table: String,
    pub filters: Vec<Filter>,
    /// Applied in order; the first entry is the primary sort key.
    pub order_by: Vec<(String, Order)>,
    pub limit: Option<u64>,
    pub lock: Option<RowLock>,
    _marker: PhantomData<T>,
}

impl<T: Storable> Query<T> {
    /// Select from `T`'s own table.
    pub fn new() -> Self {
        Self::for_table(T::table_name())
    }

    pub fn for_table(table: impl Into<String>) -> Self {
        Query {
            table: table.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            lock: None,
            _marker: PhantomData,
        }
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn locking(mut self, lock: RowLock) -> Self {
        self.lock = Some(lock);
        self
    }
}

impl<T> Filtered for Query<T> {
    fn filters_mut(&mut self) -> &mut Vec<Filter> {
        &mut self.filters
    }
}

impl<T: Storable> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A DELETE from one table. With no filters it removes every row.
#[derive(Debug, Clone)]
pub struct Delete<T> {
    pub table: String,
    pub filters: Vec<Filter>,
    _marker: PhantomData<T>,
}

impl<T: Storable> Delete<T> {
    /// Delete from `T`'s own table.
    pub fn new() -> Self {
        Self::for_table(T::table_name())
    }

    pub fn for_table(table: impl Into<String>) -> Self {
        Delete {
            table: table.into(),
            filters: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<T> Filtered for Delete<T> {
    fn filters_mut(&mut self) -> &mut Vec<Filter> {
        &mut self.filters
    }
}

impl<T: Storable> Default for Delete<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for executing queries against a database backend.
///
/// Implemented by backend pool types (e.g., PgPool, MemoryPool). Writes are
/// only available through a transaction.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// The transaction type for this executor.
    type Transaction: TransactionExecutor;

    /// Execute a SELECT query and return results.
    async fn fetch<T: Storable + DeserializeOwned + Send>(
        &self,
        query: Query<T>,
    ) -> Result<Vec<T>, StorageError>;

    /// Execute a SELECT query and return at most one result.
    async fn fetch_optional<T: Storable + DeserializeOwned + Send>(
        &self,
        query: Query<T>,
    ) -> Result<Option<T>, StorageError> {
        let results = self.fetch(query.limit(1)).await?;
        Ok(results.into_iter().next())
    }

    /// Begin a transaction. The returned executor can be used for queries within the transaction.
    async fn begin_transaction(&self) -> Result<Self::Transaction, StorageError>;
}

/// Trait for executing queries within a transaction.
///
/// Dropping a transaction without calling `commit` discards its writes.
#[async_trait]
pub trait TransactionExecutor: Send + Sync {
    /// Execute a SELECT query within the transaction.
    async fn fetch<T: Storable + DeserializeOwned + Send>(
        &mut self,
        query: Query<T>,
    ) -> Result<Vec<T>, StorageError>;

    /// Execute a SELECT query within the transaction and return at most one result.
    async fn fetch_optional<T: Storable + DeserializeOwned + Send>(
        &mut self,
        query: Query<T>,
    ) -> Result<Option<T>, StorageError> {
        let results = self.fetch(query.limit(1)).await?;
        Ok(results.into_iter().next())
    }

    /// Execute a DELETE query within the transaction.
    async fn delete<T: Storable + Send>(&mut self, delete: Delete<T>) -> Result<u64, StorageError>;

    /// Insert an item within the transaction.
    async fn insert<T: Storable + serde::Serialize + Send + Sync>(
        &mut self,
        item: &T,
    ) -> Result<u64, StorageError>;

    /// Overwrite every non-key column of the row whose primary key matches `item`.
    /// Returns the number of rows affected (0 when no such row exists).
    async fn update<T: Storable + serde::Serialize + Send + Sync>(
        &mut self,
        item: &T,
    ) -> Result<u64, StorageError>;

    /// Acquire an advisory lock scoped to this transaction.
    /// The lock is automatically released on commit/rollback.
    /// Used to serialize operations on a logical key (e.g., a table's id sequence).
    async fn acquire_advisory_lock(&mut self, key: &str) -> Result<(), StorageError>;

    /// Commit the transaction.
    async fn commit(self) -> Result<(), StorageError>;

    /// Rollback the transaction.
    async fn rollback(self) -> Result<(), StorageError>;
}
