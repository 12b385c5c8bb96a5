//! PostgreSQL implementation of QueryExecutor.

use std::ops::Deref;

use async_trait::async_trait;
use library_storage::{
    Delete, Filter, Order, Query, QueryExecutor, RowLock, Storable, StorageError,
    TransactionExecutor, Value,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Arguments, Postgres, Transaction};

use crate::{bind_insert_values_tx, bind_update_values_tx, deserialize_row, map_sqlx_error};

const DEFAULT_MAX_CONNECTIONS: u32 = 16;

/// Wrapper around sqlx::PgPool that implements QueryExecutor.
#[derive(Clone, Debug)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self(pool)
    }

    /// Connect to a PostgreSQL database.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(url)
            .await
            .map(Self)
            .map_err(map_sqlx_error)
    }

    pub fn inner(&self) -> &sqlx::PgPool {
        &self.0
    }
}

impl Deref for PgPool {
    type Target = sqlx::PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// SQL text plus its bound arguments.
struct Statement {
    sql: String,
    args: PgArguments,
}

impl Statement {
    fn new(sql: String) -> Self {
        Self {
            sql,
            args: PgArguments::default(),
        }
    }

    /// Append ` WHERE ...` for the filters, binding one placeholder per valued filter.
    fn filtered(mut self, filters: &[Filter]) -> Result<Self, StorageError> {
        let mut conditions = Vec::with_capacity(filters.len());
        for filter in filters {
            let condition = match filter {
                Filter::Eq(field, value) => format!("{} = ${}", field, self.bind(value)?),
                Filter::In(field, value) => format!("{} = ANY(${})", field, self.bind(value)?),
                Filter::IsNull(field) => format!("{} IS NULL", field),
            };
            conditions.push(condition);
        }
        if !conditions.is_empty() {
            self.sql.push_str(" WHERE ");
            self.sql.push_str(&conditions.join(" AND "));
        }
        Ok(self)
    }

    /// Bind a value and return its placeholder number.
    fn bind(&mut self, value: &Value) -> Result<usize, StorageError> {
        let args = &mut self.args;
        match value {
            Value::String(s) => args.add(s.as_str()),
            Value::Int(n) => args.add(*n),
            Value::Ints(v) => args.add(v.as_slice()),
            Value::Bool(b) => args.add(*b),
            Value::Datetime(dt) => args.add(*dt.inner()),
            Value::Null => args.add(None::<String>),
        }
        .map_err(|e| StorageError::StorageError(e.to_string()))?;
        Ok(args.len())
    }

    fn ordered(mut self, order_by: &[(String, Order)]) -> Self {
        let terms: Vec<String> = order_by
            .iter()
            .map(|(field, order)| match order {
                Order::Asc => format!("{} ASC", field),
                Order::Desc => format!("{} DESC", field),
            })
            .collect();
        if !terms.is_empty() {
            self.sql.push_str(" ORDER BY ");
            self.sql.push_str(&terms.join(", "));
        }
        self
    }

    fn limited(mut self, limit: Option<u64>) -> Self {
        if let Some(n) = limit {
            self.sql.push_str(&format!(" LIMIT {}", n));
        }
        self
    }

    fn locked(mut self, lock: Option<RowLock>) -> Self {
        match lock {
            Some(RowLock::Share) => self.sql.push_str(" FOR SHARE"),
            Some(RowLock::Update) => self.sql.push_str(" FOR UPDATE"),
            None => {}
        }
        self
    }

    fn select<T>(query: &Query<T>) -> Result<Self, StorageError> {
        Ok(Self::new(format!("SELECT * FROM {}", query.table))
            .filtered(&query.filters)?
            .ordered(&query.order_by)
            .limited(query.limit)
            .locked(query.lock))
    }

    fn delete<T>(delete: &Delete<T>) -> Result<Self, StorageError> {
        Self::new(format!("DELETE FROM {}", delete.table)).filtered(&delete.filters)
    }
}

fn decode_rows<T: Storable + DeserializeOwned>(rows: &[PgRow]) -> Result<Vec<T>, StorageError> {
    rows.iter().map(deserialize_row::<T>).collect()
}

#[async_trait]
impl QueryExecutor for PgPool {
    type Transaction = PgTransaction;

    async fn fetch<T: Storable + DeserializeOwned + Send>(
        &self,
        query: Query<T>,
    ) -> Result<Vec<T>, StorageError> {
        let Statement { sql, args } = Statement::select(&query)?;
        let rows = sqlx::query_with(&sql, args)
            .fetch_all(&self.0)
            .await
            .map_err(map_sqlx_error)?;
        decode_rows(&rows)
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, StorageError> {
        let tx = self.0.begin().await.map_err(map_sqlx_error)?;
        Ok(PgTransaction { tx })
    }
}

/// PostgreSQL transaction wrapper implementing TransactionExecutor.
///
/// sqlx rolls the transaction back when it is dropped uncommitted.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TransactionExecutor for PgTransaction {
    async fn fetch<T: Storable + DeserializeOwned + Send>(
        &mut self,
        query: Query<T>,
    ) -> Result<Vec<T>, StorageError> {
        let Statement { sql, args } = Statement::select(&query)?;
        let rows = sqlx::query_with(&sql, args)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        decode_rows(&rows)
    }

    async fn delete<T: Storable + Send>(&mut self, delete: Delete<T>) -> Result<u64, StorageError> {
        let Statement { sql, args } = Statement::delete(&delete)?;
        let done = sqlx::query_with(&sql, args)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(done.rows_affected())
    }

    async fn insert<T: Storable + Serialize + Send + Sync>(
        &mut self,
        item: &T,
    ) -> Result<u64, StorageError> {
        bind_insert_values_tx(&mut self.tx, item).await
    }

    async fn update<T: Storable + Serialize + Send + Sync>(
        &mut self,
        item: &T,
    ) -> Result<u64, StorageError> {
        bind_update_values_tx(&mut self.tx, item).await
    }

    async fn acquire_advisory_lock(&mut self, key: &str) -> Result<(), StorageError> {
        tracing::debug!(key, "acquiring advisory lock");
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StorageError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self) -> Result<(), StorageError> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use library_storage::{Filtered, StorageDatetime};
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, library_storage::Storable)]
    #[storable(table = "books")]
    struct Row {
        #[primary_key]
        id: i64,
        deleted_at: Option<StorageDatetime>,
    }

    #[test]
    fn where_clause_numbers_bound_filters_only() {
        let filters = vec![
            Filter::Eq("id".into(), Value::Int(1)),
            Filter::IsNull("deleted_at".into()),
            Filter::In("id".into(), Value::Ints(vec![1, 2])),
        ];
        let statement = Statement::new("SELECT * FROM books".into())
            .filtered(&filters)
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT * FROM books WHERE id = $1 AND deleted_at IS NULL AND id = ANY($2)"
        );
        assert_eq!(statement.args.len(), 2);
    }

    #[test]
    fn empty_filters_produce_no_where_clause() {
        let statement = Statement::new("DELETE FROM books".into()).filtered(&[]).unwrap();
        assert_eq!(statement.sql, "DELETE FROM books");
        assert_eq!(statement.args.len(), 0);
    }

    #[test]
    fn select_includes_order_and_limit() {
        let query = Query::<Row>::new()
            .is_null("deleted_at")
            .order_by("id", Order::Desc)
            .limit(1);
        assert_eq!(
            Statement::select(&query).unwrap().sql,
            "SELECT * FROM books WHERE deleted_at IS NULL ORDER BY id DESC LIMIT 1"
        );
    }

    #[test]
    fn row_locks_follow_the_limit() {
        let query = Query::<Row>::new().eq("id", 2i64).limit(1).locking(RowLock::Share);
        assert_eq!(
            Statement::select(&query).unwrap().sql,
            "SELECT * FROM books WHERE id = $1 LIMIT 1 FOR SHARE"
        );
        let query = Query::<Row>::new().eq("id", 2i64).locking(RowLock::Update);
        assert!(Statement::select(&query).unwrap().sql.ends_with("WHERE id = $1 FOR UPDATE"));
    }

    #[test]
    fn delete_uses_filters() {
        let delete = Delete::<Row>::for_table("books_authors")
            .eq("book_id", 3i64)
            .r#in("author_id", vec![4i64, 5]);
        assert_eq!(
            Statement::delete(&delete).unwrap().sql,
            "DELETE FROM books_authors WHERE book_id = $1 AND author_id = ANY($2)"
        );
    }

    #[test]
    fn every_value_variant_binds() {
        let mut statement = Statement::new(String::new());
        for value in [
            Value::String("a".into()),
            Value::Int(1),
            Value::Ints(vec![1, 2]),
            Value::Bool(true),
            Value::Datetime(StorageDatetime::now()),
            Value::Null,
        ] {
            statement.bind(&value).unwrap();
        }
        assert_eq!(statement.args.len(), 6);
    }
}
