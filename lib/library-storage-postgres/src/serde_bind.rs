//! Serde-based binding for PostgreSQL queries.
//!
//! Row types are serialized to JSON objects and bound column by column, so
//! nothing beyond `#[derive(Storable)]` is needed on the row type. Reads go the
//! other way: each column is decoded according to its Postgres type and the
//! resulting object is handed to serde.

use std::fmt::Display;

use chrono::{DateTime, SecondsFormat, Utc};
use library_storage::{Storable, StorageError};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Arguments, Column, Postgres, Row, Transaction, TypeInfo};

type JsonObject = Map<String, Value>;

fn storage_error(err: impl Display) -> StorageError {
    StorageError::StorageError(err.to_string())
}

/// How a column's JSON value is bound, derived from `Storable::column_types()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ColumnKind {
    Datetime,
    BigInt,
    Integer,
    Boolean,
    Json,
    Text,
}

impl ColumnKind {
    fn of(sql_type: &str) -> Self {
        match sql_type {
            "datetime" => Self::Datetime,
            "bigint" => Self::BigInt,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "json" => Self::Json,
            _ => Self::Text,
        }
    }

    fn bind_null(self, args: &mut PgArguments) -> Result<(), StorageError> {
        match self {
            Self::Datetime => args.add(None::<DateTime<Utc>>),
            Self::BigInt => args.add(None::<i64>),
            Self::Integer => args.add(None::<i32>),
            Self::Boolean => args.add(None::<bool>),
            Self::Json => args.add(None::<Value>),
            Self::Text => args.add(None::<String>),
        }
        .map_err(storage_error)
    }

    fn bind(self, args: &mut PgArguments, value: &Value) -> Result<(), StorageError> {
        match (value, self) {
            (Value::Null, kind) => return kind.bind_null(args),
            (Value::Bool(b), _) => args.add(*b),
            (Value::Number(n), Self::Integer) => {
                let narrowed = n
                    .as_i64()
                    .and_then(|i| i32::try_from(i).ok())
                    .ok_or_else(|| storage_error(format!("Integer out of range: {}", n)))?;
                args.add(narrowed)
            }
            (Value::Number(n), _) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => args.add(i),
                (None, Some(f)) => args.add(f),
                (None, None) => args.add(n.to_string()),
            },
            (Value::String(s), Self::Datetime) => {
                let parsed = DateTime::parse_from_rfc3339(s)
                    .map_err(|e| storage_error(format!("Invalid datetime: {}", e)))?;
                args.add(parsed.with_timezone(&Utc))
            }
            (Value::String(s), _) => args.add(s.as_str()),
            (Value::Array(_) | Value::Object(_), _) => args.add(value.clone()),
        }
        .map_err(storage_error)
    }
}

/// Classify an sqlx error into a StorageError.
///
/// Unique violations map to `Conflict`, foreign-key violations to
/// `ForeignKeyViolation`; everything else is a generic storage error.
pub fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation => StorageError::Conflict(db.message().to_string()),
            ErrorKind::ForeignKeyViolation => {
                StorageError::ForeignKeyViolation(db.message().to_string())
            }
            _ => storage_error(&err),
        },
        sqlx::Error::RowNotFound => StorageError::NotFound(err.to_string()),
        _ => storage_error(&err),
    }
}

fn build_insert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders = (1..=columns.len())
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders
    )
}

/// Split columns into (non-key, key), each in declaration order.
fn split_key_columns<'a>(
    columns: &[&'a str],
    primary_key: &[&str],
) -> (Vec<&'a str>, Vec<&'a str>) {
    columns
        .iter()
        .copied()
        .partition(|c| !primary_key.contains(c))
}

/// UPDATE that assigns every non-key column and matches on the key.
///
/// Placeholders are numbered non-key columns first, then key columns. Returns
/// `None` when every column is part of the key.
fn build_update_sql(table: &str, columns: &[&str], primary_key: &[&str]) -> Option<String> {
    let (assigned, keys) = split_key_columns(columns, primary_key);
    if assigned.is_empty() {
        return None;
    }

    let mut placeholder = 0;
    let mut next = |column: &str| {
        placeholder += 1;
        format!("{} = ${}", column, placeholder)
    };
    let set: Vec<String> = assigned.iter().map(|c| next(c)).collect();
    let matching: Vec<String> = keys.iter().map(|c| next(c)).collect();

    Some(format!(
        "UPDATE {} SET {} WHERE {}",
        table,
        set.join(", "),
        matching.join(" AND ")
    ))
}

fn to_json_object<T: Serialize>(item: &T) -> Result<JsonObject, StorageError> {
    match serde_json::to_value(item) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => Err(storage_error("Expected JSON object for Storable type")),
        Err(e) => Err(storage_error(format!("Serialization error: {}", e))),
    }
}

/// Bind the named columns in order, looking each value up by its JSON key.
fn bind_columns<T: Storable>(
    obj: &JsonObject,
    columns: &[&str],
) -> Result<PgArguments, StorageError> {
    let mut args = PgArguments::default();
    for &column in columns {
        let idx = T::columns()
            .iter()
            .position(|c| *c == column)
            .ok_or_else(|| storage_error(format!("Column not found: {}", column)))?;
        let key = T::json_keys().get(idx).copied().unwrap_or(column);
        let kind = ColumnKind::of(T::column_types().get(idx).copied().unwrap_or("text"));
        kind.bind(&mut args, obj.get(key).unwrap_or(&Value::Null))?;
    }
    Ok(args)
}

async fn execute(
    tx: &mut Transaction<'_, Postgres>,
    sql: &str,
    args: PgArguments,
) -> Result<u64, StorageError> {
    let done = sqlx::query_with(sql, args)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    Ok(done.rows_affected())
}

/// Insert a Storable row within a transaction. Returns the rows affected.
pub async fn bind_insert_values_tx<T: Storable + Serialize>(
    tx: &mut Transaction<'_, Postgres>,
    item: &T,
) -> Result<u64, StorageError> {
    let args = bind_columns::<T>(&to_json_object(item)?, T::columns())?;
    let sql = build_insert_sql(T::table_name(), T::columns());
    execute(tx, &sql, args).await
}

/// Overwrite the non-key columns of the row matching the item's primary key.
///
/// Returns the rows affected, 0 when no row has that key.
pub async fn bind_update_values_tx<T: Storable + Serialize>(
    tx: &mut Transaction<'_, Postgres>,
    item: &T,
) -> Result<u64, StorageError> {
    let sql = build_update_sql(T::table_name(), T::columns(), T::primary_key()).ok_or_else(|| {
        storage_error(format!(
            "Table {} has no non-key columns to update",
            T::table_name()
        ))
    })?;

    let (assigned, keys) = split_key_columns(T::columns(), T::primary_key());
    let order: Vec<&str> = assigned.into_iter().chain(keys).collect();
    let args = bind_columns::<T>(&to_json_object(item)?, &order)?;
    execute(tx, &sql, args).await
}

/// Deserialize a PostgreSQL row to a Storable type.
///
/// Null columns are left out of the intermediate object so optional fields
/// come back as `None`.
pub fn deserialize_row<T: Storable + DeserializeOwned>(row: &PgRow) -> Result<T, StorageError> {
    let mut obj = JsonObject::new();
    for (column, key) in T::columns().iter().zip(T::json_keys()) {
        if let Some(value) = read_column(row, column)? {
            obj.insert((*key).to_string(), value);
        }
    }

    serde_json::from_value(Value::Object(obj))
        .map_err(|e| storage_error(format!("Deserialization error: {}", e)))
}

fn decode<'r, V>(row: &'r PgRow, idx: usize) -> Result<Option<V>, StorageError>
where
    V: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(idx).map_err(storage_error)
}

/// Read one column as JSON, `None` for SQL NULL.
fn read_column(row: &PgRow, column: &str) -> Result<Option<Value>, StorageError> {
    let (idx, meta) = row
        .columns()
        .iter()
        .enumerate()
        .find(|(_, c)| c.name() == column)
        .ok_or_else(|| storage_error(format!("Column not found: {}", column)))?;

    let value = match meta.type_info().name() {
        "BOOL" => decode::<bool>(row, idx)?.map(Value::Bool),
        "INT2" | "SMALLINT" => decode::<i16>(row, idx)?.map(Value::from),
        "INT4" | "INTEGER" => decode::<i32>(row, idx)?.map(Value::from),
        "INT8" | "BIGINT" => decode::<i64>(row, idx)?.map(Value::from),
        "FLOAT4" | "FLOAT8" | "REAL" | "DOUBLE PRECISION" => decode::<f64>(row, idx)?
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        // Micros with Z, the same shape StorageDatetime serializes to.
        "TIMESTAMPTZ" | "TIMESTAMP" => decode::<DateTime<Utc>>(row, idx)?
            .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Micros, true))),
        "JSONB" | "JSON" => decode::<Value>(row, idx)?.filter(|v| !v.is_null()),
        _ => decode::<String>(row, idx)?.map(Value::String),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_sql_numbers_every_column() {
        assert_eq!(
            build_insert_sql("books", &["id", "title", "pages"]),
            "INSERT INTO books (id, title, pages) VALUES ($1, $2, $3)"
        );
    }

    #[test]
    fn update_sql_sets_values_then_matches_keys() {
        assert_eq!(
            build_update_sql("books", &["id", "title", "pages"], &["id"]).as_deref(),
            Some("UPDATE books SET title = $1, pages = $2 WHERE id = $3")
        );
    }

    #[test]
    fn update_sql_handles_composite_keys() {
        assert_eq!(
            build_update_sql("grants", &["user_id", "role", "scope_id"], &["user_id", "scope_id"])
                .as_deref(),
            Some("UPDATE grants SET role = $1 WHERE user_id = $2 AND scope_id = $3")
        );
    }

    #[test]
    fn update_sql_is_none_for_key_only_tables() {
        assert_eq!(
            build_update_sql("books_authors", &["book_id", "author_id"], &["book_id", "author_id"]),
            None
        );
    }

    #[test]
    fn column_kinds_fall_back_to_text() {
        assert_eq!(ColumnKind::of("integer"), ColumnKind::Integer);
        assert_eq!(ColumnKind::of("datetime"), ColumnKind::Datetime);
        assert_eq!(ColumnKind::of("varchar"), ColumnKind::Text);
    }

    #[test]
    fn integer_columns_reject_out_of_range_numbers() {
        let mut args = PgArguments::default();
        let err = ColumnKind::Integer
            .bind(&mut args, &Value::from(i64::MAX))
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
        ColumnKind::Integer.bind(&mut args, &Value::from(320)).unwrap();
        ColumnKind::Text.bind(&mut args, &Value::Null).unwrap();
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn datetime_columns_require_rfc3339() {
        let mut args = PgArguments::default();
        assert!(
            ColumnKind::Datetime
                .bind(&mut args, &Value::from("yesterday"))
                .is_err()
        );
        ColumnKind::Datetime
            .bind(&mut args, &Value::from("2024-01-02T03:04:05.000006Z"))
            .unwrap();
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StorageError::NotFound(_)
        ));
    }

    #[test]
    fn other_errors_map_to_storage_error() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            StorageError::StorageError(_)
        ));
    }
}
