//! Storable trait for database-agnostic storage operations.
//!
//! Types implementing `Storable` can be stored in any supported database backend.
//! Add `#[storable(table = "table_name")]` to a `#[derive(Storable)]` type
//! to generate the implementation.

/// A foreign key from a column of this table to a column of another table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    /// Column on this table.
    pub column: &'static str,
    /// Referenced table.
    pub table: &'static str,
    /// Referenced column on `table`.
    pub references: &'static str,
}

/// Trait for types that can be stored in a database.
///
/// This trait provides the metadata and methods needed for database operations.
/// Generated by `#[derive(Storable)]` together with `#[storable(table = "...")]`.
///
/// # Example
///
/// ```text
/// #[derive(Storable)]
/// #[storable(table = "books_authors")]
/// pub struct BookAuthor {
///     #[primary_key]
///     #[column(references = "books.id")]
///     pub book_id: i64,
///     #[primary_key]
///     #[column(references = "authors.id")]
///     pub author_id: i64,
/// }
/// ```
///
/// # Column Naming
///
/// Database columns use the Rust field names. JSON keys follow serde: the
/// field name, or its camelCase form when the type carries
/// `#[serde(rename_all = "camelCase")]`.
///
/// Use `#[column(skip)]` to exclude a field from database storage.
/// Use `#[column(name = "custom_name")]` to override the column name.
pub trait Storable: serde::Serialize + serde::de::DeserializeOwned + Clone + Send + Sync {
    /// The database table name for this type.
    fn table_name() -> &'static str;

    /// Column names in order.
    fn columns() -> &'static [&'static str];

    /// Column types in order (database-agnostic).
    /// Used by executors to bind null values with the correct type.
    /// Values: "text", "datetime", "bigint", "integer", "boolean", "json"
    fn column_types() -> &'static [&'static str];

    /// JSON key names in order.
    /// Corresponds 1:1 with columns().
    fn json_keys() -> &'static [&'static str];

    /// Primary key columns. Composite keys list every column.
    fn primary_key() -> &'static [&'static str];

    /// Foreign keys declared with `#[column(references = "table.column")]`.
    fn foreign_keys() -> &'static [ForeignKey];
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::StorageDatetime;

    #[derive(Debug, Clone, Serialize, Deserialize, library_storage::Storable)]
    #[storable(table = "shelves")]
    struct Shelf {
        #[primary_key]
        id: i64,
        label: String,
        capacity: i32,
        installed_at: StorageDatetime,
        retired_at: Option<StorageDatetime>,
        #[column(skip)]
        scratch: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, library_storage::Storable)]
    #[storable(table = "shelf_books")]
    #[serde(rename_all = "camelCase")]
    struct ShelfBook {
        #[primary_key]
        #[column(references = "shelves.id")]
        shelf_id: i64,
        #[primary_key]
        #[column(name = "book", references = "books.id")]
        book_id: i64,
    }

    #[test]
    fn derive_collects_columns_and_types() {
        assert_eq!(Shelf::table_name(), "shelves");
        assert_eq!(
            Shelf::columns(),
            &["id", "label", "capacity", "installed_at", "retired_at"]
        );
        assert_eq!(
            Shelf::column_types(),
            &["bigint", "text", "integer", "datetime", "datetime"]
        );
        assert_eq!(Shelf::json_keys(), Shelf::columns());
        assert_eq!(Shelf::primary_key(), &["id"]);
        assert!(Shelf::foreign_keys().is_empty());
    }

    #[test]
    fn derive_honours_composite_keys_and_references() {
        assert_eq!(ShelfBook::columns(), &["shelf_id", "book"]);
        assert_eq!(ShelfBook::json_keys(), &["shelfId", "bookId"]);
        assert_eq!(ShelfBook::primary_key(), &["shelf_id", "book"]);
        assert_eq!(
            ShelfBook::foreign_keys(),
            &[
                ForeignKey {
                    column: "shelf_id",
                    table: "shelves",
                    references: "id",
                },
                ForeignKey {
                    column: "book",
                    table: "books",
                    references: "id",
                },
            ]
        );
    }
}
