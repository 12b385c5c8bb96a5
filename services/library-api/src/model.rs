//! Stored rows, request payloads, and hydrated responses.

use library_storage::{Storable, StorageDatetime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::entity::{Draft, Entity, EntityKind, Fields};

/// A row of the `books` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Storable)]
#[storable(table = "books")]
pub struct BookRow {
    #[primary_key]
    pub id: i64,
    pub title: String,
    pub pages: i32,
    pub created_at: StorageDatetime,
    pub updated_at: StorageDatetime,
    pub deleted_at: Option<StorageDatetime>,
}

/// A row of the `authors` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Storable)]
#[storable(table = "authors")]
pub struct AuthorRow {
    #[primary_key]
    pub id: i64,
    pub name: String,
    pub created_at: StorageDatetime,
    pub updated_at: StorageDatetime,
    pub deleted_at: Option<StorageDatetime>,
}

/// A row of the `books_authors` join relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Storable)]
#[storable(table = "books_authors")]
pub struct BookAuthor {
    #[primary_key]
    #[column(references = "books.id")]
    pub book_id: i64,
    #[primary_key]
    #[column(references = "authors.id")]
    pub author_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<i32>,
}

impl Fields for BookFields {
    fn is_empty(&self) -> bool {
        self.title.as_deref().is_none_or(str::is_empty) && self.pages.is_none_or(|p| p == 0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Fields for AuthorFields {
    fn is_empty(&self) -> bool {
        self.name.as_deref().is_none_or(str::is_empty)
    }
}

/// One entry of an association list: an id, inline fields, or both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference<F> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(flatten)]
    pub fields: F,
}

impl<F: Default> Reference<F> {
    pub fn id(id: i64) -> Self {
        Reference {
            id: Some(id),
            fields: F::default(),
        }
    }
}

impl<F> Reference<F> {
    pub fn inline(fields: F) -> Self {
        Reference { id: None, fields }
    }
}

/// An association field as sent by a client.
///
/// Omitted or `null` leaves the stored set alone, `[]` clears it, and a
/// non-empty list replaces it.
#[derive(Debug, Clone, PartialEq)]
pub enum Association<F> {
    Absent,
    Clear,
    Replace(Vec<Reference<F>>),
}

impl<F> Default for Association<F> {
    fn default() -> Self {
        Association::Absent
    }
}

impl<F> Association<F> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Association::Absent)
    }
}

impl<F> From<Vec<Reference<F>>> for Association<F> {
    fn from(references: Vec<Reference<F>>) -> Self {
        if references.is_empty() {
            Association::Clear
        } else {
            Association::Replace(references)
        }
    }
}

impl<'de, F: Deserialize<'de>> Deserialize<'de> for Association<F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<Vec<Reference<F>>>::deserialize(deserializer)? {
            None => Association::Absent,
            Some(references) => references.into(),
        })
    }
}

/// Body of `POST /books` and `PUT /books/:id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookPayload {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub pages: Option<i32>,
    #[serde(default)]
    pub authors: Association<AuthorFields>,
}

impl From<BookPayload> for Draft<BookRow> {
    fn from(payload: BookPayload) -> Self {
        Draft {
            id: payload.id,
            fields: BookFields {
                title: payload.title,
                pages: payload.pages,
            },
            related: payload.authors,
        }
    }
}

/// Body of `POST /authors` and `PUT /authors/:id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorPayload {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub books: Association<BookFields>,
}

impl From<AuthorPayload> for Draft<AuthorRow> {
    fn from(payload: AuthorPayload) -> Self {
        Draft {
            id: payload.id,
            fields: AuthorFields { name: payload.name },
            related: payload.books,
        }
    }
}

/// A book with its authors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    #[serde(flatten)]
    pub row: BookRow,
    pub authors: Vec<AuthorRow>,
}

/// An author with their books.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    #[serde(flatten)]
    pub row: AuthorRow,
    pub books: Vec<BookRow>,
}

fn replace_if_supplied<T: PartialEq>(slot: &mut T, value: Option<T>, zero: &T) -> bool {
    match value {
        Some(value) if value != *zero && value != *slot => {
            *slot = value;
            true
        }
        _ => false,
    }
}

impl Entity for BookRow {
    const KIND: EntityKind = EntityKind::Book;

    type Fields = BookFields;
    type Related = AuthorRow;
    type Hydrated = Book;
    type Payload = BookPayload;

    fn new(id: i64, fields: &BookFields, now: &StorageDatetime) -> Self {
        BookRow {
            id,
            title: fields.title.clone().unwrap_or_default(),
            pages: fields.pages.unwrap_or_default(),
            created_at: now.clone(),
            updated_at: now.clone(),
            deleted_at: None,
        }
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    fn overlay(&mut self, fields: &BookFields) -> bool {
        let title = replace_if_supplied(&mut self.title, fields.title.clone(), &String::new());
        let pages = replace_if_supplied(&mut self.pages, fields.pages, &0);
        title || pages
    }

    fn touch(&mut self, now: &StorageDatetime) {
        self.updated_at = now.clone();
    }

    fn mark_deleted(&mut self, now: &StorageDatetime) {
        self.updated_at = now.clone();
        self.deleted_at = Some(now.clone());
    }

    fn hydrate(self, authors: Vec<AuthorRow>) -> Book {
        Book { row: self, authors }
    }
}

impl Entity for AuthorRow {
    const KIND: EntityKind = EntityKind::Author;

    type Fields = AuthorFields;
    type Related = BookRow;
    type Hydrated = Author;
    type Payload = AuthorPayload;

    fn new(id: i64, fields: &AuthorFields, now: &StorageDatetime) -> Self {
        AuthorRow {
            id,
            name: fields.name.clone().unwrap_or_default(),
            created_at: now.clone(),
            updated_at: now.clone(),
            deleted_at: None,
        }
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    fn overlay(&mut self, fields: &AuthorFields) -> bool {
        replace_if_supplied(&mut self.name, fields.name.clone(), &String::new())
    }

    fn touch(&mut self, now: &StorageDatetime) {
        self.updated_at = now.clone();
    }

    fn mark_deleted(&mut self, now: &StorageDatetime) {
        self.updated_at = now.clone();
        self.deleted_at = Some(now.clone());
    }

    fn hydrate(self, books: Vec<BookRow>) -> Author {
        Author { row: self, books }
    }
}
