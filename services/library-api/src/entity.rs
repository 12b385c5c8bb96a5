//! Entity kinds and the typed join relation between them.

use std::fmt;

use library_storage::{Storable, StorageDatetime};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::model::{Association, BookAuthor};

/// Book or Author.
///
/// Declaration order is the order id-allocation locks are taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Book,
    Author,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Book, EntityKind::Author];

    pub const fn table(self) -> &'static str {
        match self {
            EntityKind::Book => "books",
            EntityKind::Author => "authors",
        }
    }

    /// Column naming this kind in the join relation.
    pub const fn link_column(self) -> &'static str {
        match self {
            EntityKind::Book => "book_id",
            EntityKind::Author => "author_id",
        }
    }

    /// The kind on the other side of the join relation.
    pub const fn other(self) -> EntityKind {
        match self {
            EntityKind::Book => EntityKind::Author,
            EntityKind::Author => EntityKind::Book,
        }
    }

    /// Key of the advisory lock serializing id allocation for this kind.
    pub fn id_lock_key(self) -> String {
        format!("{}_id", self.table())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Book => write!(f, "book"),
            EntityKind::Author => write!(f, "author"),
        }
    }
}

/// The `books_authors` relation seen from one side.
///
/// `owner` is the entity whose association set is being read or replaced,
/// `target` the entity on the far side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub owner: EntityKind,
}

impl Link {
    pub const fn owned_by(owner: EntityKind) -> Self {
        Link { owner }
    }

    pub const fn owner_column(self) -> &'static str {
        self.owner.link_column()
    }

    pub const fn target_column(self) -> &'static str {
        self.owner.other().link_column()
    }

    /// The join row linking `owner_id` to `target_id`.
    pub const fn pair(self, owner_id: i64, target_id: i64) -> BookAuthor {
        match self.owner {
            EntityKind::Book => BookAuthor {
                book_id: owner_id,
                author_id: target_id,
            },
            EntityKind::Author => BookAuthor {
                book_id: target_id,
                author_id: owner_id,
            },
        }
    }

    /// The far-side id of a join row.
    pub const fn target_of(self, row: &BookAuthor) -> i64 {
        match self.owner {
            EntityKind::Book => row.author_id,
            EntityKind::Author => row.book_id,
        }
    }

    /// The owner-side id of a join row.
    pub const fn owner_of(self, row: &BookAuthor) -> i64 {
        match self.owner {
            EntityKind::Book => row.book_id,
            EntityKind::Author => row.author_id,
        }
    }
}

/// A partial set of an entity's own fields.
///
/// `None`, the empty string and zero all mean "not supplied".
pub trait Fields: Clone + Default + fmt::Debug + Serialize + DeserializeOwned + Send + Sync {
    /// True when no field carries a value.
    fn is_empty(&self) -> bool;
}

/// A create or update request split into its parts.
#[derive(Debug, Clone)]
pub struct Draft<E: Entity> {
    pub id: Option<i64>,
    pub fields: E::Fields,
    pub related: Association<<E::Related as Entity>::Fields>,
}

/// A stored record kind: its row type, field overlay, and related kind.
pub trait Entity: Storable + fmt::Debug + 'static {
    const KIND: EntityKind;
    const LINK: Link = Link::owned_by(Self::KIND);

    type Fields: Fields;
    type Related: Entity<Related = Self>;
    /// The row serialized together with its related rows.
    type Hydrated: Serialize + DeserializeOwned + fmt::Debug + Clone + Send + Sync;
    /// Request body accepted by create and update.
    type Payload: DeserializeOwned + Into<Draft<Self>> + Send;

    /// A new row with every unsupplied field at its zero value.
    fn new(id: i64, fields: &Self::Fields, now: &StorageDatetime) -> Self;

    fn id(&self) -> i64;

    fn is_deleted(&self) -> bool;

    /// Copy every supplied field onto the row. Returns whether anything changed.
    fn overlay(&mut self, fields: &Self::Fields) -> bool;

    fn touch(&mut self, now: &StorageDatetime);

    fn mark_deleted(&mut self, now: &StorageDatetime);

    fn hydrate(self, related: Vec<Self::Related>) -> Self::Hydrated;
}
