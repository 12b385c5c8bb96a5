//! Association Reconciler.
//!
//! Replaces an entity's persisted association set with a desired one by
//! inserting and deleting only the join rows that differ, so the set never
//! passes through an empty state. References are resolved first, which may
//! create related records inline; everything happens on the caller's
//! transaction and is discarded with it on failure.

use std::collections::BTreeSet;

use library_storage::{RowLock, TransactionExecutor};

use crate::entity::{Entity, Fields};
use crate::error::LibraryError;
use crate::model::{Association, Reference};
use crate::store::StoreTx;

/// Far-side ids linked and unlinked by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub added: BTreeSet<i64>,
    pub removed: BTreeSet<i64>,
}

impl Reconciliation {
    /// True when the persisted set was already the desired one.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Make the associations of `E` `id` equal to `association`.
///
/// `Absent` changes nothing. `Clear` removes every association. `Replace`
/// resolves each reference and diffs the result against the stored set.
/// Fails with `NotFound` when `id` is not live, with `DanglingReference` when
/// a reference names a record that does not exist or was deleted, and with
/// `Malformed` when it names nothing.
///
/// The owner and every linked record are share-locked until the transaction
/// ends, so a concurrent soft delete waits for the new join rows to commit.
pub async fn reconcile<E: Entity, T: TransactionExecutor>(
    tx: &mut StoreTx<T>,
    id: i64,
    association: &Association<<E::Related as Entity>::Fields>,
) -> Result<Reconciliation, LibraryError> {
    let references = match association {
        Association::Absent => return Ok(Reconciliation::default()),
        Association::Clear => &[][..],
        Association::Replace(references) => references.as_slice(),
    };
    tx.require_locked::<E>(id, RowLock::Share).await?;

    let mut desired = BTreeSet::new();
    for reference in references {
        desired.insert(resolve::<E::Related, T>(tx, reference).await?);
    }

    let current = tx.linked_ids::<E>(id).await?;
    let added: BTreeSet<i64> = desired.difference(&current).copied().collect();
    let removed: BTreeSet<i64> = current.difference(&desired).copied().collect();

    tx.unlink::<E>(id, &removed).await?;
    tx.link::<E>(id, &added).await?;

    tracing::debug!(kind = %E::KIND, id, ?added, ?removed, "associations reconciled");
    Ok(Reconciliation { added, removed })
}

/// The id a reference stands for, creating the record when the reference
/// carries fields for one that does not exist yet.
async fn resolve<R: Entity, T: TransactionExecutor>(
    tx: &mut StoreTx<T>,
    reference: &Reference<R::Fields>,
) -> Result<i64, LibraryError> {
    let carries_fields = !reference.fields.is_empty();

    match reference.id.filter(|id| *id != 0) {
        None if carries_fields => Ok(tx.create::<R>(None, &reference.fields).await?.id()),
        None => Err(LibraryError::Malformed(format!(
            "{} reference needs an id or fields",
            R::KIND
        ))),
        Some(id) => match tx.find_any_locked::<R>(id, RowLock::Share).await? {
            Some(row) if !row.is_deleted() => Ok(id),
            None if carries_fields => Ok(tx.create::<R>(Some(id), &reference.fields).await?.id()),
            _ => Err(LibraryError::dangling(R::KIND, id)),
        },
    }
}
