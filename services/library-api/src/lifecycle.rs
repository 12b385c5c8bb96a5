//! Lifecycle Controller: create, read, update, and delete for each entity
//! kind. Every operation runs in exactly one store transaction.

use std::fmt;

use library_storage::{QueryExecutor, TransactionExecutor};

use crate::entity::{Draft, Entity, EntityKind};
use crate::error::LibraryError;
use crate::reconciler::reconcile;
use crate::store::{RecordStore, StoreTx};

/// A controller operation, as named in logs and error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::List => "list",
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Lifecycle<P> {
    store: RecordStore<P>,
}

impl<P: QueryExecutor> Lifecycle<P> {
    pub fn new(store: RecordStore<P>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RecordStore<P> {
        &self.store
    }

    /// Every live record of kind `E` with its associations.
    pub async fn list<E: Entity>(&self) -> Result<Vec<E::Hydrated>, LibraryError> {
        let result = self.store.list::<E>().await;
        report(Operation::List, E::KIND, None, result.as_ref().err());
        result
    }

    pub async fn get<E: Entity>(&self, id: i64) -> Result<E::Hydrated, LibraryError> {
        let result = self.store.get::<E>(id).await;
        report(Operation::Get, E::KIND, Some(id), result.as_ref().err());
        result
    }

    /// Persist a new record and the associations its payload names, then
    /// return it hydrated.
    pub async fn create<E: Entity>(&self, payload: E::Payload) -> Result<E::Hydrated, LibraryError> {
        let draft: Draft<E> = payload.into();
        let requested = draft.id;

        let result = match self.store.transaction().await {
            Ok(mut tx) => {
                let result = create_in::<E, _>(&mut tx, draft).await;
                tx.finish(result).await
            }
            Err(err) => Err(err),
        };

        let id = result.as_ref().map(|(id, _)| *id).ok().or(requested);
        report(Operation::Create, E::KIND, id, result.as_ref().err());
        result.map(|(_, record)| record)
    }

    /// Overlay the payload's fields and, when it carries an association
    /// field, replace the associations.
    pub async fn update<E: Entity>(&self, id: i64, payload: E::Payload) -> Result<(), LibraryError> {
        let draft: Draft<E> = payload.into();

        let result = match self.store.transaction().await {
            Ok(mut tx) => {
                let result = update_in::<E, _>(&mut tx, id, &draft).await;
                tx.finish(result).await
            }
            Err(err) => Err(err),
        };

        report(Operation::Update, E::KIND, Some(id), result.as_ref().err());
        result
    }

    /// Detach every association, then soft-delete the record.
    pub async fn delete<E: Entity>(&self, id: i64) -> Result<(), LibraryError> {
        let result = match self.store.transaction().await {
            Ok(mut tx) => {
                let result = tx.soft_delete_cascade::<E>(id).await.map(|_| ());
                tx.finish(result).await
            }
            Err(err) => Err(err),
        };

        report(Operation::Delete, E::KIND, Some(id), result.as_ref().err());
        result
    }
}

async fn create_in<E: Entity, T: TransactionExecutor>(
    tx: &mut StoreTx<T>,
    draft: Draft<E>,
) -> Result<(i64, E::Hydrated), LibraryError> {
    let row = tx.create::<E>(draft.id, &draft.fields).await?;
    let id = row.id();
    reconcile::<E, T>(tx, id, &draft.related).await?;
    let record = tx.get::<E>(id).await?;
    Ok((id, record))
}

async fn update_in<E: Entity, T: TransactionExecutor>(
    tx: &mut StoreTx<T>,
    id: i64,
    draft: &Draft<E>,
) -> Result<(), LibraryError> {
    tx.update_fields::<E>(id, &draft.fields).await?;
    let changes = reconcile::<E, T>(tx, id, &draft.related).await?;
    if !changes.is_empty() {
        tx.touch::<E>(id).await?;
    }
    Ok(())
}

/// The one log event per controller call.
fn report(op: Operation, kind: EntityKind, id: Option<i64>, error: Option<&LibraryError>) {
    match error {
        None => tracing::info!(op = %op, kind = %kind, id, "ok"),
        Some(err @ LibraryError::StoreFailure(_)) => {
            tracing::error!(op = %op, kind = %kind, id, error = %err, "failed")
        }
        Some(err) => tracing::warn!(op = %op, kind = %kind, id, error = %err, "failed"),
    }
}
