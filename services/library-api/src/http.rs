//! Request layer: axum routes over the Lifecycle Controller.
//!
//! | Route | Verb | Success |
//! |---|---|---|
//! | `/books`, `/authors` | GET | 200 with every live record |
//! | `/books`, `/authors` | POST | 201 with the created record |
//! | `/books/:id`, `/authors/:id` | GET | 200 with the record |
//! | `/books/:id`, `/authors/:id` | PUT | 204 |
//! | `/books/:id`, `/authors/:id` | DELETE | 204 |
//! | `/health` | GET | 200 `{"ok": true}` |
//!
//! Failures answer `{"message": "..."}`. Malformed ids and bodies are 400,
//! `NotFound` is 404 on get and update, and everything else is 500.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use library_storage::QueryExecutor;
use serde_json::json;

use crate::entity::Entity;
use crate::error::LibraryError;
use crate::lifecycle::{Lifecycle, Operation};
use crate::model::{AuthorRow, BookRow};

/// Build the service router.
pub fn router<P>(lifecycle: Lifecycle<P>) -> Router
where
    P: QueryExecutor + Clone + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route(
            "/books",
            get(list_records::<P, BookRow>).post(create_record::<P, BookRow>),
        )
        .route(
            "/books/:id",
            get(get_record::<P, BookRow>)
                .put(update_record::<P, BookRow>)
                .delete(delete_record::<P, BookRow>),
        )
        .route(
            "/authors",
            get(list_records::<P, AuthorRow>).post(create_record::<P, AuthorRow>),
        )
        .route(
            "/authors/:id",
            get(get_record::<P, AuthorRow>)
                .put(update_record::<P, AuthorRow>)
                .delete(delete_record::<P, AuthorRow>),
        )
        .with_state(lifecycle)
}

/// A failed request: the operation attempted and why it failed.
///
/// Controller failures are already logged by the controller, so turning one
/// into a response logs nothing.
#[derive(Debug)]
pub struct ApiError {
    op: Operation,
    error: LibraryError,
}

impl ApiError {
    pub fn new(op: Operation, error: LibraryError) -> Self {
        Self { op, error }
    }

    pub fn status(&self) -> StatusCode {
        match (self.op, &self.error) {
            (_, LibraryError::Malformed(_)) => StatusCode::BAD_REQUEST,
            (Operation::Get | Operation::Update, LibraryError::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A request rejected before it reached the controller, so logged here.
    fn malformed(op: Operation, message: String) -> Self {
        tracing::warn!(op = %op, error = %message, "request rejected");
        Self::new(op, LibraryError::Malformed(message))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.error.to_string();
        (self.status(), Json(json!({ "message": message }))).into_response()
    }
}

fn path_id(op: Operation, id: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    id.map(|Path(id)| id)
        .map_err(|rejection| ApiError::malformed(op, rejection.body_text()))
}

fn body<T>(op: Operation, payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(payload)| payload)
        .map_err(|rejection| ApiError::malformed(op, rejection.body_text()))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn list_records<P: QueryExecutor, E: Entity>(
    State(lifecycle): State<Lifecycle<P>>,
) -> Result<Json<Vec<E::Hydrated>>, ApiError> {
    let records = lifecycle
        .list::<E>()
        .await
        .map_err(|err| ApiError::new(Operation::List, err))?;
    Ok(Json(records))
}

async fn get_record<P: QueryExecutor, E: Entity>(
    State(lifecycle): State<Lifecycle<P>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<E::Hydrated>, ApiError> {
    let id = path_id(Operation::Get, id)?;
    let record = lifecycle
        .get::<E>(id)
        .await
        .map_err(|err| ApiError::new(Operation::Get, err))?;
    Ok(Json(record))
}

async fn create_record<P: QueryExecutor, E: Entity>(
    State(lifecycle): State<Lifecycle<P>>,
    payload: Result<Json<E::Payload>, JsonRejection>,
) -> Result<(StatusCode, Json<E::Hydrated>), ApiError> {
    let payload = body(Operation::Create, payload)?;
    let record = lifecycle
        .create::<E>(payload)
        .await
        .map_err(|err| ApiError::new(Operation::Create, err))?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_record<P: QueryExecutor, E: Entity>(
    State(lifecycle): State<Lifecycle<P>>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<E::Payload>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let id = path_id(Operation::Update, id)?;
    let payload = body(Operation::Update, payload)?;
    lifecycle
        .update::<E>(id, payload)
        .await
        .map_err(|err| ApiError::new(Operation::Update, err))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_record<P: QueryExecutor, E: Entity>(
    State(lifecycle): State<Lifecycle<P>>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let id = path_id(Operation::Delete, id)?;
    lifecycle
        .delete::<E>(id)
        .await
        .map_err(|err| ApiError::new(Operation::Delete, err))?;
    Ok(StatusCode::NO_CONTENT)
}
