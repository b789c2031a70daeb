use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{
        BulkDeleteRequest, BulkDeleteResponse, CreateTransactionRequest, ListTransactionsQuery,
        Page, SuggestionsResponse, UpdateTransactionRequest,
    },
    export,
    repo_types::Transaction,
    services,
};
use crate::{auth::extractors::AuthUser, error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/transactions", get(list_transactions).post(create_transaction))
        .route("/transactions/bulk-delete", post(bulk_delete))
        .route("/transactions/export", get(export_transactions))
        .route("/transactions/search-suggestions", get(search_suggestions))
        .route(
            "/transactions/:id",
            get(get_transaction)
                .put(update_transaction)
                .delete(delete_transaction),
        )
        .route("/transactions/:id/duplicate", post(duplicate_transaction))
}

#[instrument(skip(state, user))]
pub async fn list_transactions(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(q): Query<ListTransactionsQuery>,
) -> Result<Json<Page<Transaction>>, AppError> {
    // owner always comes from the token
    let filter = services::build_filter(Some(user.id), q)?;
    let (items, total) = state.store.list_transactions(&filter).await?;
    Ok(Json(Page {
        items,
        total,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

#[instrument(skip(state, user))]
pub async fn export_transactions(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(q): Query<ListTransactionsQuery>,
) -> Result<Response, AppError> {
    let filter = export::export_filter(Some(user.id), q)?;
    export::download(&state, &filter, "transactions").await
}

#[instrument(skip(state, user))]
pub async fn search_suggestions(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<SuggestionsResponse>, AppError> {
    let suggestions = services::search_suggestions(&state, user.id).await?;
    Ok(Json(SuggestionsResponse { suggestions }))
}

#[instrument(skip(state, user, payload))]
pub async fn create_transaction(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let tx = services::create(&state, user.id, payload).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}

#[instrument(skip(state, user))]
pub async fn get_transaction(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    state
        .store
        .find_transaction(id, Some(user.id))
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("Transaction"))
}

#[instrument(skip(state, user, payload))]
pub async fn update_transaction(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTransactionRequest>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(services::update(&state, user.id, id, payload).await?))
}

#[instrument(skip(state, user))]
pub async fn delete_transaction(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_transactions(user.id, &[id]).await? == 0 {
        return Err(AppError::NotFound("Transaction"));
    }
    info!(user_id = %user.id, transaction_id = %id, "transaction deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, user, payload))]
pub async fn bulk_delete(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<BulkDeleteRequest>,
) -> Result<Json<BulkDeleteResponse>, AppError> {
    if payload.ids.is_empty() {
        return Err(AppError::bad_request("No transaction ids given"));
    }
    let deleted = state.store.delete_transactions(user.id, &payload.ids).await?;
    info!(user_id = %user.id, requested = payload.ids.len(), deleted, "transactions bulk deleted");
    Ok(Json(BulkDeleteResponse { deleted }))
}

#[instrument(skip(state, user))]
pub async fn duplicate_transaction(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let copy = services::duplicate(&state, user.id, id).await?;
    Ok((StatusCode::CREATED, Json(copy)))
}
