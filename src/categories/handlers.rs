use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{CategoryQuery, CreateCategoryRequest, UpdateCategoryRequest},
    repo_types::{Category, CategoryPatch, NewCategory},
};
use crate::{
    auth::extractors::AuthUser, error::AppError, state::AppState, stats::aggregator::UNCATEGORIZED,
};

const MAX_NAME_LEN: usize = 50;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route(
            "/categories/:id",
            get(get_category).put(update_category).delete(delete_category),
        )
}

fn clean_name(raw: &str) -> Result<String, AppError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("Category name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::bad_request("Category name is too long"));
    }
    // reserved for the stats bucket of transactions without a category
    if name.eq_ignore_ascii_case(UNCATEGORIZED) {
        return Err(AppError::bad_request(format!(
            "\"{UNCATEGORIZED}\" is a reserved category name"
        )));
    }
    Ok(name.to_owned())
}

#[instrument(skip(state, user))]
pub async fn list_categories(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(q): Query<CategoryQuery>,
) -> Result<Json<Vec<Category>>, AppError> {
    Ok(Json(state.store.list_categories(user.id, q.kind).await?))
}

#[instrument(skip(state, user, payload))]
pub async fn create_category(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), AppError> {
    let category = state
        .store
        .create_category(NewCategory {
            user_id: user.id,
            name: clean_name(&payload.name)?,
            kind: payload.kind,
            is_default: false,
        })
        .await?;
    info!(user_id = %user.id, category_id = %category.id, "category created");
    Ok((StatusCode::CREATED, Json(category)))
}

#[instrument(skip(state, user))]
pub async fn get_category(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Category>, AppError> {
    state
        .store
        .find_category(id, user.id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("Category"))
}

#[instrument(skip(state, user, payload))]
pub async fn update_category(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCategoryRequest>,
) -> Result<Json<Category>, AppError> {
    let patch = CategoryPatch {
        name: payload.name.as_deref().map(clean_name).transpose()?,
        kind: payload.kind,
    };
    state
        .store
        .update_category(id, user.id, patch)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("Category"))
}

#[instrument(skip(state, user))]
pub async fn delete_category(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !state.store.delete_category(id, user.id).await? {
        return Err(AppError::NotFound("Category"));
    }
    info!(user_id = %user.id, category_id = %id, "category deleted");
    Ok(StatusCode::NO_CONTENT)
}
