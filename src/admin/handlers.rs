use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, put},
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{ToggleStatusResponse, UserListQuery};
use crate::{
    auth::{
        extractors::AdminUser,
        repo_types::{User, UserQuery},
    },
    error::AppError,
    state::AppState,
    stats::{
        dto::{AdminStatsResponse, StatsQuery},
        services as stats,
    },
    transactions::{
        dto::{ListTransactionsQuery, Page, DEFAULT_LIMIT, MAX_LIMIT},
        export,
        repo_types::Transaction,
        services::build_filter,
    },
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id", get(get_user).delete(delete_user))
        .route("/admin/users/:id/toggle-status", put(toggle_status))
        .route("/admin/transactions", get(list_transactions))
        .route("/admin/transactions/export", get(export_transactions))
        .route("/admin/stats", get(get_stats))
}

#[instrument(skip(state, _admin))]
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(q): Query<UserListQuery>,
) -> Result<Json<Page<User>>, AppError> {
    let query = UserQuery {
        search: q.search.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()),
        limit: q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        offset: q.offset.unwrap_or(0).max(0),
    };
    let (items, total) = state.store.list_users(&query).await?;
    Ok(Json(Page {
        items,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

#[instrument(skip(state, _admin))]
pub async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, AppError> {
    state
        .store
        .find_user(id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("User"))
}

#[instrument(skip(state, admin))]
pub async fn toggle_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ToggleStatusResponse>, AppError> {
    if id == admin.id {
        warn!(admin_id = %admin.id, "admin tried to deactivate themself");
        return Err(AppError::bad_request("You cannot deactivate your own account"));
    }
    let user = state
        .store
        .find_user(id)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    let active = !user.is_active;
    if !state.store.set_user_active(id, active).await? {
        return Err(AppError::NotFound("User"));
    }
    info!(admin_id = %admin.id, user_id = %id, active, "user status toggled");
    Ok(Json(ToggleStatusResponse {
        message: if active {
            "User activated"
        } else {
            "User deactivated"
        },
        user: User {
            is_active: active,
            ..user
        },
    }))
}

#[instrument(skip(state, admin))]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if id == admin.id {
        warn!(admin_id = %admin.id, "admin tried to delete themself");
        return Err(AppError::bad_request("You cannot delete your own account"));
    }
    if !state.store.delete_user(id).await? {
        return Err(AppError::NotFound("User"));
    }
    info!(admin_id = %admin.id, user_id = %id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, _admin))]
pub async fn list_transactions(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(q): Query<ListTransactionsQuery>,
) -> Result<Json<Page<Transaction>>, AppError> {
    let owner = q.user_id;
    let filter = build_filter(owner, q)?;
    let (items, total) = state.store.list_transactions(&filter).await?;
    Ok(Json(Page {
        items,
        total,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

#[instrument(skip(state, admin))]
pub async fn export_transactions(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Query(q): Query<ListTransactionsQuery>,
) -> Result<Response, AppError> {
    let owner = q.user_id;
    let filter = export::export_filter(owner, q)?;
    info!(admin_id = %admin.id, user_id = ?owner, "admin transaction export");
    export::download(&state, &filter, "admin_transactions").await
}

#[instrument(skip(state, _admin))]
pub async fn get_stats(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(q): Query<StatsQuery>,
) -> Result<Json<AdminStatsResponse>, AppError> {
    let range = stats::resolve_range(&q, state.clock.now())?;
    Ok(Json(stats::admin_report(&state, &range, q.group_by).await?))
}
