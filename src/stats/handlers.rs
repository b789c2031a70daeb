use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::{
    aggregator::StatsReport,
    dto::{DashboardResponse, StatsQuery},
    services,
};
use crate::{auth::extractors::AuthUser, error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/dashboard", get(get_dashboard))
}

#[instrument(skip(state, user))]
pub async fn get_stats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(q): Query<StatsQuery>,
) -> Result<Json<StatsReport>, AppError> {
    let range = services::resolve_range(&q, state.clock.now())?;
    let report = services::report(&state, Some(user.id), &range, q.group_by).await?;
    Ok(Json(report))
}

#[instrument(skip(state, user))]
pub async fn get_dashboard(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<DashboardResponse>, AppError> {
    Ok(Json(services::dashboard(&state, user.id).await?))
}
