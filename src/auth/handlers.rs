use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, DeleteMeRequest, ForgotPasswordRequest, LoginRequest,
            LoginResponse, MessageResponse, RegisterRequest, RegisterResponse,
            ResetPasswordRequest, UpdateMeRequest,
        },
        extractors::AuthUser,
        password::check_strength,
        repo_types::User,
        reset::PasswordResetService,
        services::{self, is_valid_email},
    },
    error::AppError,
    state::AppState,
};

pub const RESET_REQUESTED: &str = "If the email exists, a password reset link has been sent";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me).put(update_me).delete(delete_me))
        .route("/me/password", put(change_password))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let user = services::register(&state, &payload.email, &payload.password, &payload.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: user.id,
            email: user.email,
            name: user.name,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let (issued, user) = services::login(&state, &payload.email, &payload.password).await?;
    Ok(Json(LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        user,
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let email = payload.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        warn!("forgot-password with invalid email");
        return Err(AppError::bad_request("Invalid email format"));
    }
    PasswordResetService::new(&state).request(&email).await?;
    Ok(Json(MessageResponse {
        message: RESET_REQUESTED,
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    check_strength(&payload.password).map_err(AppError::bad_request)?;
    PasswordResetService::new(&state)
        .consume(&payload.token, &payload.password)
        .await?;
    Ok(Json(MessageResponse {
        message: "Password has been reset successfully",
    }))
}

#[instrument(skip_all)]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

#[instrument(skip(state, user, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<UpdateMeRequest>,
) -> Result<Json<User>, AppError> {
    let updated = services::update_profile(
        &state,
        user.id,
        payload.email.as_deref(),
        payload.name.as_deref(),
    )
    .await?;
    Ok(Json(updated))
}

#[instrument(skip(state, user, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::change_password(&state, &user, &payload.current_password, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse {
        message: "Password updated successfully",
    }))
}

#[instrument(skip(state, user, payload))]
pub async fn delete_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<DeleteMeRequest>,
) -> Result<StatusCode, AppError> {
    services::delete_account(&state, &user, &payload.password).await?;
    Ok(StatusCode::NO_CONTENT)
}
