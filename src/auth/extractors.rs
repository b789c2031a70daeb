use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use super::{claims::SessionClaims, jwt::JwtKeys, repo_types::Role, repo_types::User};
use crate::{
    error::{AppError, AuthorizationError, CredentialError},
    state::AppState,
};

/// Authenticated caller, loaded fresh from the store on every request.
pub struct AuthUser(pub User);

/// Caller whose token and stored record both carry the admin role.
pub struct AdminUser(pub User);

async fn authenticate(parts: &Parts, state: &AppState) -> Result<(User, SessionClaims), AppError> {
    let auth = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized("Missing Authorization header"))?;

    // Expect "Bearer <token>"
    let token = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .ok_or(AppError::Unauthorized("Invalid Authorization header"))?;

    let keys = JwtKeys::from_ref(state);
    let claims = keys.validate(token, state.clock.now()).map_err(|e| {
        warn!(error = %e, "session token rejected");
        e
    })?;

    let user = state
        .store
        .find_user(claims.user_id)
        .await?
        .ok_or(AppError::Unauthorized("User not found"))?;

    if !user.is_active {
        warn!(user_id = %user.id, "inactive account presented a token");
        return Err(CredentialError::AccountDisabled.into());
    }
    Ok((user, claims))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let (user, _) = authenticate(parts, state).await?;
        Ok(AuthUser(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let (user, claims) = authenticate(parts, state).await?;
        if claims.role != Role::Admin || user.role != Role::Admin {
            warn!(user_id = %user.id, "admin route denied");
            return Err(AuthorizationError::Forbidden.into());
        }
        Ok(AdminUser(user))
    }
}
