//! Error taxonomy shared by the services and its mapping onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Session token validation failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid token signature")]
    InvalidSignature,
    #[error("Token expired. Please log in again.")]
    Expired,
    #[error("Malformed token")]
    Malformed,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Account is deactivated. Please contact support.")]
    AccountDisabled,
}

/// Password reset token failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ResetError {
    #[error("Invalid reset token")]
    TokenNotFound,
    #[error("Reset token has expired")]
    TokenExpired,
    #[error("Reset token has already been used")]
    TokenAlreadyUsed,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("Access denied")]
    Forbidden,
}

/// Failures surfaced by the Data Store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error("stored record is invalid: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Reset(#[from] ResetError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Credential(CredentialError::InvalidCredentials) => StatusCode::UNAUTHORIZED,
            Self::Credential(CredentialError::AccountDisabled) => StatusCode::FORBIDDEN,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::Reset(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(what) => Self::Conflict(format!("{what} already exists")),
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(e) => {
                error!(error = ?e, "internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}
