use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    jwt::{IssuedToken, JwtKeys},
    password::{check_strength, hash_password, verify_password},
    repo_types::{NewUser, Role, User, UserPatch},
};
use crate::{
    categories::repo_types::DEFAULT_CATEGORIES,
    error::{AppError, CredentialError},
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims, lower-cases and validates an email address.
pub(crate) fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::bad_request("Invalid email format"));
    }
    Ok(email)
}

fn normalize_name(raw: &str) -> Result<String, AppError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("Name is required"));
    }
    Ok(name.to_owned())
}

pub async fn register(
    state: &AppState,
    email: &str,
    password: &str,
    name: &str,
) -> Result<User, AppError> {
    let email = normalize_email(email)?;
    let name = normalize_name(name)?;
    check_strength(password).map_err(AppError::bad_request)?;

    let user = state
        .store
        .create_user(
            NewUser {
                email,
                password_hash: hash_password(password)?,
                name,
                role: Role::Standard,
            },
            DEFAULT_CATEGORIES,
        )
        .await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

pub async fn login(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<(IssuedToken, User), AppError> {
    let email = email.trim().to_lowercase();
    let Some(user) = state.store.find_user_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(CredentialError::InvalidCredentials.into());
    };

    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(CredentialError::InvalidCredentials.into());
    }
    if !user.is_active {
        warn!(user_id = %user.id, "login to disabled account");
        return Err(CredentialError::AccountDisabled.into());
    }

    let issued = JwtKeys::from_ref(state).issue(user.id, user.role, state.clock.now())?;
    info!(user_id = %user.id, "user logged in");
    Ok((issued, user))
}

pub async fn update_profile(
    state: &AppState,
    user_id: Uuid,
    email: Option<&str>,
    name: Option<&str>,
) -> Result<User, AppError> {
    let patch = UserPatch {
        email: email.map(normalize_email).transpose()?,
        name: name.map(normalize_name).transpose()?,
    };
    state
        .store
        .update_user(user_id, patch)
        .await?
        .ok_or(AppError::NotFound("User"))
}

pub async fn change_password(
    state: &AppState,
    user: &User,
    current: &str,
    new: &str,
) -> Result<(), AppError> {
    if !verify_password(current, &user.password_hash)? {
        warn!(user_id = %user.id, "password change with wrong current password");
        return Err(AppError::bad_request("Current password is incorrect"));
    }
    check_strength(new).map_err(AppError::bad_request)?;

    if !state
        .store
        .set_password_hash(user.id, &hash_password(new)?)
        .await?
    {
        return Err(AppError::NotFound("User"));
    }
    info!(user_id = %user.id, "password changed");
    Ok(())
}

pub async fn delete_account(state: &AppState, user: &User, password: &str) -> Result<(), AppError> {
    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id, "account deletion with wrong password");
        return Err(AppError::bad_request("Password is incorrect"));
    }
    state.store.delete_user(user.id).await?;
    info!(user_id = %user.id, "account deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn email_regex_accepts_and_rejects() {
        assert!(is_valid_email("user@example.com"));
        assert!(!is_valid_email("user@example"));
        assert!(!is_valid_email("user example.com"));
        assert_eq!(normalize_email("  Ann@Example.COM ").unwrap(), "ann@example.com");
    }

    #[tokio::test]
    async fn register_seeds_default_categories_and_rejects_duplicates() {
        let (state, _fakes) = AppState::fake();
        let user = register(&state, "Ann@Example.com", "passw0rdA", "Ann")
            .await
            .unwrap();
        assert_eq!(user.email, "ann@example.com");
        assert_eq!(user.role, Role::Standard);
        assert!(user.is_active);

        let cats = state.store.list_categories(user.id, None).await.unwrap();
        assert_eq!(cats.len(), DEFAULT_CATEGORIES.len());
        assert!(cats.iter().all(|c| c.is_default));

        let dup = register(&state, "ann@example.com", "passw0rdA", "Ann 2")
            .await
            .unwrap_err();
        assert!(matches!(dup, AppError::Conflict(_)));
        assert!(matches!(
            AppError::from(StoreError::Conflict("Email")),
            AppError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn register_validates_input() {
        let (state, _fakes) = AppState::fake();
        for (email, password, name) in [
            ("bad-email", "passw0rdA", "Ann"),
            ("ann@example.com", "short1", "Ann"),
            ("ann@example.com", "passw0rdA", "   "),
        ] {
            let err = register(&state, email, password, name).await.unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{email} {password} {name}");
        }
    }

    #[tokio::test]
    async fn login_checks_password_before_active_flag() {
        let (state, _fakes) = AppState::fake();
        let user = register(&state, "ann@example.com", "passw0rdA", "Ann")
            .await
            .unwrap();

        let (issued, logged_in) = login(&state, "ANN@example.com", "passw0rdA").await.unwrap();
        assert_eq!(logged_in.id, user.id);
        let claims = JwtKeys::from_ref(&state)
            .validate(&issued.token, state.clock.now())
            .unwrap();
        assert_eq!(claims.user_id, user.id);

        let wrong = login(&state, "ann@example.com", "nope").await.unwrap_err();
        assert!(matches!(
            wrong,
            AppError::Credential(CredentialError::InvalidCredentials)
        ));
        let unknown = login(&state, "bob@example.com", "passw0rdA").await.unwrap_err();
        assert!(matches!(
            unknown,
            AppError::Credential(CredentialError::InvalidCredentials)
        ));

        state.store.set_user_active(user.id, false).await.unwrap();
        let disabled = login(&state, "ann@example.com", "passw0rdA").await.unwrap_err();
        assert!(matches!(
            disabled,
            AppError::Credential(CredentialError::AccountDisabled)
        ));
        let guessed = login(&state, "ann@example.com", "wrong").await.unwrap_err();
        assert!(matches!(
            guessed,
            AppError::Credential(CredentialError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn change_password_requires_current() {
        let (state, _fakes) = AppState::fake();
        let user = register(&state, "ann@example.com", "passw0rdA", "Ann")
            .await
            .unwrap();

        let err = change_password(&state, &user, "wrong", "newpassw0rd")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        change_password(&state, &user, "passw0rdA", "newpassw0rd")
            .await
            .unwrap();
        assert!(login(&state, "ann@example.com", "newpassw0rd").await.is_ok());
    }
}
