//! One-time password reset tokens.
//!
//! A token is `Issued` until it is either consumed (terminal) or its expiry
//! passes. Only the SHA-256 digest of the token is stored; the plaintext
//! travels exclusively inside the emailed link.

use std::sync::Arc;

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sha2::{Digest, Sha256};
use time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{password::hash_password, repo_types::NewResetToken};
use crate::{
    clock::Clock,
    config::AppConfig,
    error::{AppError, ResetError},
    notify::{password_changed_email, reset_email, Notifier, OutgoingEmail},
    state::AppState,
    store::{DataStore, RedeemOutcome},
};

const TOKEN_LEN: usize = 43;

pub fn generate_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub struct PasswordResetService<'a> {
    store: &'a dyn DataStore,
    notifier: Arc<dyn Notifier>,
    clock: &'a dyn Clock,
    config: &'a AppConfig,
}

impl<'a> PasswordResetService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            store: state.store.as_ref(),
            notifier: state.notifier.clone(),
            clock: state.clock.as_ref(),
            config: state.config.as_ref(),
        }
    }

    /// Issues a token and mails the link. Reports success whether or not
    /// the email belongs to an account.
    pub async fn request(&self, email: &str) -> Result<(), AppError> {
        let email = email.trim().to_lowercase();
        let user = match self.store.find_user_by_email(&email).await? {
            Some(u) if u.is_active => u,
            Some(u) => {
                debug!(user_id = %u.id, "reset requested for inactive account, ignoring");
                return Ok(());
            }
            None => {
                debug!("reset requested for unknown email");
                return Ok(());
            }
        };

        // a new request supersedes any link sent earlier
        let superseded = self.store.invalidate_reset_tokens(user.id).await?;

        let now = self.clock.now();
        let token = generate_token();
        self.store
            .insert_reset_token(NewResetToken {
                user_id: user.id,
                token_hash: token_digest(&token),
                expires_at: now + Duration::minutes(self.config.reset.ttl_minutes),
                created_at: now,
            })
            .await?;
        info!(user_id = %user.id, superseded, "password reset token issued");

        let mail = reset_email(
            &user.email,
            &user.name,
            &self.config.reset_link(&token),
            self.config.reset.ttl_minutes,
        );
        self.dispatch(mail, user.id, "reset");
        Ok(())
    }

    /// Sets a new password using a reset token. Returns the affected user id.
    pub async fn consume(&self, token: &str, new_password: &str) -> Result<Uuid, AppError> {
        let digest = token_digest(token);
        let record = self
            .store
            .find_reset_token(&digest)
            .await?
            .ok_or(ResetError::TokenNotFound)?;

        let now = self.clock.now();
        if record.consumed {
            return Err(ResetError::TokenAlreadyUsed.into());
        }
        if now >= record.expires_at {
            return Err(ResetError::TokenExpired.into());
        }

        let new_hash = hash_password(new_password)?;
        let user_id = match self.store.redeem_reset_token(&digest, &new_hash, now).await? {
            RedeemOutcome::Redeemed { user_id } => user_id,
            RedeemOutcome::Lost => {
                warn!(user_id = %record.user_id, "reset token lost a concurrent redemption");
                return Err(self.classify_lost(&digest, now).await?.into());
            }
        };
        info!(user_id = %user_id, "password reset");

        if let Some(user) = self.store.find_user(user_id).await? {
            self.dispatch(
                password_changed_email(&user.email, &user.name, now),
                user_id,
                "password changed",
            );
        }
        Ok(user_id)
    }

    /// Hands the email to a background task so the caller's latency never
    /// depends on the mail relay.
    fn dispatch(&self, mail: OutgoingEmail, user_id: Uuid, kind: &'static str) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.send(mail).await {
                error!(error = ?e, user_id = %user_id, kind, "failed to send email");
            }
        });
    }

    async fn classify_lost(
        &self,
        digest: &str,
        now: time::OffsetDateTime,
    ) -> Result<ResetError, AppError> {
        Ok(match self.store.find_reset_token(digest).await? {
            None => ResetError::TokenNotFound,
            Some(t) if t.consumed => ResetError::TokenAlreadyUsed,
            Some(t) if now >= t.expires_at => ResetError::TokenExpired,
            Some(_) => ResetError::TokenAlreadyUsed,
        })
    }
}
