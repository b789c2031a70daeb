use axum::extract::FromRef;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::{
    claims::{Claims, SessionClaims},
    repo_types::Role,
};
use crate::{config::JwtConfig, error::AuthError, state::AppState};

/// HS256 signing and verification keys with issuer/audience and TTL.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::new(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::minutes(cfg.ttl_minutes),
        }
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        role: Role,
        now: OffsetDateTime,
    ) -> anyhow::Result<IssuedToken> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user_id,
            role: role.as_str().to_owned(),
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id = %user_id, role = %role, "jwt signed");
        Ok(IssuedToken { token, expires_at })
    }

    /// Expiry is checked against `now` rather than the library's wall clock.
    pub fn validate(&self, token: &str, now: OffsetDateTime) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidIssuer
                | ErrorKind::InvalidAudience
                | ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Malformed,
            }
        })?;
        let c = data.claims;

        let role: Role = c.role.parse().map_err(|_| AuthError::Malformed)?;
        let issued_at =
            OffsetDateTime::from_unix_timestamp(c.iat).map_err(|_| AuthError::Malformed)?;
        let expires_at =
            OffsetDateTime::from_unix_timestamp(c.exp).map_err(|_| AuthError::Malformed)?;
        if now >= expires_at {
            return Err(AuthError::Expired);
        }

        debug!(user_id = %c.sub, role = %role, "jwt verified");
        Ok(SessionClaims {
            user_id: c.sub,
            role,
            issued_at,
            expires_at,
        })
    }
}
