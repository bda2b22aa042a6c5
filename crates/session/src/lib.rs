//! Session tokens for callers authenticated by the hosted identity provider.
//!
//! The provider and this service share an HS256 secret. A token's `sub` is the
//! caller's user id; `iss` must match the configured issuer.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::domain::UserId;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub issuer: String,
    pub secret: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    sub: String,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session token rejected: {0}")]
    Rejected(#[from] jsonwebtoken::errors::Error),
    #[error("session subject '{0}' is not a user id")]
    MalformedSubject(String),
    #[error("session ttl of {0} seconds is out of range")]
    InvalidTtl(i64),
}

pub fn mint_token(cfg: &SessionConfig, user_id: UserId) -> Result<String, SessionError> {
    let now = Utc::now();
    let exp = Duration::try_seconds(cfg.ttl_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or(SessionError::InvalidTtl(cfg.ttl_seconds))?;
    let claims = Claims {
        iss: cfg.issuer.clone(),
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )?)
}

/// Checks signature, expiry and issuer and returns the caller's id.
pub fn verify_token(cfg: &SessionConfig, token: &str) -> Result<UserId, SessionError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[cfg.issuer.as_str()]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &validation,
    )?;
    data.claims
        .sub
        .parse()
        .map_err(|_| SessionError::MalformedSubject(data.claims.sub))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
