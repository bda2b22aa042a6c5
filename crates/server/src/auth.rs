use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    Json,
};
use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
};
use tracing::debug;

use crate::AppState;

/// The authenticated user behind a request, taken from its bearer session token.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub UserId);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| unauthorized("missing bearer token"))?;
        let user_id = session::verify_token(&state.session, token).map_err(|error| {
            debug!(%error, "session token rejected");
            unauthorized("invalid or expired session token")
        })?;
        Ok(Caller(user_id))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn unauthorized(message: &str) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiError::new(ErrorCode::Unauthorized, message)),
    )
}

#[cfg(test)]
#[path = "tests/auth_tests.rs"]
mod tests;
