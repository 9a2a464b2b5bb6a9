//! Authentication middleware for protecting routes
//!
//! Extracts the bearer token from the Authorization header and resolves it
//! through the [`AuthGuard`](super::guard::AuthGuard). On success the
//! resolved [`Identity`] and the raw [`BearerToken`] are added to request
//! extensions.

use super::guard::Identity;
use super::jwt::JwtError;
use super::registry::RegistryError;
use crate::audit::{audit_log, AuditEvent, RequestMeta};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use identity_core::IdentityError;
use std::sync::Arc;
use thiserror::Error;

/// Authentication and session errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    #[error("Invalid Authorization header format")]
    InvalidAuthHeader,

    #[error("Invalid login or password")]
    InvalidCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] JwtError),

    #[error("Refresh token revoked or already used")]
    TokenRevokedOrReused,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Token subject does not resolve to a user")]
    Unauthenticated,

    #[error("Insufficient permissions: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] IdentityError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::InvalidCredentials
            | AuthError::InvalidToken(_)
            | AuthError::TokenRevokedOrReused
            | AuthError::TokenRevoked
            | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::Registry(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Store(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::InvalidCredentials
            | AuthError::TokenRevokedOrReused
            | AuthError::TokenRevoked => ApiError::unauthorized(self.to_string()),
            AuthError::InvalidToken(_) => ApiError::unauthorized("Invalid or expired token"),
            AuthError::Unauthenticated => ApiError::unauthorized("Authentication required"),
            AuthError::Forbidden(msg) => ApiError::forbidden(msg.clone()),
            AuthError::Registry(e) => {
                tracing::error!(error = %e, "Session registry failure");
                ApiError::new("SERVICE_UNAVAILABLE", "Session store unavailable")
            }
            AuthError::Store(e) => {
                tracing::error!(error = %e, "Identity store failure");
                ApiError::internal_error()
            }
            AuthError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal authentication error");
                ApiError::internal_error()
            }
        };

        (status, Json(error)).into_response()
    }
}

/// Read the bearer token from the Authorization header
pub fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(str::trim)
        .ok_or(AuthError::InvalidAuthHeader)?;

    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token.to_string())
}

/// Raw bearer token of the current request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(token) = parts.extensions.get::<BearerToken>() {
            return Ok(token.clone());
        }
        bearer_token(&parts.headers).map(BearerToken)
    }
}

/// Authentication middleware that requires a valid, unrevoked access token
///
/// # Usage
///
/// ```ignore
/// use axum::{middleware, routing::get, Router};
/// use identity_api::auth::auth_middleware;
///
/// let app = Router::new()
///     .route("/auth/me", get(me_handler))
///     .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
///
/// In handlers, extract the identity with `Extension<Identity>`.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer_token(request.headers())?;

    let identity = match state.guard.authenticate(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            if e.status() == StatusCode::UNAUTHORIZED {
                let meta = RequestMeta::from_headers(request.headers());
                audit_log(&AuditEvent::InvalidToken {
                    ip_address: meta.ip_address,
                    user_agent: meta.user_agent,
                    reason: e.to_string(),
                });
            }
            return Err(e);
        }
    };

    request.extensions_mut().insert(identity);
    request.extensions_mut().insert(BearerToken(token));

    Ok(next.run(request).await)
}
