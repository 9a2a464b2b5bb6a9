//! Authentication API handlers
//!
//! Provides HTTP endpoints for registration, login, token refresh, logout,
//! and the current user's profile.
//!
//! Author: hephaex@gmail.com

use crate::audit::RequestMeta;
use crate::auth::{AuthError, BearerToken, Identity, LoginRequest, RegisterRequest, TokenResponse};
use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Registration response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub id: String,
    pub login: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

/// Logout response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub message: String,
}

/// Current user profile
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub id: String,
    pub login: String,
    pub first_name: String,
    pub last_name: String,
    /// Role names, sorted
    pub roles: Vec<String>,
}

/// Register a new user account
///
/// # Responses
///
/// * `201 Created` - User registered
/// * `400 Bad Request` - Login not 3-64 characters or password shorter than 6
/// * `409 Conflict` - Login already taken
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = RegisterResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Login already taken", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.register(request, &meta).await?;

    let response = RegisterResponse {
        id: user.id.to_string(),
        login: user.login,
        first_name: user.first_name,
        last_name: user.last_name,
        created_at: user.created_at,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Login with login and password
///
/// Opens a new session and returns an access/refresh token pair. The
/// client's User-Agent is recorded in the login history.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 503, description = "Session store unavailable", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let response = state.auth.login(request, &meta).await?;
    Ok(Json(response))
}

/// Rotate a refresh token
///
/// The refresh token is sent as `Authorization: Bearer <refresh_token>`.
/// It is consumed; presenting it again fails with 401.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "auth",
    responses(
        (status = 200, description = "Token refreshed successfully", body = TokenResponse),
        (status = 401, description = "Invalid, expired, revoked or reused refresh token", body = crate::error::ApiError),
        (status = 503, description = "Session store unavailable", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    BearerToken(refresh_token): BearerToken,
) -> Result<Json<TokenResponse>, AuthError> {
    let response = state.auth.refresh(&refresh_token, &meta).await?;
    Ok(Json(response))
}

/// Logout the current session
///
/// Closes the session of the presented access token and revokes the token.
/// Logging out again with the same, already revoked token succeeds.
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logout successful", body = LogoutResponse),
        (status = 401, description = "Invalid or missing access token", body = crate::error::ApiError),
        (status = 503, description = "Session store unavailable", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    meta: RequestMeta,
    BearerToken(access_token): BearerToken,
) -> Result<Json<LogoutResponse>, AuthError> {
    let message = match state.guard.authenticate(&access_token).await {
        Ok(identity) => {
            state.auth.logout(&identity, &access_token, &meta).await?;
            "Logged out successfully"
        }
        Err(AuthError::TokenRevoked) => "Already logged out",
        Err(e) => return Err(e),
    };

    Ok(Json(LogoutResponse {
        message: message.to_string(),
    }))
}

/// Get current user profile
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me_handler(Extension(identity): Extension<Identity>) -> Json<MeResponse> {
    let mut roles: Vec<String> = identity.roles.into_iter().collect();
    roles.sort();

    Json(MeResponse {
        id: identity.user_id.to_string(),
        login: identity.login,
        first_name: identity.first_name,
        last_name: identity.last_name,
        roles,
    })
}
