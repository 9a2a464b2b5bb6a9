//! Role management handlers
//!
//! Every endpoint here requires the `superuser` role.
//!
//! Author: hephaex@gmail.com

use crate::audit::{audit_log, AuditEvent};
use crate::auth::{require_role, Identity};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use identity_core::{Role, SUPERUSER_ROLE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Role as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RoleResponse {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<Role> for RoleResponse {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            name: role.name,
            created_at: role.created_at,
        }
    }
}

/// Create or rename a role
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RoleRequest {
    #[validate(length(min = 1, max = 64, message = "role name must be 1 to 64 characters"))]
    pub name: String,
}

/// Grant or revoke a role
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleAssignmentRequest {
    pub user_id: Uuid,
    pub role_id: Uuid,
}

/// Generic confirmation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// List all roles
#[utoipa::path(
    get,
    path = "/api/v1/roles",
    tag = "roles",
    responses(
        (status = 200, description = "All roles", body = Vec<RoleResponse>),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "Superuser role required", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<RoleResponse>>, AppError> {
    require_role(&identity, SUPERUSER_ROLE)?;

    let roles = state.roles.list_roles().await?;
    Ok(Json(roles.into_iter().map(RoleResponse::from).collect()))
}

/// Create a role
#[utoipa::path(
    post,
    path = "/api/v1/roles",
    tag = "roles",
    request_body = RoleRequest,
    responses(
        (status = 201, description = "Role created", body = RoleResponse),
        (status = 400, description = "Invalid role name", body = crate::error::ApiError),
        (status = 403, description = "Superuser role required", body = crate::error::ApiError),
        (status = 409, description = "Role already exists", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_role(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<RoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_role(&identity, SUPERUSER_ROLE)?;
    request.validate()?;

    let role = state.roles.create_role(&request.name).await?;
    tracing::info!(role = %role.name, actor = %identity.user_id, "Role created");

    Ok((StatusCode::CREATED, Json(RoleResponse::from(role))))
}

/// Rename a role
#[utoipa::path(
    put,
    path = "/api/v1/roles/{id}",
    tag = "roles",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = RoleRequest,
    responses(
        (status = 200, description = "Role renamed", body = RoleResponse),
        (status = 400, description = "Invalid role name or protected role", body = crate::error::ApiError),
        (status = 403, description = "Superuser role required", body = crate::error::ApiError),
        (status = 404, description = "Role not found", body = crate::error::ApiError),
        (status = 409, description = "Role name taken", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_role(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(request): Json<RoleRequest>,
) -> Result<Json<RoleResponse>, AppError> {
    require_role(&identity, SUPERUSER_ROLE)?;
    request.validate()?;

    let role = find_role(&state, id).await?;
    if role.is_protected() && role.name != request.name {
        return Err(AppError::BadRequest(format!(
            "Role '{}' cannot be renamed",
            role.name
        )));
    }

    let role = state.roles.rename_role(id, &request.name).await?;
    Ok(Json(RoleResponse::from(role)))
}

/// Delete a role
#[utoipa::path(
    delete,
    path = "/api/v1/roles/{id}",
    tag = "roles",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role deleted", body = MessageResponse),
        (status = 400, description = "Protected role", body = crate::error::ApiError),
        (status = 403, description = "Superuser role required", body = crate::error::ApiError),
        (status = 404, description = "Role not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    require_role(&identity, SUPERUSER_ROLE)?;

    let role = find_role(&state, id).await?;
    if role.is_protected() {
        return Err(AppError::BadRequest(format!(
            "Role '{}' cannot be deleted",
            role.name
        )));
    }

    state.roles.delete_role(id).await?;
    tracing::info!(role = %role.name, actor = %identity.user_id, "Role deleted");

    Ok(Json(MessageResponse {
        message: format!("Role '{}' deleted", role.name),
    }))
}

/// Grant a role to a user
#[utoipa::path(
    post,
    path = "/api/v1/roles/assign",
    tag = "roles",
    request_body = RoleAssignmentRequest,
    responses(
        (status = 200, description = "Role assigned", body = MessageResponse),
        (status = 403, description = "Superuser role required", body = crate::error::ApiError),
        (status = 404, description = "User or role not found", body = crate::error::ApiError),
        (status = 409, description = "User already has the role", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn assign_role(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<RoleAssignmentRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    require_role(&identity, SUPERUSER_ROLE)?;

    let (user_login, role) = find_user_and_role(&state, &request).await?;
    state.roles.assign_role(request.user_id, role.id).await?;

    audit_log(&AuditEvent::RoleAssigned {
        actor_id: identity.user_id,
        user_id: request.user_id,
        role: role.name.clone(),
    });

    Ok(Json(MessageResponse {
        message: format!("Role '{}' assigned to '{}'", role.name, user_login),
    }))
}

/// Revoke a role from a user
#[utoipa::path(
    post,
    path = "/api/v1/roles/remove",
    tag = "roles",
    request_body = RoleAssignmentRequest,
    responses(
        (status = 200, description = "Role removed", body = MessageResponse),
        (status = 403, description = "Superuser role required", body = crate::error::ApiError),
        (status = 404, description = "User, role, or assignment not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn remove_role(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<RoleAssignmentRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    require_role(&identity, SUPERUSER_ROLE)?;

    let (user_login, role) = find_user_and_role(&state, &request).await?;
    if !state.roles.remove_role(request.user_id, role.id).await? {
        return Err(AppError::NotFound(format!(
            "User '{}' does not have role '{}'",
            user_login, role.name
        )));
    }

    audit_log(&AuditEvent::RoleRemoved {
        actor_id: identity.user_id,
        user_id: request.user_id,
        role: role.name.clone(),
    });

    Ok(Json(MessageResponse {
        message: format!("Role '{}' removed from '{}'", role.name, user_login),
    }))
}

async fn find_role(state: &AppState, id: Uuid) -> Result<Role, AppError> {
    state
        .roles
        .find_role(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Role {id} not found")))
}

async fn find_user_and_role(
    state: &AppState,
    request: &RoleAssignmentRequest,
) -> Result<(String, Role), AppError> {
    let user = state
        .credentials
        .find_by_id(request.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", request.user_id)))?;
    let role = find_role(state, request.role_id).await?;
    Ok((user.login, role))
}
