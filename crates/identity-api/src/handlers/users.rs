//! Per-user handlers
//!
//! Author: hephaex@gmail.com

use crate::auth::Identity;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use identity_core::{LoginHistoryEntry, PageParams};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

fn default_page_number() -> u32 {
    1
}

fn default_page_size() -> u32 {
    PageParams::DEFAULT_PAGE_SIZE
}

/// Pagination query
#[derive(Debug, Clone, Deserialize, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// 1-based page number
    #[serde(default = "default_page_number")]
    #[validate(range(min = 1))]
    pub page_number: u32,
    /// Entries per page (1-100)
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, max = 100))]
    pub page_size: u32,
}

/// One login, as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginHistoryItem {
    pub user_agent: Option<String>,
    pub login_at: DateTime<Utc>,
}

impl From<LoginHistoryEntry> for LoginHistoryItem {
    fn from(entry: LoginHistoryEntry) -> Self {
        Self {
            user_agent: entry.user_agent,
            login_at: entry.login_at,
        }
    }
}

/// List the current user's logins, newest first
#[utoipa::path(
    get,
    path = "/api/v1/user/login-history",
    tag = "user",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Login history page", body = Vec<LoginHistoryItem>),
        (status = 400, description = "Invalid pagination", body = crate::error::ApiError),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn login_history_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<LoginHistoryItem>>, AppError> {
    query.validate()?;

    let page = PageParams::new(query.page_number, query.page_size);
    let entries = state.history.list(identity.user_id, page).await?;

    Ok(Json(entries.into_iter().map(LoginHistoryItem::from).collect()))
}
