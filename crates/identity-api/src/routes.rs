//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::auth_middleware;
use crate::handlers::{auth, roles, users};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

/// Create API v1 routes
pub fn api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes; refresh and logout read their token themselves
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Protected routes (valid access token required)
    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route("/user/login-history", get(users::login_history_handler))
        // Role management (superuser only)
        .route("/roles", get(roles::list_roles).post(roles::create_role))
        .route("/roles/assign", post(roles::assign_role))
        .route("/roles/remove", post(roles::remove_role))
        .route("/roles/:id", put(roles::update_role).delete(roles::delete_role))
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new().merge(public_routes).merge(protected_routes)
}
