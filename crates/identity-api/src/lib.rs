//! Identity API - session and token lifecycle service
//!
//! Provides HTTP endpoints for registration, login, refresh token rotation,
//! logout, login history, and role management.
//!
//! Author: hephaex@gmail.com

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use auth::{InMemorySessionRegistry, PasswordConfig};
use axum::{http::HeaderValue, routing::get, Router};
use identity_core::{AppConfig, InMemoryIdentityStore, Stores};
use state::AppState;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI document for the identity API
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::refresh_handler,
        handlers::auth::logout_handler,
        handlers::auth::me_handler,
        handlers::users::login_history_handler,
        handlers::roles::list_roles,
        handlers::roles::create_role,
        handlers::roles::update_role,
        handlers::roles::delete_role,
        handlers::roles::assign_role,
        handlers::roles::remove_role,
    ),
    components(schemas(
        error::ApiError,
        auth::RegisterRequest,
        auth::LoginRequest,
        auth::TokenResponse,
        handlers::auth::RegisterResponse,
        handlers::auth::LogoutResponse,
        handlers::auth::MeResponse,
        handlers::users::LoginHistoryItem,
        handlers::roles::RoleResponse,
        handlers::roles::RoleRequest,
        handlers::roles::RoleAssignmentRequest,
        handlers::roles::MessageResponse,
        handlers::health::HealthResponse,
        handlers::health::ReadinessResponse,
        handlers::health::ReadinessChecks,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration, login, token refresh, and logout"),
        (name = "user", description = "Current user data"),
        (name = "roles", description = "Role management (superuser only)"),
        (name = "health", description = "Liveness and readiness probes"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// State over in-memory stores with cheap password hashing
pub fn in_memory_state(config: AppConfig) -> Arc<AppState> {
    let store = Arc::new(InMemoryIdentityStore::new());
    let registry = Arc::new(InMemorySessionRegistry::new());

    Arc::new(
        AppState::new(config, Stores::shared(store), registry)
            .with_password_config(PasswordConfig::fast()),
    )
}

/// Router over fresh in-memory state, for tests
pub fn create_router_for_testing() -> Router {
    create_router(in_memory_state(AppConfig::default()))
}
