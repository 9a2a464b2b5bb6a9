//! Identity API Server
//!
//! REST API server for the identity session service.
//!
//! Author: hephaex@gmail.com

use identity_api::auth::{InMemorySessionRegistry, SessionRegistry};
use identity_api::{create_router, state::AppState};
use identity_core::{AppConfig, PgIdentityStore, RegistryBackend, Stores};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if config.jwt.uses_dev_secret() {
        tracing::warn!("JWT_SECRET is not set; using the development signing secret");
    }

    // Identity store
    let store = Arc::new(
        PgIdentityStore::new(&config.database.postgres_url, config.database.pool_size).await?,
    );
    store.init_schema().await?;
    tracing::info!("Connected to PostgreSQL");

    // Session registry
    let registry = build_registry(&config).await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create application state
    let state = Arc::new(AppState::new(config, Stores::shared(store.clone()), registry));

    // Create router
    let app = create_router(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Identity API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    state.registry.close().await;
    store.close().await;
    tracing::info!("Identity API Server stopped");

    Ok(())
}

async fn build_registry(config: &AppConfig) -> anyhow::Result<Arc<dyn SessionRegistry>> {
    match config.registry.backend {
        RegistryBackend::Redis => connect_redis(&config.registry.redis_url).await,
        RegistryBackend::Memory => {
            tracing::warn!(
                "Using in-memory session registry; sessions are lost on restart and not shared between instances"
            );
            let registry = Arc::new(InMemorySessionRegistry::new());
            registry.spawn_reaper(Duration::from_secs(60));
            Ok(registry)
        }
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str) -> anyhow::Result<Arc<dyn SessionRegistry>> {
    let registry = identity_api::auth::RedisSessionRegistry::connect(url).await?;
    Ok(Arc::new(registry))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_url: &str) -> anyhow::Result<Arc<dyn SessionRegistry>> {
    anyhow::bail!("SESSION_BACKEND=redis requires building with the `redis` feature")
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    state.set_ready(false);
    tracing::info!("Shutdown signal received, draining connections");
}
