//! Application state management
//!
//! Author: hephaex@gmail.com

use crate::auth::{AuthGuard, AuthService, PasswordConfig, SessionRegistry, TokenSigner};
use identity_core::{AppConfig, CredentialStore, LoginHistoryStore, RoleStore, Stores};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Ready status
    pub is_ready: AtomicBool,
    /// Register, login, refresh, and logout
    pub auth: AuthService,
    /// Access token resolution
    pub guard: AuthGuard,
    pub credentials: Arc<dyn CredentialStore>,
    pub roles: Arc<dyn RoleStore>,
    pub history: Arc<dyn LoginHistoryStore>,
    pub registry: Arc<dyn SessionRegistry>,
}

impl AppState {
    /// Wire the services over the given stores and session registry
    pub fn new(config: AppConfig, stores: Stores, registry: Arc<dyn SessionRegistry>) -> Self {
        let signer = TokenSigner::new(&config.jwt);
        let auth = AuthService::new(
            signer.clone(),
            stores.credentials.clone(),
            stores.history.clone(),
            registry.clone(),
        );
        let guard = AuthGuard::new(
            signer,
            registry.clone(),
            stores.credentials.clone(),
            stores.roles.clone(),
        );

        Self {
            config,
            start_time: Instant::now(),
            is_ready: AtomicBool::new(true),
            auth,
            guard,
            credentials: stores.credentials,
            roles: stores.roles,
            history: stores.history,
            registry,
        }
    }

    /// Override the Argon2 parameters used at registration
    pub fn with_password_config(mut self, config: PasswordConfig) -> Self {
        self.auth = self.auth.with_password_config(config);
        self
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if service is accepting traffic
    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    /// Set ready status; cleared while shutting down
    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::SeqCst);
    }
}
