//! Identity Core - Domain models, errors, and configuration
//!
//! This crate defines the shared vocabulary of the identity service:
//! - User, role, and login history records
//! - Pagination parameters for history queries
//! - Common error types
//! - Configuration management
//! - Store traits with PostgreSQL and in-memory implementations

pub mod config;
pub mod memory;
pub mod postgres;
pub mod store;

pub use config::{
    AppConfig, ConfigError, DatabaseConfig, JwtConfig, LoggingConfig, RegistryBackend,
    RegistryConfig, ServerConfig,
};
pub use memory::InMemoryIdentityStore;
pub use postgres::PgIdentityStore;
pub use store::{CredentialStore, LoginHistoryStore, RoleStore, Stores};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Name of the role that gates role management.
pub const SUPERUSER_ROLE: &str = "superuser";

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by stores and other collaborators of the session engine
#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

pub type Result<T> = std::result::Result<T, IdentityError>;

// ============================================================================
// Users
// ============================================================================

/// Stored user credentials and profile
///
/// `password_hash` is an Argon2 PHC string and never leaves the service.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub login: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a user; the password is already hashed
#[derive(Debug, Clone)]
pub struct NewUser {
    pub login: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
}

impl NewUser {
    pub fn into_record(self) -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            login: self.login,
            password_hash: self.password_hash,
            first_name: self.first_name,
            last_name: self.last_name,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Named role; users hold zero or more of these
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }

    /// Roles that may not be deleted
    pub fn is_protected(&self) -> bool {
        self.name == SUPERUSER_ROLE
    }
}

// ============================================================================
// Login History
// ============================================================================

/// One successful login, append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LoginHistoryEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_agent: Option<String>,
    pub login_at: DateTime<Utc>,
}

/// Page selector for history listings (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    pub page_number: u32,
    pub page_size: u32,
}

impl PageParams {
    pub const DEFAULT_PAGE_SIZE: u32 = 50;
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn new(page_number: u32, page_size: u32) -> Self {
        Self {
            page_number: page_number.max(1),
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    /// Number of records to skip
    pub fn offset(&self) -> u64 {
        u64::from(self.page_number.saturating_sub(1)) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_params_offset() {
        assert_eq!(PageParams::new(1, 50).offset(), 0);
        assert_eq!(PageParams::new(3, 20).offset(), 40);
    }

    #[test]
    fn test_page_params_are_clamped() {
        let page = PageParams::new(0, 500);
        assert_eq!(page.page_number, 1);
        assert_eq!(page.page_size, PageParams::MAX_PAGE_SIZE);

        assert_eq!(PageParams::new(2, 0).page_size, 1);
    }

    #[test]
    fn test_superuser_role_is_protected() {
        assert!(Role::new(SUPERUSER_ROLE).is_protected());
        assert!(!Role::new("admin").is_protected());
    }

    #[test]
    fn test_new_user_into_record() {
        let record = NewUser {
            login: "alice".to_string(),
            password_hash: "$argon2id$...".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Liddell".to_string(),
        }
        .into_record();

        assert_eq!(record.login, "alice");
        assert!(!record.id.is_nil());
    }
}
