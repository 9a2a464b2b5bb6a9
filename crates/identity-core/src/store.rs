//! Storage traits for users, roles, and login history
//!
//! The session engine depends only on these traits; PostgreSQL and in-memory
//! implementations live in [`crate::postgres`] and [`crate::memory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::{LoginHistoryEntry, NewUser, PageParams, Result, Role, UserRecord};

/// Lookup and creation of user credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_login(&self, login: &str) -> Result<Option<UserRecord>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>>;

    /// Insert a user; fails with `Conflict` when the login is taken
    async fn create_user(&self, user: NewUser) -> Result<UserRecord>;

    /// Check backend connectivity
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Role catalogue and user-role assignments
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Names of every role the user holds
    async fn roles_of(&self, user_id: Uuid) -> Result<HashSet<String>>;

    async fn list_roles(&self) -> Result<Vec<Role>>;

    async fn find_role(&self, id: Uuid) -> Result<Option<Role>>;

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>>;

    /// Fails with `Conflict` when the name is taken
    async fn create_role(&self, name: &str) -> Result<Role>;

    /// Fails with `NotFound` or `Conflict`
    async fn rename_role(&self, id: Uuid, name: &str) -> Result<Role>;

    /// Delete a role and all its assignments; fails with `NotFound`
    async fn delete_role(&self, id: Uuid) -> Result<()>;

    /// Fails with `Conflict` when the user already holds the role
    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<()>;

    /// Returns `false` when the user did not hold the role
    async fn remove_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool>;
}

/// Append-only record of successful logins
#[async_trait]
pub trait LoginHistoryStore: Send + Sync {
    async fn append(
        &self,
        user_id: Uuid,
        user_agent: Option<&str>,
        login_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Entries for one user, newest first
    async fn list(&self, user_id: Uuid, page: PageParams) -> Result<Vec<LoginHistoryEntry>>;
}

/// The three stores the service runs against
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub roles: Arc<dyn RoleStore>,
    pub history: Arc<dyn LoginHistoryStore>,
}

impl Stores {
    /// Use one backend for all three stores
    pub fn shared<T>(store: Arc<T>) -> Self
    where
        T: CredentialStore + RoleStore + LoginHistoryStore + 'static,
    {
        Self {
            credentials: store.clone(),
            roles: store.clone(),
            history: store,
        }
    }
}
