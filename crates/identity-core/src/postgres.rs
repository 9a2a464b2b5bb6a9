//! PostgreSQL identity store
//!
//! Implements the credential, role, and login history stores using SQLx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashSet;
use uuid::Uuid;

use crate::store::{CredentialStore, LoginHistoryStore, RoleStore};
use crate::{IdentityError, LoginHistoryEntry, NewUser, PageParams, Result, Role, UserRecord};

/// Tables used by the identity service; safe to run repeatedly
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY,
    login VARCHAR(64) NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    first_name VARCHAR(255) NOT NULL DEFAULT '',
    last_name VARCHAR(255) NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS roles (
    id UUID PRIMARY KEY,
    name VARCHAR(64) NOT NULL UNIQUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS user_roles (
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role_id UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    PRIMARY KEY (user_id, role_id)
);

CREATE TABLE IF NOT EXISTS login_history (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    user_agent TEXT,
    login_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_login_history_user_time
    ON login_history (user_id, login_at DESC);
"#;

/// PostgreSQL-backed store for users, roles, and login history
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    /// Create a new store connection
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| IdentityError::DatabaseError(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create missing tables and indexes
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| IdentityError::DatabaseError(format!("Failed to create schema: {e}")))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Map a write error, turning constraint violations into domain errors
fn write_error(e: sqlx::Error, conflict: impl FnOnce() -> String) -> IdentityError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => IdentityError::Conflict(conflict()),
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            IdentityError::NotFound("Referenced user or role does not exist".to_string())
        }
        _ => IdentityError::DatabaseError(e.to_string()),
    }
}

fn read_error(e: sqlx::Error) -> IdentityError {
    IdentityError::DatabaseError(e.to_string())
}

#[async_trait]
impl CredentialStore for PgIdentityStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<UserRecord>> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, login, password_hash, first_name, last_name, created_at FROM users WHERE login = $1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await
        .map_err(read_error)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, login, password_hash, first_name, last_name, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(read_error)
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        let record = user.into_record();

        sqlx::query(
            r#"
            INSERT INTO users (id, login, password_hash, first_name, last_name, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(&record.login)
        .bind(&record.password_hash)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, || format!("Login '{}' is already taken", record.login)))?;

        Ok(record)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| IdentityError::DatabaseError(format!("PostgreSQL ping failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl RoleStore for PgIdentityStore {
    async fn roles_of(&self, user_id: Uuid) -> Result<HashSet<String>> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.name FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        Ok(names.into_iter().collect())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        sqlx::query_as::<_, Role>("SELECT id, name, created_at FROM roles ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(read_error)
    }

    async fn find_role(&self, id: Uuid) -> Result<Option<Role>> {
        sqlx::query_as::<_, Role>("SELECT id, name, created_at FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(read_error)
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        sqlx::query_as::<_, Role>("SELECT id, name, created_at FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(read_error)
    }

    async fn create_role(&self, name: &str) -> Result<Role> {
        let role = Role::new(name);

        sqlx::query("INSERT INTO roles (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(role.id)
            .bind(&role.name)
            .bind(role.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(e, || format!("Role '{name}' already exists")))?;

        Ok(role)
    }

    async fn rename_role(&self, id: Uuid, name: &str) -> Result<Role> {
        sqlx::query_as::<_, Role>(
            "UPDATE roles SET name = $2 WHERE id = $1 RETURNING id, name, created_at",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| write_error(e, || format!("Role '{name}' already exists")))?
        .ok_or_else(|| IdentityError::NotFound(format!("Role {id} not found")))
    }

    async fn delete_role(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(read_error)?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::NotFound(format!("Role {id} not found")));
        }
        Ok(())
    }

    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<()> {
        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(e, || "User already has this role".to_string()))?;
        Ok(())
    }

    async fn remove_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(read_error)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl LoginHistoryStore for PgIdentityStore {
    async fn append(
        &self,
        user_id: Uuid,
        user_agent: Option<&str>,
        login_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO login_history (id, user_id, user_agent, login_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(user_agent)
        .bind(login_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, || "Duplicate login history entry".to_string()))?;
        Ok(())
    }

    async fn list(&self, user_id: Uuid, page: PageParams) -> Result<Vec<LoginHistoryEntry>> {
        sqlx::query_as::<_, LoginHistoryEntry>(
            r#"
            SELECT id, user_id, user_agent, login_at FROM login_history
            WHERE user_id = $1
            ORDER BY login_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)
    }
}
