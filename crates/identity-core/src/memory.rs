//! In-memory identity store for tests and local development

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{CredentialStore, LoginHistoryStore, RoleStore};
use crate::{IdentityError, LoginHistoryEntry, NewUser, PageParams, Result, Role, UserRecord};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserRecord>,
    roles: HashMap<Uuid, Role>,
    assignments: HashSet<(Uuid, Uuid)>,
    history: Vec<LoginHistoryEntry>,
}

/// Process-local store implementing every identity store trait
#[derive(Default)]
pub struct InMemoryIdentityStore {
    tables: RwLock<Tables>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryIdentityStore {
    async fn find_by_login(&self, login: &str) -> Result<Option<UserRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.login == login).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.login == user.login) {
            return Err(IdentityError::Conflict(format!(
                "Login '{}' is already taken",
                user.login
            )));
        }

        let record = user.into_record();
        tables.users.insert(record.id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl RoleStore for InMemoryIdentityStore {
    async fn roles_of(&self, user_id: Uuid) -> Result<HashSet<String>> {
        let tables = self.tables.read().await;
        Ok(tables
            .assignments
            .iter()
            .filter(|(user, _)| *user == user_id)
            .filter_map(|(_, role)| tables.roles.get(role))
            .map(|role| role.name.clone())
            .collect())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = self.tables.read().await.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn find_role(&self, id: Uuid) -> Result<Option<Role>> {
        Ok(self.tables.read().await.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let tables = self.tables.read().await;
        Ok(tables.roles.values().find(|r| r.name == name).cloned())
    }

    async fn create_role(&self, name: &str) -> Result<Role> {
        let mut tables = self.tables.write().await;
        if tables.roles.values().any(|r| r.name == name) {
            return Err(IdentityError::Conflict(format!("Role '{name}' already exists")));
        }

        let role = Role::new(name);
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn rename_role(&self, id: Uuid, name: &str) -> Result<Role> {
        let mut tables = self.tables.write().await;
        if tables.roles.values().any(|r| r.name == name && r.id != id) {
            return Err(IdentityError::Conflict(format!("Role '{name}' already exists")));
        }

        let role = tables
            .roles
            .get_mut(&id)
            .ok_or_else(|| IdentityError::NotFound(format!("Role {id} not found")))?;
        role.name = name.to_string();
        Ok(role.clone())
    }

    async fn delete_role(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.roles.remove(&id).is_none() {
            return Err(IdentityError::NotFound(format!("Role {id} not found")));
        }
        tables.assignments.retain(|(_, role)| *role != id);
        Ok(())
    }

    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user_id) || !tables.roles.contains_key(&role_id) {
            return Err(IdentityError::NotFound(
                "Referenced user or role does not exist".to_string(),
            ));
        }
        if !tables.assignments.insert((user_id, role_id)) {
            return Err(IdentityError::Conflict(
                "User already has this role".to_string(),
            ));
        }
        Ok(())
    }

    async fn remove_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool> {
        Ok(self
            .tables
            .write()
            .await
            .assignments
            .remove(&(user_id, role_id)))
    }
}

#[async_trait]
impl LoginHistoryStore for InMemoryIdentityStore {
    async fn append(
        &self,
        user_id: Uuid,
        user_agent: Option<&str>,
        login_at: DateTime<Utc>,
    ) -> Result<()> {
        self.tables.write().await.history.push(LoginHistoryEntry {
            id: Uuid::new_v4(),
            user_id,
            user_agent: user_agent.map(str::to_string),
            login_at,
        });
        Ok(())
    }

    async fn list(&self, user_id: Uuid, page: PageParams) -> Result<Vec<LoginHistoryEntry>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<LoginHistoryEntry> = tables
            .history
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        // stable sort keeps insertion order for equal timestamps; reverse it
        entries.reverse();
        entries.sort_by(|a, b| b.login_at.cmp(&a.login_at));

        Ok(entries
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect())
    }
}
