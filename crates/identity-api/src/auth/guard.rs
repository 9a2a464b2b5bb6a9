//! Access token resolution and role checks

use super::jwt::{now_secs, JwtError, TokenSigner, TokenType};
use super::middleware::AuthError;
use super::registry::SessionRegistry;
use crate::audit::{audit_log, AuditEvent};
use identity_core::{CredentialStore, RoleStore};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// User resolved from a valid access token
///
/// Added to request extensions by the auth middleware; extract it in
/// handlers with `Extension<Identity>`.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub login: String,
    pub first_name: String,
    pub last_name: String,
    pub roles: HashSet<String>,
    /// Session the presented token belongs to
    pub device_id: String,
    /// Token expiry (Unix epoch seconds)
    pub expires_at: u64,
}

impl Identity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Time the access token is still accepted for
    ///
    /// A token stays valid through its `exp` second, so one expiring now
    /// still has a second left. Zero once `exp` has passed.
    pub fn remaining_lifetime(&self) -> Duration {
        self.remaining_lifetime_at(now_secs())
    }

    fn remaining_lifetime_at(&self, now: u64) -> Duration {
        Duration::from_secs(self.expires_at.saturating_add(1).saturating_sub(now))
    }
}

/// Resolves access tokens to identities
#[derive(Clone)]
pub struct AuthGuard {
    signer: TokenSigner,
    registry: Arc<dyn SessionRegistry>,
    credentials: Arc<dyn CredentialStore>,
    roles: Arc<dyn RoleStore>,
}

impl AuthGuard {
    pub fn new(
        signer: TokenSigner,
        registry: Arc<dyn SessionRegistry>,
        credentials: Arc<dyn CredentialStore>,
        roles: Arc<dyn RoleStore>,
    ) -> Self {
        Self {
            signer,
            registry,
            credentials,
            roles,
        }
    }

    /// Verify an access token and load the user it names
    ///
    /// # Errors
    ///
    /// * `InvalidToken` - bad signature, expired, wrong type, or missing claims
    /// * `TokenRevoked` - the token was blacklisted by a logout
    /// * `Unauthenticated` - the subject no longer names a user
    pub async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.signer.verify(token, TokenType::Access)?;
        if claims.sub.is_empty() || claims.device_id.is_empty() {
            return Err(AuthError::InvalidToken(JwtError::Malformed));
        }

        if self.registry.is_blacklisted(&claims.sub, token).await? {
            return Err(AuthError::TokenRevoked);
        }

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::Unauthenticated)?;
        let user = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        let roles = self.roles.roles_of(user.id).await?;

        Ok(Identity {
            user_id: user.id,
            login: user.login,
            first_name: user.first_name,
            last_name: user.last_name,
            roles,
            device_id: claims.device_id,
            expires_at: claims.exp,
        })
    }
}

/// Require a role on a resolved identity
pub fn require_role(identity: &Identity, role: &str) -> Result<(), AuthError> {
    if identity.has_role(role) {
        return Ok(());
    }

    audit_log(&AuditEvent::AccessDenied {
        user_id: identity.user_id,
        login: identity.login.clone(),
        resource: format!("role:{role}"),
        required_role: role.to_string(),
    });

    Err(AuthError::Forbidden(format!("Role '{role}' required")))
}
