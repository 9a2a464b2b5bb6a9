//! Authentication service layer
//!
//! Registration, login, refresh token rotation, and logout. Sessions are
//! tracked in the [`SessionRegistry`]: every login opens a session under a
//! fresh device id, every refresh consumes the current session and opens a
//! new one, and logout closes the session and revokes the access token.

use super::guard::Identity;
use super::jwt::{JwtError, TokenPair, TokenSigner, TokenType};
use super::middleware::AuthError;
use super::password::{
    check_password_policy, hash_password_with_config, verify_password, PasswordConfig,
};
use super::registry::SessionRegistry;
use crate::audit::{audit_log, AuditEvent, RequestMeta};
use crate::error::AppError;
use chrono::Utc;
use identity_core::{CredentialStore, IdentityError, LoginHistoryStore, NewUser, UserRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use validator::Validate;

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 64, message = "login must be 3 to 64 characters"))]
    pub login: String,
    pub password: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub first_name: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub last_name: String,
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

/// Token pair returned by login and refresh
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

impl TokenResponse {
    fn from_pair(pair: TokenPair, access_ttl: Duration) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "bearer".to_string(),
            expires_in: access_ttl.as_secs(),
        }
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    signer: TokenSigner,
    credentials: Arc<dyn CredentialStore>,
    history: Arc<dyn LoginHistoryStore>,
    registry: Arc<dyn SessionRegistry>,
    password_config: PasswordConfig,
}

impl AuthService {
    pub fn new(
        signer: TokenSigner,
        credentials: Arc<dyn CredentialStore>,
        history: Arc<dyn LoginHistoryStore>,
        registry: Arc<dyn SessionRegistry>,
    ) -> Self {
        Self {
            signer,
            credentials,
            history,
            registry,
            password_config: PasswordConfig::default(),
        }
    }

    /// Override the Argon2 parameters used for new password hashes
    pub fn with_password_config(mut self, config: PasswordConfig) -> Self {
        self.password_config = config;
        self
    }

    /// Register a new user
    ///
    /// # Returns
    ///
    /// * `Ok(UserRecord)` - Newly created user
    /// * `Err(AppError)` - `BadRequest` for invalid input, `Conflict` for a taken login
    pub async fn register(
        &self,
        request: RegisterRequest,
        meta: &RequestMeta,
    ) -> Result<UserRecord, AppError> {
        let validation = request
            .validate()
            .map_err(AppError::from)
            .and_then(|_| {
                check_password_policy(&request.password)
                    .map_err(|e| AppError::BadRequest(e.to_string()))
            });
        if let Err(e) = validation {
            audit_log(&AuditEvent::RegistrationFailure {
                login: request.login.clone(),
                reason: "invalid input".to_string(),
                ip_address: meta.ip_address.clone(),
            });
            return Err(e);
        }

        let password_hash = self.hash(request.password).await?;
        let created = self
            .credentials
            .create_user(NewUser {
                login: request.login.clone(),
                password_hash,
                first_name: request.first_name,
                last_name: request.last_name,
            })
            .await;

        match created {
            Ok(user) => {
                audit_log(&AuditEvent::RegistrationSuccess {
                    user_id: user.id,
                    login: user.login.clone(),
                    ip_address: meta.ip_address.clone(),
                });
                Ok(user)
            }
            Err(e) => {
                if matches!(e, IdentityError::Conflict(_)) {
                    audit_log(&AuditEvent::RegistrationFailure {
                        login: request.login,
                        reason: "login already taken".to_string(),
                        ip_address: meta.ip_address.clone(),
                    });
                }
                Err(e.into())
            }
        }
    }

    /// Authenticate with login and password and open a new session
    ///
    /// Unknown logins and wrong passwords fail identically. A failure to
    /// record login history is logged and does not fail the login.
    pub async fn login(
        &self,
        request: LoginRequest,
        meta: &RequestMeta,
    ) -> Result<TokenResponse, AuthError> {
        let user = match self.credentials.find_by_login(&request.login).await? {
            Some(user) => user,
            None => return Err(self.login_failed(request.login, "unknown login", meta)),
        };
        if !self.check_password(&request.password, &user).await {
            return Err(self.login_failed(request.login, "wrong password", meta));
        }

        let subject = user.id.to_string();
        let device_id = TokenSigner::new_device_id();
        let pair = self.open_session(&subject, &device_id).await?;

        if let Err(e) = self
            .history
            .append(user.id, meta.user_agent.as_deref(), Utc::now())
            .await
        {
            tracing::warn!(user_id = %user.id, error = %e, "Failed to record login history");
        }

        audit_log(&AuditEvent::LoginSuccess {
            user_id: user.id,
            login: user.login,
            device_id,
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
        });

        Ok(TokenResponse::from_pair(pair, self.signer.access_ttl()))
    }

    /// Exchange a refresh token for a new pair under a new device id
    ///
    /// The presented token is consumed atomically; of several concurrent
    /// refreshes with the same token exactly one succeeds.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        meta: &RequestMeta,
    ) -> Result<TokenResponse, AuthError> {
        let claims = self.signer.verify(refresh_token, TokenType::Refresh)?;
        if claims.sub.is_empty() || claims.device_id.is_empty() {
            return Err(AuthError::InvalidToken(JwtError::Malformed));
        }

        let consumed = self
            .registry
            .take_refresh(&claims.sub, &claims.device_id, refresh_token)
            .await?;
        if !consumed {
            audit_log(&AuditEvent::RefreshTokenReuse {
                user_id: claims.sub,
                device_id: claims.device_id,
                ip_address: meta.ip_address.clone(),
                user_agent: meta.user_agent.clone(),
            });
            return Err(AuthError::TokenRevokedOrReused);
        }

        let device_id = TokenSigner::new_device_id();
        let pair = self.open_session(&claims.sub, &device_id).await?;

        audit_log(&AuditEvent::TokenRefresh {
            user_id: claims.sub,
            previous_device_id: claims.device_id,
            device_id,
            ip_address: meta.ip_address.clone(),
        });

        Ok(TokenResponse::from_pair(pair, self.signer.access_ttl()))
    }

    /// Close the session of the presented access token and revoke it
    ///
    /// The blacklist entry lives until the token's own expiry; a token with
    /// no lifetime left is not blacklisted.
    pub async fn logout(
        &self,
        identity: &Identity,
        access_token: &str,
        meta: &RequestMeta,
    ) -> Result<(), AuthError> {
        let subject = identity.user_id.to_string();

        self.registry
            .delete_refresh(&subject, &identity.device_id)
            .await?;

        self.registry
            .blacklist_access(&subject, access_token, identity.remaining_lifetime())
            .await?;

        audit_log(&AuditEvent::Logout {
            user_id: identity.user_id,
            device_id: identity.device_id.clone(),
            ip_address: meta.ip_address.clone(),
        });

        Ok(())
    }

    fn login_failed(&self, login: String, reason: &str, meta: &RequestMeta) -> AuthError {
        audit_log(&AuditEvent::LoginFailure {
            login,
            reason: reason.to_string(),
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
        });
        AuthError::InvalidCredentials
    }

    async fn open_session(&self, subject: &str, device_id: &str) -> Result<TokenPair, AuthError> {
        let pair = self
            .signer
            .issue_pair(subject, device_id)
            .map_err(|e| AuthError::Internal(format!("Failed to sign tokens: {e}")))?;

        self.registry
            .put_refresh(
                subject,
                device_id,
                &pair.refresh_token,
                self.signer.refresh_ttl(),
            )
            .await?;

        Ok(pair)
    }

    async fn hash(&self, password: String) -> Result<String, AppError> {
        let config = self.password_config.clone();
        tokio::task::spawn_blocking(move || hash_password_with_config(&password, &config))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {e}")))?
            .map_err(|e| AppError::Internal(e.to_string()))
    }

    async fn check_password(&self, password: &str, user: &UserRecord) -> bool {
        let password = password.to_string();
        let hash = user.password_hash.clone();
        let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await;

        match verified {
            Ok(Ok(matches)) => matches,
            Ok(Err(e)) => {
                tracing::warn!(user_id = %user.id, error = %e, "Stored password hash is unusable");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Password verification task failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::guard::AuthGuard;
    use crate::auth::jwt::now_secs;
    use crate::auth::registry::InMemorySessionRegistry;
    use async_trait::async_trait;
    use chrono::DateTime;
    use futures::future::join_all;
    use identity_core::{InMemoryIdentityStore, JwtConfig, LoginHistoryEntry, PageParams};
    use uuid::Uuid;

    struct Fixture {
        auth: AuthService,
        guard: AuthGuard,
        signer: TokenSigner,
        store: Arc<InMemoryIdentityStore>,
        registry: Arc<InMemorySessionRegistry>,
    }

    fn fixture_with_history(history: Arc<dyn LoginHistoryStore>) -> Fixture {
        let signer = TokenSigner::new(&JwtConfig::default());
        let store = Arc::new(InMemoryIdentityStore::new());
        let registry = Arc::new(InMemorySessionRegistry::new());
        let auth = AuthService::new(signer.clone(), store.clone(), history, registry.clone())
            .with_password_config(PasswordConfig::fast());
        let guard = AuthGuard::new(
            signer.clone(),
            registry.clone(),
            store.clone(),
            store.clone(),
        );
        Fixture {
            auth,
            guard,
            signer,
            store,
            registry,
        }
    }

    fn fixture() -> Fixture {
        let history = Arc::new(InMemoryIdentityStore::new());
        fixture_with_history(history)
    }

    fn register_request(login: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            login: login.to_string(),
            password: password.to_string(),
            first_name: "Alice".to_string(),
            last_name: "Liddell".to_string(),
        }
    }

    fn login_request(login: &str, password: &str) -> LoginRequest {
        LoginRequest {
            login: login.to_string(),
            password: password.to_string(),
        }
    }

    async fn registered(fx: &Fixture) -> UserRecord {
        fx.auth
            .register(register_request("alice", "secret123"), &RequestMeta::default())
            .await
            .unwrap()
    }

    struct FailingHistory;

    #[async_trait]
    impl LoginHistoryStore for FailingHistory {
        async fn append(
            &self,
            _user_id: Uuid,
            _user_agent: Option<&str>,
            _login_at: DateTime<Utc>,
        ) -> identity_core::Result<()> {
            Err(IdentityError::DatabaseError("history table offline".to_string()))
        }

        async fn list(
            &self,
            _user_id: Uuid,
            _page: PageParams,
        ) -> identity_core::Result<Vec<LoginHistoryEntry>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_register_validation_and_conflict() {
        let fx = fixture();
        let meta = RequestMeta::default();

        assert!(matches!(
            fx.auth.register(register_request("alice", "12345"), &meta).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            fx.auth.register(register_request("al", "secret123"), &meta).await,
            Err(AppError::BadRequest(_))
        ));

        let user = registered(&fx).await;
        assert_ne!(user.password_hash, "secret123");
        assert!(matches!(
            fx.auth.register(register_request("alice", "secret456"), &meta).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_login_issues_pair_sharing_device_id() {
        let fx = fixture();
        let user = registered(&fx).await;

        let tokens = fx
            .auth
            .login(login_request("alice", "secret123"), &RequestMeta::default())
            .await
            .unwrap();

        let access = fx.signer.verify(&tokens.access_token, TokenType::Access).unwrap();
        let refresh = fx.signer.verify(&tokens.refresh_token, TokenType::Refresh).unwrap();
        assert_eq!(access.sub, user.id.to_string());
        assert_eq!(access.device_id, refresh.device_id);
        assert_eq!(tokens.expires_in, 900);

        let stored = fx
            .registry
            .get_refresh(&refresh.sub, &refresh.device_id)
            .await
            .unwrap();
        assert_eq!(stored.as_deref(), Some(tokens.refresh_token.as_str()));
    }

    #[tokio::test]
    async fn test_login_failures_are_uniform() {
        let fx = fixture();
        registered(&fx).await;
        let meta = RequestMeta::default();

        let wrong_password = fx
            .auth
            .login(login_request("alice", "wrong-password"), &meta)
            .await
            .unwrap_err();
        let unknown_login = fx
            .auth
            .login(login_request("nobody", "secret123"), &meta)
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_login, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_login.to_string());
        assert!(fx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_login_records_history() {
        let history = Arc::new(InMemoryIdentityStore::new());
        let fx = fixture_with_history(history.clone());
        let user = registered(&fx).await;
        let meta = RequestMeta {
            ip_address: None,
            user_agent: Some("curl/8.0".to_string()),
        };

        fx.auth
            .login(login_request("alice", "secret123"), &meta)
            .await
            .unwrap();

        let entries = history.list(user.id, PageParams::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_agent.as_deref(), Some("curl/8.0"));
    }

    #[tokio::test]
    async fn test_history_failure_does_not_fail_login() {
        let fx = fixture_with_history(Arc::new(FailingHistory));
        registered(&fx).await;

        let result = fx
            .auth
            .login(login_request("alice", "secret123"), &RequestMeta::default())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_reuse() {
        let fx = fixture();
        registered(&fx).await;
        let meta = RequestMeta::default();
        let first = fx
            .auth
            .login(login_request("alice", "secret123"), &meta)
            .await
            .unwrap();

        let second = fx.auth.refresh(&first.refresh_token, &meta).await.unwrap();
        let old = fx.signer.verify(&first.refresh_token, TokenType::Refresh).unwrap();
        let new = fx.signer.verify(&second.refresh_token, TokenType::Refresh).unwrap();
        assert_ne!(old.device_id, new.device_id);
        assert!(fx
            .registry
            .get_refresh(&old.sub, &old.device_id)
            .await
            .unwrap()
            .is_none());

        assert!(matches!(
            fx.auth.refresh(&first.refresh_token, &meta).await,
            Err(AuthError::TokenRevokedOrReused)
        ));

        // the rotated token keeps working, so rotations chain
        let third = fx.auth.refresh(&second.refresh_token, &meta).await.unwrap();
        assert!(fx.auth.refresh(&third.refresh_token, &meta).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let fx = fixture();
        registered(&fx).await;
        let meta = RequestMeta::default();
        let tokens = fx
            .auth
            .login(login_request("alice", "secret123"), &meta)
            .await
            .unwrap();

        assert!(matches!(
            fx.auth.refresh(&tokens.access_token, &meta).await,
            Err(AuthError::InvalidToken(JwtError::WrongType { .. }))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_one_winner() {
        let fx = fixture();
        registered(&fx).await;
        let meta = RequestMeta::default();
        let tokens = fx
            .auth
            .login(login_request("alice", "secret123"), &meta)
            .await
            .unwrap();

        let attempts = (0..8).map(|_| {
            let auth = fx.auth.clone();
            let token = tokens.refresh_token.clone();
            tokio::spawn(async move { auth.refresh(&token, &RequestMeta::default()).await })
        });
        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let reused = results
            .iter()
            .filter(|r| matches!(r, Err(AuthError::TokenRevokedOrReused)))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(reused, 7);
    }

    #[tokio::test]
    async fn test_logout_closes_session_and_revokes_access() {
        let fx = fixture();
        registered(&fx).await;
        let meta = RequestMeta::default();
        let tokens = fx
            .auth
            .login(login_request("alice", "secret123"), &meta)
            .await
            .unwrap();
        let identity = fx.guard.authenticate(&tokens.access_token).await.unwrap();

        fx.auth
            .logout(&identity, &tokens.access_token, &meta)
            .await
            .unwrap();

        assert!(matches!(
            fx.guard.authenticate(&tokens.access_token).await,
            Err(AuthError::TokenRevoked)
        ));
        assert!(matches!(
            fx.auth.refresh(&tokens.refresh_token, &meta).await,
            Err(AuthError::TokenRevokedOrReused)
        ));
    }

    #[tokio::test]
    async fn test_logout_leaves_other_sessions() {
        let fx = fixture();
        registered(&fx).await;
        let meta = RequestMeta::default();
        let phone = fx
            .auth
            .login(login_request("alice", "secret123"), &meta)
            .await
            .unwrap();
        let laptop = fx
            .auth
            .login(login_request("alice", "secret123"), &meta)
            .await
            .unwrap();

        let identity = fx.guard.authenticate(&phone.access_token).await.unwrap();
        fx.auth
            .logout(&identity, &phone.access_token, &meta)
            .await
            .unwrap();

        assert!(fx.guard.authenticate(&laptop.access_token).await.is_ok());
        assert!(fx.auth.refresh(&laptop.refresh_token, &meta).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_with_expired_identity_skips_blacklist() {
        let fx = fixture();
        let user = registered(&fx).await;
        let identity = Identity {
            user_id: user.id,
            login: user.login,
            first_name: String::new(),
            last_name: String::new(),
            roles: Default::default(),
            device_id: "d1".to_string(),
            expires_at: now_secs().saturating_sub(10),
        };

        fx.auth
            .logout(&identity, "already-expired", &RequestMeta::default())
            .await
            .unwrap();

        assert!(fx.registry.is_empty().await);
    }
}
