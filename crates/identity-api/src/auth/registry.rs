//! Session registry
//!
//! Key-value store with per-entry expiry holding two kinds of records:
//!
//! - `refresh:{subject}:{device_id}` -> the single live refresh token of a session
//! - `blacklist:{subject}:{fingerprint}` -> marker for a revoked access token
//!
//! The blacklist key embeds a SHA-256 fingerprint of the token rather than
//! the token itself.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Registry backend errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Session registry unavailable: {0}")]
    Unavailable(String),

    #[error("Session registry command failed: {0}")]
    CommandFailed(String),
}

/// Storage for refresh sessions and revoked access tokens
///
/// Every operation is atomic with respect to the others. Expired entries
/// behave as absent.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Store the live refresh token of a session, replacing any previous one
    async fn put_refresh(
        &self,
        subject: &str,
        device_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<(), RegistryError>;

    async fn get_refresh(
        &self,
        subject: &str,
        device_id: &str,
    ) -> Result<Option<String>, RegistryError>;

    /// Remove a session; absent keys are not an error
    async fn delete_refresh(&self, subject: &str, device_id: &str) -> Result<(), RegistryError>;

    /// Delete the session only if its stored token equals `expected`
    ///
    /// Returns `true` for exactly one of any number of concurrent callers
    /// presenting the same stored token.
    async fn take_refresh(
        &self,
        subject: &str,
        device_id: &str,
        expected: &str,
    ) -> Result<bool, RegistryError>;

    /// Mark an access token as revoked for `ttl`; a zero `ttl` writes nothing
    async fn blacklist_access(
        &self,
        subject: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<(), RegistryError>;

    async fn is_blacklisted(&self, subject: &str, token: &str) -> Result<bool, RegistryError>;

    /// Check backend connectivity
    async fn ping(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    /// Release backend resources on shutdown
    async fn close(&self) {}
}

pub fn refresh_key(subject: &str, device_id: &str) -> String {
    format!("refresh:{subject}:{device_id}")
}

pub fn blacklist_key(subject: &str, token: &str) -> String {
    format!("blacklist:{subject}:{}", token_fingerprint(token))
}

/// Hex-encoded SHA-256 of a token
pub fn token_fingerprint(token: &str) -> String {
    Sha256::digest(token.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local registry for single-instance deployments and tests
///
/// Expired entries are ignored on read and removed on the next write to the
/// same key, or by the reaper task started with [`spawn_reaper`].
///
/// [`spawn_reaper`]: InMemorySessionRegistry::spawn_reaper
#[derive(Default)]
pub struct InMemorySessionRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    /// Periodically purge expired entries until the registry is dropped
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let removed = registry.purge_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "Purged expired session registry entries");
                }
            }
        })
    }

    async fn set(&self, key: String, value: String, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.insert(key, entry);
    }

    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone())
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn put_refresh(
        &self,
        subject: &str,
        device_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        self.set(refresh_key(subject, device_id), token.to_string(), ttl)
            .await;
        Ok(())
    }

    async fn get_refresh(
        &self,
        subject: &str,
        device_id: &str,
    ) -> Result<Option<String>, RegistryError> {
        Ok(self.get(&refresh_key(subject, device_id)).await)
    }

    async fn delete_refresh(&self, subject: &str, device_id: &str) -> Result<(), RegistryError> {
        self.entries
            .lock()
            .await
            .remove(&refresh_key(subject, device_id));
        Ok(())
    }

    async fn take_refresh(
        &self,
        subject: &str,
        device_id: &str,
        expected: &str,
    ) -> Result<bool, RegistryError> {
        let key = refresh_key(subject, device_id);
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let matches = entries
            .get(&key)
            .is_some_and(|e| e.is_live(now) && e.value == expected);
        if matches {
            entries.remove(&key);
        }
        Ok(matches)
    }

    async fn blacklist_access(
        &self,
        subject: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        if ttl.is_zero() {
            return Ok(());
        }
        self.set(blacklist_key(subject, token), "1".to_string(), ttl)
            .await;
        Ok(())
    }

    async fn is_blacklisted(&self, subject: &str, token: &str) -> Result<bool, RegistryError> {
        Ok(self.get(&blacklist_key(subject, token)).await.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_put_get_overwrite_delete() {
        let registry = InMemorySessionRegistry::new();

        registry.put_refresh("u1", "d1", "r1", HOUR).await.unwrap();
        assert_eq!(
            registry.get_refresh("u1", "d1").await.unwrap().as_deref(),
            Some("r1")
        );

        registry.put_refresh("u1", "d1", "r2", HOUR).await.unwrap();
        assert_eq!(
            registry.get_refresh("u1", "d1").await.unwrap().as_deref(),
            Some("r2")
        );

        registry.delete_refresh("u1", "d1").await.unwrap();
        assert!(registry.get_refresh("u1", "d1").await.unwrap().is_none());

        // deleting an absent key is fine
        registry.delete_refresh("u1", "d1").await.unwrap();
    }

    #[tokio::test]
    async fn test_sessions_are_isolated_per_device() {
        let registry = InMemorySessionRegistry::new();
        registry.put_refresh("u1", "d1", "r1", HOUR).await.unwrap();
        registry.put_refresh("u1", "d2", "r2", HOUR).await.unwrap();

        registry.delete_refresh("u1", "d1").await.unwrap();

        assert!(registry.get_refresh("u1", "d1").await.unwrap().is_none());
        assert_eq!(
            registry.get_refresh("u1", "d2").await.unwrap().as_deref(),
            Some("r2")
        );
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let registry = InMemorySessionRegistry::new();
        registry
            .put_refresh("u1", "d1", "r1", Duration::from_millis(20))
            .await
            .unwrap();
        registry
            .blacklist_access("u1", "a1", Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(registry.get_refresh("u1", "d1").await.unwrap().is_none());
        assert!(!registry.is_blacklisted("u1", "a1").await.unwrap());
        assert!(!registry.take_refresh("u1", "d1", "r1").await.unwrap());
        assert_eq!(registry.purge_expired().await, 2);
    }

    #[tokio::test]
    async fn test_take_refresh_requires_matching_value() {
        let registry = InMemorySessionRegistry::new();
        registry.put_refresh("u1", "d1", "r1", HOUR).await.unwrap();

        assert!(!registry.take_refresh("u1", "d1", "other").await.unwrap());
        assert!(registry.get_refresh("u1", "d1").await.unwrap().is_some());

        assert!(registry.take_refresh("u1", "d1", "r1").await.unwrap());
        assert!(registry.get_refresh("u1", "d1").await.unwrap().is_none());
        assert!(!registry.take_refresh("u1", "d1", "r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_take_refresh_single_winner() {
        let registry = Arc::new(InMemorySessionRegistry::new());
        registry.put_refresh("u1", "d1", "r1", HOUR).await.unwrap();

        let attempts = (0..16).map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.take_refresh("u1", "d1", "r1").await.unwrap() })
        });
        let winners = join_all(attempts)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_blacklist() {
        let registry = InMemorySessionRegistry::new();
        assert!(!registry.is_blacklisted("u1", "a1").await.unwrap());

        registry.blacklist_access("u1", "a1", HOUR).await.unwrap();
        assert!(registry.is_blacklisted("u1", "a1").await.unwrap());
        assert!(!registry.is_blacklisted("u2", "a1").await.unwrap());
        assert!(!registry.is_blacklisted("u1", "a2").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_ttl_blacklist_is_skipped() {
        let registry = InMemorySessionRegistry::new();
        registry
            .blacklist_access("u1", "a1", Duration::ZERO)
            .await
            .unwrap();
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_reaper_stops_with_registry() {
        let registry = Arc::new(InMemorySessionRegistry::new());
        let handle = registry.spawn_reaper(Duration::from_millis(5));
        drop(registry);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(refresh_key("u1", "d1"), "refresh:u1:d1");

        let key = blacklist_key("u1", "token");
        assert!(key.starts_with("blacklist:u1:"));
        assert!(!key.contains("token"));
        assert_eq!(token_fingerprint("token").len(), 64);
    }
}
