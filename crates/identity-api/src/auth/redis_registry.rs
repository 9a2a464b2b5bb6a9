//! Redis-backed session registry
//!
//! Shares sessions across service instances. Expiry is delegated to Redis
//! (`SET ... EX`), and compare-and-delete runs as a Lua script so it is
//! atomic on the server.

use super::registry::{blacklist_key, refresh_key, RegistryError, SessionRegistry};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

const TAKE_IF_EQUAL: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisSessionRegistry {
    conn: ConnectionManager,
    take_script: redis::Script,
}

impl RedisSessionRegistry {
    /// Connect to Redis at the given URL
    pub async fn connect(redis_url: &str) -> Result<Self, RegistryError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RegistryError::Unavailable(format!("Failed to create Redis client: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RegistryError::Unavailable(format!("Failed to connect to Redis: {e}")))?;

        tracing::info!("Connected session registry to Redis");

        Ok(Self {
            conn,
            take_script: redis::Script::new(TAKE_IF_EQUAL),
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RegistryError> {
        // EX takes whole seconds and rejects zero
        let secs = ttl.as_secs().max(1);
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(secs)
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        Ok(())
    }
}

fn command_failed(e: redis::RedisError) -> RegistryError {
    if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        RegistryError::Unavailable(e.to_string())
    } else {
        RegistryError::CommandFailed(e.to_string())
    }
}

#[async_trait]
impl SessionRegistry for RedisSessionRegistry {
    async fn put_refresh(
        &self,
        subject: &str,
        device_id: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        self.set_ex(&refresh_key(subject, device_id), token, ttl)
            .await
    }

    async fn get_refresh(
        &self,
        subject: &str,
        device_id: &str,
    ) -> Result<Option<String>, RegistryError> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(refresh_key(subject, device_id))
            .query_async(&mut conn)
            .await
            .map_err(command_failed)
    }

    async fn delete_refresh(&self, subject: &str, device_id: &str) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("DEL")
            .arg(refresh_key(subject, device_id))
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        Ok(())
    }

    async fn take_refresh(
        &self,
        subject: &str,
        device_id: &str,
        expected: &str,
    ) -> Result<bool, RegistryError> {
        let mut conn = self.conn.clone();
        let deleted: u64 = self
            .take_script
            .key(refresh_key(subject, device_id))
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(command_failed)?;
        Ok(deleted == 1)
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
        self.set_ex(&blacklist_key(subject, token), "1", ttl).await
    }

    async fn is_blacklisted(&self, subject: &str, token: &str) -> Result<bool, RegistryError> {
        let mut conn = self.conn.clone();
        let exists: u64 = redis::cmd("EXISTS")
            .arg(blacklist_key(subject, token))
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        Ok(exists > 0)
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_failed)?;
        Ok(())
    }

    async fn close(&self) {
        tracing::info!("Closing Redis session registry");
    }
}
