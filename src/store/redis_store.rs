//! Redis-backed vault store shared between gateway instances.

use super::KeyValueStore;
use crate::error::StoreError;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::fmt;
use tracing::info;

/// [`KeyValueStore`] on a shared Redis instance.
///
/// Only GET, SET and DEL are issued; the rest of the Redis API is not reachable
/// through the vault.
///
/// Several vault processes may share one instance, but refresh serialization
/// is per process: two processes refreshing the same key at once each send a
/// refresh grant. With a provider that rotates refresh tokens the slower one
/// gets `invalid_grant` and evicts the entry, forcing re-authorization. Route
/// each key to a single process if the provider rotates refresh tokens.
#[derive(Clone)]
pub struct RedisStore {
    connection_manager: ConnectionManager,
    prefix: String,
}

impl fmt::Debug for RedisStore {
    // The URL may carry a password
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://:password@host:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection_manager = ConnectionManager::new(client).await?;

        info!("Connected to Redis vault store");

        Ok(Self {
            connection_manager,
            prefix: String::new(),
        })
    }

    /// Namespace every key with `prefix`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn full_key(&self, key: &str) -> String {
        prefixed(&self.prefix, key)
    }
}

fn prefixed(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection_manager.clone();
        let value: Option<Vec<u8>> = conn.get(self.full_key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        conn.set::<_, _, ()>(self.full_key(key), value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        conn.del::<_, ()>(self.full_key(key)).await?;
        Ok(())
    }
}
