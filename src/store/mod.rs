//! Backing key-value stores for vault entries.
//!
//! The vault needs exactly three operations on raw bytes, and that is all a
//! [`KeyValueStore`] exposes. Backends:
//!
//! - [`MemoryStore`]: process-local, for tests and single-instance setups
//! - [`SqliteStore`]: durable file-backed store
//! - [`RedisStore`]: shared store for several gateway instances (refresh
//!   serialization stays per process)

mod memory;
mod redis_store;
mod sqlite;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;
pub use self::sqlite::SqliteStore;

use crate::config::StoreConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

/// Minimal byte-oriented key-value interface.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value at `key`, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write `value` at `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Open the backend selected in configuration.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    Ok(match config {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Sqlite { path } => Arc::new(SqliteStore::open(path)?),
        StoreConfig::Redis { url, key_prefix } => {
            Arc::new(RedisStore::connect(url).await?.with_prefix(key_prefix.as_str()))
        }
    })
}
