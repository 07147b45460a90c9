//! Encrypted credential vault.
//!
//! Stores [`Credential`]s encrypted at rest in a [`KeyValueStore`] and
//! refreshes them on read when they are about to expire.
//!
//! # Read path
//!
//! ```text
//! get(key) ─▶ store.get ─▶ decrypt ─▶ fresh? ──yes──▶ return
//!                                       │ no
//!                                       ▼
//!                           per-key lock, re-read, still stale?
//!                                       │ yes
//!                                       ▼
//!                                 refresh grant
//!                  ok ─▶ encrypt + overwrite ─▶ return credential
//!                  provider rejected ─▶ delete ─▶ return None
//!                  transport failure ─▶ entry untouched ─▶ error
//! ```
//!
//! # Concurrency
//!
//! Refresh, put and delete for one key are serialized by an in-process async
//! mutex. A caller that waited on the lock re-reads the entry and returns it
//! without a second grant if another caller already refreshed it, so
//! providers that rotate refresh tokens never see a stale one. The refresh
//! runs in its own task: a caller that gives up does not cancel it, and the
//! result is still persisted for later readers.
//!
//! The lock does not span processes. Vaults in different processes sharing
//! one store can refresh the same key concurrently; see [`crate::store::RedisStore`].


use crate::cipher::CipherCodec;
use crate::config::VaultConfig;
use crate::credential::{Credential, TokenClient};
use crate::error::{RefreshError, Result, VaultError};
use crate::store::KeyValueStore;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn, Instrument, Span};

/// Encrypted, self-refreshing credential cache. Cheap to clone.
#[derive(Clone)]
pub struct Vault {
    inner: Arc<VaultInner>,
}

struct VaultInner {
    store: Arc<dyn KeyValueStore>,
    codec: CipherCodec,
    client: TokenClient,
    refresh_leeway: Duration,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
    span: Span,
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("refresh_leeway_secs", &self.inner.refresh_leeway.num_seconds())
            .field("locked_keys", &self.inner.key_locks.len())
            .finish_non_exhaustive()
    }
}

impl Vault {
    /// Vault with the default 5-second refresh leeway.
    pub fn new(store: Arc<dyn KeyValueStore>, codec: CipherCodec, client: TokenClient) -> Self {
        Self::build(
            store,
            codec,
            client,
            Duration::seconds(crate::credential::EXPIRY_LEEWAY_SECS),
            Span::none(),
        )
    }

    /// Vault configured from `config`; log records are parented to `span`.
    pub fn from_config(
        config: &VaultConfig,
        store: Arc<dyn KeyValueStore>,
        span: Span,
    ) -> Result<Self> {
        let codec = CipherCodec::from_secret(&config.encryption_secret)?;
        let client = TokenClient::new(std::time::Duration::from_secs(config.http_timeout_secs))
            .map_err(|e| VaultError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self::build(
            store,
            codec,
            client,
            crate::credential::bounded_seconds(config.refresh_leeway_secs),
            span,
        ))
    }

    fn build(
        store: Arc<dyn KeyValueStore>,
        codec: CipherCodec,
        client: TokenClient,
        refresh_leeway: Duration,
        span: Span,
    ) -> Self {
        Self {
            inner: Arc::new(VaultInner {
                store,
                codec,
                client,
                refresh_leeway,
                key_locks: DashMap::new(),
                span,
            }),
        }
    }

    /// Encrypt `credential` and store it at `key`, replacing any previous entry.
    pub async fn put(&self, key: &str, credential: &Credential) -> Result<()> {
        let span = self.inner.op_span("vault.put", key);
        async {
            let _guard = self.inner.lock_key(key).await;
            self.inner.write(key, credential).await?;
            debug!(provider = %credential.provider.id, "Stored credential");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Fetch the credential at `key`, refreshing it first if it expires soon.
    ///
    /// `Ok(None)` means there is no usable credential: never stored, deleted,
    /// or evicted because the provider rejected the refresh.
    pub async fn get(&self, key: &str) -> Result<Option<Credential>> {
        self.get_with(key, false).await
    }

    /// Like [`Vault::get`]; with `no_refresh` the stored credential is returned as-is.
    pub async fn get_with(&self, key: &str, no_refresh: bool) -> Result<Option<Credential>> {
        let span = self.inner.op_span("vault.get", key);

        let credential = match self.inner.read(key).instrument(span.clone()).await? {
            Some(credential) => credential,
            None => return Ok(None),
        };

        if no_refresh || !self.inner.needs_refresh(&credential) {
            return Ok(Some(credential));
        }

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        tokio::spawn(async move { inner.refresh_entry(&key).await }.instrument(span))
            .await
            .map_err(|e| VaultError::Internal(format!("refresh task failed: {}", e)))?
    }

    /// Remove the entry at `key`. Deleting an absent key succeeds.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let span = self.inner.op_span("vault.delete", key);
        async {
            let _guard = self.inner.lock_key(key).await;
            self.inner.store.delete(key).await?;
            debug!("Deleted credential");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

impl VaultInner {
    fn op_span(&self, name: &'static str, key: &str) -> Span {
        tracing::info_span!(parent: &self.span, "vault", op = name, key = %key)
    }

    fn needs_refresh(&self, credential: &Credential) -> bool {
        credential.expires_within(self.refresh_leeway, Utc::now())
    }

    async fn lock_key(&self, key: &str) -> KeyGuard<'_> {
        let lock = Arc::clone(self.key_locks.entry(key.to_string()).or_default().value());
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: &self.key_locks,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    async fn read(&self, key: &str) -> Result<Option<Credential>> {
        match self.store.get(key).await? {
            Some(ciphertext) => self.decode(key, &ciphertext).map(Some),
            None => Ok(None),
        }
    }

    fn decode(&self, key: &str, ciphertext: &[u8]) -> Result<Credential> {
        let plaintext = self.codec.decrypt(ciphertext).map_err(|e| {
            error!(error = %e, "Stored credential failed decryption");
            VaultError::Decryption {
                key: key.to_string(),
                source: e,
            }
        })?;

        Credential::from_bytes(&plaintext).map_err(|e| {
            error!(error = %e, "Stored credential is not a valid record");
            VaultError::CorruptEntry {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })
    }

    async fn write(&self, key: &str, credential: &Credential) -> Result<()> {
        let plaintext = credential
            .to_bytes()
            .map_err(|e| VaultError::Internal(format!("failed to serialize credential: {}", e)))?;
        let ciphertext = self
            .codec
            .encrypt(&plaintext)
            .map_err(|e| VaultError::Internal(e.to_string()))?;
        self.store.set(key, &ciphertext).await?;
        Ok(())
    }

    /// Locked re-read → refresh → write/evict sequence.
    async fn refresh_entry(&self, key: &str) -> Result<Option<Credential>> {
        let _guard = self.lock_key(key).await;

        // Another caller may have refreshed or evicted while we waited
        let mut credential = match self.read(key).await? {
            Some(credential) => credential,
            None => {
                debug!("Entry removed while waiting for refresh lock");
                return Ok(None);
            }
        };
        if !self.needs_refresh(&credential) {
            debug!("Entry already refreshed by a concurrent caller");
            return Ok(Some(credential));
        }

        let provider = credential.provider.id.clone();
        info!(provider = %provider, "Refreshing credential");

        match credential.refresh(&self.client).await {
            Ok(()) => {
                self.write(key, &credential).await?;
                info!(
                    provider = %provider,
                    expires_in = ?credential.expires_in,
                    "Credential refreshed"
                );
                Ok(Some(credential))
            }
            Err(RefreshError::ProviderAuth { error, description }) => {
                warn!(
                    provider = %provider,
                    oauth_error = %error,
                    description = ?description,
                    "Provider rejected refresh, evicting credential"
                );
                self.store.delete(key).await?;
                Ok(None)
            }
            Err(RefreshError::Transport(reason)) => {
                warn!(
                    provider = %provider,
                    reason = %reason,
                    "Refresh failed, keeping stored credential"
                );
                Err(VaultError::Transport {
                    key: key.to_string(),
                    reason,
                })
            }
        }
    }
}

/// Holds a key's lock; drops the map entry once nobody else wants it.
struct KeyGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex first so its Arc no longer counts
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
