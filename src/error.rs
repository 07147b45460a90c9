//! Error taxonomy for the credential vault.
//!
//! "No entry at key" is not an error: vault reads return `Ok(None)` for it.
//! Of the errors below only [`RefreshError::ProviderAuth`] ever causes a
//! storage mutation (eviction), and it never leaves the vault as an error.

use thiserror::Error;

/// The operator secret is not a usable 64-hex-character key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyFormatError {
    #[error("encryption secret must be 64 hex characters, got {found}")]
    WrongLength { found: usize },

    #[error("encryption secret contains non-hex characters")]
    NonHex,
}

/// Authenticated decryption failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// Not a ciphertext envelope this codec produced (bad base64, truncated, unknown version).
    #[error("malformed ciphertext: {0}")]
    Malformed(&'static str),

    /// Integrity check failed: tampered data or a different key.
    #[error("ciphertext failed integrity check")]
    Integrity,

    /// Plaintext could not be sealed (exceeds the AEAD length limit).
    #[error("encryption failed")]
    Encryption,

    /// Envelope is older than the TTL the caller asked for.
    #[error("ciphertext expired ({age_secs}s old, ttl {ttl_secs}s)")]
    Expired { age_secs: i64, ttl_secs: u64 },
}

/// Outcome of a failed token-endpoint grant.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The provider rejected the grant itself; the stored credential is dead.
    #[error("provider rejected grant: {error}")]
    ProviderAuth {
        error: String,
        description: Option<String>,
    },

    /// The exchange could not be completed; the stored credential may still be valid.
    #[error("token endpoint unavailable: {0}")]
    Transport(String),
}

impl RefreshError {
    /// OAuth error code reported by the provider, if any.
    pub fn oauth_error(&self) -> Option<&str> {
        match self {
            RefreshError::ProviderAuth { error, .. } => Some(error),
            RefreshError::Transport(_) => None,
        }
    }
}

impl From<reqwest::Error> for RefreshError {
    fn from(e: reqwest::Error) -> Self {
        RefreshError::Transport(e.to_string())
    }
}

/// A decrypted payload is not a credential record this version understands.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid credential record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported credential record version {0}")]
    UnsupportedVersion(u32),
}

/// Backing key-value store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store task failed: {0}")]
    Task(String),
}

/// Errors surfaced by [`crate::vault::Vault`].
#[derive(Debug, Error)]
pub enum VaultError {
    /// Bad encryption secret. Fatal at startup.
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(#[from] KeyFormatError),

    /// Stored entry could not be decrypted (corruption or key mismatch).
    #[error("failed to decrypt entry '{key}': {source}")]
    Decryption {
        key: String,
        #[source]
        source: CipherError,
    },

    /// Entry decrypted but the payload is not a credential record.
    #[error("corrupt credential record at '{key}': {reason}")]
    CorruptEntry { key: String, reason: String },

    /// Token endpoint unavailable during refresh. Entry left untouched.
    #[error("refresh of '{key}' failed: {reason}")]
    Transport { key: String, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Returns `true` if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::Transport { .. } | VaultError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
