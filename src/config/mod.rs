use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Complete vault configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    /// 64 hex characters (32 bytes). Usually supplied via CREDVAULT_ENCRYPTION_SECRET.
    #[serde(default)]
    pub encryption_secret: String,

    /// Credentials expiring within this many seconds are refreshed on read
    #[serde(default = "default_refresh_leeway")]
    pub refresh_leeway_secs: u64,

    /// Timeout for token endpoint requests (seconds)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// Backing key-value store selection
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local map (tests, single instance)
    Memory,
    /// SQLite database file
    Sqlite { path: PathBuf },
    /// Shared Redis instance; every key is stored as `<key_prefix><key>`
    Redis {
        url: String,
        #[serde(default)]
        key_prefix: String,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

/// One `[providers.<id>]` table
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub redirect_url: String,
    #[serde(default)]
    pub default_scope: Vec<String>,
    /// Local cap on token lifetime (seconds)
    #[serde(default)]
    pub max_lifetime_secs: Option<u64>,
}

fn default_refresh_leeway() -> u64 {
    5
}

fn default_http_timeout() -> u64 {
    10
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            encryption_secret: String::new(),
            refresh_leeway_secs: default_refresh_leeway(),
            http_timeout_secs: default_http_timeout(),
            store: StoreConfig::default(),
            providers: BTreeMap::new(),
        }
    }
}

impl VaultConfig {
    /// Override fields from CREDVAULT_* environment variables.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("CREDVAULT_ENCRYPTION_SECRET") {
            self.encryption_secret = v;
        }
        if let Some(v) = var("CREDVAULT_REFRESH_LEEWAY_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                self.refresh_leeway_secs = n;
            }
        }
        if let Some(v) = var("CREDVAULT_HTTP_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                self.http_timeout_secs = n;
            }
        }
        if let Some(path) = var("CREDVAULT_SQLITE_PATH") {
            self.store = StoreConfig::Sqlite { path: path.into() };
        }
        if let Some(url) = var("CREDVAULT_REDIS_URL") {
            let key_prefix = match &self.store {
                StoreConfig::Redis { key_prefix, .. } => key_prefix.clone(),
                _ => String::new(),
            };
            self.store = StoreConfig::Redis { url, key_prefix };
        }
        if let Some(prefix) = var("CREDVAULT_REDIS_KEY_PREFIX") {
            if let StoreConfig::Redis { key_prefix, .. } = &mut self.store {
                *key_prefix = prefix;
            }
        }

        // Client secrets are kept out of the config file when possible
        for (id, provider) in self.providers.iter_mut() {
            let prefix = id.to_uppercase().replace('-', "_");
            if let Some(v) = var(&format!("CREDVAULT_OAUTH_{}_CLIENT_ID", prefix)) {
                provider.client_id = v;
            }
            if let Some(v) = var(&format!("CREDVAULT_OAUTH_{}_CLIENT_SECRET", prefix)) {
                provider.client_secret = v;
            }
        }
    }

    /// Check settings that cannot be defaulted.
    pub fn validate(&self) -> Result<()> {
        if self.encryption_secret.is_empty() {
            bail!("encryption_secret is not set (CREDVAULT_ENCRYPTION_SECRET)");
        }
        for (id, provider) in &self.providers {
            if provider.client_secret.is_empty() {
                bail!(
                    "provider '{}' has no client secret (CREDVAULT_OAUTH_{}_CLIENT_SECRET)",
                    id,
                    id.to_uppercase().replace('-', "_")
                );
            }
        }
        Ok(())
    }
}

/// Load configuration from TOML file, then apply environment overrides
pub fn load_config(path: &str) -> Result<VaultConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
    let mut config: VaultConfig = toml::from_str(&contents).context("Failed to parse config")?;
    config.apply_env();
    Ok(config)
}
