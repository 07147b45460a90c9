// Vault over a durable SQLite store: entries survive a process restart and
// stay readable only with the original key.

use chrono::{Duration, Utc};
use credvault::cipher::CipherCodec;
use credvault::config::{StoreConfig, VaultConfig};
use credvault::credential::Credential;
use credvault::error::VaultError;
use credvault::provider::ProviderDescriptor;
use credvault::store::{open_store, KeyValueStore};
use credvault::vault::Vault;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::Span;

fn create_test_config(dir: &TempDir) -> VaultConfig {
    let mut config = VaultConfig::default();
    config.encryption_secret = CipherCodec::generate_secret();
    config.store = StoreConfig::Sqlite {
        path: dir.path().join("vault.db"),
    };
    config
}

fn create_test_credential() -> Credential {
    let provider = Arc::new(ProviderDescriptor {
        id: "github".to_string(),
        client_id: "gateway".to_string(),
        client_secret: "client-secret".to_string(),
        authorization_endpoint: "https://github.com/login/oauth/authorize".to_string(),
        token_endpoint: "http://127.0.0.1:9/login/oauth/access_token".to_string(),
        redirect_url: "https://gateway.example.com/auth/github/token".to_string(),
    });
    let mut credential = Credential::new(provider);
    credential.token_type = Some("bearer".to_string());
    credential.access_token = Some("gho_abc123".to_string());
    credential.scope = Some(vec!["repo".to_string(), "read:user".to_string()]);
    credential.expires_in = Some(28800);
    credential.expires_at = Some(Utc::now() + Duration::hours(8));
    credential
}

#[tokio::test]
async fn test_entry_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let credential = create_test_credential();

    {
        let store = open_store(&config.store).await.unwrap();
        let vault = Vault::from_config(&config, store, Span::none()).unwrap();
        vault.put("alice:github", &credential).await.unwrap();
    }

    let store = open_store(&config.store).await.unwrap();
    let vault = Vault::from_config(&config, store, Span::none()).unwrap();
    let retrieved = vault.get("alice:github").await.unwrap().unwrap();
    assert_eq!(retrieved, credential);
    assert_eq!(
        retrieved.authorization_header(),
        Some("Bearer gho_abc123".to_string())
    );
}

#[tokio::test]
async fn test_rotated_secret_cannot_read_entry() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);

    let store = open_store(&config.store).await.unwrap();
    let vault = Vault::from_config(&config, store, Span::none()).unwrap();
    vault
        .put("alice:github", &create_test_credential())
        .await
        .unwrap();

    config.encryption_secret = CipherCodec::generate_secret();
    let store = open_store(&config.store).await.unwrap();
    let vault = Vault::from_config(&config, store.clone(), Span::none()).unwrap();

    let err = vault.get("alice:github").await.unwrap_err();
    assert!(matches!(err, VaultError::Decryption { .. }));
    assert!(store.get("alice:github").await.unwrap().is_some());

    // Eviction still works without the old key
    vault.delete("alice:github").await.unwrap();
    assert!(store.get("alice:github").await.unwrap().is_none());
}
