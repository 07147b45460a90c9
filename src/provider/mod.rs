//! OAuth provider descriptors.
//!
//! A [`ProviderDescriptor`] is the immutable client registration for one
//! identity provider. Every credential issued by that provider holds a shared
//! reference to the same descriptor; nothing in this crate mutates it.

use crate::config::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// OAuth client registration for a single provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Registry identifier (e.g. "gitlab")
    pub id: String,

    /// OAuth client ID
    pub client_id: String,

    /// OAuth client secret
    pub client_secret: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL (code exchange and refresh grants)
    pub token_endpoint: String,

    /// Redirect URL registered with the provider
    pub redirect_url: String,
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("redirect_url", &self.redirect_url)
            .finish()
    }
}

impl ProviderDescriptor {
    /// Build the authorization URL a browser is sent to.
    pub fn build_auth_url(&self, state: &str, scope: &[String], redirect_uri: &str) -> String {
        let scope = scope.join(" ");
        let separator = if self.authorization_endpoint.contains('?') {
            '&'
        } else {
            '?'
        };
        format!(
            "{}{}response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.authorization_endpoint,
            separator,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(state)
        )
    }
}

/// A registered provider plus the local policy applied to its credentials.
#[derive(Clone, Debug)]
pub struct RegisteredProvider {
    pub descriptor: Arc<ProviderDescriptor>,
    pub default_scope: Vec<String>,
    /// Local lifetime cap in seconds (see [`crate::credential::Credential::apply_expiry_cap`])
    pub max_lifetime: Option<u64>,
}

/// Read-only lookup from provider id to its registration.
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the `[providers.<id>]` configuration tables.
    pub fn from_config(providers: &BTreeMap<String, ProviderConfig>) -> Self {
        let mut registry = Self::new();
        for (id, cfg) in providers {
            registry.register(
                ProviderDescriptor {
                    id: id.clone(),
                    client_id: cfg.client_id.clone(),
                    client_secret: cfg.client_secret.clone(),
                    authorization_endpoint: cfg.authorization_endpoint.clone(),
                    token_endpoint: cfg.token_endpoint.clone(),
                    redirect_url: cfg.redirect_url.clone(),
                },
                cfg.default_scope.clone(),
                cfg.max_lifetime_secs,
            );
        }
        registry
    }

    /// Add (or replace) a provider registration.
    pub fn register(
        &mut self,
        descriptor: ProviderDescriptor,
        default_scope: Vec<String>,
        max_lifetime: Option<u64>,
    ) {
        self.providers.insert(
            descriptor.id.clone(),
            RegisteredProvider {
                descriptor: Arc::new(descriptor),
                default_scope,
                max_lifetime,
            },
        );
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredProvider> {
        self.providers.get(id)
    }

    /// Provider ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Vault key for a user's credential with a provider.
pub fn vault_key(user_id: &str, provider_id: &str) -> String {
    format!("{}:{}", user_id, provider_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor {
            id: "gitlab".to_string(),
            client_id: "test_client_id".to_string(),
            client_secret: "test_secret".to_string(),
            authorization_endpoint: "https://example.com/oauth/authorize".to_string(),
            token_endpoint: "https://example.com/oauth/token".to_string(),
            redirect_url: "http://localhost:5000/auth/gitlab/token".to_string(),
        }
    }

    #[test]
    fn test_build_auth_url() {
        let url = descriptor().build_auth_url(
            "random_state",
            &["read".to_string(), "write".to_string()],
            "http://localhost:3000/callback",
        );

        assert!(url.starts_with("https://example.com/oauth/authorize?response_type=code"));
        assert!(url.contains("client_id=test_client_id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fcallback"));
        assert!(url.contains("scope=read%20write"));
        assert!(url.contains("state=random_state"));
    }

    #[test]
    fn test_build_auth_url_existing_query() {
        let mut provider = descriptor();
        provider.authorization_endpoint = "https://example.com/authorize?prompt=consent".to_string();

        let url = provider.build_auth_url("s", &[], "http://cb");
        assert!(url.starts_with("https://example.com/authorize?prompt=consent&response_type=code"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let output = format!("{:?}", descriptor());
        assert!(output.contains("test_client_id"));
        assert!(!output.contains("test_secret"));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.is_empty());

        registry.register(descriptor(), vec!["api".to_string()], Some(7200));

        let entry = registry.get("gitlab").unwrap();
        assert_eq!(entry.descriptor.token_endpoint, "https://example.com/oauth/token");
        assert_eq!(entry.default_scope, vec!["api".to_string()]);
        assert_eq!(entry.max_lifetime, Some(7200));
        assert!(registry.get("github").is_none());
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["gitlab"]);
    }

    #[test]
    fn test_registry_from_config() {
        let toml = r#"
            [gitlab]
            client_id = "gateway"
            client_secret = "s3cret"
            authorization_endpoint = "https://gitlab.example.com/oauth/authorize"
            token_endpoint = "https://gitlab.example.com/oauth/token"
            redirect_url = "https://gateway.example.com/auth/gitlab/token"
            default_scope = ["api"]
            max_lifetime_secs = 3600

            [github]
            client_id = "gh-gateway"
            authorization_endpoint = "https://github.com/login/oauth/authorize"
            token_endpoint = "https://github.com/login/oauth/access_token"
            redirect_url = "https://gateway.example.com/auth/github/token"
        "#;
        let providers: BTreeMap<String, ProviderConfig> = toml::from_str(toml).unwrap();

        let registry = ProviderRegistry::from_config(&providers);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["github", "gitlab"]);

        let gitlab = registry.get("gitlab").unwrap();
        assert_eq!(gitlab.descriptor.id, "gitlab");
        assert_eq!(gitlab.descriptor.client_secret, "s3cret");
        assert_eq!(gitlab.default_scope, vec!["api".to_string()]);
        assert_eq!(gitlab.max_lifetime, Some(3600));

        let github = registry.get("github").unwrap();
        assert!(github.default_scope.is_empty());
        assert_eq!(github.max_lifetime, None);
    }

    #[test]
    fn test_vault_key() {
        assert_eq!(vault_key("alice", "gitlab"), "alice:gitlab");
    }
}
