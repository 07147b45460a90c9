//! OAuth credential entity.
//!
//! A [`Credential`] is one user's token state for one provider. It owns the
//! expiry policy: the provider reports a lifetime (`expires_in`), and a locally
//! configured `max_lifetime` may shorten it. `expires_at` is always derived from
//! those two values at the moment a grant succeeds and is never set directly.
//!
//! # Lifecycle
//!
//! ```text
//! pending() ──complete_exchange()──▶ active ──refresh()──▶ active
//!                                      │
//!                                      └── evicted by the vault on a rejected refresh
//! ```

mod token_endpoint;


pub use token_endpoint::{TokenClient, TokenResponse};

use crate::error::{RecordError, RefreshError};
use crate::provider::{ProviderDescriptor, RegisteredProvider};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Credentials expiring within this window are treated as expired.
pub const EXPIRY_LEEWAY_SECS: i64 = 5;

/// Longest token lifetime recorded (ten years); larger reported values are clamped.
pub const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// `secs` as a [`Duration`], clamped to [`MAX_LIFETIME_SECS`].
pub fn bounded_seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_LIFETIME_SECS) as i64)
}

/// Version of the serialized record written by [`Credential::to_bytes`].
pub const RECORD_VERSION: u32 = 1;

/// Where a credential is in the authorization flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    /// Authorization URL issued, no token yet
    Pending,
    /// Holds an access token from a completed exchange or refresh
    Active,
}

/// Token state for one user and one provider.
///
/// The field list is the serialized record; nothing else is persisted.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub token_type: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<Vec<String>>,
    /// Anti-CSRF value sent with the authorization request
    pub state: Option<String>,
    pub authorization_code: Option<String>,
    pub redirect_url: Option<String>,
    /// Local lifetime cap (seconds)
    pub max_lifetime: Option<u64>,
    /// Effective lifetime of the current token (seconds)
    pub expires_in: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub provider: Arc<ProviderDescriptor>,
}

#[derive(Serialize)]
struct RecordRef<'a> {
    version: u32,
    #[serde(flatten)]
    credential: &'a Credential,
}

#[derive(Deserialize)]
struct Record {
    version: u32,
    #[serde(flatten)]
    credential: Credential,
}

impl Credential {
    /// Empty credential bound to `provider`.
    pub fn new(provider: Arc<ProviderDescriptor>) -> Self {
        Self {
            token_type: None,
            access_token: None,
            refresh_token: None,
            scope: None,
            state: None,
            authorization_code: None,
            redirect_url: None,
            max_lifetime: None,
            expires_in: None,
            expires_at: None,
            provider,
        }
    }

    /// Credential awaiting authorization, with a fresh `state` value.
    pub fn pending(
        provider: Arc<ProviderDescriptor>,
        scope: Vec<String>,
        max_lifetime: Option<u64>,
    ) -> Self {
        let redirect_url = provider.redirect_url.clone();
        Self {
            scope: Some(scope),
            state: Some(uuid::Uuid::new_v4().simple().to_string()),
            redirect_url: Some(redirect_url),
            max_lifetime,
            ..Self::new(provider)
        }
    }

    /// Pending credential using a registry entry's default scope and lifetime cap.
    pub fn for_provider(registration: &RegisteredProvider) -> Self {
        Self::pending(
            Arc::clone(&registration.descriptor),
            registration.default_scope.clone(),
            registration.max_lifetime,
        )
    }

    pub fn status(&self) -> CredentialStatus {
        match &self.access_token {
            Some(token) if !token.is_empty() => CredentialStatus::Active,
            _ => CredentialStatus::Pending,
        }
    }

    /// URL to send the user's browser to for authorization.
    pub fn authorization_url(&self) -> String {
        let redirect = self
            .redirect_url
            .as_deref()
            .unwrap_or(&self.provider.redirect_url);
        self.provider.build_auth_url(
            self.state.as_deref().unwrap_or_default(),
            self.scope.as_deref().unwrap_or_default(),
            redirect,
        )
    }

    /// Value for an outgoing `Authorization` header, if the credential is active.
    pub fn authorization_header(&self) -> Option<String> {
        let token = self.access_token.as_deref().filter(|t| !t.is_empty())?;
        let token_type = match self.token_type.as_deref() {
            // Providers return "bearer" in varying case
            None | Some("") => "Bearer",
            Some(t) if t.eq_ignore_ascii_case("bearer") => "Bearer",
            Some(t) => t,
        };
        Some(format!("{} {}", token_type, token))
    }

    /// Recompute `expires_in`/`expires_at` for a grant issued at `issued_at`.
    ///
    /// `max_lifetime` only ever shortens a long or missing provider lifetime.
    /// A zero `max_lifetime` counts as unset. Lifetimes beyond
    /// [`MAX_LIFETIME_SECS`] are clamped to it.
    pub fn apply_expiry_cap(&mut self, issued_at: DateTime<Utc>) {
        let cap = self.max_lifetime.filter(|m| *m > 0);

        let effective = match (cap, self.expires_in) {
            (Some(max), None) => Some(max),
            (Some(max), Some(reported)) if reported > max => Some(max),
            (_, reported) => reported,
        }
        .map(|secs| secs.min(MAX_LIFETIME_SECS));

        self.expires_in = effective;
        self.expires_at =
            effective.and_then(|secs| issued_at.checked_add_signed(bounded_seconds(secs)));
    }

    /// True if the credential expires within [`EXPIRY_LEEWAY_SECS`] from now.
    pub fn expires_soon(&self) -> bool {
        self.expires_within(Duration::seconds(EXPIRY_LEEWAY_SECS), Utc::now())
    }

    /// True if `expires_at` is set and earlier than `now + leeway`.
    pub fn expires_within(&self, leeway: Duration, now: DateTime<Utc>) -> bool {
        match (self.expires_at, now.checked_add_signed(leeway)) {
            (Some(expires_at), Some(deadline)) => expires_at < deadline,
            // A leeway past the end of time covers every expiry
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// The cached `expires_at` is cleared before the request, so a failed
    /// refresh leaves this in-memory copy without a known expiry.
    pub async fn refresh(&mut self, client: &TokenClient) -> Result<(), RefreshError> {
        self.expires_at = None;

        let refresh_token = match self.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => {
                return Err(RefreshError::ProviderAuth {
                    error: "missing_refresh_token".to_string(),
                    description: Some("credential has no refresh token".to_string()),
                })
            }
        };

        let issued_at = Utc::now();
        let response = client.refresh_grant(&self.provider, &refresh_token).await?;

        debug!(
            provider = %self.provider.id,
            rotated = response.refresh_token.is_some(),
            expires_in = ?response.expires_in,
            "Refresh grant succeeded"
        );

        self.apply_token_response(response, issued_at);
        Ok(())
    }

    /// Complete the authorization-code exchange and activate the credential.
    pub async fn complete_exchange(
        &mut self,
        client: &TokenClient,
        code: &str,
    ) -> Result<(), RefreshError> {
        let redirect = self
            .redirect_url
            .clone()
            .unwrap_or_else(|| self.provider.redirect_url.clone());

        let issued_at = Utc::now();
        let response = client
            .authorization_code_grant(&self.provider, code, &redirect)
            .await?;

        self.authorization_code = Some(code.to_string());
        self.apply_token_response(response, issued_at);
        Ok(())
    }

    fn apply_token_response(&mut self, response: TokenResponse, issued_at: DateTime<Utc>) {
        self.access_token = Some(response.access_token);
        // Keep the existing refresh token if the provider did not rotate it
        if let Some(refresh_token) = response.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if let Some(token_type) = response.token_type {
            self.token_type = Some(token_type);
        }
        if let Some(scope) = response.scope {
            self.scope = Some(scope);
        }
        self.expires_in = response.expires_in;
        self.apply_expiry_cap(issued_at);
    }

    /// Serialize the record (including the provider registration) for encryption.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RecordError> {
        Ok(serde_json::to_vec(&RecordRef {
            version: RECORD_VERSION,
            credential: self,
        })?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        let record: Record = serde_json::from_slice(bytes)?;
        if record.version != RECORD_VERSION {
            return Err(RecordError::UnsupportedVersion(record.version));
        }
        Ok(record.credential)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credential")
            .field("provider", &self.provider.id)
            .field("token_type", &self.token_type)
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("scope", &self.scope)
            .field("state", &self.state)
            .field("authorization_code", &redact(&self.authorization_code))
            .field("redirect_url", &self.redirect_url)
            .field("max_lifetime", &self.max_lifetime)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
