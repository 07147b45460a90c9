//! Token endpoint requests.
//!
//! Sends form-encoded `authorization_code` and `refresh_token` grants and
//! sorts failures into the two outcomes the vault cares about: the provider
//! rejected the grant (evict) or the exchange did not complete (keep).

use crate::error::RefreshError;
use crate::provider::ProviderDescriptor;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// OAuth error codes that mean the grant itself is dead.
///
/// `bad_refresh_token` is what GitHub reports (with HTTP 200) for a revoked
/// or already-rotated refresh token.
const REVOKING_ERRORS: &[&str] = &[
    "invalid_grant",
    "invalid_client",
    "unauthorized_client",
    "bad_refresh_token",
];

/// Successful OAuth token response (RFC 6749 §5.1)
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default, deserialize_with = "scope_list")]
    pub scope: Option<Vec<String>>,
}

/// OAuth error response (RFC 6749 §5.2)
#[derive(Deserialize, Debug)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// HTTP client for provider token endpoints.
#[derive(Clone, Debug)]
pub struct TokenClient {
    http: reqwest::Client,
}

impl TokenClient {
    /// Client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// `grant_type=refresh_token` with client credentials in the body.
    pub async fn refresh_grant(
        &self,
        provider: &ProviderDescriptor,
        refresh_token: &str,
    ) -> Result<TokenResponse, RefreshError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
        ];
        self.request(provider, &form).await
    }

    /// `grant_type=authorization_code` for a code returned to `redirect_uri`.
    pub async fn authorization_code_grant(
        &self,
        provider: &ProviderDescriptor,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, RefreshError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
        ];
        self.request(provider, &form).await
    }

    async fn request(
        &self,
        provider: &ProviderDescriptor,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, RefreshError> {
        debug!(
            provider = %provider.id,
            token_endpoint = %provider.token_endpoint,
            "Sending token request"
        );

        let response = self
            .http
            .post(&provider.token_endpoint)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            if let Ok(token) = serde_json::from_str::<TokenResponse>(&body) {
                if token.access_token.is_empty() {
                    return Err(RefreshError::Transport(
                        "token response has an empty access_token".to_string(),
                    ));
                }
                return Ok(token);
            }
        }

        Err(classify_failure(status, &body))
    }
}

/// Decide whether a failed token response revokes the stored grant.
///
/// Only 400/401 (and 200, for providers that report errors in a success
/// response) carrying one of [`REVOKING_ERRORS`] count as a provider
/// rejection. Rate limiting, server errors and anything unparseable are
/// transport failures.
pub(crate) fn classify_failure(status: StatusCode, body: &str) -> RefreshError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();

    let rejects_grant = matches!(
        status,
        StatusCode::OK | StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED
    );

    match parsed {
        Some(err) if rejects_grant && REVOKING_ERRORS.contains(&err.error.as_str()) => {
            RefreshError::ProviderAuth {
                error: err.error,
                description: err.error_description,
            }
        }
        Some(err) => RefreshError::Transport(format!(
            "token endpoint returned status {} ({})",
            status, err.error
        )),
        None if status.is_success() => {
            RefreshError::Transport("malformed token response".to_string())
        }
        None => RefreshError::Transport(format!("token endpoint returned status {}", status)),
    }
}

/// Accepts `3600` as well as `"3600"`; negative values are dropped.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Accepts a space-delimited string (RFC 6749) or a JSON array.
fn scope_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s.split_whitespace().map(str::to_string).collect()),
        Some(Value::Array(items)) => Some(
            items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    })
}
