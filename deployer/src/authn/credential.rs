//! Credential providers

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::authn::access_token::AccessToken;
use crate::errors::DeployError;

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Refresh tokens this many seconds before they expire
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Source of bearer tokens for the management API
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Get a token valid for the given scope
    async fn get_token(&self, scope: &str) -> Result<AccessToken, DeployError>;
}

/// Read a required environment variable
pub fn required_env(name: &str) -> Result<String, DeployError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(DeployError::ConfigError(format!("{} is not set.", name))),
    }
}

/// Service principal credential using the OAuth2 client-credentials grant
pub struct ClientSecretCredential {
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
    authority_host: String,
    client: reqwest::Client,
    cached_tokens: RwLock<HashMap<String, AccessToken>>,
}

impl ClientSecretCredential {
    /// Create a new credential
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        authority_host: &str,
    ) -> Result<Self, DeployError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret,
            authority_host: authority_host.trim_end_matches('/').to_string(),
            client,
            cached_tokens: RwLock::new(HashMap::new()),
        })
    }

    /// Build from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET`
    /// and the optional `AZURE_AUTHORITY_HOST`
    pub fn from_env() -> Result<Self, DeployError> {
        let tenant_id = required_env("AZURE_TENANT_ID")?;
        let client_id = required_env("AZURE_CLIENT_ID")?;
        let client_secret = SecretString::from(required_env("AZURE_CLIENT_SECRET")?);
        let authority_host = std::env::var("AZURE_AUTHORITY_HOST")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string());

        Self::new(tenant_id, client_id, client_secret, &authority_host)
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_host, self.tenant_id)
    }

    /// Request a fresh token from the authority
    async fn request_token(&self, scope: &str) -> Result<AccessToken, DeployError> {
        let url = self.token_url();
        debug!("POST {} (client credentials)", url);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("scope", scope),
        ];

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| DeployError::AuthError(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let description = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| e.describe())
                .unwrap_or(body);
            error!("Token acquisition failed: {} - {}", status, description);
            return Err(DeployError::AuthError(format!(
                "Token acquisition failed: {} - {}",
                status, description
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| DeployError::AuthError(format!("Invalid token response: {}", e)))?;

        Ok(AccessToken::from_expires_in(body.access_token, body.expires_in))
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, DeployError> {
        {
            let cached = self.cached_tokens.read().await;
            if let Some(token) = cached.get(scope) {
                if !token.expires_within(EXPIRY_MARGIN_SECS) {
                    return Ok(token.clone());
                }
            }
        }

        let token = self.request_token(scope).await?;
        info!(
            "Acquired token for {} (client {}), expires at: {}",
            scope,
            self.client_id,
            token.expires_at()
        );

        let mut cached = self.cached_tokens.write().await;
        cached.insert(scope.to_string(), token.clone());

        Ok(token)
    }
}

/// A credential that always returns the same token
pub struct StaticTokenCredential {
    token: AccessToken,
}

impl StaticTokenCredential {
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken, DeployError> {
        if self.token.is_expired() {
            return Err(DeployError::AuthError("Static token has expired".to_string()));
        }
        Ok(self.token.clone())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in", deserialize_with = "lenient_i64")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3599
}

/// `expires_in` arrives as a number from v2.0 endpoints and as a string from v1
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| serde::de::Error::custom(format!("invalid expires_in: {}", value)))
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenErrorResponse {
    fn describe(&self) -> String {
        match &self.error_description {
            Some(description) => format!("{}: {}", self.error, description),
            None => self.error.clone(),
        }
    }
}
