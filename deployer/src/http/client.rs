//! HTTP pipeline for the management API

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arm_models::CloudError;
use chrono::{DateTime, Utc};
use reqwest::{header::HeaderMap, Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::authn::credential::TokenCredential;
use crate::errors::DeployError;
use crate::http::lro::PollOptions;
use crate::utils::{calc_exp_backoff, client_request_id, user_agent, CooldownOptions};

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";
pub const DEFAULT_API_VERSION: &str = "2021-04-01";

/// Retry policy for transient failures
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Backoff between attempts when the service sends no `Retry-After`
    pub cooldown: CooldownOptions,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            cooldown: CooldownOptions::default(),
        }
    }
}

/// Options shared by every client built from one factory
#[derive(Debug, Clone)]
pub struct ArmClientOptions {
    /// Management endpoint
    pub endpoint: String,

    /// `api-version` query parameter
    pub api_version: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Retry policy
    pub retry: RetryOptions,

    /// Long-running operation polling
    pub poll: PollOptions,
}

impl Default for ArmClientOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(60),
            retry: RetryOptions::default(),
            poll: PollOptions::default(),
        }
    }
}

/// Authenticated, retrying HTTP client for the management endpoint
pub struct ArmClient {
    client: Client,
    endpoint: Url,
    credential: Arc<dyn TokenCredential>,
    options: ArmClientOptions,
}

impl ArmClient {
    /// Create a new client
    pub fn new(
        credential: Arc<dyn TokenCredential>,
        options: ArmClientOptions,
    ) -> Result<Self, DeployError> {
        let endpoint = Url::parse(&options.endpoint).map_err(|e| {
            DeployError::ConfigError(format!(
                "Invalid management endpoint {}: {}",
                options.endpoint, e
            ))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(DeployError::ConfigError(format!(
                "Invalid management endpoint {}",
                options.endpoint
            )));
        }

        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(user_agent())
            .build()?;

        Ok(Self {
            client,
            endpoint,
            credential,
            options,
        })
    }

    /// Get the management endpoint
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn options(&self) -> &ArmClientOptions {
        &self.options
    }

    /// OAuth2 scope for the management endpoint
    pub fn scope(&self) -> String {
        format!("{}/.default", self.endpoint.as_str().trim_end_matches('/'))
    }

    /// Acquire a token for the management scope
    pub async fn authorize(&self, cancel: &CancellationToken) -> Result<(), DeployError> {
        let scope = self.scope();
        let token = cancellable(cancel, self.credential.get_token(&scope)).await?;
        if let Some(claims) = token.claims() {
            debug!(
                "Authorized as app {} in tenant {}",
                claims.appid.as_deref().unwrap_or("?"),
                claims.tid.as_deref().unwrap_or("?")
            );
        }
        Ok(())
    }

    /// Build a URL from unescaped path segments, with `api-version` set
    pub fn resource_url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        url.set_query(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.query_pairs_mut()
            .append_pair("api-version", &self.options.api_version);
        url
    }

    /// Resolve a relative operation handle or an absolute polling link
    pub fn resolve(&self, link: &str) -> Result<Url, DeployError> {
        let mut url = self
            .endpoint
            .join(link)
            .map_err(|e| DeployError::Internal(format!("Invalid operation link {}: {}", link, e)))?;
        if !url.query_pairs().any(|(k, _)| k == "api-version") {
            url.query_pairs_mut()
                .append_pair("api-version", &self.options.api_version);
        }
        Ok(url)
    }

    /// Send a request, retrying transient failures.
    ///
    /// The response is returned whatever its status; see [`ArmClient::send`].
    pub async fn send_raw(
        &self,
        method: Method,
        url: &Url,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Response, DeployError> {
        let scope = self.scope();
        let mut attempt = 0;

        loop {
            let token = cancellable(cancel, self.credential.get_token(&scope)).await?;

            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .bearer_auth(token.secret())
                .header("x-ms-client-request-id", client_request_id());
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!("{} {}", method, url);
            let result =
                cancellable(cancel, async { request.send().await.map_err(DeployError::from) })
                    .await;

            let retry_delay = match &result {
                Ok(response) if is_retryable(response.status()) => Some(
                    retry_after(response.headers())
                        .map(|d| d.min(self.options.retry.cooldown.max_delay))
                        .unwrap_or_else(|| calc_exp_backoff(&self.options.retry.cooldown, attempt)),
                ),
                Err(DeployError::HttpError(e)) if e.is_connect() || e.is_timeout() => {
                    Some(calc_exp_backoff(&self.options.retry.cooldown, attempt))
                }
                _ => None,
            };

            match retry_delay {
                Some(delay) if attempt < self.options.retry.max_retries => {
                    warn!(
                        "{} {} failed transiently (attempt {}), retrying in {:?}",
                        method,
                        url.path(),
                        attempt + 1,
                        delay
                    );
                    sleep(cancel, delay).await?;
                    attempt += 1;
                }
                _ => return result,
            }
        }
    }

    /// Send a request and turn any non-2xx status into [`DeployError::RemoteError`]
    pub async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Response, DeployError> {
        let response = self.send_raw(method.clone(), url, body, cancel).await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let err = remote_error(response).await;
        debug!("HTTP {} {} failed: {}", method, url.path(), err);
        Err(err)
    }

    /// Make a GET request
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<T, DeployError> {
        let response = self.send(Method::GET, url, None, cancel).await?;
        read_json(response).await
    }

    /// Make a PUT request
    pub async fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &Url,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<T, DeployError> {
        let body = serde_json::to_value(body)?;
        let response = self.send(Method::PUT, url, Some(&body), cancel).await?;
        read_json(response).await
    }

    /// Make a HEAD request; 2xx is `true`, 404 is `false`
    pub async fn head_exists(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<bool, DeployError> {
        let response = self.send_raw(Method::HEAD, url, None, cancel).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(remote_error(response).await),
        }
    }
}

/// Read a response body as JSON
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, DeployError> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Read a response body as JSON, `None` when empty or not JSON
pub async fn read_json_lenient(response: Response) -> Result<Option<Value>, DeployError> {
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(serde_json::from_slice(&bytes).ok())
}

/// Decode the management API error envelope from a failed response
pub async fn remote_error(response: Response) -> DeployError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    remote_error_from_body(status, &body)
}

pub(crate) fn remote_error_from_body(status: StatusCode, body: &str) -> DeployError {
    let envelope = serde_json::from_str::<CloudError>(body)
        .ok()
        .and_then(|e| e.error);

    let code = envelope
        .as_ref()
        .and_then(|e| e.code.clone())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").replace(' ', ""));
    let message = envelope
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.trim().to_string());

    DeployError::RemoteError {
        status,
        code,
        message,
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Delay requested by the service through `retry-after-ms`,
/// `x-ms-retry-after-ms` or `Retry-After` (seconds or HTTP date)
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    for name in ["retry-after-ms", "x-ms-retry-after-ms"] {
        if let Some(ms) = header_str(headers, name).and_then(|v| v.parse::<u64>().ok()) {
            return Some(Duration::from_millis(ms));
        }
    }

    let value = header_str(headers, "retry-after")?;
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    (at.with_timezone(&Utc) - Utc::now()).to_std().ok()
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Run a future unless the token is cancelled first
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, DeployError>
where
    F: Future<Output = Result<T, DeployError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DeployError::Cancelled),
        result = fut => result,
    }
}

/// Sleep unless the token is cancelled first
pub async fn sleep(cancel: &CancellationToken, duration: Duration) -> Result<(), DeployError> {
    cancellable(cancel, async {
        tokio::time::sleep(duration).await;
        Ok(())
    })
    .await
}
