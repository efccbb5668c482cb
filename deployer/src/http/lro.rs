//! Long-running operation polling
//!
//! The management API acknowledges slow writes with `201`/`202` and a polling
//! link. In order of preference the poller follows `Azure-AsyncOperation`
//! (a status resource with `status` and `error`), then `Location` (`202`
//! until the result is ready), then the resource itself
//! (`properties.provisioningState`).

use std::sync::Arc;
use std::time::{Duration, Instant};

use arm_models::{ErrorResponse, OperationStatus};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::errors::DeployError;
use crate::http::client::{
    header_str, read_json_lenient, remote_error, retry_after, sleep, ArmClient,
};
use crate::models::operation::AsyncOperationHandle;

/// Poller options
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Delay between polls when the service sends no `Retry-After`
    pub interval: Duration,

    /// Give up after this long
    pub max_wait: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// State of a long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationState {
    /// Parse a `status` / `provisioningState` value
    pub fn parse(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "succeeded" => OperationState::Succeeded,
            "failed" => OperationState::Failed,
            "canceled" | "cancelled" => OperationState::Canceled,
            _ => OperationState::InProgress,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationState::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationState::InProgress => "InProgress",
            OperationState::Succeeded => "Succeeded",
            OperationState::Failed => "Failed",
            OperationState::Canceled => "Canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    AsyncOperation,
    Location,
    ResourceBody,
    Done,
}

/// Tracks one long-running operation
pub struct Poller {
    client: Arc<ArmClient>,
    method: Method,
    resource_url: Url,
    strategy: Strategy,
    polling_url: Url,
    location_url: Option<Url>,
    state: OperationState,
    last_body: Option<Value>,
    error: Option<ErrorResponse>,
    retry_after: Option<Duration>,
    final_statuses: Vec<StatusCode>,
}

impl Poller {
    /// Build a poller from the initial (successful) response of a write
    pub async fn from_initial_response(
        client: Arc<ArmClient>,
        method: Method,
        resource_url: Url,
        response: Response,
    ) -> Result<Self, DeployError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = read_json_lenient(response).await?;

        let async_operation = header_str(&headers, "azure-asyncoperation")
            .map(|link| client.resolve(link))
            .transpose()?;
        let location = header_str(&headers, "location")
            .map(|link| client.resolve(link))
            .transpose()?;

        let (strategy, polling_url, state) = if let Some(url) = async_operation {
            (Strategy::AsyncOperation, url, OperationState::InProgress)
        } else if let Some(url) = location.clone() {
            (Strategy::Location, url, OperationState::InProgress)
        } else if status == StatusCode::ACCEPTED {
            return Err(DeployError::Internal(format!(
                "{} {} was accepted without a polling link",
                method,
                resource_url.path()
            )));
        } else {
            match body.as_ref().and_then(provisioning_state) {
                Some(state) if !state.is_terminal() && method != Method::POST => (
                    Strategy::ResourceBody,
                    resource_url.clone(),
                    OperationState::InProgress,
                ),
                Some(state) => (Strategy::Done, resource_url.clone(), state),
                None => (Strategy::Done, resource_url.clone(), OperationState::Succeeded),
            }
        };

        debug!(
            "{} {} started ({:?}, {})",
            method,
            resource_url.path(),
            strategy,
            state.as_str()
        );

        let error = body.as_ref().and_then(error_of);
        Ok(Self {
            client,
            method,
            resource_url,
            strategy,
            polling_url,
            location_url: location,
            state,
            last_body: body,
            error,
            retry_after: retry_after(&headers),
            final_statuses: Vec::new(),
        })
    }

    /// Treat `status` from the result link as a final result instead of an error
    pub fn with_final_status(mut self, status: StatusCode) -> Self {
        self.final_statuses.push(status);
        self
    }

    fn is_final_status(&self, status: StatusCode) -> bool {
        status.is_success() || self.final_statuses.contains(&status)
    }

    /// Current state
    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// Path and query of the link being polled
    pub fn operation_handle(&self) -> AsyncOperationHandle {
        AsyncOperationHandle::from_url(&self.polling_url)
    }

    /// Error reported by the operation, if any
    pub fn error(&self) -> Option<&ErrorResponse> {
        self.error.as_ref()
    }

    /// Issue a single status request
    pub async fn poll(&mut self, cancel: &CancellationToken) -> Result<OperationState, DeployError> {
        if self.is_done() {
            return Ok(self.state);
        }

        match self.strategy {
            Strategy::AsyncOperation | Strategy::ResourceBody => {
                let response = self
                    .client
                    .send(Method::GET, &self.polling_url, None, cancel)
                    .await?;
                self.retry_after = retry_after(response.headers());
                let body = read_json_lenient(response).await?;

                let (state, error) = match (self.strategy, body.as_ref()) {
                    (Strategy::AsyncOperation, Some(body)) => operation_status(body),
                    (_, Some(body)) => (
                        provisioning_state(body).unwrap_or(OperationState::Succeeded),
                        error_of(body),
                    ),
                    (_, None) => (OperationState::InProgress, None),
                };

                self.error = error;
                self.last_body = body;
                self.state = state;
            }
            Strategy::Location => {
                let response = self
                    .client
                    .send_raw(Method::GET, &self.polling_url, None, cancel)
                    .await?;
                self.retry_after = retry_after(response.headers());

                match response.status() {
                    StatusCode::ACCEPTED => {}
                    status if self.is_final_status(status) => {
                        self.last_body = read_json_lenient(response).await?;
                        self.state = OperationState::Succeeded;
                    }
                    _ => return Err(remote_error(response).await),
                }
            }
            Strategy::Done => {}
        }

        debug!("{} {}: {}", self.method, self.resource_url.path(), self.state.as_str());
        Ok(self.state)
    }

    /// Poll until the operation reaches a terminal state.
    ///
    /// Returns the final resource body (if the operation produces one).
    /// `Failed` and `Canceled` surface as [`DeployError::OperationError`].
    pub async fn poll_until_done(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, DeployError> {
        let options = self.client.options().poll.clone();
        let started = Instant::now();

        while !self.is_done() {
            let delay = self.retry_after.unwrap_or(options.interval);
            if started.elapsed() + delay > options.max_wait {
                return Err(DeployError::OperationError {
                    status: "TimedOut".to_string(),
                    code: "PollingTimeout".to_string(),
                    message: format!(
                        "{} {} did not complete within {:?}",
                        self.method,
                        self.resource_url.path(),
                        options.max_wait
                    ),
                });
            }
            sleep(cancel, delay).await?;
            self.poll(cancel).await?;
        }

        match self.state {
            OperationState::Succeeded => {
                info!("{} {} succeeded", self.method, self.resource_url.path());
                self.final_result(cancel).await
            }
            state => {
                let error = self.error.clone().unwrap_or_default();
                Err(DeployError::OperationError {
                    status: state.as_str().to_string(),
                    code: error.code.unwrap_or_else(|| state.as_str().to_string()),
                    message: error.message.unwrap_or_default(),
                })
            }
        }
    }

    async fn final_result(&mut self, cancel: &CancellationToken) -> Result<Option<Value>, DeployError> {
        if self.strategy != Strategy::AsyncOperation {
            return Ok(self.last_body.take());
        }

        if self.method == Method::PUT || self.method == Method::PATCH {
            let body = self
                .client
                .get_json::<Value>(&self.resource_url, cancel)
                .await?;
            return Ok(Some(body));
        }

        if self.method == Method::POST {
            if let Some(location) = self.location_url.clone() {
                let response = self
                    .client
                    .send_raw(Method::GET, &location, None, cancel)
                    .await?;
                if !self.is_final_status(response.status()) {
                    return Err(remote_error(response).await);
                }
                return read_json_lenient(response).await;
            }
        }

        Ok(None)
    }
}

fn provisioning_state(body: &Value) -> Option<OperationState> {
    body.pointer("/properties/provisioningState")
        .and_then(Value::as_str)
        .map(OperationState::parse)
}

/// Decode an `Azure-AsyncOperation` status resource. A body whose `error`
/// does not fit the envelope still yields its `status`.
fn operation_status(body: &Value) -> (OperationState, Option<ErrorResponse>) {
    let operation = serde_json::from_value::<OperationStatus>(body.clone())
        .unwrap_or_else(|_| OperationStatus {
            status: body.get("status").and_then(Value::as_str).map(str::to_string),
            ..Default::default()
        });

    let state = operation
        .status
        .as_deref()
        .map(OperationState::parse)
        .unwrap_or(OperationState::InProgress);
    (state, operation.error)
}

fn error_of(body: &Value) -> Option<ErrorResponse> {
    body.get("error")
        .or_else(|| body.pointer("/properties/error"))
        .and_then(|e| serde_json::from_value(e.clone()).ok())
}
