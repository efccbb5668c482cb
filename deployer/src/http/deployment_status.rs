//! Deployment status reader

use std::sync::Arc;
use std::time::Instant;

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::DeployError;
use crate::http::client::{retry_after, sleep, ArmClient};
use crate::models::operation::AsyncOperationHandle;
use crate::models::status::DeploymentStatusResponse;

/// Reads the status of a deployment operation from its handle
pub struct DeploymentStatusClient {
    client: Arc<ArmClient>,
}

impl DeploymentStatusClient {
    pub fn new(client: Arc<ArmClient>) -> Self {
        Self { client }
    }

    /// Fetch the current status of the operation behind `handle`
    pub async fn get_status(
        &self,
        handle: &AsyncOperationHandle,
        cancel: &CancellationToken,
    ) -> Result<DeploymentStatusResponse, DeployError> {
        let (status, _) = self.fetch(handle, cancel).await?;
        Ok(status)
    }

    /// Poll the operation until it succeeds, fails or is canceled.
    ///
    /// Unlike [`crate::http::lro::Poller::poll_until_done`] a failed
    /// operation is returned as data, with its decoded error.
    pub async fn wait_for_terminal(
        &self,
        handle: &AsyncOperationHandle,
        cancel: &CancellationToken,
    ) -> Result<DeploymentStatusResponse, DeployError> {
        let options = self.client.options().poll.clone();
        let started = Instant::now();

        loop {
            let (status, delay) = self.fetch(handle, cancel).await?;
            if status.is_terminal() {
                return Ok(status);
            }

            let delay = delay.unwrap_or(options.interval);
            if started.elapsed() + delay > options.max_wait {
                return Err(DeployError::OperationError {
                    status: status.status.unwrap_or_else(|| "Unknown".to_string()),
                    code: "PollingTimeout".to_string(),
                    message: format!(
                        "{} did not complete within {:?}",
                        handle.path(),
                        options.max_wait
                    ),
                });
            }
            sleep(cancel, delay).await?;
        }
    }

    async fn fetch(
        &self,
        handle: &AsyncOperationHandle,
        cancel: &CancellationToken,
    ) -> Result<(DeploymentStatusResponse, Option<std::time::Duration>), DeployError> {
        let url = self.client.resolve(handle.as_str())?;
        let response = self.client.send(Method::GET, &url, None, cancel).await?;
        let delay = retry_after(response.headers());
        let bytes = response.bytes().await?;

        let status = DeploymentStatusResponse::from_slice(&bytes);
        debug!(
            "Operation {}: {}",
            handle.path(),
            status.status.as_deref().unwrap_or("<no status>")
        );
        Ok((status, delay))
    }
}
