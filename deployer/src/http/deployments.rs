//! Deployment API client

use std::sync::Arc;

use arm_models::{DeploymentExtended, DeploymentValidateResult};
use reqwest::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::errors::DeployError;
use crate::http::client::{read_json_lenient, remote_error, remote_error_from_body, ArmClient};
use crate::http::lro::Poller;
use crate::models::deployment::DeploymentRequest;
use crate::models::operation::AsyncOperationHandle;

/// Submits, checks and validates deployments in a resource group
pub struct DeploymentsClient {
    client: Arc<ArmClient>,
    subscription_id: String,
}

impl DeploymentsClient {
    pub fn new(client: Arc<ArmClient>, subscription_id: impl Into<String>) -> Self {
        Self {
            client,
            subscription_id: subscription_id.into(),
        }
    }

    fn url(&self, resource_group: &str, name: &str, action: Option<&str>) -> Url {
        let mut segments = vec![
            "subscriptions",
            self.subscription_id.as_str(),
            "resourcegroups",
            resource_group,
            "providers",
            "Microsoft.Resources",
            "deployments",
            name,
        ];
        segments.extend(action);
        self.client.resource_url(&segments)
    }

    /// Check whether a deployment with this name exists
    pub async fn check_existence(
        &self,
        resource_group: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, DeployError> {
        let url = self.url(resource_group, name, None);
        self.client.head_exists(&url, cancel).await
    }

    /// Get a deployment
    pub async fn get(
        &self,
        resource_group: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<DeploymentExtended, DeployError> {
        let url = self.url(resource_group, name, None);
        self.client.get_json(&url, cancel).await
    }

    /// Submit a deployment and return a poller for it
    pub async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        request: &DeploymentRequest,
        cancel: &CancellationToken,
    ) -> Result<Poller, DeployError> {
        let url = self.url(resource_group, name, None);
        let body = serde_json::to_value(request.to_wire())?;

        info!("Submitting deployment {} to {}", name, resource_group);
        let response = self.client.send(Method::PUT, &url, Some(&body), cancel).await?;
        Poller::from_initial_response(self.client.clone(), Method::PUT, url, response).await
    }

    /// Submit a deployment and return as soon as the service acknowledges it
    pub async fn submit_non_blocking(
        &self,
        resource_group: &str,
        name: &str,
        request: &DeploymentRequest,
        cancel: &CancellationToken,
    ) -> Result<AsyncOperationHandle, DeployError> {
        let poller = self
            .begin_create_or_update(resource_group, name, request, cancel)
            .await?;
        let handle = poller.operation_handle();
        debug!("Deployment {} accepted, tracking {}", name, handle.path());
        Ok(handle)
    }

    /// Submit a deployment and wait for it to reach a terminal state
    pub async fn submit_and_wait(
        &self,
        resource_group: &str,
        name: &str,
        request: &DeploymentRequest,
        cancel: &CancellationToken,
    ) -> Result<DeploymentExtended, DeployError> {
        let mut poller = self
            .begin_create_or_update(resource_group, name, request, cancel)
            .await?;
        match poller.poll_until_done(cancel).await? {
            Some(body) => Ok(serde_json::from_value(body)?),
            None => self.get(resource_group, name, cancel).await,
        }
    }

    /// Validate a deployment without applying it.
    ///
    /// A template the service rejects comes back as a result carrying
    /// `error`; only transport and authorization failures are errors.
    pub async fn validate(
        &self,
        resource_group: &str,
        name: &str,
        request: &DeploymentRequest,
        cancel: &CancellationToken,
    ) -> Result<DeploymentValidateResult, DeployError> {
        let url = self.url(resource_group, name, Some("validate"));
        let body = serde_json::to_value(request.to_wire())?;

        info!("Validating deployment {} in {}", name, resource_group);
        let response = self
            .client
            .send_raw(Method::POST, &url, Some(&body), cancel)
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::BAD_REQUEST => {
                let status = response.status();
                let bytes = response.bytes().await?;
                serde_json::from_slice(&bytes).map_err(|_| {
                    remote_error_from_body(status, &String::from_utf8_lossy(&bytes))
                })
            }
            StatusCode::ACCEPTED => {
                let mut poller =
                    Poller::from_initial_response(self.client.clone(), Method::POST, url, response)
                        .await?
                        .with_final_status(StatusCode::BAD_REQUEST);
                let result = poller.poll_until_done(cancel).await?;
                Ok(result
                    .map(serde_json::from_value::<DeploymentValidateResult>)
                    .transpose()?
                    .unwrap_or_default())
            }
            status if status.is_success() => Ok(read_json_lenient(response)
                .await?
                .map(serde_json::from_value::<DeploymentValidateResult>)
                .transpose()?
                .unwrap_or_default()),
            _ => Err(remote_error(response).await),
        }
    }
}
