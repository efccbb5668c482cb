//! Client factory

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::authn::credential::TokenCredential;
use crate::errors::DeployError;
use crate::http::client::{ArmClient, ArmClientOptions};
use crate::http::deployment_status::DeploymentStatusClient;
use crate::http::deployments::DeploymentsClient;
use crate::http::resource_groups::ResourceGroupsClient;

/// Builds the resource, deployment and status clients for one subscription.
///
/// All clients share one HTTP pipeline, and with it the credential's token
/// cache. The options are cloned on construction.
pub struct ArmClientFactory {
    subscription_id: String,
    client: Arc<ArmClient>,
}

impl ArmClientFactory {
    /// Create a factory, checking that a token can be acquired for the
    /// management endpoint
    pub async fn new(
        subscription_id: &str,
        credential: Arc<dyn TokenCredential>,
        options: &ArmClientOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, DeployError> {
        let subscription_id = subscription_id.trim();
        if subscription_id.is_empty() {
            return Err(DeployError::ConfigError(
                "Subscription ID must not be empty".to_string(),
            ));
        }

        let client = Arc::new(ArmClient::new(credential, options.clone())?);
        client.authorize(cancel).await.map_err(|e| match e {
            DeployError::Cancelled | DeployError::AuthError(_) => e,
            other => DeployError::AuthError(other.to_string()),
        })?;
        info!(
            "Connected to {} for subscription {}",
            client.endpoint(),
            subscription_id
        );

        Ok(Self {
            subscription_id: subscription_id.to_string(),
            client,
        })
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Options the clients were built with
    pub fn options(&self) -> &ArmClientOptions {
        self.client.options()
    }

    pub fn new_resource_groups_client(&self) -> ResourceGroupsClient {
        ResourceGroupsClient::new(self.client.clone(), self.subscription_id.clone())
    }

    pub fn new_deployments_client(&self) -> DeploymentsClient {
        DeploymentsClient::new(self.client.clone(), self.subscription_id.clone())
    }

    pub fn new_deployment_status_client(&self) -> DeploymentStatusClient {
        DeploymentStatusClient::new(self.client.clone())
    }
}
