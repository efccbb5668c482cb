//! Resource group API client

use std::sync::Arc;

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::errors::DeployError;
use crate::http::client::ArmClient;
use crate::http::lro::Poller;
use crate::models::resource_group::ResourceGroup;

/// Creates, reads and deletes resource groups in one subscription
pub struct ResourceGroupsClient {
    client: Arc<ArmClient>,
    subscription_id: String,
}

impl ResourceGroupsClient {
    pub fn new(client: Arc<ArmClient>, subscription_id: impl Into<String>) -> Self {
        Self {
            client,
            subscription_id: subscription_id.into(),
        }
    }

    fn url(&self, name: &str) -> Result<Url, DeployError> {
        if name.trim().is_empty() {
            return Err(DeployError::ConfigError(
                "Resource group name must not be empty".to_string(),
            ));
        }
        Ok(self
            .client
            .resource_url(&["subscriptions", self.subscription_id.as_str(), "resourcegroups", name]))
    }

    /// Create the group, or update it in place if it already exists
    pub async fn create_or_update(
        &self,
        name: &str,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<ResourceGroup, DeployError> {
        let url = self.url(name)?;
        let body = arm_models::ResourceGroup {
            location: location.to_string(),
            ..Default::default()
        };

        let wire: arm_models::ResourceGroup = self.client.put_json(&url, &body, cancel).await?;
        let group = ResourceGroup::try_from(wire)?;
        info!("Resource group {} ready in {}", group.name, group.location);
        Ok(group)
    }

    /// Check whether a resource group exists
    pub async fn check_existence(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, DeployError> {
        let url = self.url(name)?;
        self.client.head_exists(&url, cancel).await
    }

    /// Start deleting a resource group and everything in it
    pub async fn begin_delete(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Poller, DeployError> {
        let url = self.url(name)?;
        let response = self.client.send(Method::DELETE, &url, None, cancel).await?;
        Poller::from_initial_response(self.client.clone(), Method::DELETE, url, response).await
    }

    /// Delete a resource group and wait until the service reports it gone
    pub async fn delete_and_wait(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        info!("Deleting resource group {}...", name);
        let mut poller = self.begin_delete(name, cancel).await?;
        poller.poll_until_done(cancel).await?;
        Ok(())
    }
}
