//! Application state management

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::authn::credential::TokenCredential;
use crate::errors::DeployError;
use crate::http::client::ArmClientOptions;
use crate::http::deployment_status::DeploymentStatusClient;
use crate::http::deployments::DeploymentsClient;
use crate::http::factory::ArmClientFactory;
use crate::http::resource_groups::ResourceGroupsClient;

/// Clients for one run, built once and passed by reference to each step
pub struct ArmContext {
    /// Resource group client
    pub resource_groups: ResourceGroupsClient,

    /// Deployment client
    pub deployments: DeploymentsClient,

    /// Deployment status reader
    pub deployment_status: DeploymentStatusClient,
}

impl ArmContext {
    /// Authenticate and build the clients
    pub async fn init(
        subscription_id: &str,
        credential: Arc<dyn TokenCredential>,
        options: &ArmClientOptions,
        cancel: &CancellationToken,
    ) -> Result<Self, DeployError> {
        info!("Initializing management clients...");
        let factory = ArmClientFactory::new(subscription_id, credential, options, cancel).await?;
        Ok(Self::from_factory(&factory))
    }

    pub fn from_factory(factory: &ArmClientFactory) -> Self {
        Self {
            resource_groups: factory.new_resource_groups_client(),
            deployments: factory.new_deployments_client(),
            deployment_status: factory.new_deployment_status_client(),
        }
    }
}
