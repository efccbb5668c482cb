//! Resource group model

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// A resource group as created by the deployer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    pub location: String,
    pub provisioning_state: Option<String>,
}

impl TryFrom<arm_models::ResourceGroup> for ResourceGroup {
    type Error = DeployError;

    fn try_from(wire: arm_models::ResourceGroup) -> Result<Self, Self::Error> {
        let id = wire
            .id
            .ok_or_else(|| DeployError::Internal("Resource group response has no id".to_string()))?;
        let name = wire
            .name
            .or_else(|| id.rsplit('/').next().map(str::to_string))
            .unwrap_or_default();

        Ok(Self {
            id,
            name,
            location: wire.location,
            provisioning_state: wire.properties.and_then(|p| p.provisioning_state),
        })
    }
}
