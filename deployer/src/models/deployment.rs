//! Deployment models

use arm_models::{Deployment, DeploymentMode, DeploymentProperties};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Template and parameters to deploy into a resource group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Template document
    pub template: Map<String, Value>,

    /// Parameters document
    pub parameters: Map<String, Value>,

    /// Deployment mode
    pub mode: DeploymentMode,
}

impl DeploymentRequest {
    /// An incremental deployment: resources absent from the template are left alone
    pub fn incremental(template: Map<String, Value>, parameters: Map<String, Value>) -> Self {
        Self {
            template,
            parameters,
            mode: DeploymentMode::Incremental,
        }
    }

    /// Body sent to both the deploy and validate endpoints.
    ///
    /// A parameters file in the deployment-parameters schema
    /// (`{"$schema": ..., "parameters": {...}}`) is unwrapped to its
    /// `parameters` object.
    pub fn to_wire(&self) -> Deployment {
        Deployment {
            location: None,
            properties: DeploymentProperties {
                template: Some(self.template.clone()),
                parameters: Some(parameter_values(&self.parameters)),
                mode: self.mode,
            },
            tags: None,
        }
    }
}

fn parameter_values(parameters: &Map<String, Value>) -> Map<String, Value> {
    let is_parameters_file = parameters.contains_key("$schema")
        || parameters.contains_key("contentVersion");
    match parameters.get("parameters") {
        Some(Value::Object(inner)) if is_parameters_file => inner.clone(),
        _ => parameters.clone(),
    }
}
