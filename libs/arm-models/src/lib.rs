//! Azure Resource Manager wire models
//!
//! Serde representations of the `Microsoft.Resources` payloads used by the
//! deployer: resource groups, deployments, validation results and the
//! error envelope shared by every management endpoint.

pub mod models;

pub use models::*;
