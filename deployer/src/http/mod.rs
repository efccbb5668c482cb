//! Management API clients

pub mod client;
pub mod deployment_status;
pub mod deployments;
pub mod factory;
pub mod lro;
pub mod resource_groups;
