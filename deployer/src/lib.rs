//! ARM Deployer Library
//!
//! Creates a resource group, submits a template deployment, reads its
//! operation status, validates the template and tears the group down again.

pub mod app;
pub mod authn;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod utils;
