//! Domain models

pub mod deployment;
pub mod operation;
pub mod resource_group;
pub mod status;
