//! Application configuration options

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::authn::credential::required_env;
use crate::errors::DeployError;
use crate::http::client::{ArmClientOptions, DEFAULT_ENDPOINT};
use crate::logs::{LogLevel, LogOptions};
use crate::utils::random_deployment_name;

pub const DEFAULT_LOCATION: &str = "westeurope";
pub const DEFAULT_RESOURCE_GROUP: &str = "armdeploy-rg";
pub const DEFAULT_TEMPLATE_PATH: &str = "day1data/template.json";
pub const DEFAULT_PARAMETERS_PATH: &str = "day1data/parameters.json";

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Subscription that owns the resource group
    pub subscription_id: String,

    /// Region of the resource group
    pub location: String,

    /// Resource group to create and deploy into
    pub resource_group_name: String,

    /// Name of the deployment
    pub deployment_name: String,

    /// Template document
    pub template_path: PathBuf,

    /// Parameters document
    pub parameters_path: PathBuf,

    /// Leave the resource group in place after the run
    pub keep_resources: bool,

    /// Wait for the deployment to finish instead of returning its handle
    pub wait_for_completion: bool,

    /// Poll the operation handle until the deployment finishes
    pub follow_status: bool,

    /// Management API client options
    pub arm: ArmClientOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            location: DEFAULT_LOCATION.to_string(),
            resource_group_name: DEFAULT_RESOURCE_GROUP.to_string(),
            deployment_name: random_deployment_name("my_deployment"),
            template_path: PathBuf::from(DEFAULT_TEMPLATE_PATH),
            parameters_path: PathBuf::from(DEFAULT_PARAMETERS_PATH),
            keep_resources: false,
            wait_for_completion: false,
            follow_status: false,
            arm: ArmClientOptions::default(),
        }
    }
}

impl AppOptions {
    /// Read options from the environment.
    ///
    /// `AZURE_SUBSCRIPTION_ID` is required; everything else has a default.
    pub fn from_env() -> Result<Self, DeployError> {
        let mut options = Self {
            subscription_id: required_env("AZURE_SUBSCRIPTION_ID")?,
            ..Default::default()
        };

        if let Some(location) = env_var("AZURE_LOCATION") {
            options.location = location;
        }
        if let Some(name) = env_var("AZURE_RESOURCE_GROUP") {
            options.resource_group_name = name;
        }
        if let Some(name) = env_var("AZURE_DEPLOYMENT_NAME") {
            options.deployment_name = name;
        }
        if let Some(path) = env_var("ARMDEPLOY_TEMPLATE") {
            options.template_path = PathBuf::from(path);
        }
        if let Some(path) = env_var("ARMDEPLOY_PARAMETERS") {
            options.parameters_path = PathBuf::from(path);
        }
        // Any non-empty value keeps the resources
        options.keep_resources = env_var("KEEP_RESOURCE").is_some();

        let endpoint = env_var("AZURE_RESOURCE_MANAGER_URL")
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        options.arm.endpoint = endpoint.trim_end_matches('/').to_string();
        if let Some(version) = env_var("ARMDEPLOY_API_VERSION") {
            options.arm.api_version = version;
        }
        if let Some(ms) = env_parse::<u64>("ARMDEPLOY_POLL_INTERVAL_MS")? {
            options.arm.poll.interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("ARMDEPLOY_POLL_TIMEOUT_SECS")? {
            options.arm.poll.max_wait = Duration::from_secs(secs);
        }
        if let Some(retries) = env_parse::<u32>("ARMDEPLOY_MAX_RETRIES")? {
            options.arm.retry.max_retries = retries;
        }

        Ok(options)
    }

    /// Apply `--key=value` / `--flag` command line overrides
    pub fn apply_cli(&mut self, args: &HashMap<String, String>) -> Result<(), DeployError> {
        for (key, value) in args {
            match key.as_str() {
                "keep" => self.keep_resources = parse_flag(key, value)?,
                "wait" => self.wait_for_completion = parse_flag(key, value)?,
                "follow" => self.follow_status = parse_flag(key, value)?,
                "location" => self.location = value.clone(),
                "resource-group" => self.resource_group_name = value.clone(),
                "deployment-name" => self.deployment_name = value.clone(),
                "template" => self.template_path = PathBuf::from(value),
                "parameters" => self.parameters_path = PathBuf::from(value),
                // Logging flags are consumed by `log_options`
                "log-level" | "json-logs" => {}
                other => {
                    return Err(DeployError::ConfigError(format!(
                        "Unknown option: --{}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Logging options from `ARMDEPLOY_LOG_LEVEL`, `ARMDEPLOY_LOG_JSON` and the
/// `--log-level` / `--json-logs` flags
pub fn log_options(args: &HashMap<String, String>) -> Result<LogOptions, DeployError> {
    let mut options = LogOptions::default();

    if let Some(level) = args
        .get("log-level")
        .cloned()
        .or_else(|| env_var("ARMDEPLOY_LOG_LEVEL"))
    {
        options.log_level = level.parse::<LogLevel>().map_err(DeployError::ConfigError)?;
    }

    options.json_format = match args.get("json-logs") {
        Some(value) => parse_flag("json-logs", value)?,
        None => env_var("ARMDEPLOY_LOG_JSON").is_some(),
    };

    Ok(options)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, DeployError> {
    env_var(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| {
                DeployError::ConfigError(format!("{} has an invalid value: {}", name, value))
            })
        })
        .transpose()
}

fn parse_flag(key: &str, value: &str) -> Result<bool, DeployError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(DeployError::ConfigError(format!(
            "--{} expects a boolean, got {}",
            key, value
        ))),
    }
}
