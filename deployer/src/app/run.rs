//! Deployment workflow

use std::collections::HashMap;
use std::sync::Arc;

use arm_models::{DeploymentExtended, DeploymentValidateResult};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::app::state::ArmContext;
use crate::authn::credential::{ClientSecretCredential, TokenCredential};
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::deployment::DeploymentRequest;
use crate::models::operation::AsyncOperationHandle;
use crate::models::resource_group::ResourceGroup;
use crate::models::status::DeploymentStatusResponse;

/// What a run did
#[derive(Debug, Clone)]
pub struct RunReport {
    pub resource_group: ResourceGroup,

    /// Whether the deployment name was already taken before submission
    pub deployment_existed: bool,

    /// Set when the deployment was submitted without waiting
    pub operation_handle: Option<AsyncOperationHandle>,

    /// Status read through the operation handle
    pub status: Option<DeploymentStatusResponse>,

    /// Set when the deployment was submitted and waited on
    pub deployment: Option<DeploymentExtended>,

    pub validation: DeploymentValidateResult,

    /// Whether the resource group was deleted at the end of the run
    pub cleaned_up: bool,
}

/// Read options and credentials from the environment, then run
pub async fn run_from_env(
    args: &HashMap<String, String>,
    cancel: &CancellationToken,
) -> Result<RunReport, DeployError> {
    let mut options = AppOptions::from_env()?;
    options.apply_cli(args)?;
    let credential = Arc::new(ClientSecretCredential::from_env()?);

    run(&options, credential, cancel).await
}

/// Load the template and parameters, connect, and run the workflow
pub async fn run(
    options: &AppOptions,
    credential: Arc<dyn TokenCredential>,
    cancel: &CancellationToken,
) -> Result<RunReport, DeployError> {
    let request = load_request(options).await?;
    let ctx = ArmContext::init(&options.subscription_id, credential, &options.arm, cancel).await?;
    execute(&ctx, options, &request, cancel).await
}

/// Read the template and parameters documents
pub async fn load_request(options: &AppOptions) -> Result<DeploymentRequest, DeployError> {
    let template = File::new(&options.template_path).read_json_object().await?;
    let parameters = File::new(&options.parameters_path).read_json_object().await?;
    Ok(DeploymentRequest::incremental(template, parameters))
}

/// Create the resource group, deploy, inspect, validate and clean up
pub async fn execute(
    ctx: &ArmContext,
    options: &AppOptions,
    request: &DeploymentRequest,
    cancel: &CancellationToken,
) -> Result<RunReport, DeployError> {
    let rg_name = options.resource_group_name.as_str();
    let deployment_name = options.deployment_name.as_str();

    let resource_group = ctx
        .resource_groups
        .create_or_update(rg_name, &options.location, cancel)
        .await?;
    info!("resource group id: {}", resource_group.id);

    let deployment_existed = ctx
        .deployments
        .check_existence(rg_name, deployment_name, cancel)
        .await?;
    info!("deployment exists: {}", deployment_existed);

    let mut report = RunReport {
        resource_group,
        deployment_existed,
        operation_handle: None,
        status: None,
        deployment: None,
        validation: DeploymentValidateResult::default(),
        cleaned_up: false,
    };

    if options.wait_for_completion {
        let deployment = ctx
            .deployments
            .submit_and_wait(rg_name, deployment_name, request, cancel)
            .await?;
        info!(
            "deployment {} finished: {}",
            deployment_name,
            deployment.provisioning_state().unwrap_or("unknown")
        );
        report.deployment = Some(deployment);
    } else {
        let handle = ctx
            .deployments
            .submit_non_blocking(rg_name, deployment_name, request, cancel)
            .await?;
        info!("async operation: {}", handle);
        info!("created deployment: {}", deployment_name);

        let status = if options.follow_status {
            ctx.deployment_status.wait_for_terminal(&handle, cancel).await?
        } else {
            ctx.deployment_status.get_status(&handle, cancel).await?
        };
        log_status(&status);

        report.operation_handle = Some(handle);
        report.status = Some(status);
    }

    let validation = ctx
        .deployments
        .validate(rg_name, deployment_name, request, cancel)
        .await?;
    info!("validate deployment: {}", serde_json::to_string(&validation)?);
    if !validation.is_valid() {
        warn!("Template validation reported errors");
    }
    report.validation = validation;

    if options.keep_resources {
        info!("Keeping resource group {}", rg_name);
    } else {
        ctx.resource_groups.delete_and_wait(rg_name, cancel).await?;
        info!("cleaned up successfully.");
        report.cleaned_up = true;
    }

    Ok(report)
}

fn log_status(status: &DeploymentStatusResponse) {
    if status.has_error() {
        warn!("Deployment operation reported an error");
    }
    info!(
        "status: {}",
        status.status.as_deref().unwrap_or("<none>")
    );
    info!(
        "status code: {}",
        status.error_code.as_deref().unwrap_or("<none>")
    );
    info!(
        "status message: {}",
        status.error_message.as_deref().unwrap_or("<none>")
    );
    for (i, detail) in status.error_details.iter().enumerate() {
        info!(
            "status detail[{}]: {}: {}",
            i,
            detail.code.as_deref().unwrap_or("<none>"),
            detail.message.as_deref().unwrap_or("<none>")
        );
    }
}
