//! In-process fake of the management and token endpoints

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use armdeploy::app::options::AppOptions;
use armdeploy::authn::access_token::AccessToken;
use armdeploy::authn::credential::StaticTokenCredential;
use armdeploy::http::client::{ArmClientOptions, RetryOptions};
use armdeploy::http::lro::PollOptions;
use armdeploy::utils::CooldownOptions;
use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub const TOKEN: &str = "fake-token";
pub const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000001";
const API_VERSION: &str = "2021-04-01";

/// How the fake backend behaves
#[derive(Debug, Clone)]
pub struct FakeConfig {
    /// Status polls answered with `Running` before the outcome is reported
    pub polls_before_done: u32,

    /// Whether deployments end up failing
    pub deployment_fails: bool,

    /// Whether validation rejects the template
    pub validation_fails: bool,

    /// Whether the token endpoint rejects the client
    pub token_fails: bool,

    /// Answer the first N management requests with 503
    pub transient_failures: u32,

    /// Send `Azure-AsyncOperation` on deployment PUTs; without it the
    /// deployment resource itself carries the progress
    pub polling_headers: bool,
}

impl Default for FakeConfig {
    fn default() -> Self {
        Self {
            polls_before_done: 2,
            deployment_fails: false,
            validation_fails: false,
            token_fails: false,
            transient_failures: 0,
            polling_headers: true,
        }
    }
}

struct Operation {
    resource_group: String,
    deployment: String,
    remaining: u32,
}

#[derive(Default)]
pub struct FakeState {
    base_url: String,
    config: FakeConfig,
    next_op: u64,
    pub requests: Vec<String>,
    pub resource_groups: HashMap<String, Value>,
    pub deployments: HashMap<(String, String), Value>,
    operations: HashMap<String, Operation>,
    deletions: HashMap<String, (String, u32)>,
}

enum Progress {
    Unknown,
    Running,
    Done,
}

impl FakeState {
    fn op_id(&mut self) -> String {
        self.next_op += 1;
        format!("op-{}", self.next_op)
    }

    /// Count one poll against `op`, settling its deployment once done
    fn advance(&mut self, op: &str) -> Progress {
        let fails = self.config.deployment_fails;
        let Some(operation) = self.operations.get_mut(op) else {
            return Progress::Unknown;
        };
        if operation.remaining > 0 {
            operation.remaining -= 1;
            return Progress::Running;
        }

        let key = (operation.resource_group.clone(), operation.deployment.clone());
        if let Some(deployment) = self.deployments.get_mut(&key) {
            if fails {
                deployment["properties"]["provisioningState"] = json!("Failed");
                deployment["properties"]["error"] = deployment_error();
            } else {
                deployment["properties"]["provisioningState"] = json!("Succeeded");
            }
        }
        Progress::Done
    }
}

fn deployment_error() -> Value {
    json!({
        "code": "DeploymentFailed",
        "message": "At least one resource deployment operation failed.",
        "details": [
            {"code": "Conflict", "message": "The storage account name is already taken."},
            {"code": "BadRequest", "message": "SKU is not available in this region."}
        ]
    })
}

type Shared = Arc<Mutex<FakeState>>;

/// A running fake backend
pub struct FakeArm {
    pub base_url: String,
    state: Shared,
}

impl FakeArm {
    pub async fn start(config: FakeConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let state: Shared = Arc::new(Mutex::new(FakeState {
            base_url: base_url.clone(),
            config,
            ..Default::default()
        }));

        let rg_path = "/subscriptions/{sub}/resourcegroups/{rg}";
        let deployment_path =
            "/subscriptions/{sub}/resourcegroups/{rg}/providers/Microsoft.Resources/deployments/{name}";

        let app = Router::new()
            .route("/{tenant}/oauth2/v2.0/token", post(token))
            .route(
                rg_path,
                put(put_resource_group)
                    .get(get_resource_group)
                    .head(head_resource_group)
                    .delete(delete_resource_group),
            )
            .route(
                deployment_path,
                put(put_deployment)
                    .get(get_deployment)
                    .head(head_deployment),
            )
            .route(&format!("{}/validate", deployment_path), post(validate))
            .route(
                "/subscriptions/{sub}/providers/Microsoft.Resources/operationStatuses/{op}",
                get(operation_status),
            )
            .route("/subscriptions/{sub}/operationresults/{op}", get(operation_result))
            .layer(middleware::from_fn_with_state(state.clone(), authorize))
            .layer(TraceLayer::new_for_http())
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, state }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }

    pub fn requests(&self) -> Vec<String> {
        self.state().requests.clone()
    }

    pub fn has_resource_group(&self, name: &str) -> bool {
        self.state().resource_groups.contains_key(name)
    }

    pub fn credential(&self) -> Arc<StaticTokenCredential> {
        Arc::new(StaticTokenCredential::new(AccessToken::from_expires_in(
            TOKEN, 3600,
        )))
    }

    pub fn arm_options(&self) -> ArmClientOptions {
        ArmClientOptions {
            endpoint: self.base_url.clone(),
            timeout: Duration::from_secs(5),
            retry: RetryOptions {
                max_retries: 3,
                cooldown: CooldownOptions {
                    base_delay: Duration::from_millis(5),
                    max_delay: Duration::from_millis(50),
                    multiplier: 2.0,
                },
            },
            poll: PollOptions {
                interval: Duration::from_millis(10),
                max_wait: Duration::from_secs(10),
            },
            ..Default::default()
        }
    }

    pub fn app_options(&self, dir: &FsPath) -> AppOptions {
        AppOptions {
            subscription_id: SUBSCRIPTION.to_string(),
            resource_group_name: "rg-test".to_string(),
            deployment_name: "my_deployment_7".to_string(),
            template_path: dir.join("template.json"),
            parameters_path: dir.join("parameters.json"),
            arm: self.arm_options(),
            ..Default::default()
        }
    }

    /// Environment for a full run against this backend
    pub fn env(&self, dir: &FsPath) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("AZURE_SUBSCRIPTION_ID", Some(SUBSCRIPTION.to_string())),
            ("AZURE_TENANT_ID", Some("tenant".to_string())),
            ("AZURE_CLIENT_ID", Some("client".to_string())),
            ("AZURE_CLIENT_SECRET", Some("secret".to_string())),
            ("AZURE_AUTHORITY_HOST", Some(self.base_url.clone())),
            ("AZURE_RESOURCE_MANAGER_URL", Some(self.base_url.clone())),
            ("AZURE_RESOURCE_GROUP", Some("rg-env".to_string())),
            ("AZURE_DEPLOYMENT_NAME", Some("my_deployment_42".to_string())),
            ("ARMDEPLOY_TEMPLATE", Some(path_string(dir.join("template.json")))),
            ("ARMDEPLOY_PARAMETERS", Some(path_string(dir.join("parameters.json")))),
            ("ARMDEPLOY_POLL_INTERVAL_MS", Some("10".to_string())),
            ("KEEP_RESOURCE", None),
        ]
    }
}

fn path_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

/// Write a minimal template and parameters file into `dir`
pub fn write_inputs(dir: &FsPath) {
    std::fs::write(
        dir.join("template.json"),
        json!({
            "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
            "contentVersion": "1.0.0.0",
            "parameters": {"storageName": {"type": "string"}},
            "resources": []
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        dir.join("parameters.json"),
        json!({
            "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentParameters.json#",
            "contentVersion": "1.0.0.0",
            "parameters": {"storageName": {"value": "st1"}}
        })
        .to_string(),
    )
    .unwrap();
}

fn cloud_error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"code": code, "message": message}})),
    )
        .into_response()
}

// =============================== HANDLERS ================================== //

async fn authorize(State(state): State<Shared>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let line = format!("{} {}", request.method(), path);
    let is_token_request = path.ends_with("/oauth2/v2.0/token");

    {
        let mut state = state.lock().unwrap();
        state.requests.push(line);

        if !is_token_request && state.config.transient_failures > 0 {
            state.config.transient_failures -= 1;
            return cloud_error(StatusCode::SERVICE_UNAVAILABLE, "ServerBusy", "try again");
        }
    }

    if !is_token_request {
        let bearer = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let expected = format!("Bearer {}", TOKEN);
        if bearer != Some(expected.as_str()) {
            return cloud_error(
                StatusCode::UNAUTHORIZED,
                "AuthenticationFailed",
                "missing or invalid bearer token",
            );
        }
        let api_version = format!("api-version={}", API_VERSION);
        if !request.uri().query().unwrap_or_default().contains(&api_version) {
            return cloud_error(
                StatusCode::BAD_REQUEST,
                "MissingApiVersionParameter",
                "The api-version query parameter is required",
            );
        }
    }

    next.run(request).await
}

async fn token(State(state): State<Shared>, Path(_tenant): Path<String>) -> Response {
    if state.lock().unwrap().config.token_fails {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "invalid_client",
                "error_description": "AADSTS7000215: Invalid client secret provided."
            })),
        )
            .into_response();
    }
    Json(json!({"token_type": "Bearer", "expires_in": 3599, "access_token": TOKEN}))
        .into_response()
}

async fn put_resource_group(
    State(state): State<Shared>,
    Path((sub, rg)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let Some(location) = body.get("location").and_then(Value::as_str) else {
        return cloud_error(StatusCode::BAD_REQUEST, "LocationRequired", "location is required");
    };

    let group = json!({
        "id": format!("/subscriptions/{}/resourceGroups/{}", sub, rg),
        "name": &rg,
        "type": "Microsoft.Resources/resourceGroups",
        "location": location,
        "properties": {"provisioningState": "Succeeded"}
    });

    let mut state = state.lock().unwrap();
    let status = if state.resource_groups.insert(rg, group.clone()).is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    (status, Json(group)).into_response()
}

async fn get_resource_group(
    State(state): State<Shared>,
    Path((_sub, rg)): Path<(String, String)>,
) -> Response {
    match state.lock().unwrap().resource_groups.get(&rg) {
        Some(group) => Json(group.clone()).into_response(),
        None => cloud_error(StatusCode::NOT_FOUND, "ResourceGroupNotFound", "not found"),
    }
}

async fn head_resource_group(
    State(state): State<Shared>,
    Path((_sub, rg)): Path<(String, String)>,
) -> StatusCode {
    if state.lock().unwrap().resource_groups.contains_key(&rg) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn delete_resource_group(
    State(state): State<Shared>,
    Path((sub, rg)): Path<(String, String)>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !state.resource_groups.contains_key(&rg) {
        return cloud_error(StatusCode::NOT_FOUND, "ResourceGroupNotFound", "not found");
    }

    let op = state.op_id();
    let polls = state.config.polls_before_done;
    state.deletions.insert(op.clone(), (rg, polls));
    let location = format!(
        "{}/subscriptions/{}/operationresults/{}?api-version={}",
        state.base_url, sub, op, API_VERSION
    );
    (StatusCode::ACCEPTED, [("location", location)]).into_response()
}

async fn operation_result(
    State(state): State<Shared>,
    Path((_sub, op)): Path<(String, String)>,
) -> Response {
    let mut state = state.lock().unwrap();
    let Some((rg, remaining)) = state.deletions.get_mut(&op) else {
        return cloud_error(StatusCode::NOT_FOUND, "OperationNotFound", "unknown operation");
    };
    if *remaining > 0 {
        *remaining -= 1;
        return StatusCode::ACCEPTED.into_response();
    }

    let rg = rg.clone();
    state.deletions.remove(&op);
    state.resource_groups.remove(&rg);
    state.deployments.retain(|(group, _), _| *group != rg);
    StatusCode::OK.into_response()
}

async fn put_deployment(
    State(state): State<Shared>,
    Path((sub, rg, name)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !state.resource_groups.contains_key(&rg) {
        return cloud_error(
            StatusCode::NOT_FOUND,
            "ResourceGroupNotFound",
            &format!("Resource group '{}' could not be found.", rg),
        );
    }
    if body.pointer("/properties/mode").and_then(Value::as_str) != Some("Incremental") {
        return cloud_error(StatusCode::BAD_REQUEST, "InvalidDeploymentMode", "bad mode");
    }
    if !body.pointer("/properties/template").is_some_and(Value::is_object) {
        return cloud_error(StatusCode::BAD_REQUEST, "InvalidTemplate", "template missing");
    }

    let deployment = json!({
        "id": format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Resources/deployments/{}",
            sub, rg, name
        ),
        "name": &name,
        "type": "Microsoft.Resources/deployments",
        "properties": {
            "provisioningState": "Accepted",
            "mode": "Incremental",
            "parameters": body.pointer("/properties/parameters").cloned().unwrap_or(Value::Null)
        }
    });

    let op = state.op_id();
    let polls = state.config.polls_before_done;
    state.operations.insert(
        op.clone(),
        Operation {
            resource_group: rg.clone(),
            deployment: name.clone(),
            remaining: polls,
        },
    );
    state.deployments.insert((rg, name), deployment.clone());

    if !state.config.polling_headers {
        return (StatusCode::CREATED, Json(deployment)).into_response();
    }

    let status_url = format!(
        "{}/subscriptions/{}/providers/Microsoft.Resources/operationStatuses/{}?api-version={}",
        state.base_url, sub, op, API_VERSION
    );
    (
        StatusCode::CREATED,
        [("azure-asyncoperation", status_url)],
        Json(deployment),
    )
        .into_response()
}

async fn get_deployment(
    State(state): State<Shared>,
    Path((_sub, rg, name)): Path<(String, String, String)>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !state.config.polling_headers {
        let op = state
            .operations
            .iter()
            .find(|(_, o)| o.resource_group == rg && o.deployment == name)
            .map(|(id, _)| id.clone());
        if let Some(op) = op {
            state.advance(&op);
        }
    }

    match state.deployments.get(&(rg, name)) {
        Some(deployment) => Json(deployment.clone()).into_response(),
        None => cloud_error(StatusCode::NOT_FOUND, "DeploymentNotFound", "not found"),
    }
}

async fn head_deployment(
    State(state): State<Shared>,
    Path((_sub, rg, name)): Path<(String, String, String)>,
) -> StatusCode {
    if state.lock().unwrap().deployments.contains_key(&(rg, name)) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn operation_status(
    State(state): State<Shared>,
    Path((_sub, op)): Path<(String, String)>,
) -> Response {
    let mut state = state.lock().unwrap();
    match state.advance(&op) {
        Progress::Unknown => {
            cloud_error(StatusCode::NOT_FOUND, "OperationNotFound", "unknown operation")
        }
        Progress::Running => Json(json!({"status": "Running"})).into_response(),
        Progress::Done if state.config.deployment_fails => {
            Json(json!({"status": "Failed", "error": deployment_error()})).into_response()
        }
        Progress::Done => Json(json!({"status": "Succeeded"})).into_response(),
    }
}

async fn validate(
    State(state): State<Shared>,
    Path((_sub, rg, _name)): Path<(String, String, String)>,
    Json(_body): Json<Value>,
) -> Response {
    let state = state.lock().unwrap();
    if !state.resource_groups.contains_key(&rg) {
        return cloud_error(StatusCode::NOT_FOUND, "ResourceGroupNotFound", "not found");
    }

    if state.config.validation_fails {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "code": "InvalidTemplate",
                    "message": "Deployment template validation failed.",
                    "details": [{"code": "InvalidTemplateParameter", "message": "storageName is too long"}]
                }
            })),
        )
            .into_response();
    }

    Json(json!({
        "properties": {
            "provisioningState": "Succeeded",
            "mode": "Incremental",
            "validatedResources": []
        }
    }))
    .into_response()
}
