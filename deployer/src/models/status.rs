//! Deployment status decoding

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::lro::OperationState;

/// One entry of an error's `details` sequence
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Status of an in-flight or finished deployment operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatusResponse {
    /// `status` of the operation resource, when the body carries one
    pub status: Option<String>,

    pub error_code: Option<String>,

    pub error_message: Option<String>,

    /// Every entry of `error.details`, in order
    pub error_details: Vec<ErrorDetail>,
}

impl DeploymentStatusResponse {
    /// Decode a status body.
    ///
    /// Accepts an async-operation resource (`status`, `error`) or, when the
    /// handle points at the deployment itself, a deployment resource
    /// (`properties.provisioningState`, `properties.error`).
    ///
    /// Never fails: a missing or mistyped field reads as absent, and
    /// `details` entries that are not objects are skipped.
    pub fn from_value(body: &Value) -> Self {
        let properties = body.get("properties").filter(|p| p.is_object());
        let error = body
            .get("error")
            .filter(|e| e.is_object())
            .or_else(|| {
                properties
                    .and_then(|p| p.get("error"))
                    .filter(|e| e.is_object())
            });

        Self {
            status: string_field(body, "status")
                .or_else(|| properties.and_then(|p| string_field(p, "provisioningState"))),
            error_code: error.and_then(|e| string_field(e, "code")),
            error_message: error.and_then(|e| string_field(e, "message")),
            error_details: error
                .and_then(|e| e.get("details"))
                .and_then(Value::as_array)
                .map(|details| {
                    details
                        .iter()
                        .filter(|d| d.is_object())
                        .map(|d| ErrorDetail {
                            code: string_field(d, "code"),
                            message: string_field(d, "message"),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Decode raw bytes; an empty or non-JSON body reads as "no error yet"
    pub fn from_slice(bytes: &[u8]) -> Self {
        serde_json::from_slice::<Value>(bytes)
            .map(|body| Self::from_value(&body))
            .unwrap_or_default()
    }

    pub fn has_error(&self) -> bool {
        self.error_code.is_some() || self.error_message.is_some()
    }

    /// Operation state; `None` when the body carries no `status`
    pub fn state(&self) -> Option<OperationState> {
        self.status.as_deref().map(OperationState::parse)
    }

    /// True once the operation has succeeded, failed or been canceled
    pub fn is_terminal(&self) -> bool {
        self.state().is_some_and(OperationState::is_terminal)
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}
