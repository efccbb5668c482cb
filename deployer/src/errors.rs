//! Error types for the deployer

use http::StatusCode;
use thiserror::Error;

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Remote error: {status} {code}: {message}")]
    RemoteError {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("Operation {status}: {code}: {message}")]
    OperationError {
        status: String,
        code: String,
        message: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// 409 from the management API
    pub fn is_conflict(&self) -> bool {
        matches!(self, DeployError::RemoteError { status, .. } if *status == StatusCode::CONFLICT)
    }

    /// 404 from the management API
    pub fn is_not_found(&self) -> bool {
        matches!(self, DeployError::RemoteError { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// Subscription or regional quota exhausted
    pub fn is_quota(&self) -> bool {
        match self {
            DeployError::RemoteError { code, .. } => {
                let code = code.to_ascii_lowercase();
                code.contains("quota") || code.contains("limitexceeded")
            }
            _ => false,
        }
    }

    /// Request rejected as invalid (template, parameters or location)
    pub fn is_validation(&self) -> bool {
        match self {
            DeployError::RemoteError { status, code, .. } => {
                *status == StatusCode::BAD_REQUEST
                    || code.starts_with("Invalid")
                    || code.contains("Validation")
            }
            _ => false,
        }
    }

    /// 401/403 or a credential failure
    pub fn is_auth(&self) -> bool {
        match self {
            DeployError::AuthError(_) => true,
            DeployError::RemoteError { status, .. } => {
                *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
            }
            _ => false,
        }
    }
}
