//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::errors::DeployError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, DeployError> {
        let mut file = fs::File::open(&self.path).await.map_err(|e| {
            DeployError::IoError(std::io::Error::new(
                e.kind(),
                format!("{}: {}", self.path.display(), e),
            ))
        })?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        Ok(contents)
    }

    /// Read file as JSON; a syntax error is reported against the file path
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, DeployError> {
        let contents = self.read_string().await?;
        serde_json::from_str(&contents).map_err(|e| self.invalid_data(e))
    }

    fn invalid_data(&self, reason: impl std::fmt::Display) -> DeployError {
        DeployError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{}: {}", self.path.display(), reason),
        ))
    }

    /// Read file as a string-keyed JSON object.
    ///
    /// Arrays, scalars and `null` at the top level are rejected.
    pub async fn read_json_object(&self) -> Result<Map<String, Value>, DeployError> {
        let value: Value = self.read_json().await?;
        debug!("Loaded {}", self.path.display());
        match value {
            Value::Object(map) => Ok(map),
            other => Err(self.invalid_data(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
