//! Long-running operation handles

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Path and query of an in-flight operation's status link.
///
/// Produced when a deployment is submitted without waiting and consumed by
/// the status reader. Nothing about its structure is guaranteed beyond being
/// resolvable against the management endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AsyncOperationHandle(String);

impl AsyncOperationHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Take the path and query of a polling URL, dropping scheme and host
    pub fn from_url(url: &Url) -> Self {
        match url.query() {
            Some(query) => Self(format!("{}?{}", url.path(), query)),
            None => Self(url.path().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The handle without its query string
    pub fn path(&self) -> &str {
        self.0.split('?').next().unwrap_or_default()
    }
}

impl fmt::Display for AsyncOperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AsyncOperationHandle {
    fn from(handle: String) -> Self {
        Self(handle)
    }
}
