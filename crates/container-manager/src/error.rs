//! Error types for container-manager

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while managing the backend container
#[derive(Error, Debug)]
pub enum ContainerError {
    /// The host cannot provide the backend (docker missing, `docker run` failed)
    #[error("Backend capacity unavailable: {0}")]
    Capacity(String),

    /// Configuration rejected before any side effect
    #[error("Invalid container configuration: {0}")]
    InvalidConfig(String),

    /// Another process held the lock for the whole wait window
    #[error("Timed out after {waited:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    /// Credential file missing or unreadable
    #[error("Credential error: {0}")]
    Credentials(String),

    /// The container started but never answered its health endpoint
    #[error("Backend did not become healthy within {0:?}")]
    Unhealthy(Duration),

    /// A runtime command failed for a reason other than capacity
    #[error("Container runtime command failed: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error (health probe client setup)
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for ContainerError {
    fn from(err: reqwest::Error) -> Self {
        ContainerError::Http(err.to_string())
    }
}
