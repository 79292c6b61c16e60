//! Container configuration

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ContainerError;
use crate::Result;

pub const DEFAULT_CONTAINER_NAME: &str = "amem-surrealdb";
pub const DEFAULT_IMAGE: &str = "surrealdb/surrealdb:v2";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";

/// Where and how the backend container runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    /// Host interface the port is published on; loopback only
    pub bind_host: String,
    /// Host port
    pub port: u16,
    /// Port the server listens on inside the container
    pub container_port: u16,
    /// Named volume for the database files (None = ephemeral storage)
    pub data_volume: Option<String>,
    pub username: String,
    pub credential_path: PathBuf,
    pub lock_path: PathBuf,
    pub lock_wait_secs: u64,
    pub stale_lock_after_secs: u64,
    pub start_timeout_secs: u64,
}

/// `~/.amem`, or `./.amem` when no home directory is known.
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".amem")
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self::in_dir(default_state_dir())
    }
}

impl ContainerConfig {
    /// Defaults with credential and lock files under `state_dir`.
    pub fn in_dir(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        ContainerConfig {
            name: DEFAULT_CONTAINER_NAME.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            bind_host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_PORT,
            container_port: 8000,
            data_volume: Some(format!("{DEFAULT_CONTAINER_NAME}-data")),
            username: "root".to_string(),
            credential_path: state_dir.join("credentials"),
            lock_path: state_dir.join("container.lock"),
            lock_wait_secs: 30,
            stale_lock_after_secs: 120,
            start_timeout_secs: 60,
        }
    }

    /// Create config from environment variables
    ///
    /// Reads (all optional):
    /// - AMEM_HOME: state directory for credential and lock files
    /// - AMEM_CONTAINER_NAME
    /// - AMEM_IMAGE
    /// - AMEM_BIND_HOST
    /// - AMEM_PORT
    /// - AMEM_CREDENTIALS_PATH
    /// - AMEM_START_TIMEOUT_SECS
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("AMEM_HOME") {
            Ok(dir) => Self::in_dir(dir),
            Err(_) => Self::default(),
        };

        if let Ok(name) = std::env::var("AMEM_CONTAINER_NAME") {
            config.name = name;
        }
        if let Ok(image) = std::env::var("AMEM_IMAGE") {
            config.image = image;
        }
        if let Ok(host) = std::env::var("AMEM_BIND_HOST") {
            config.bind_host = host;
        }
        if let Ok(port) = std::env::var("AMEM_PORT") {
            config.port = port
                .parse()
                .map_err(|_| ContainerError::InvalidConfig(format!("AMEM_PORT is not a port: {port}")))?;
        }
        if let Ok(path) = std::env::var("AMEM_CREDENTIALS_PATH") {
            config.credential_path = PathBuf::from(path);
        }
        if let Ok(secs) = std::env::var("AMEM_START_TIMEOUT_SECS") {
            config.start_timeout_secs = secs.parse().map_err(|_| {
                ContainerError::InvalidConfig(format!("AMEM_START_TIMEOUT_SECS is not a number: {secs}"))
            })?;
        }

        Ok(config)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_after_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    /// `ws://host:port` for the database client
    pub fn endpoint(&self) -> String {
        format!("ws://{}:{}", self.url_host(), self.port)
    }

    pub fn health_url(&self) -> String {
        format!("http://{}:{}/health", self.url_host(), self.port)
    }

    /// `docker run -p` value publishing the server port on the bind host only.
    pub fn publish_spec(&self) -> String {
        let host = if self.bind_host == "localhost" {
            DEFAULT_BIND_HOST.to_string()
        } else {
            self.url_host()
        };
        format!("{}:{}:{}", host, self.port, self.container_port)
    }

    fn url_host(&self) -> String {
        if self.bind_host.contains(':') {
            format!("[{}]", self.bind_host)
        } else {
            self.bind_host.clone()
        }
    }

    /// Reject anything that could expose the backend beyond this host.
    pub fn validate(&self) -> Result<()> {
        let loopback = self.bind_host == "localhost"
            || self
                .bind_host
                .parse::<IpAddr>()
                .map(|ip| ip.is_loopback())
                .unwrap_or(false);
        if !loopback {
            return Err(ContainerError::InvalidConfig(format!(
                "bind host {} is not a loopback address",
                self.bind_host
            )));
        }

        validate_container_name(&self.name)?;
        validate_image_name(&self.image)?;

        if self.port == 0 {
            return Err(ContainerError::InvalidConfig("port must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Container names: alphanumerics, dash, underscore, dot; at most 63 chars.
fn validate_container_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ContainerError::InvalidConfig("container name cannot be empty".into()));
    }
    if name.len() > 63 {
        return Err(ContainerError::InvalidConfig("container name too long (max 63 chars)".into()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_.".contains(c))
    {
        return Err(ContainerError::InvalidConfig(format!("invalid container name: {name}")));
    }
    Ok(())
}

fn validate_image_name(image: &str) -> Result<()> {
    if image.is_empty() {
        return Err(ContainerError::InvalidConfig("image name cannot be empty".into()));
    }
    if !image
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || ".:/-_".contains(c))
    {
        return Err(ContainerError::InvalidConfig(format!("invalid image name: {image}")));
    }
    Ok(())
}
