//! Container runtime abstraction
//!
//! `ContainerRuntime` is the seam between the lifecycle manager and the
//! host's container engine. `DockerCli` drives the `docker` binary through
//! `tokio::process`.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ContainerError;
use crate::Result;

/// Observed state of the backend container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Absent,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Absent => "absent",
        };
        f.write_str(s)
    }
}

/// Everything needed to create the container.
#[derive(Clone)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    /// `host:port:container_port`
    pub publish: String,
    pub container_port: u16,
    pub data_volume: Option<String>,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RunSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("publish", &self.publish)
            .field("data_volume", &self.data_volume)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the engine answers at all.
    async fn is_available(&self) -> bool;

    async fn inspect(&self, name: &str) -> Result<ContainerStatus>;

    /// Create and start a container; returns its id.
    async fn run(&self, spec: &RunSpec) -> Result<String>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str) -> Result<()>;

    async fn remove(&self, name: &str) -> Result<()>;

    async fn remove_volume(&self, volume: &str) -> Result<()>;

    /// Whether a named data volume exists, with or without a container.
    async fn volume_exists(&self, volume: &str) -> Result<bool>;
}

/// `docker` command-line runtime.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different CLI binary (e.g. `podman`).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }

    async fn run_simple(&self, args: &[&str]) -> Result<String> {
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| ContainerError::Capacity(format!("Failed to run {}: {e}", self.binary)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ContainerError::Runtime(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn is_available(&self) -> bool {
        match self
            .command()
            .arg("version")
            .arg("--format")
            .arg("{{.Server.Version}}")
            .output()
            .await
        {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    async fn inspect(&self, name: &str) -> Result<ContainerStatus> {
        let output = self
            .command()
            .args(["inspect", "--format", "{{.State.Running}}", name])
            .output()
            .await
            .map_err(|e| ContainerError::Capacity(format!("Failed to run {}: {e}", self.binary)))?;

        if output.status.success() {
            let running = String::from_utf8_lossy(&output.stdout).trim() == "true";
            return Ok(if running {
                ContainerStatus::Running
            } else {
                ContainerStatus::Stopped
            });
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
        if stderr.contains("no such") {
            Ok(ContainerStatus::Absent)
        } else {
            Err(ContainerError::Runtime(format!(
                "{} inspect failed: {}",
                self.binary,
                stderr.trim()
            )))
        }
    }

    async fn run(&self, spec: &RunSpec) -> Result<String> {
        let mut cmd = self.command();
        cmd.arg("run").arg("-d").arg("--name").arg(&spec.name);
        cmd.arg("--label").arg("amem.managed=true");
        cmd.arg("--restart").arg("unless-stopped");
        cmd.arg("-p").arg(&spec.publish);

        // Credentials travel through the CLI's environment, never argv
        cmd.env("SURREAL_USER", &spec.username);
        cmd.env("SURREAL_PASS", &spec.password);
        cmd.arg("-e").arg("SURREAL_USER");
        cmd.arg("-e").arg("SURREAL_PASS");

        let storage = match &spec.data_volume {
            Some(volume) => {
                cmd.arg("-v").arg(format!("{volume}:/data"));
                "surrealkv:/data/amem.db".to_string()
            }
            None => "memory".to_string(),
        };

        cmd.arg(&spec.image)
            .arg("start")
            .arg("--bind")
            .arg(format!("0.0.0.0:{}", spec.container_port))
            .arg(storage);

        debug!(container = %spec.name, image = %spec.image, publish = %spec.publish, "Creating backend container");

        let output = cmd
            .output()
            .await
            .map_err(|e| ContainerError::Capacity(format!("Failed to run {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::Capacity(format!(
                "container create failed: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.run_simple(&["start", name])
            .await
            .map_err(|e| ContainerError::Capacity(e.to_string()))?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.run_simple(&["stop", name]).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.run_simple(&["rm", "-f", name]).await?;
        Ok(())
    }

    async fn remove_volume(&self, volume: &str) -> Result<()> {
        self.run_simple(&["volume", "rm", volume]).await?;
        Ok(())
    }

    async fn volume_exists(&self, volume: &str) -> Result<bool> {
        let output = self
            .command()
            .args(["volume", "inspect", volume])
            .output()
            .await
            .map_err(|e| ContainerError::Capacity(format!("Failed to run {}: {e}", self.binary)))?;

        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
        if stderr.contains("no such") {
            Ok(false)
        } else {
            Err(ContainerError::Runtime(format!(
                "{} volume inspect failed: {}",
                self.binary,
                stderr.trim()
            )))
        }
    }
}
