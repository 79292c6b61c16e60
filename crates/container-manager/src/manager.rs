//! Backend container lifecycle
//!
//! `ensure_running` is idempotent and safe across processes:
//!
//! 1. Validate the configuration (no side effects before this passes)
//! 2. Running already? Return connection info, touch nothing
//! 3. Take the lock file, re-inspect (check-then-create under the lock)
//! 4. Stopped: start with the stored credential. Absent: generate and
//!    persist a fresh credential, then create the container. If the data
//!    volume outlived the container, the database still holds the root
//!    user it was first created with, so the stored credential is reused
//! 5. Release the lock, wait for `/health`

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::config::ContainerConfig;
use crate::credentials::Credential;
use crate::error::ContainerError;
use crate::health::{wait_until_healthy, HealthProbe, HttpHealthProbe};
use crate::lock;
use crate::runtime::{ContainerRuntime, ContainerStatus, DockerCli, RunSpec};
use crate::Result;

const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// How to reach the running backend.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// `ws://127.0.0.1:<port>`
    pub endpoint: String,
    pub health_url: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("endpoint", &self.endpoint)
            .field("health_url", &self.health_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Owns the backend container's lifecycle.
pub struct ContainerManager {
    config: ContainerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn HealthProbe>,
}

impl ContainerManager {
    /// Docker CLI runtime with an HTTP health probe.
    pub fn new(config: ContainerConfig) -> Result<Self> {
        Ok(Self::with_runtime(
            config,
            Arc::new(DockerCli::new()),
            Arc::new(HttpHealthProbe::new(PROBE_REQUEST_TIMEOUT)?),
        ))
    }

    pub fn with_runtime(
        config: ContainerConfig,
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            config,
            runtime,
            probe,
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Make sure the backend is up and return how to reach it.
    #[instrument(skip(self), fields(container = %self.config.name))]
    pub async fn ensure_running(&self) -> Result<ConnectionInfo> {
        self.config.validate()?;

        if self.runtime.inspect(&self.config.name).await? == ContainerStatus::Running {
            info!("Backend container already running");
            return self.connection_info(Credential::load(&self.config.credential_path)?);
        }

        if !self.runtime.is_available().await {
            return Err(ContainerError::Capacity(
                "container runtime is not available".to_string(),
            ));
        }

        let guard = lock::acquire(
            &self.config.lock_path,
            self.config.lock_wait(),
            self.config.stale_lock_after(),
        )
        .await?;

        let credential = match guard {
            Some(_guard) => self.bring_up().await?,
            None => {
                // Another process held the lock throughout; see what it did
                if self.runtime.inspect(&self.config.name).await? != ContainerStatus::Running {
                    return Err(ContainerError::LockTimeout {
                        path: self.config.lock_path.clone(),
                        waited: self.config.lock_wait(),
                    });
                }
                Credential::load(&self.config.credential_path)?
            }
        };

        let timeout = self.config.start_timeout();
        if !self.health_check(timeout).await {
            return Err(ContainerError::Unhealthy(timeout));
        }

        info!(endpoint = %self.config.endpoint(), "Backend container ready");
        self.connection_info(credential)
    }

    /// Start or create under the lock; returns the credential in force.
    async fn bring_up(&self) -> Result<Credential> {
        match self.runtime.inspect(&self.config.name).await? {
            ContainerStatus::Running => {
                info!("Backend container started by another process");
                Credential::load(&self.config.credential_path)
            }
            ContainerStatus::Stopped => {
                let credential = Credential::load(&self.config.credential_path)?;
                info!("Starting stopped backend container");
                self.runtime.start(&self.config.name).await?;
                Ok(credential)
            }
            ContainerStatus::Absent => {
                let credential = self.credential_for_new_container().await?;

                info!(image = %self.config.image, "Creating backend container");
                let spec = RunSpec {
                    name: self.config.name.clone(),
                    image: self.config.image.clone(),
                    publish: self.config.publish_spec(),
                    container_port: self.config.container_port,
                    data_volume: self.config.data_volume.clone(),
                    username: credential.username.clone(),
                    password: credential.password.clone(),
                };
                let id = self.runtime.run(&spec).await.map_err(|e| match e {
                    ContainerError::Capacity(msg) => ContainerError::Capacity(msg),
                    other => ContainerError::Capacity(other.to_string()),
                })?;
                info!(container_id = %id, "Backend container created");
                Ok(credential)
            }
        }
    }

    async fn credential_for_new_container(&self) -> Result<Credential> {
        let surviving = match &self.config.data_volume {
            Some(volume) => self.runtime.volume_exists(volume).await?.then_some(volume),
            None => None,
        };

        let Some(volume) = surviving else {
            let credential = Credential::generate(self.config.username.clone());
            credential.persist(&self.config.credential_path)?;
            return Ok(credential);
        };

        match Credential::load(&self.config.credential_path) {
            Ok(credential) => {
                info!(volume = %volume, "Data volume survives, reusing stored credential");
                Ok(credential)
            }
            Err(e) => Err(ContainerError::Credentials(format!(
                "data volume {} still holds a database but its credential is unusable ({}); \
                 restore {} or remove the volume with `amem down --remove`",
                volume,
                e,
                self.config.credential_path.display()
            ))),
        }
    }

    /// Poll `/health` until it answers or `timeout` elapses.
    pub async fn health_check(&self, timeout: Duration) -> bool {
        wait_until_healthy(self.probe.as_ref(), &self.config.health_url(), timeout).await
    }

    pub async fn status(&self) -> Result<ContainerStatus> {
        self.runtime.inspect(&self.config.name).await
    }

    /// Stop the container. Best effort: failures are logged, never returned.
    #[instrument(skip(self), fields(container = %self.config.name))]
    pub async fn stop(&self) {
        match self.runtime.stop(&self.config.name).await {
            Ok(()) => info!("Backend container stopped"),
            Err(e) => warn!("Failed to stop backend container: {}", e),
        }
    }

    /// Stop and remove the container with its data volume and credential.
    /// Best effort, like [`stop`](Self::stop).
    #[instrument(skip(self), fields(container = %self.config.name))]
    pub async fn cleanup(&self) {
        self.stop().await;

        if let Err(e) = self.runtime.remove(&self.config.name).await {
            warn!("Failed to remove backend container: {}", e);
        }
        if let Some(volume) = &self.config.data_volume {
            if let Err(e) = self.runtime.remove_volume(volume).await {
                warn!(volume = %volume, "Failed to remove data volume: {}", e);
            }
        }
        match std::fs::remove_file(&self.config.credential_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove credential file: {}", e),
        }
        info!("Backend container cleaned up");
    }

    fn connection_info(&self, credential: Credential) -> Result<ConnectionInfo> {
        Ok(ConnectionInfo {
            endpoint: self.config.endpoint(),
            health_url: self.config.health_url(),
            username: credential.username,
            password: credential.password,
        })
    }
}
