//! Container-Manager: lifecycle of the AMEM graph database container
//!
//! Guarantees a reachable backend before the memory engine connects:
//! creates the container on first use with a freshly generated credential,
//! restarts it when stopped, and leaves it alone when already running.
//!
//! ## Layer 2 - Environment/Tooling
//!
//! Focus: idempotent startup, cross-process safety, and keeping the
//! backend on loopback with an owner-only credential.

mod config;
mod credentials;
mod error;
pub mod fakes;
mod health;
pub mod lock;
mod manager;
mod runtime;

pub use config::{default_state_dir, ContainerConfig, DEFAULT_CONTAINER_NAME, DEFAULT_IMAGE};
pub use credentials::Credential;
pub use error::ContainerError;
pub use health::{wait_until_healthy, HealthProbe, HttpHealthProbe};
pub use manager::{ConnectionInfo, ContainerManager};
pub use runtime::{ContainerRuntime, ContainerStatus, DockerCli, RunSpec};

/// Result type for container-manager operations
pub type Result<T> = std::result::Result<T, ContainerError>;
