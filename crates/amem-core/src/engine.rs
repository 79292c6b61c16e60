//! Engine wiring: backend, connector, monitor and store in one handle.

use std::path::Path;
use std::sync::Arc;

use container_manager::{ContainerConfig, ContainerManager};
use graph_state::{BackendConfig, MemoryBackend, SurrealGraph};
use tracing::info;

use crate::advisory::AdvisoryMemory;
use crate::config::EngineConfig;
use crate::connector::ResilientConnector;
use crate::error::MemoryResult;
use crate::hooks::{HookConfig, MemoryHooks};
use crate::monitor::{HealthReport, Monitor};
use crate::patterns::PatternEngine;
use crate::store::MemoryStore;

#[derive(Clone)]
pub struct MemoryEngine {
    config: EngineConfig,
    monitor: Arc<Monitor>,
    connector: Arc<ResilientConnector>,
    store: MemoryStore,
}

impl MemoryEngine {
    /// Wire the engine over any backend.
    pub fn with_backend(backend: Arc<dyn MemoryBackend>, config: EngineConfig) -> MemoryResult<Self> {
        config.validate()?;
        let monitor = Arc::new(Monitor::new(config.monitor.clone()));
        let connector = Arc::new(ResilientConnector::new(
            config.connector.clone(),
            Arc::clone(&monitor),
        ));
        let store = MemoryStore::new(backend, Arc::clone(&connector), &config);
        Ok(Self {
            config,
            monitor,
            connector,
            store,
        })
    }

    /// Bring up the backend container (idempotently) and connect to it.
    ///
    /// Failing to provision the container is a `Capacity` error.
    pub async fn start(container: ContainerConfig, config: EngineConfig) -> MemoryResult<Self> {
        let manager = ContainerManager::new(container)?;
        let info = manager.ensure_running().await?;
        let backend = BackendConfig::new(info.endpoint, info.username, info.password);
        Self::connect(&backend, config).await
    }

    /// Connect to an already running server.
    pub async fn connect(backend: &BackendConfig, config: EngineConfig) -> MemoryResult<Self> {
        let graph = SurrealGraph::connect(backend).await?;
        info!(endpoint = %backend.endpoint, "Memory engine connected");
        Self::with_backend(Arc::new(graph), config)
    }

    /// Embedded database persisted under `path`.
    pub async fn open_local(path: &Path, config: EngineConfig) -> MemoryResult<Self> {
        let graph = SurrealGraph::open_local(path).await?;
        info!(path = %path.display(), "Memory engine opened local store");
        Self::with_backend(Arc::new(graph), config)
    }

    /// Embedded, non-persistent database.
    pub async fn in_memory(config: EngineConfig) -> MemoryResult<Self> {
        let graph = SurrealGraph::in_memory().await?;
        Self::with_backend(Arc::new(graph), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn patterns(&self) -> &PatternEngine {
        self.store.patterns()
    }

    pub fn advisory(&self) -> AdvisoryMemory {
        AdvisoryMemory::new(self.store.clone())
    }

    pub fn hooks(&self, config: HookConfig) -> MemoryHooks {
        MemoryHooks::new(self.advisory(), config)
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn connector(&self) -> &Arc<ResilientConnector> {
        &self.connector
    }

    pub fn health(&self) -> HealthReport {
        self.monitor.get_health()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;
    use graph_state::fakes::InMemoryGraph;

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.connector.failure_threshold = 0;
        let err = MemoryEngine::with_backend(Arc::new(InMemoryGraph::new()), config)
            .err()
            .unwrap();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[tokio::test]
    async fn test_in_memory_engine_starts_healthy() {
        let engine = MemoryEngine::in_memory(EngineConfig::default()).await.unwrap();
        engine.store().ping().await.unwrap();
        let health = engine.health();
        assert_eq!(health.samples, 1);
        assert_eq!(health.recent_failure_rate, 0.0);
    }
}
