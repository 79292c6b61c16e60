//! SurrealDB connection handle
//!
//! Supports an embedded in-memory engine (tests, `--ephemeral`) and remote
//! WebSocket servers (the containerised backend). Schema initialisation
//! runs on every connect.

use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StorageError;
use crate::migrations;
use crate::storage_traits::StorageResult;

const DEFAULT_NAMESPACE: &str = "amem";
const DEFAULT_DATABASE: &str = "main";

/// Connection settings for a SurrealDB server.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Endpoint URL, e.g. `ws://127.0.0.1:8000` or `mem://`
    pub endpoint: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_database")]
    pub database: String,
    /// Sign in as a root user (true) or a database user (false)
    #[serde(default = "default_root")]
    pub is_root: bool,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_root() -> bool {
    true
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("is_root", &self.is_root)
            .finish()
    }
}

impl BackendConfig {
    /// Root-user configuration with the default namespace and database.
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: default_namespace(),
            database: default_database(),
            is_root: true,
        }
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - AMEM_DB_ENDPOINT (required)
    /// - AMEM_DB_USERNAME (required)
    /// - AMEM_DB_PASSWORD (required)
    /// - AMEM_DB_NAMESPACE (optional, default: "amem")
    /// - AMEM_DB_DATABASE (optional, default: "main")
    /// - AMEM_DB_ROOT (optional, default: "true")
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint = std::env::var("AMEM_DB_ENDPOINT").map_err(|_| "AMEM_DB_ENDPOINT not set")?;
        let username = std::env::var("AMEM_DB_USERNAME").map_err(|_| "AMEM_DB_USERNAME not set")?;
        let password = std::env::var("AMEM_DB_PASSWORD").map_err(|_| "AMEM_DB_PASSWORD not set")?;
        let namespace = std::env::var("AMEM_DB_NAMESPACE").unwrap_or_else(|_| default_namespace());
        let database = std::env::var("AMEM_DB_DATABASE").unwrap_or_else(|_| default_database());
        let is_root = std::env::var("AMEM_DB_ROOT")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

/// SurrealDB-backed memory graph
#[derive(Clone)]
pub struct SurrealGraph {
    pub(crate) db: Surreal<Any>,
}

impl SurrealGraph {
    /// Embedded in-memory database with the schema applied.
    #[instrument(skip_all)]
    pub async fn in_memory() -> StorageResult<Self> {
        info!("Connecting to SurrealDB (in-memory)");

        let db = surrealdb::engine::any::connect("mem://")
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        db.use_ns(DEFAULT_NAMESPACE)
            .use_db(DEFAULT_DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let graph = SurrealGraph { db };
        migrations::init_schema(&graph.db).await?;
        Ok(graph)
    }

    /// Embedded on-disk database (`surrealkv://`) under `path`.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn open_local(path: &std::path::Path) -> StorageResult<Self> {
        std::fs::create_dir_all(path).map_err(|e| {
            StorageError::Connection(format!(
                "Failed to create database directory {}: {}",
                path.display(),
                e
            ))
        })?;
        let url = format!("surrealkv://{}", path.display());
        info!("Opening local SurrealDB store: {}", url);

        let db = surrealdb::engine::any::connect(url.as_str())
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(DEFAULT_NAMESPACE)
            .use_db(DEFAULT_DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let graph = SurrealGraph { db };
        migrations::init_schema(&graph.db).await?;
        Ok(graph)
    }

    /// Connect and authenticate against a server.
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
    pub async fn connect(config: &BackendConfig) -> StorageResult<Self> {
        info!("Connecting to SurrealDB (root={})", config.is_root);

        let db = surrealdb::engine::any::connect(config.endpoint.as_str())
            .await
            .map_err(|e| {
                StorageError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
            })?;

        if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StorageError::Connection(format!("Root authentication failed: {}", e)))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| {
                StorageError::Connection(format!("Database authentication failed: {}", e))
            })?;
        }

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(|e| {
                StorageError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        let graph = SurrealGraph { db };
        migrations::init_schema(&graph.db).await?;

        info!("SurrealDB connected and schema initialized");
        Ok(graph)
    }

    /// Connect using `AMEM_DB_*` variables, falling back to in-memory.
    #[instrument(skip_all)]
    pub async fn from_env() -> StorageResult<Self> {
        match BackendConfig::from_env() {
            Ok(config) => Self::connect(&config).await,
            Err(reason) => {
                info!("{reason}, using in-memory database");
                Self::in_memory().await
            }
        }
    }
}
