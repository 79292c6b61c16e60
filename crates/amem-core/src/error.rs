//! Error taxonomy for the memory engine.

use std::time::Duration;

use container_manager::ContainerError;
use graph_state::StorageError;

/// Errors produced by memory operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The backend could not be provisioned at startup; fatal.
    #[error("backend capacity unavailable: {0}")]
    Capacity(String),

    /// The backend is unreachable after retries.
    #[error("backend unreachable: {0}")]
    Connectivity(String),

    /// An attempt exceeded its deadline after retries.
    #[error("backend operation timed out: {0}")]
    Timeout(String),

    /// Rejected without contacting the backend.
    #[error("circuit open: backend calls suspended for another {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("validation failed: {0}")]
    Validation(String),

    /// A uniqueness constraint rejected the write.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("memory not found: {id}")]
    NotFound { id: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// Any other backend failure (serialization, schema)
    #[error("storage error: {0}")]
    Storage(String),
}

impl MemoryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        MemoryError::Validation(msg.into())
    }

    /// Errors meaning "memory is unavailable right now", as opposed to
    /// "the request was wrong".
    pub fn is_connectivity_class(&self) -> bool {
        matches!(
            self,
            MemoryError::Connectivity(_) | MemoryError::Timeout(_) | MemoryError::CircuitOpen { .. }
        )
    }
}

impl From<StorageError> for MemoryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Connection(msg) => MemoryError::Connectivity(msg),
            StorageError::Timeout(msg) => MemoryError::Timeout(msg),
            StorageError::InvalidQuery(msg) => MemoryError::Validation(msg),
            StorageError::Conflict(msg) => MemoryError::Conflict(msg),
            StorageError::NotFound { id } => MemoryError::NotFound { id },
            other @ (StorageError::Serialization(_)
            | StorageError::SchemaSetup(_)
            | StorageError::Backend(_)) => MemoryError::Storage(other.to_string()),
        }
    }
}

impl From<ContainerError> for MemoryError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::InvalidConfig(msg) => MemoryError::Config(msg),
            other => MemoryError::Capacity(other.to_string()),
        }
    }
}

/// Result type for memory operations.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_mapping() {
        assert!(matches!(
            MemoryError::from(StorageError::Connection("refused".into())),
            MemoryError::Connectivity(_)
        ));
        assert!(matches!(
            MemoryError::from(StorageError::InvalidQuery("parse".into())),
            MemoryError::Validation(_)
        ));
        assert!(matches!(
            MemoryError::from(StorageError::Conflict("dup".into())),
            MemoryError::Conflict(_)
        ));
        assert!(matches!(
            MemoryError::from(StorageError::not_found("r1")),
            MemoryError::NotFound { id } if id == "r1"
        ));
        assert!(matches!(
            MemoryError::from(StorageError::Backend("?".into())),
            MemoryError::Storage(_)
        ));
    }

    #[test]
    fn test_connectivity_class() {
        assert!(MemoryError::Connectivity("x".into()).is_connectivity_class());
        assert!(MemoryError::Timeout("x".into()).is_connectivity_class());
        assert!(MemoryError::CircuitOpen {
            retry_in: Duration::from_secs(1)
        }
        .is_connectivity_class());
        assert!(!MemoryError::validation("x").is_connectivity_class());
        assert!(!MemoryError::Capacity("x".into()).is_connectivity_class());
    }

    #[test]
    fn test_container_error_mapping() {
        assert!(matches!(
            MemoryError::from(ContainerError::Capacity("no docker".into())),
            MemoryError::Capacity(_)
        ));
        assert!(matches!(
            MemoryError::from(ContainerError::InvalidConfig("0.0.0.0".into())),
            MemoryError::Config(_)
        ));
    }
}
