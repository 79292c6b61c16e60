//! Error types for graph-state

use thiserror::Error;

/// Errors that can occur in the graph persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend could not be reached or the connection dropped
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Operation exceeded its deadline inside the backend
    #[error("Database operation timed out: {0}")]
    Timeout(String),

    /// The backend rejected the statement (parse error, bad field type)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A unique index or transaction conflict rejected the write
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Row does not exist
    #[error("Record not found: {id}")]
    NotFound { id: String },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Any other backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Transient errors are worth retrying: the statement may succeed on a
    /// healthy connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Connection(_) | StorageError::Timeout(_))
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        StorageError::NotFound { id: id.into() }
    }
}

/// Classify a backend message that carries no structured kind.
///
/// SurrealDB reports index violations as "Database index `x` already
/// contains ..." and optimistic transaction aborts as "read or write
/// conflict"; both mean the write lost a race.
pub(crate) fn classify_message(message: String) -> StorageError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("already contains") || lower.contains("already exists") {
        StorageError::Conflict(message)
    } else if lower.contains("read or write conflict") || lower.contains("transaction conflict") {
        StorageError::Conflict(message)
    } else if lower.contains("parse error") || lower.contains("invalid query") {
        StorageError::InvalidQuery(message)
    } else if lower.contains("couldn't coerce") || lower.contains("expected a") {
        StorageError::InvalidQuery(message)
    } else if lower.contains("timed out") || lower.contains("timeout") {
        StorageError::Timeout(message)
    } else if lower.contains("connection") || lower.contains("websocket") || lower.contains("broken pipe") {
        StorageError::Connection(message)
    } else {
        StorageError::Backend(message)
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        match err {
            // Client-side failures: transport, uninitialised connection, (de)serialisation
            surrealdb::Error::Api(api) => {
                let message = api.to_string();
                let lower = message.to_ascii_lowercase();
                if lower.contains("serial") || lower.contains("deserial") {
                    StorageError::Serialization(message)
                } else {
                    StorageError::Connection(message)
                }
            }
            #[allow(unreachable_patterns)]
            other => classify_message(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_index_violation_is_conflict() {
        let err = classify_message(
            "Database index `idx_pattern_signature` already contains 'abc', with record `code_patterns:x`"
                .to_string(),
        );
        assert!(matches!(err, StorageError::Conflict(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_error_is_invalid_query() {
        let err = classify_message("Parse error: Unexpected token `WHER`".to_string());
        assert!(matches!(err, StorageError::InvalidQuery(_)));
    }

    #[test]
    fn test_connection_messages_are_transient() {
        assert!(classify_message("There was an error with the WebSocket".to_string()).is_transient());
        assert!(classify_message("operation timed out".to_string()).is_transient());
    }

    #[test]
    fn test_unknown_message_is_backend() {
        let err = classify_message("something odd".to_string());
        assert!(matches!(err, StorageError::Backend(_)));
        assert!(!err.is_transient());
    }
}
