//! Storage trait definitions for AMEM
//!
//! `MemoryBackend` is the single seam between the memory engine and a graph
//! database. It is async and backend-agnostic; SurrealDB and in-memory
//! implementations live in [`crate::surreal_backend`] and [`crate::fakes`].
//!
//! Contract shared by all implementations:
//! - Singleton nodes (agent types, code patterns) are unique per key. The
//!   uniqueness is enforced by the store itself, so a losing concurrent
//!   create surfaces as `StorageError::Conflict`.
//! - Records are never physically deleted.
//! - Quality updates are clamped to [0, 1] inside the backend statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::model::{
    AgentTypeNode, CodePattern, InvalidationOutcome, MemoryEdge, MemoryRecord,
    PatternOccurrence, RecordFilter, StoreStats,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Graph-capable persistence for memory records, agent types and patterns.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Cheap round-trip proving the backend answers.
    async fn ping(&self) -> StorageResult<()>;

    // ----- agent types -----

    /// Return the agent type node, creating it on first sight.
    ///
    /// Safe under concurrent callers: a lost create race re-reads the
    /// winner's node.
    async fn ensure_agent_type(&self, name: &str) -> StorageResult<AgentTypeNode>;

    async fn get_agent_type(&self, name: &str) -> StorageResult<Option<AgentTypeNode>>;

    async fn list_agent_types(&self) -> StorageResult<Vec<AgentTypeNode>>;

    // ----- memory records -----

    async fn insert_record(&self, record: &MemoryRecord) -> StorageResult<()>;

    /// Direct lookup, including invalidated records.
    async fn get_record(&self, id: &str) -> StorageResult<Option<MemoryRecord>>;

    /// Records active at `now` that satisfy the filter, newest first.
    async fn query_active(
        &self,
        filter: &RecordFilter,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<MemoryRecord>>;

    /// Close the validity window. `NotFound` if the id is unknown.
    async fn invalidate_record(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<InvalidationOutcome>;

    /// Add `delta` to the quality score, clamped to [0, 1]. Returns the new score.
    async fn adjust_quality(&self, id: &str, delta: f64) -> StorageResult<f64>;

    /// Multiply the quality of every record active at `now` by `factor`.
    /// Returns the number of records touched.
    async fn scale_active_quality(&self, factor: f64, now: DateTime<Utc>) -> StorageResult<usize>;

    // ----- edges -----

    async fn insert_edge(&self, edge: &MemoryEdge) -> StorageResult<()>;

    async fn edges_from(&self, from_id: &str) -> StorageResult<Vec<MemoryEdge>>;

    // ----- patterns -----

    /// Create a pattern node. `Conflict` if the signature already exists.
    async fn create_pattern(&self, pattern: &CodePattern) -> StorageResult<CodePattern>;

    async fn get_pattern(&self, signature: &str) -> StorageResult<Option<CodePattern>>;

    async fn list_patterns(&self) -> StorageResult<Vec<CodePattern>>;

    async fn add_occurrence(&self, occurrence: &PatternOccurrence) -> StorageResult<()>;

    /// All occurrences of a signature, oldest first.
    async fn occurrences(&self, signature: &str) -> StorageResult<Vec<PatternOccurrence>>;

    // ----- aggregates -----

    async fn stats(&self, now: DateTime<Utc>) -> StorageResult<StoreStats>;
}
