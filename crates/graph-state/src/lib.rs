//! Graph-State: SurrealDB persistence for AMEM
//!
//! This crate owns every byte AMEM stores: memory records, agent type
//! nodes, deduplicated code patterns with their occurrences, and the typed
//! edges between them.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: temporal validity bookkeeping, uniqueness of singleton nodes, and
//! clamped quality updates, all enforced at the storage layer.
//!
//! ## Key Components
//!
//! - `MemoryBackend`: async trait every backend implements
//! - `SurrealGraph`: SurrealDB implementation (`mem://`, `surrealkv://`, `ws://`)
//! - `fakes::InMemoryGraph`: fault-injecting in-memory implementation
//! - `MemoryRecord`, `CodePattern`, `MemoryEdge`: the graph model

mod error;
pub mod fakes;
mod handle;
pub mod migrations;
pub mod model;
mod schema;
pub mod storage_traits;
mod surreal_backend;

pub use error::StorageError;
pub use handle::{BackendConfig, SurrealGraph};
pub use model::{
    normalize_tags, AgentTypeNode, CodePattern, EdgeKind, InvalidationOutcome, MemoryCategory,
    MemoryEdge, MemoryRecord, PatternOccurrence, RecordFilter, StoreStats, Validity,
    DEFAULT_PROJECT,
};
pub use storage_traits::{MemoryBackend, StorageResult};
