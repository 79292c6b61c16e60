//! Degraded-mode facade for agents.
//!
//! Memory is advisory: when the backend is unreachable an agent should
//! keep working without it. `AdvisoryMemory` turns connectivity-class
//! errors (unreachable, timed out, circuit open) into "no memory" with a
//! warning, and surfaces every other error, validation included.

use graph_state::InvalidationOutcome;

use crate::error::MemoryResult;
use crate::obs;
use crate::store::{MemoryStore, MemorySummary, NewMemory, RecallQuery, ScoredMemory};

#[derive(Clone)]
pub struct AdvisoryMemory {
    store: MemoryStore,
}

impl AdvisoryMemory {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// `Ok(None)` when memory is unavailable.
    pub async fn remember(&self, memory: NewMemory) -> MemoryResult<Option<String>> {
        degrade("remember", self.store.remember(memory).await.map(Some), None)
    }

    pub async fn recall(&self, query: RecallQuery) -> MemoryResult<Vec<ScoredMemory>> {
        degrade("recall", self.store.recall(query).await, Vec::new())
    }

    /// `Ok(None)` when memory is unavailable.
    pub async fn invalidate(&self, id: &str) -> MemoryResult<Option<InvalidationOutcome>> {
        degrade("invalidate", self.store.invalidate(id).await.map(Some), None)
    }

    pub async fn get_memory_summary(&self) -> MemoryResult<MemorySummary> {
        degrade(
            "get_memory_summary",
            self.store.get_memory_summary().await,
            MemorySummary::default(),
        )
    }
}

fn degrade<T>(operation: &str, result: MemoryResult<T>, fallback: T) -> MemoryResult<T> {
    match result {
        Err(err) if err.is_connectivity_class() => {
            obs::emit_memory_degraded(operation, &err);
            Ok(fallback)
        }
        other => other,
    }
}
