//! In-memory fake for `MemoryBackend` (testing only)
//!
//! `InMemoryGraph` satisfies the backend contract without any external
//! dependency and adds fault injection so callers can exercise retry and
//! circuit-breaker paths:
//! - `set_available(false)` fails every call with a connection error
//! - `fail_next(n)` fails the next `n` calls with a connection error
//! - `push_failure(err)` queues an arbitrary error for the next call
//! - `set_latency(d)` delays every call by `d` (tokio time, pausable)
//! - `call_count()` counts every trait call, failed ones included

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::model::{
    AgentTypeNode, CodePattern, InvalidationOutcome, MemoryEdge, MemoryRecord,
    PatternOccurrence, RecordFilter, StoreStats,
};
use crate::storage_traits::{MemoryBackend, StorageResult};

#[derive(Debug, Default)]
struct GraphState {
    agent_types: HashMap<String, AgentTypeNode>,
    /// Insertion order preserved for stable listing
    records: Vec<MemoryRecord>,
    patterns: HashMap<String, CodePattern>,
    occurrences: Vec<PatternOccurrence>,
    edges: Vec<MemoryEdge>,
}

impl GraphState {
    fn record_mut(&mut self, id: &str) -> StorageResult<&mut MemoryRecord> {
        self.records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StorageError::not_found(id))
    }
}

/// In-memory memory graph backed by a `Mutex<GraphState>`.
#[derive(Debug)]
pub struct InMemoryGraph {
    state: Mutex<GraphState>,
    available: AtomicBool,
    failures: Mutex<VecDeque<StorageError>>,
    latency: Mutex<Option<Duration>>,
    calls: AtomicU64,
}

impl Default for InMemoryGraph {
    fn default() -> Self {
        Self {
            state: Mutex::new(GraphState::default()),
            available: AtomicBool::new(true),
            failures: Mutex::new(VecDeque::new()),
            latency: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_next(&self, n: usize) {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..n {
            failures.push_back(StorageError::Connection("injected failure".to_string()));
        }
    }

    pub fn push_failure(&self, err: StorageError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of stored records, ignoring validity.
    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    /// Common prologue: count, delay, then apply injected faults.
    async fn enter(&self) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("backend unavailable".to_string()));
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl MemoryBackend for InMemoryGraph {
    async fn ping(&self) -> StorageResult<()> {
        self.enter().await
    }

    async fn ensure_agent_type(&self, name: &str) -> StorageResult<AgentTypeNode> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        Ok(state
            .agent_types
            .entry(name.to_string())
            .or_insert_with(|| AgentTypeNode::new(name))
            .clone())
    }

    async fn get_agent_type(&self, name: &str) -> StorageResult<Option<AgentTypeNode>> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        Ok(state.agent_types.get(name).cloned())
    }

    async fn list_agent_types(&self) -> StorageResult<Vec<AgentTypeNode>> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        let mut nodes: Vec<AgentTypeNode> = state.agent_types.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    async fn insert_record(&self, record: &MemoryRecord) -> StorageResult<()> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        if state.records.iter().any(|r| r.id == record.id) {
            return Err(StorageError::Conflict(format!(
                "record {} already exists",
                record.id
            )));
        }
        state.records.push(record.clone());
        Ok(())
    }

    async fn get_record(&self, id: &str) -> StorageResult<Option<MemoryRecord>> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        Ok(state.records.iter().find(|r| r.id == id).cloned())
    }

    async fn query_active(
        &self,
        filter: &RecordFilter,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<MemoryRecord>> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        let mut matching: Vec<&MemoryRecord> = state
            .records
            .iter()
            .filter(|r| filter.matches(r, now))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect())
    }

    async fn invalidate_record(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<InvalidationOutcome> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        let record = state.record_mut(id)?;
        match record.valid_until {
            Some(existing) => Ok(InvalidationOutcome::AlreadyInvalid { at: existing }),
            None => {
                record.valid_until = Some(at);
                Ok(InvalidationOutcome::Invalidated { at })
            }
        }
    }

    async fn adjust_quality(&self, id: &str, delta: f64) -> StorageResult<f64> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        let record = state.record_mut(id)?;
        record.quality_score = (record.quality_score + delta).clamp(0.0, 1.0);
        Ok(record.quality_score)
    }

    async fn scale_active_quality(&self, factor: f64, now: DateTime<Utc>) -> StorageResult<usize> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        let mut touched = 0;
        for record in state.records.iter_mut().filter(|r| r.is_active_at(now)) {
            record.quality_score = (record.quality_score * factor).clamp(0.0, 1.0);
            touched += 1;
        }
        Ok(touched)
    }

    async fn insert_edge(&self, edge: &MemoryEdge) -> StorageResult<()> {
        self.enter().await?;
        self.state.lock().unwrap().edges.push(edge.clone());
        Ok(())
    }

    async fn edges_from(&self, from_id: &str) -> StorageResult<Vec<MemoryEdge>> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .edges
            .iter()
            .filter(|e| e.from_id == from_id)
            .cloned()
            .collect())
    }

    async fn create_pattern(&self, pattern: &CodePattern) -> StorageResult<CodePattern> {
        self.enter().await?;
        let mut state = self.state.lock().unwrap();
        if state.patterns.contains_key(&pattern.signature) {
            return Err(StorageError::Conflict(format!(
                "pattern {} already exists",
                pattern.signature
            )));
        }
        state
            .patterns
            .insert(pattern.signature.clone(), pattern.clone());
        Ok(pattern.clone())
    }

    async fn get_pattern(&self, signature: &str) -> StorageResult<Option<CodePattern>> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        Ok(state.patterns.get(signature).cloned())
    }

    async fn list_patterns(&self) -> StorageResult<Vec<CodePattern>> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        let mut patterns: Vec<CodePattern> = state.patterns.values().cloned().collect();
        patterns.sort_by(|a, b| a.first_seen.cmp(&b.first_seen));
        Ok(patterns)
    }

    async fn add_occurrence(&self, occurrence: &PatternOccurrence) -> StorageResult<()> {
        self.enter().await?;
        self.state.lock().unwrap().occurrences.push(occurrence.clone());
        Ok(())
    }

    async fn occurrences(&self, signature: &str) -> StorageResult<Vec<PatternOccurrence>> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        let mut out: Vec<PatternOccurrence> = state
            .occurrences
            .iter()
            .filter(|o| o.signature == signature)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.observed_at.cmp(&b.observed_at));
        Ok(out)
    }

    async fn stats(&self, now: DateTime<Utc>) -> StorageResult<StoreStats> {
        self.enter().await?;
        let state = self.state.lock().unwrap();
        let mut stats = StoreStats::from_records(state.records.iter(), now);
        stats.agent_type_count = state.agent_types.len();
        stats.pattern_count = state.patterns.len();
        stats.occurrence_count = state.occurrences.len();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryCategory;

    #[tokio::test]
    async fn test_fail_next_then_recovers() {
        let graph = InMemoryGraph::new();
        graph.fail_next(2);

        assert!(graph.ping().await.unwrap_err().is_transient());
        assert!(graph.ping().await.unwrap_err().is_transient());
        graph.ping().await.unwrap();
        assert_eq!(graph.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let graph = InMemoryGraph::new();
        graph.set_available(false);

        let record = MemoryRecord::new("a", "b", MemoryCategory::Semantic, 0.5);
        let err = graph.insert_record(&record).await.unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));
        assert_eq!(graph.record_count(), 0);
    }

    #[tokio::test]
    async fn test_pushed_failure_is_returned_once() {
        let graph = InMemoryGraph::new();
        graph.push_failure(StorageError::InvalidQuery("bad".to_string()));

        assert!(matches!(
            graph.list_patterns().await.unwrap_err(),
            StorageError::InvalidQuery(_)
        ));
        assert!(graph.list_patterns().await.unwrap().is_empty());
    }
}
