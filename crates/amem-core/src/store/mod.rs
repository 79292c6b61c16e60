//! Memory store and retrieval
//!
//! Every backend access goes through the [`ResilientConnector`]. Input is
//! validated before the first backend call, so a rejected request leaves
//! no trace in the graph.

pub mod ranking;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use graph_state::{
    normalize_tags, EdgeKind, InvalidationOutcome, MemoryBackend, MemoryCategory, MemoryEdge,
    MemoryRecord, RecordFilter, StoreStats, DEFAULT_PROJECT,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::config::{EngineConfig, LimitsConfig};
use crate::connector::ResilientConnector;
use crate::error::{MemoryError, MemoryResult};
use crate::metrics::METRICS;
use crate::monitor::OperationKind;
use crate::obs;
use crate::patterns::{signature_of, PatternEngine, PatternSignature};

pub use ranking::{compare_scored, Ranker, ScoredMemory, Similarity, TokenOverlap, TypeWeights};

/// Input for [`MemoryStore::remember`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMemory {
    pub agent_type: String,
    pub content: String,
    pub category: MemoryCategory,
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub external_refs: Vec<String>,
    /// Structure hashed for `pattern` memories; the content when absent
    #[serde(default)]
    pub structure: Option<String>,
}

impl NewMemory {
    pub fn new(
        agent_type: impl Into<String>,
        content: impl Into<String>,
        category: MemoryCategory,
        confidence: f64,
    ) -> Self {
        Self {
            agent_type: agent_type.into(),
            content: content.into(),
            category,
            confidence,
            tags: Vec::new(),
            project_id: None,
            session_id: None,
            external_refs: Vec::new(),
            structure: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_external_refs(mut self, refs: Vec<String>) -> Self {
        self.external_refs = refs;
        self
    }

    pub fn with_structure(mut self, structure: impl Into<String>) -> Self {
        self.structure = Some(structure.into());
        self
    }
}

/// Input for [`MemoryStore::recall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallQuery {
    pub agent_type: String,
    /// Free text ranked against record content
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub category: Option<MemoryCategory>,
    /// A record must carry all of these
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub min_quality: f64,
    pub limit: usize,
}

impl RecallQuery {
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            context: None,
            category: None,
            tags: Vec::new(),
            min_quality: 0.0,
            limit: 10,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_category(mut self, category: MemoryCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_quality(mut self, min_quality: f64) -> Self {
        self.min_quality = min_quality;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTypeSummary {
    pub name: String,
    pub first_seen: DateTime<Utc>,
    /// Records performed by this agent type, invalidated ones included
    pub record_count: usize,
}

/// Aggregate view of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub total_records: usize,
    pub active_records: usize,
    pub invalidated_records: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_agent_type: BTreeMap<String, usize>,
    pub agent_type_count: usize,
    pub pattern_count: usize,
    pub occurrence_count: usize,
    pub mean_active_quality: f64,
    pub generated_at: DateTime<Utc>,
}

impl MemorySummary {
    fn from_stats(stats: StoreStats, generated_at: DateTime<Utc>) -> Self {
        Self {
            total_records: stats.total_records,
            active_records: stats.active_records,
            invalidated_records: stats.invalidated_records,
            by_category: stats.by_category,
            by_agent_type: stats.by_agent_type,
            agent_type_count: stats.agent_type_count,
            pattern_count: stats.pattern_count,
            occurrence_count: stats.occurrence_count,
            mean_active_quality: stats.mean_active_quality,
            generated_at,
        }
    }
}

/// What a validated `remember` request will write.
struct Prepared {
    record: MemoryRecord,
    signature: Option<PatternSignature>,
}

/// Agent-facing memory operations. Cheap to clone.
#[derive(Clone)]
pub struct MemoryStore {
    backend: Arc<dyn MemoryBackend>,
    connector: Arc<ResilientConnector>,
    patterns: PatternEngine,
    ranker: Ranker,
    limits: LimitsConfig,
    page_size: usize,
}

impl MemoryStore {
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        connector: Arc<ResilientConnector>,
        config: &EngineConfig,
    ) -> Self {
        Self::with_ranker(backend, connector, config, Ranker::new(config.recall.clone()))
    }

    /// Use a custom ranker, e.g. one with a different [`Similarity`].
    pub fn with_ranker(
        backend: Arc<dyn MemoryBackend>,
        connector: Arc<ResilientConnector>,
        config: &EngineConfig,
        ranker: Ranker,
    ) -> Self {
        let patterns = PatternEngine::new(
            Arc::clone(&backend),
            Arc::clone(&connector),
            config.limits.pattern_sample_len,
        );
        Self {
            backend,
            connector,
            patterns,
            ranker,
            limits: config.limits.clone(),
            page_size: config.recall.page_size,
        }
    }

    pub fn patterns(&self) -> &PatternEngine {
        &self.patterns
    }

    pub fn connector(&self) -> &Arc<ResilientConnector> {
        &self.connector
    }

    fn prepare(&self, memory: NewMemory) -> MemoryResult<Prepared> {
        let agent_type = memory.agent_type.trim();
        if agent_type.is_empty() {
            return Err(MemoryError::validation("agent_type must not be empty"));
        }
        if memory.content.trim().is_empty() {
            return Err(MemoryError::validation("content must not be empty"));
        }
        let len = memory.content.chars().count();
        if len > self.limits.max_content_len {
            return Err(MemoryError::validation(format!(
                "content is {len} characters, limit is {}",
                self.limits.max_content_len
            )));
        }
        check_unit("confidence", memory.confidence)?;
        if memory.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(MemoryError::validation("tags must not be empty"));
        }

        let project_id = match memory.project_id.as_deref().map(str::trim) {
            Some("") => return Err(MemoryError::validation("project_id must not be empty")),
            Some(p) => p.to_string(),
            None => DEFAULT_PROJECT.to_string(),
        };

        let signature = if memory.category == MemoryCategory::Pattern {
            let sig = signature_of(memory.structure.as_deref().unwrap_or(&memory.content));
            if sig.is_empty() {
                return Err(MemoryError::validation(
                    "pattern structure is empty after normalization",
                ));
            }
            Some(sig)
        } else {
            None
        };

        let mut record = MemoryRecord::new(
            agent_type,
            memory.content,
            memory.category,
            memory.confidence,
        )
        .with_tags(memory.tags)
        .with_project(project_id)
        .with_external_refs(memory.external_refs);
        if let Some(session) = memory.session_id {
            record = record.with_session(session);
        }

        Ok(Prepared { record, signature })
    }

    /// Persist a new memory and return its id.
    ///
    /// Writes, in order: agent type node, record, `performed_by` edge, and
    /// for pattern memories the pattern occurrence plus `instance_of` edge.
    #[instrument(skip(self, memory), fields(agent_type = %memory.agent_type, category = %memory.category))]
    pub async fn remember(&self, memory: NewMemory) -> MemoryResult<String> {
        let Prepared { record, signature } = self.prepare(memory)?;
        let backend = &self.backend;

        let agent_type = record.agent_type.as_str();
        self.connector
            .call(OperationKind::AgentType, move || async move {
                backend.ensure_agent_type(agent_type).await
            })
            .await?;

        self.insert_record(&record).await?;
        self.link(MemoryEdge::new(
            &record.id,
            &record.agent_type,
            EdgeKind::PerformedBy,
        ))
        .await?;

        if let Some(signature) = signature {
            let pattern_id = self
                .patterns
                .upsert_pattern(&signature, &record.project_id, &record.id)
                .await?;
            self.link(MemoryEdge::new(&record.id, pattern_id, EdgeKind::InstanceOf))
                .await?;
        }

        METRICS.inc_remembered();
        obs::emit_memory_remembered(&record.id, &record.agent_type, record.category.as_str());
        Ok(record.id)
    }

    /// Five-argument form: no project, session or references.
    pub async fn remember_simple<I, S>(
        &self,
        agent_type: &str,
        content: &str,
        category: MemoryCategory,
        tags: I,
        confidence: f64,
    ) -> MemoryResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remember(NewMemory::new(agent_type, content, category, confidence).with_tags(tags))
            .await
    }

    // An insert retried after a lost acknowledgement sees its own row as
    // a conflict; that counts as written.
    async fn insert_record(&self, record: &MemoryRecord) -> MemoryResult<()> {
        let backend = &self.backend;
        let inserted = self
            .connector
            .call(OperationKind::InsertRecord, move || async move {
                backend.insert_record(record).await
            })
            .await;

        match inserted {
            Err(MemoryError::Conflict(msg)) => match self.get(&record.id).await? {
                Some(stored) if stored.content == record.content => {
                    debug!(id = %record.id, "Record already written by an earlier attempt");
                    Ok(())
                }
                _ => Err(MemoryError::Conflict(msg)),
            },
            other => other,
        }
    }

    async fn link(&self, edge: MemoryEdge) -> MemoryResult<()> {
        let backend = &self.backend;
        let edge = &edge;
        self.connector
            .call(OperationKind::Edge, move || async move {
                backend.insert_edge(edge).await
            })
            .await
    }

    /// Active memories for an agent type, best first.
    #[instrument(skip(self, query), fields(agent_type = %query.agent_type, limit = query.limit))]
    pub async fn recall(&self, query: RecallQuery) -> MemoryResult<Vec<ScoredMemory>> {
        let agent_type = query.agent_type.trim();
        if agent_type.is_empty() {
            return Err(MemoryError::validation("agent_type must not be empty"));
        }
        check_unit("min_quality", query.min_quality)?;
        if query.limit == 0 || query.limit > self.limits.max_recall_limit {
            return Err(MemoryError::validation(format!(
                "limit must lie in 1..={}",
                self.limits.max_recall_limit
            )));
        }
        if query.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(MemoryError::validation("filter tags must not be empty"));
        }

        let started = Instant::now();
        let filter = RecordFilter {
            agent_type: agent_type.to_string(),
            category: query.category,
            tags: normalize_tags(query.tags.iter().map(String::as_str)),
            min_quality: query.min_quality,
            limit: self.page_size,
            offset: 0,
        };
        let now = Utc::now();
        let context = query.context.as_deref();

        // Every matching record is scored; only the best `limit` are held
        let mut best: Vec<ScoredMemory> = Vec::with_capacity(query.limit * 2);
        let mut seen = HashSet::new();
        let mut considered = 0;
        loop {
            let page = self.query_page(&filter.page(considered, self.page_size), now).await?;
            let fetched = page.len();
            considered += fetched;

            // Offsets shift if records are written mid-scan
            let fresh: Vec<MemoryRecord> = page
                .into_iter()
                .filter(|r| seen.insert(r.id.clone()))
                .collect();
            best.extend(self.ranker.rank(fresh, context, now, query.limit));
            best.sort_by(compare_scored);
            best.truncate(query.limit);

            if fetched < self.page_size {
                break;
            }
        }
        let ranked = best;

        METRICS.inc_recalls();
        obs::emit_memory_recalled(
            agent_type,
            considered,
            ranked.len(),
            started.elapsed().as_millis() as u64,
        );
        Ok(ranked)
    }

    async fn query_page(
        &self,
        filter: &RecordFilter,
        now: DateTime<Utc>,
    ) -> MemoryResult<Vec<MemoryRecord>> {
        let backend = &self.backend;
        self.connector
            .call(OperationKind::QueryRecords, move || async move {
                backend.query_active(filter, now).await
            })
            .await
    }

    /// Direct lookup, including invalidated records.
    pub async fn get(&self, id: &str) -> MemoryResult<Option<MemoryRecord>> {
        check_id(id)?;
        let backend = &self.backend;
        self.connector
            .call(OperationKind::GetRecord, move || async move {
                backend.get_record(id).await
            })
            .await
    }

    /// Outgoing relationships of a node.
    pub async fn edges_from(&self, id: &str) -> MemoryResult<Vec<MemoryEdge>> {
        check_id(id)?;
        let backend = &self.backend;
        self.connector
            .call(OperationKind::Edge, move || async move {
                backend.edges_from(id).await
            })
            .await
    }

    /// Close the record's validity window. Idempotent.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, id: &str) -> MemoryResult<InvalidationOutcome> {
        check_id(id)?;
        let backend = &self.backend;
        let now = Utc::now();
        let outcome = self
            .connector
            .call(OperationKind::Invalidate, move || async move {
                backend.invalidate_record(id, now).await
            })
            .await?;

        obs::emit_memory_invalidated(
            id,
            matches!(outcome, InvalidationOutcome::AlreadyInvalid { .. }),
        );
        Ok(outcome)
    }

    /// Add `delta` to the quality score, clamped to [0, 1]. Returns the new score.
    #[instrument(skip(self))]
    pub async fn update_quality(&self, id: &str, delta: f64) -> MemoryResult<f64> {
        check_id(id)?;
        if !delta.is_finite() {
            return Err(MemoryError::validation("quality delta must be finite"));
        }
        let backend = &self.backend;
        let quality = self
            .connector
            .call(OperationKind::UpdateQuality, move || async move {
                backend.adjust_quality(id, delta).await
            })
            .await?;

        obs::emit_quality_updated(id, delta, quality);
        Ok(quality)
    }

    /// Raise quality after the memory proved useful.
    pub async fn reinforce(&self, id: &str, amount: f64) -> MemoryResult<f64> {
        if !(amount.is_finite() && amount >= 0.0) {
            return Err(MemoryError::validation(
                "reinforcement must be a non-negative number",
            ));
        }
        self.update_quality(id, amount).await
    }

    /// Multiply the quality of every active record by `factor` in (0, 1].
    #[instrument(skip(self))]
    pub async fn decay_sweep(&self, factor: f64) -> MemoryResult<usize> {
        if !(factor.is_finite() && factor > 0.0 && factor <= 1.0) {
            return Err(MemoryError::validation("decay factor must lie in (0, 1]"));
        }
        let backend = &self.backend;
        let now = Utc::now();
        let touched = self
            .connector
            .call(OperationKind::DecaySweep, move || async move {
                backend.scale_active_quality(factor, now).await
            })
            .await?;

        obs::emit_decay_sweep(factor, touched);
        Ok(touched)
    }

    pub async fn list_agent_types(&self) -> MemoryResult<Vec<AgentTypeSummary>> {
        let backend = &self.backend;
        let nodes = self
            .connector
            .call(OperationKind::AgentType, move || async move {
                backend.list_agent_types().await
            })
            .await?;
        let stats = self.stats().await?;

        Ok(nodes
            .into_iter()
            .map(|node| AgentTypeSummary {
                record_count: stats.by_agent_type.get(&node.name).copied().unwrap_or(0),
                name: node.name,
                first_seen: node.first_seen,
            })
            .collect())
    }

    pub async fn get_memory_summary(&self) -> MemoryResult<MemorySummary> {
        let now = Utc::now();
        let stats = self.stats_at(now).await?;
        Ok(MemorySummary::from_stats(stats, now))
    }

    /// Round-trip to the backend through the connector.
    pub async fn ping(&self) -> MemoryResult<()> {
        let backend = &self.backend;
        self.connector
            .call(OperationKind::Ping, move || async move { backend.ping().await })
            .await
    }

    async fn stats(&self) -> MemoryResult<StoreStats> {
        self.stats_at(Utc::now()).await
    }

    async fn stats_at(&self, now: DateTime<Utc>) -> MemoryResult<StoreStats> {
        let backend = &self.backend;
        self.connector
            .call(OperationKind::Stats, move || async move {
                backend.stats(now).await
            })
            .await
    }
}

fn check_unit(name: &str, value: f64) -> MemoryResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(MemoryError::validation(format!(
            "{name} must lie in [0, 1], got {value}"
        )))
    }
}

fn check_id(id: &str) -> MemoryResult<()> {
    if id.trim().is_empty() {
        Err(MemoryError::validation("id must not be empty"))
    } else {
        Ok(())
    }
}
