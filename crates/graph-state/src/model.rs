//! Memory graph model
//!
//! Node and edge types shared by every backend:
//! - `MemoryRecord`: one unit of experiential knowledge
//! - `AgentTypeNode`: singleton per agent role
//! - `CodePattern` + `PatternOccurrence`: deduplicated structural patterns
//! - `MemoryEdge`: typed relationship between nodes

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Project id used when the caller does not scope a memory to a project.
pub const DEFAULT_PROJECT: &str = "default";

/// Kind of knowledge a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// A time-stamped experience
    Episodic,
    /// A fact or decision
    Semantic,
    /// How to do something
    Procedural,
    /// A reusable structural pattern, deduplicated by signature
    Pattern,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 4] = [
        MemoryCategory::Episodic,
        MemoryCategory::Semantic,
        MemoryCategory::Procedural,
        MemoryCategory::Pattern,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Pattern => "pattern",
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            "pattern" => Ok(Self::Pattern),
            other => Err(format!(
                "unknown memory category '{other}' (expected episodic, semantic, procedural or pattern)"
            )),
        }
    }
}

/// Temporal state of a record at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Validity {
    Active,
    /// `valid_from` lies in the future
    Pending { from: DateTime<Utc> },
    Invalidated { at: DateTime<Utc> },
}

/// A single unit of experiential knowledge.
///
/// Records are never deleted. Invalidation closes the validity window by
/// setting `valid_until`, which keeps history queries well-defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub category: MemoryCategory,
    pub agent_type: String,
    pub project_id: String,
    pub confidence: f64,
    pub quality_score: f64,
    /// Sorted and deduplicated
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub source_session_id: Option<String>,
    /// Opaque identifiers into an external code graph
    #[serde(default)]
    pub external_refs: Vec<String>,
}

impl MemoryRecord {
    /// Create a record valid from now, with `quality_score` seeded from `confidence`.
    pub fn new(
        agent_type: impl Into<String>,
        content: impl Into<String>,
        category: MemoryCategory,
        confidence: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            category,
            agent_type: agent_type.into(),
            project_id: DEFAULT_PROJECT.to_string(),
            confidence,
            quality_score: confidence,
            tags: Vec::new(),
            created_at: now,
            valid_from: now,
            valid_until: None,
            source_session_id: None,
            external_refs: Vec::new(),
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = normalize_tags(tags);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.source_session_id = Some(session_id.into());
        self
    }

    pub fn with_external_refs(mut self, refs: Vec<String>) -> Self {
        self.external_refs = refs;
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.valid_from = at;
        self
    }

    pub fn validity_at(&self, now: DateTime<Utc>) -> Validity {
        match self.valid_until {
            Some(until) if until <= now => Validity::Invalidated { at: until },
            _ if self.valid_from > now => Validity::Pending {
                from: self.valid_from,
            },
            _ => Validity::Active,
        }
    }

    /// Active iff `valid_from <= now` and the window is still open.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.validity_at(now) == Validity::Active
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
            .max(Duration::zero())
    }

    pub fn has_all_tags(&self, wanted: &[String]) -> bool {
        wanted.iter().all(|t| self.tags.iter().any(|own| own == t))
    }
}

/// Trim, drop empties, sort and deduplicate.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.into().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Singleton node per agent role name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTypeNode {
    pub name: String,
    pub first_seen: DateTime<Utc>,
}

impl AgentTypeNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            first_seen: Utc::now(),
        }
    }
}

/// A deduplicated structural pattern, one per signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodePattern {
    /// SHA-256 hex of the normalized structure
    pub signature: String,
    /// Normalized form of the first example
    pub sample: String,
    pub first_seen: DateTime<Utc>,
}

/// One sighting of a pattern in a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternOccurrence {
    pub signature: String,
    pub project_id: String,
    pub record_id: String,
    pub observed_at: DateTime<Utc>,
}

impl PatternOccurrence {
    pub fn new(
        signature: impl Into<String>,
        project_id: impl Into<String>,
        record_id: impl Into<String>,
    ) -> Self {
        Self {
            signature: signature.into(),
            project_id: project_id.into(),
            record_id: record_id.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Relationship kinds in the memory graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// record -> agent type
    PerformedBy,
    /// record -> code pattern
    InstanceOf,
    /// code pattern -> project
    OccurredIn,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerformedBy => "performed_by",
            Self::InstanceOf => "instance_of",
            Self::OccurredIn => "occurred_in",
        }
    }
}

impl FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "performed_by" => Ok(Self::PerformedBy),
            "instance_of" => Ok(Self::InstanceOf),
            "occurred_in" => Ok(Self::OccurredIn),
            other => Err(format!("unknown edge kind: {other}")),
        }
    }
}

/// Directed, typed edge between two node ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEdge {
    pub from_id: String,
    pub to_id: String,
    pub kind: EdgeKind,
    pub created_at: DateTime<Utc>,
}

impl MemoryEdge {
    pub fn new(from_id: impl Into<String>, to_id: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            kind,
            created_at: Utc::now(),
        }
    }
}

/// Backend-side selection of active records.
///
/// Ranking happens above the storage layer; the backend only filters.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFilter {
    pub agent_type: String,
    pub category: Option<MemoryCategory>,
    /// A record must carry all of these
    pub tags: Vec<String>,
    pub min_quality: f64,
    /// Page size; rows come newest first, ties broken by id
    pub limit: usize,
    /// Rows to skip before the page starts
    pub offset: usize,
}

impl RecordFilter {
    pub fn for_agent(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            category: None,
            tags: Vec::new(),
            min_quality: 0.0,
            limit: 500,
            offset: 0,
        }
    }

    /// The same selection, moved to another page.
    pub fn page(&self, offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            ..self.clone()
        }
    }

    pub fn matches(&self, record: &MemoryRecord, now: DateTime<Utc>) -> bool {
        record.agent_type == self.agent_type
            && record.is_active_at(now)
            && self.category.map(|c| c == record.category).unwrap_or(true)
            && record.quality_score >= self.min_quality
            && record.has_all_tags(&self.tags)
    }
}

/// Result of an invalidation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationOutcome {
    Invalidated { at: DateTime<Utc> },
    AlreadyInvalid { at: DateTime<Utc> },
}

impl InvalidationOutcome {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Invalidated { at } | Self::AlreadyInvalid { at } => *at,
        }
    }
}

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_records: usize,
    pub active_records: usize,
    pub invalidated_records: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_agent_type: BTreeMap<String, usize>,
    pub agent_type_count: usize,
    pub pattern_count: usize,
    pub occurrence_count: usize,
    /// Mean quality of active records (0 when there are none)
    pub mean_active_quality: f64,
}

impl StoreStats {
    /// Fold record-level counts; node counts are filled in by the caller.
    pub fn from_records<'a, I>(records: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a MemoryRecord>,
    {
        let mut stats = StoreStats::default();
        let mut quality_sum = 0.0;

        for record in records {
            stats.total_records += 1;
            *stats
                .by_category
                .entry(record.category.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_agent_type
                .entry(record.agent_type.clone())
                .or_default() += 1;

            match record.validity_at(now) {
                Validity::Active => {
                    stats.active_records += 1;
                    quality_sum += record.quality_score;
                }
                Validity::Invalidated { .. } => stats.invalidated_records += 1,
                Validity::Pending { .. } => {}
            }
        }

        if stats.active_records > 0 {
            stats.mean_active_quality = quality_sum / stats.active_records as f64;
        }
        stats
    }
}
