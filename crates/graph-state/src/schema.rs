//! Row definitions for AMEM SurrealDB tables
//!
//! Tables:
//! - memory_records: Memory record nodes
//! - agent_types: One row per agent role
//! - code_patterns: One row per pattern signature
//! - pattern_occurrences: Pattern sightings per project
//! - memory_edges: Typed relationships between nodes
//!
//! Rows mirror the model types but store timestamps as SurrealDB datetimes
//! so range comparisons happen natively in the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::model::{
    AgentTypeNode, CodePattern, EdgeKind, MemoryCategory, MemoryEdge, MemoryRecord,
    PatternOccurrence,
};

/// Module for serializing chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
pub(crate) mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

/// Memory record row stored in SurrealDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRow {
    pub record_id: String,
    pub content: String,
    pub category: String,
    pub agent_type: String,
    pub project_id: String,
    pub confidence: f64,
    pub quality_score: f64,
    pub tags: Vec<String>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub valid_from: DateTime<Utc>,
    #[serde(with = "surreal_datetime_opt", default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_session_id: Option<String>,
    #[serde(default)]
    pub external_refs: Vec<String>,
}

impl From<&MemoryRecord> for RecordRow {
    fn from(r: &MemoryRecord) -> Self {
        RecordRow {
            record_id: r.id.clone(),
            content: r.content.clone(),
            category: r.category.as_str().to_string(),
            agent_type: r.agent_type.clone(),
            project_id: r.project_id.clone(),
            confidence: r.confidence,
            quality_score: r.quality_score,
            tags: r.tags.clone(),
            created_at: r.created_at,
            valid_from: r.valid_from,
            valid_until: r.valid_until,
            source_session_id: r.source_session_id.clone(),
            external_refs: r.external_refs.clone(),
        }
    }
}

impl TryFrom<RecordRow> for MemoryRecord {
    type Error = StorageError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let category: MemoryCategory = row
            .category
            .parse()
            .map_err(StorageError::Serialization)?;
        Ok(MemoryRecord {
            id: row.record_id,
            content: row.content,
            category,
            agent_type: row.agent_type,
            project_id: row.project_id,
            confidence: row.confidence,
            quality_score: row.quality_score,
            tags: row.tags,
            created_at: row.created_at,
            valid_from: row.valid_from,
            valid_until: row.valid_until,
            source_session_id: row.source_session_id,
            external_refs: row.external_refs,
        })
    }
}

/// Agent type row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTypeRow {
    pub name: String,
    #[serde(with = "surreal_datetime")]
    pub first_seen: DateTime<Utc>,
}

impl From<&AgentTypeNode> for AgentTypeRow {
    fn from(n: &AgentTypeNode) -> Self {
        AgentTypeRow {
            name: n.name.clone(),
            first_seen: n.first_seen,
        }
    }
}

impl From<AgentTypeRow> for AgentTypeNode {
    fn from(row: AgentTypeRow) -> Self {
        AgentTypeNode {
            name: row.name,
            first_seen: row.first_seen,
        }
    }
}

/// Code pattern row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRow {
    pub signature: String,
    pub sample: String,
    #[serde(with = "surreal_datetime")]
    pub first_seen: DateTime<Utc>,
}

impl From<&CodePattern> for PatternRow {
    fn from(p: &CodePattern) -> Self {
        PatternRow {
            signature: p.signature.clone(),
            sample: p.sample.clone(),
            first_seen: p.first_seen,
        }
    }
}

impl From<PatternRow> for CodePattern {
    fn from(row: PatternRow) -> Self {
        CodePattern {
            signature: row.signature,
            sample: row.sample,
            first_seen: row.first_seen,
        }
    }
}

/// Pattern occurrence row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccurrenceRow {
    pub signature: String,
    pub project_id: String,
    pub record_id: String,
    #[serde(with = "surreal_datetime")]
    pub observed_at: DateTime<Utc>,
}

impl From<&PatternOccurrence> for OccurrenceRow {
    fn from(o: &PatternOccurrence) -> Self {
        OccurrenceRow {
            signature: o.signature.clone(),
            project_id: o.project_id.clone(),
            record_id: o.record_id.clone(),
            observed_at: o.observed_at,
        }
    }
}

impl From<OccurrenceRow> for PatternOccurrence {
    fn from(row: OccurrenceRow) -> Self {
        PatternOccurrence {
            signature: row.signature,
            project_id: row.project_id,
            record_id: row.record_id,
            observed_at: row.observed_at,
        }
    }
}

/// Graph edge row (for node relationships)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRow {
    pub from_id: String,
    pub to_id: String,
    pub edge_type: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl From<&MemoryEdge> for EdgeRow {
    fn from(e: &MemoryEdge) -> Self {
        EdgeRow {
            from_id: e.from_id.clone(),
            to_id: e.to_id.clone(),
            edge_type: e.kind.as_str().to_string(),
            created_at: e.created_at,
        }
    }
}

impl TryFrom<EdgeRow> for MemoryEdge {
    type Error = StorageError;

    fn try_from(row: EdgeRow) -> Result<Self, Self::Error> {
        let kind: EdgeKind = row
            .edge_type
            .parse()
            .map_err(StorageError::Serialization)?;
        Ok(MemoryEdge {
            from_id: row.from_id,
            to_id: row.to_id,
            kind,
            created_at: row.created_at,
        })
    }
}
