//! SurrealDB-backed `MemoryBackend` implementation
//!
//! Uses the row types in [`crate::schema`] for persistence, converting to
//! and from model types at the boundary. Every statement binds owned
//! values; timestamps are bound as SurrealDB datetimes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use surrealdb::sql::Datetime as SurrealDatetime;
use tracing::{debug, instrument};

use crate::error::StorageError;
use crate::handle::SurrealGraph;
use crate::migrations::{
    AGENT_TYPES_TABLE, EDGES_TABLE, OCCURRENCES_TABLE, PATTERNS_TABLE, RECORDS_TABLE,
};
use crate::model::{
    AgentTypeNode, CodePattern, InvalidationOutcome, MemoryEdge, MemoryRecord,
    PatternOccurrence, RecordFilter, StoreStats,
};
use crate::schema::{AgentTypeRow, EdgeRow, OccurrenceRow, PatternRow, RecordRow};
use crate::storage_traits::{MemoryBackend, StorageResult};

/// Active at `$now`: window opened and not yet closed.
const ACTIVE_CLAUSE: &str =
    "valid_from <= $now AND (valid_until = NONE OR valid_until = NULL OR valid_until > $now)";

#[derive(Debug, Deserialize)]
struct CountRow {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct QualityRow {
    quality_score: f64,
}

#[derive(Debug, Deserialize)]
struct RecordIdRow {
    #[allow(dead_code)]
    record_id: String,
}

fn rows_to_records(rows: Vec<RecordRow>) -> StorageResult<Vec<MemoryRecord>> {
    rows.into_iter().map(MemoryRecord::try_from).collect()
}

fn first_count(rows: Vec<CountRow>) -> usize {
    rows.into_iter().next().map(|c| c.count).unwrap_or(0)
}

impl SurrealGraph {
    async fn fetch_record(&self, id: &str) -> StorageResult<Option<RecordRow>> {
        let id_owned = id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM memory_records WHERE record_id = $id")
            .bind(("id", id_owned))
            .await?;
        let rows: Vec<RecordRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl MemoryBackend for SurrealGraph {
    async fn ping(&self) -> StorageResult<()> {
        self.db.health().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn ensure_agent_type(&self, name: &str) -> StorageResult<AgentTypeNode> {
        if let Some(existing) = self.get_agent_type(name).await? {
            return Ok(existing);
        }

        let row = AgentTypeRow::from(&AgentTypeNode::new(name));
        let created: Result<Option<AgentTypeRow>, surrealdb::Error> =
            self.db.create(AGENT_TYPES_TABLE).content(row).await;

        match created.map_err(StorageError::from) {
            Ok(Some(row)) => {
                debug!("Created agent type node");
                Ok(row.into())
            }
            Ok(None) => Err(StorageError::Backend(format!(
                "create returned no row for agent type {name}"
            ))),
            // Lost a create race: the unique index kept the winner's node
            Err(StorageError::Conflict(_)) => self
                .get_agent_type(name)
                .await?
                .ok_or_else(|| StorageError::Conflict(format!("agent type {name} vanished"))),
            Err(e) => Err(e),
        }
    }

    async fn get_agent_type(&self, name: &str) -> StorageResult<Option<AgentTypeNode>> {
        let name_owned = name.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM agent_types WHERE name = $name")
            .bind(("name", name_owned))
            .await?;
        let rows: Vec<AgentTypeRow> = res.take(0)?;
        Ok(rows.into_iter().next().map(Into::into))
    }

    async fn list_agent_types(&self) -> StorageResult<Vec<AgentTypeNode>> {
        let mut res = self
            .db
            .query("SELECT * FROM agent_types ORDER BY name ASC")
            .await?;
        let rows: Vec<AgentTypeRow> = res.take(0)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, record), fields(record_id = %record.id, agent_type = %record.agent_type))]
    async fn insert_record(&self, record: &MemoryRecord) -> StorageResult<()> {
        let row = RecordRow::from(record);
        let _created: Option<RecordRow> = self.db.create(RECORDS_TABLE).content(row).await?;
        debug!("Memory record inserted");
        Ok(())
    }

    async fn get_record(&self, id: &str) -> StorageResult<Option<MemoryRecord>> {
        self.fetch_record(id)
            .await?
            .map(MemoryRecord::try_from)
            .transpose()
    }

    #[instrument(skip(self, filter), fields(agent_type = %filter.agent_type))]
    async fn query_active(
        &self,
        filter: &RecordFilter,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<MemoryRecord>> {
        let mut sql = format!(
            "SELECT * FROM memory_records WHERE agent_type = $agent_type AND quality_score >= $min_quality AND {}",
            ACTIVE_CLAUSE
        );
        if filter.category.is_some() {
            sql.push_str(" AND category = $category");
        }
        if !filter.tags.is_empty() {
            sql.push_str(" AND tags CONTAINSALL $tags");
        }
        sql.push_str(&format!(
            " ORDER BY created_at DESC, record_id ASC LIMIT {} START {}",
            filter.limit, filter.offset
        ));

        let mut query = self
            .db
            .query(sql)
            .bind(("agent_type", filter.agent_type.clone()))
            .bind(("min_quality", filter.min_quality))
            .bind(("now", SurrealDatetime::from(now)));
        if let Some(category) = filter.category {
            query = query.bind(("category", category.as_str().to_string()));
        }
        if !filter.tags.is_empty() {
            query = query.bind(("tags", filter.tags.clone()));
        }

        let mut res = query.await?;
        let rows: Vec<RecordRow> = res.take(0)?;
        debug!(candidates = rows.len(), "Active records fetched");
        rows_to_records(rows)
    }

    #[instrument(skip(self))]
    async fn invalidate_record(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<InvalidationOutcome> {
        let id_owned = id.to_string();
        let mut res = self
            .db
            .query(
                "UPDATE memory_records SET valid_until = $at \
                 WHERE record_id = $id AND (valid_until = NONE OR valid_until = NULL) \
                 RETURN AFTER",
            )
            .bind(("id", id_owned))
            .bind(("at", SurrealDatetime::from(at)))
            .await?;
        let updated: Vec<RecordRow> = res.take(0)?;
        if !updated.is_empty() {
            return Ok(InvalidationOutcome::Invalidated { at });
        }

        match self.fetch_record(id).await? {
            Some(row) => Ok(InvalidationOutcome::AlreadyInvalid {
                at: row.valid_until.unwrap_or(at),
            }),
            None => Err(StorageError::not_found(id)),
        }
    }

    #[instrument(skip(self))]
    async fn adjust_quality(&self, id: &str, delta: f64) -> StorageResult<f64> {
        let id_owned = id.to_string();
        let mut res = self
            .db
            .query(
                "UPDATE memory_records \
                 SET quality_score = math::min([1.0, math::max([0.0, quality_score + $delta])]) \
                 WHERE record_id = $id RETURN AFTER",
            )
            .bind(("id", id_owned))
            .bind(("delta", delta))
            .await?;
        let rows: Vec<QualityRow> = res.take(0)?;
        rows.into_iter()
            .next()
            .map(|r| r.quality_score)
            .ok_or_else(|| StorageError::not_found(id))
    }

    #[instrument(skip(self))]
    async fn scale_active_quality(&self, factor: f64, now: DateTime<Utc>) -> StorageResult<usize> {
        let sql = format!(
            "UPDATE memory_records \
             SET quality_score = math::min([1.0, math::max([0.0, quality_score * $factor])]) \
             WHERE {} RETURN AFTER",
            ACTIVE_CLAUSE
        );
        let mut res = self
            .db
            .query(sql)
            .bind(("factor", factor))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;
        let rows: Vec<RecordIdRow> = res.take(0)?;
        Ok(rows.len())
    }

    async fn insert_edge(&self, edge: &MemoryEdge) -> StorageResult<()> {
        let row = EdgeRow::from(edge);
        let _created: Option<EdgeRow> = self.db.create(EDGES_TABLE).content(row).await?;
        Ok(())
    }

    async fn edges_from(&self, from_id: &str) -> StorageResult<Vec<MemoryEdge>> {
        let from_owned = from_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM memory_edges WHERE from_id = $from ORDER BY created_at ASC")
            .bind(("from", from_owned))
            .await?;
        let rows: Vec<EdgeRow> = res.take(0)?;
        rows.into_iter().map(MemoryEdge::try_from).collect()
    }

    #[instrument(skip(self, pattern), fields(signature = %pattern.signature))]
    async fn create_pattern(&self, pattern: &CodePattern) -> StorageResult<CodePattern> {
        let row = PatternRow::from(pattern);
        let created: Option<PatternRow> = self.db.create(PATTERNS_TABLE).content(row).await?;
        created.map(Into::into).ok_or_else(|| {
            StorageError::Backend(format!("create returned no row for pattern {}", pattern.signature))
        })
    }

    async fn get_pattern(&self, signature: &str) -> StorageResult<Option<CodePattern>> {
        let sig_owned = signature.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM code_patterns WHERE signature = $sig")
            .bind(("sig", sig_owned))
            .await?;
        let rows: Vec<PatternRow> = res.take(0)?;
        Ok(rows.into_iter().next().map(Into::into))
    }

    async fn list_patterns(&self) -> StorageResult<Vec<CodePattern>> {
        let mut res = self
            .db
            .query("SELECT * FROM code_patterns ORDER BY first_seen ASC")
            .await?;
        let rows: Vec<PatternRow> = res.take(0)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn add_occurrence(&self, occurrence: &PatternOccurrence) -> StorageResult<()> {
        let row = OccurrenceRow::from(occurrence);
        let _created: Option<OccurrenceRow> =
            self.db.create(OCCURRENCES_TABLE).content(row).await?;
        Ok(())
    }

    async fn occurrences(&self, signature: &str) -> StorageResult<Vec<PatternOccurrence>> {
        let sig_owned = signature.to_string();
        let mut res = self
            .db
            .query(
                "SELECT * FROM pattern_occurrences WHERE signature = $sig ORDER BY observed_at ASC",
            )
            .bind(("sig", sig_owned))
            .await?;
        let rows: Vec<OccurrenceRow> = res.take(0)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn stats(&self, now: DateTime<Utc>) -> StorageResult<StoreStats> {
        let mut res = self
            .db
            .query("SELECT * FROM memory_records")
            .query("SELECT count() AS count FROM agent_types GROUP ALL")
            .query("SELECT count() AS count FROM code_patterns GROUP ALL")
            .query("SELECT count() AS count FROM pattern_occurrences GROUP ALL")
            .await?;

        let rows: Vec<RecordRow> = res.take(0)?;
        let agent_types: Vec<CountRow> = res.take(1)?;
        let patterns: Vec<CountRow> = res.take(2)?;
        let occurrences: Vec<CountRow> = res.take(3)?;

        let records = rows_to_records(rows)?;
        let mut stats = StoreStats::from_records(records.iter(), now);
        stats.agent_type_count = first_count(agent_types);
        stats.pattern_count = first_count(patterns);
        stats.occurrence_count = first_count(occurrences);
        Ok(stats)
    }
}
