//! SurrealDB schema initialization
//!
//! Defines every AMEM table with its indexes. Tables are SCHEMALESS; the
//! row structs in [`crate::schema`] are the source of truth for field
//! shapes. Uniqueness of singleton nodes is carried by UNIQUE indexes so
//! that concurrent creators cannot both succeed.
//!
//! Safe to call multiple times (idempotent).

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

pub const RECORDS_TABLE: &str = "memory_records";
pub const AGENT_TYPES_TABLE: &str = "agent_types";
pub const PATTERNS_TABLE: &str = "code_patterns";
pub const OCCURRENCES_TABLE: &str = "pattern_occurrences";
pub const EDGES_TABLE: &str = "memory_edges";

/// Initialize all AMEM tables.
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing AMEM SurrealDB schema");

    init_records_table(db).await?;
    init_agent_types_table(db).await?;
    init_patterns_table(db).await?;
    init_occurrences_table(db).await?;
    init_edges_table(db).await?;

    info!("AMEM schema initialization complete");
    Ok(())
}

/// `memory_records`
///
/// ```text
/// TABLE memory_records {
///   record_id:          STRING (unique)
///   content:            STRING
///   category:           STRING (episodic | semantic | procedural | pattern)
///   agent_type:         STRING (indexed)
///   project_id:         STRING (indexed)
///   confidence:         FLOAT
///   quality_score:      FLOAT [0, 1]
///   tags:               ARRAY<STRING>
///   created_at:         DATETIME (indexed)
///   valid_from:         DATETIME
///   valid_until:        DATETIME?
///   source_session_id:  STRING?
///   external_refs:      ARRAY<STRING>
/// }
/// ```
///
/// Records are never deleted; the table denies DELETE.
async fn init_records_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing memory_records table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS memory_records
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_record_id ON TABLE memory_records COLUMNS record_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_record_agent ON TABLE memory_records COLUMNS agent_type;
        DEFINE INDEX IF NOT EXISTS idx_record_project ON TABLE memory_records COLUMNS project_id;
        DEFINE INDEX IF NOT EXISTS idx_record_agent_created ON TABLE memory_records COLUMNS agent_type, created_at;
    "#;

    run(db, sql).await
}

/// `agent_types`: one row per name, enforced by a unique index.
async fn init_agent_types_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing agent_types table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS agent_types SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_agent_type_name ON TABLE agent_types COLUMNS name UNIQUE;
    "#;

    run(db, sql).await
}

/// `code_patterns`: one row per signature, enforced by a unique index.
async fn init_patterns_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing code_patterns table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS code_patterns SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_pattern_signature ON TABLE code_patterns COLUMNS signature UNIQUE;
    "#;

    run(db, sql).await
}

async fn init_occurrences_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing pattern_occurrences table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS pattern_occurrences SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_occurrence_signature ON TABLE pattern_occurrences COLUMNS signature;
        DEFINE INDEX IF NOT EXISTS idx_occurrence_project ON TABLE pattern_occurrences COLUMNS signature, project_id;
    "#;

    run(db, sql).await
}

async fn init_edges_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing memory_edges table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS memory_edges SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_edge_from ON TABLE memory_edges COLUMNS from_id;
        DEFINE INDEX IF NOT EXISTS idx_edge_to ON TABLE memory_edges COLUMNS to_id;
    "#;

    run(db, sql).await
}

async fn run(db: &Surreal<Any>, sql: &str) -> StorageResult<()> {
    let response = db
        .query(sql)
        .await
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;
    response
        .check()
        .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;
    Ok(())
}
