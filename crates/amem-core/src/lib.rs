//! AMEM Core: experiential memory for autonomous coding agents
//!
//! Agents `remember` decisions, procedures, episodes and code patterns and
//! `recall` them later, ranked by relevance, confidence and recency.
//!
//! ## Layer 1 - Memory Engine
//!
//! - `connector`: circuit breaker, per-attempt timeout and retry around
//!   every backend call
//! - `store`: validation, temporal validity, quality scores and ranking
//! - `patterns`: cross-project deduplication by normalized content hash
//! - `monitor`, `metrics`, `obs`: health reporting, counters and
//!   structured events
//! - `advisory`, `hooks`: degraded-mode access and agent-turn integration
//!
//! Storage lives in `graph-state`; the backend container's lifecycle in
//! `container-manager`.

pub mod advisory;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod monitor;
pub mod obs;
pub mod patterns;
pub mod store;
pub mod telemetry;

pub use advisory::AdvisoryMemory;
pub use config::{ConnectorConfig, EngineConfig, LimitsConfig, MonitorConfig, RecallConfig};
pub use connector::{BreakerSnapshot, CircuitBreaker, CircuitState, ResilientConnector};
pub use engine::MemoryEngine;
pub use error::{MemoryError, MemoryResult};
pub use hooks::{render_context, HookConfig, MemoryHooks, TurnContext, TurnOutcome};
pub use metrics::{Metrics, METRICS};
pub use monitor::{HealthReport, HealthStatus, Monitor, OperationKind, OperationStats};
pub use obs::{
    emit_call_rejected, emit_circuit_transition, emit_decay_sweep, emit_memory_degraded,
    emit_memory_invalidated, emit_memory_recalled, emit_memory_remembered,
    emit_pattern_upserted, emit_quality_updated, turn_span,
};
pub use patterns::{signature_of, PatternEngine, PatternSignature};
pub use store::{
    AgentTypeSummary, MemoryStore, MemorySummary, NewMemory, RecallQuery, Ranker, ScoredMemory,
    Similarity, TokenOverlap, TypeWeights,
};
pub use telemetry::init_tracing;

// Re-exported so agents need only this crate
pub use graph_state::{
    CodePattern, EdgeKind, InvalidationOutcome, MemoryCategory, MemoryEdge, MemoryRecord,
    PatternOccurrence, Validity,
};
