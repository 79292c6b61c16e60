//! Observability smoke tests: structured events and metrics flush.

use std::time::Duration;

use amem_core::{
    emit_call_rejected, emit_circuit_transition, emit_decay_sweep, emit_memory_degraded,
    emit_memory_invalidated, emit_memory_recalled, emit_memory_remembered,
    emit_pattern_upserted, emit_quality_updated, turn_span, CircuitState,
    EngineConfig, MemoryCategory, MemoryEngine, NewMemory, OperationKind, RecallQuery, METRICS,
};
use tracing::Instrument;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_store_events_emit() {
    emit_memory_remembered("r-1", "architect", "semantic");
    emit_memory_recalled("architect", 12, 5, 3);
    emit_memory_invalidated("r-1", false);
    emit_quality_updated("r-1", 0.1, 0.9);
    emit_decay_sweep(0.95, 40);
    emit_pattern_upserted(&"a".repeat(64), "alpha", true);
}

#[traced_test]
#[test]
fn test_circuit_events_emit() {
    emit_circuit_transition(CircuitState::Closed, CircuitState::Open);
    emit_circuit_transition(CircuitState::Open, CircuitState::HalfOpen);
    emit_call_rejected(OperationKind::QueryRecords, Duration::from_secs(12));
}

#[traced_test]
#[test]
fn test_degraded_event_emits_warning() {
    let error = "backend unreachable";
    emit_memory_degraded("recall", &error);
}

#[traced_test]
#[tokio::test]
async fn test_turn_span_wraps_store_calls() {
    let engine = MemoryEngine::in_memory(EngineConfig::default()).await.unwrap();
    let store = engine.store().clone();

    async move {
        store
            .remember(NewMemory::new("architect", "Spans nest", MemoryCategory::Semantic, 0.5))
            .await
            .unwrap();
        store.recall(RecallQuery::new("architect")).await.unwrap();
    }
    .instrument(turn_span("architect", Some("session-1")))
    .await;
}

#[traced_test]
#[tokio::test]
async fn test_metrics_advance_and_flush() {
    let engine = MemoryEngine::in_memory(EngineConfig::default()).await.unwrap();
    let before = METRICS.memories_remembered();

    engine
        .store()
        .remember(NewMemory::new("tester", "Counted", MemoryCategory::Episodic, 0.5))
        .await
        .unwrap();

    assert!(METRICS.memories_remembered() > before);
    assert!(METRICS.backend_calls() > 0);
    METRICS.flush();
}
