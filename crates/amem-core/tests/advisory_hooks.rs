//! Degraded-mode access and agent-turn hooks.

use std::sync::Arc;

use amem_core::{
    ConnectorConfig, EngineConfig, HookConfig, MemoryCategory, MemoryEngine, MemoryError,
    MemorySummary, NewMemory, RecallQuery, TurnOutcome,
};
use graph_state::fakes::InMemoryGraph;

fn engine() -> (Arc<InMemoryGraph>, MemoryEngine) {
    let graph = Arc::new(InMemoryGraph::new());
    let config = EngineConfig {
        connector: ConnectorConfig {
            failure_threshold: 2,
            max_retries: 0,
            ..ConnectorConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = MemoryEngine::with_backend(graph.clone(), config).unwrap();
    (graph, engine)
}

#[tokio::test(start_paused = true)]
async fn unavailable_backend_degrades_to_no_memory() {
    let (graph, engine) = engine();
    let memory = engine.advisory();
    graph.set_available(false);

    let recalled = memory.recall(RecallQuery::new("architect")).await.unwrap();
    assert!(recalled.is_empty());

    let id = memory
        .remember(NewMemory::new("architect", "x", MemoryCategory::Semantic, 0.5))
        .await
        .unwrap();
    assert!(id.is_none());

    // Circuit is open now; still no error
    assert!(memory.invalidate("some-id").await.unwrap().is_none());
    assert_eq!(
        memory.get_memory_summary().await.unwrap(),
        MemorySummary::default()
    );
}

#[tokio::test]
async fn validation_errors_still_surface() {
    let (graph, engine) = engine();
    let memory = engine.advisory();
    graph.set_available(false);

    let err = memory
        .recall(RecallQuery::new("architect").with_limit(0))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Validation(_)));

    let err = memory
        .remember(NewMemory::new("architect", "", MemoryCategory::Semantic, 0.5))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Validation(_)));
}

#[tokio::test]
async fn not_found_still_surfaces() {
    let (_graph, engine) = engine();
    let err = engine.advisory().invalidate("missing").await.unwrap_err();
    assert!(matches!(err, MemoryError::NotFound { .. }));
}

#[tokio::test]
async fn run_turn_remembers_outcome_for_next_turn() {
    let (_graph, engine) = engine();
    let hooks = engine.hooks(HookConfig {
        project_id: Some("amem".to_string()),
        ..HookConfig::default()
    });

    let first: u32 = hooks
        .run_turn("implementer", "fix the flaky test", |context| async move {
            assert!(context.is_empty());
            (
                1,
                TurnOutcome::success("Pinned the tokio version to fix the flaky test")
                    .with_tags(["ci"]),
            )
        })
        .await;
    assert_eq!(first, 1);

    let context = hooks.before_turn("implementer", "flaky test again").await;
    assert_eq!(context.memories.len(), 1);
    let record = &context.memories[0].record;
    assert_eq!(record.category, MemoryCategory::Episodic);
    assert_eq!(record.project_id, "amem");
    assert_eq!(record.tags, vec!["ci".to_string()]);
    assert!(context.rendered.contains("Turn succeeded: Pinned the tokio version"));
}

#[tokio::test]
async fn after_turn_stores_observed_pattern() {
    let (_graph, engine) = engine();
    let hooks = engine.hooks(HookConfig::default());

    let outcome = TurnOutcome::failure("Missing error context")
        .with_pattern("fs::read(path).context(\"read config\")?")
        .with_session("s-9");
    let ids = hooks.after_turn("reviewer", &outcome).await;
    assert_eq!(ids.len(), 2);

    assert_eq!(engine.patterns().list_patterns().await.unwrap().len(), 1);
    let episode = engine.store().get(&ids[0]).await.unwrap().unwrap();
    assert_eq!(episode.confidence, HookConfig::default().failure_confidence);
    assert_eq!(episode.source_session_id.as_deref(), Some("s-9"));
}

#[tokio::test(start_paused = true)]
async fn turn_runs_when_memory_is_down() {
    let (graph, engine) = engine();
    let hooks = engine.hooks(HookConfig::default());
    graph.set_available(false);

    let result = hooks
        .run_turn("implementer", "anything", |context| async move {
            assert!(context.is_empty());
            ("done", TurnOutcome::success("worked without memory"))
        })
        .await;

    assert_eq!(result, "done");
    assert_eq!(graph.record_count(), 0);
}
