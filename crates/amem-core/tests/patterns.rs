//! Cross-project pattern deduplication.

use std::sync::Arc;

use amem_core::{
    signature_of, EdgeKind, EngineConfig, MemoryCategory, MemoryEngine, MemoryError, NewMemory,
};
use graph_state::fakes::InMemoryGraph;

async fn engines() -> Vec<(&'static str, MemoryEngine)> {
    vec![
        (
            "fake",
            MemoryEngine::with_backend(Arc::new(InMemoryGraph::new()), EngineConfig::default())
                .unwrap(),
        ),
        (
            "surreal",
            MemoryEngine::in_memory(EngineConfig::default()).await.unwrap(),
        ),
    ]
}

const RETRY_A: &str = "\
let mut attempt = 0; // counter
loop {
    attempt += 1;
}";

const RETRY_B: &str = "\
LOOP {
  # bumped each pass
  ATTEMPT+=1;
}
let mut attempt=0;";

#[tokio::test]
async fn identically_normalizing_patterns_share_one_node() {
    for (name, engine) in engines().await {
        let store = engine.store();
        let first = store
            .remember(
                NewMemory::new("implementer", RETRY_A, MemoryCategory::Pattern, 0.8)
                    .with_project("alpha"),
            )
            .await
            .unwrap();
        let second = store
            .remember(
                NewMemory::new("implementer", RETRY_B, MemoryCategory::Pattern, 0.7)
                    .with_project("beta"),
            )
            .await
            .unwrap();

        let patterns = engine.patterns().list_patterns().await.unwrap();
        assert_eq!(patterns.len(), 1, "{name}");

        let sig = signature_of(RETRY_A);
        assert_eq!(patterns[0].signature, sig.hash, "{name}");
        assert_eq!(patterns[0].sample, sig.normalized, "{name}");

        for id in [&first, &second] {
            let edges = store.edges_from(id).await.unwrap();
            assert!(
                edges
                    .iter()
                    .any(|e| e.kind == EdgeKind::InstanceOf && e.to_id == sig.hash),
                "{name}"
            );
        }

        let occurrences = engine.patterns().find_cross_project(&sig.hash).await.unwrap();
        assert_eq!(occurrences.len(), 2, "{name}");
        assert_eq!(occurrences[0].record_id, first, "{name}");
        assert!(occurrences[0].observed_at <= occurrences[1].observed_at);

        let projects = engine.patterns().projects_for(&sig.hash).await.unwrap();
        assert_eq!(projects, vec!["alpha".to_string(), "beta".to_string()], "{name}");

        let project_edges = store.edges_from(&sig.hash).await.unwrap();
        assert_eq!(
            project_edges
                .iter()
                .filter(|e| e.kind == EdgeKind::OccurredIn)
                .count(),
            2,
            "{name}"
        );
    }
}

#[tokio::test]
async fn different_structures_get_different_nodes() {
    for (name, engine) in engines().await {
        let store = engine.store();
        for structure in ["a = b + c", "a = b - c"] {
            store
                .remember(NewMemory::new("implementer", structure, MemoryCategory::Pattern, 0.5))
                .await
                .unwrap();
        }
        assert_eq!(engine.patterns().list_patterns().await.unwrap().len(), 2, "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_upserts_yield_one_node_with_all_occurrences() {
    for (name, engine) in engines().await {
        let sig = signature_of("match result { Ok(v) => v, Err(e) => return Err(e.into()) }");

        let mut handles = Vec::new();
        for i in 0..10 {
            let patterns = engine.patterns().clone();
            let sig = sig.clone();
            handles.push(tokio::spawn(async move {
                patterns
                    .upsert_pattern(&sig, &format!("project-{i}"), &format!("record-{i}"))
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), sig.hash, "{name}");
        }

        let patterns = engine.patterns().list_patterns().await.unwrap();
        assert_eq!(patterns.len(), 1, "{name}");
        let occurrences = engine.patterns().find_cross_project(&sig.hash).await.unwrap();
        assert_eq!(occurrences.len(), 10, "{name}");
        assert_eq!(engine.patterns().projects_for(&sig.hash).await.unwrap().len(), 10);
    }
}

#[tokio::test]
async fn malformed_signature_is_rejected() {
    for (name, engine) in engines().await {
        let err = engine.patterns().get_pattern("not-a-hash").await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)), "{name}");

        let missing = engine
            .patterns()
            .get_pattern(&signature_of("never stored").hash)
            .await
            .unwrap();
        assert!(missing.is_none(), "{name}");
    }
}

#[tokio::test]
async fn sample_is_truncated() {
    let mut config = EngineConfig::default();
    config.limits.pattern_sample_len = 16;
    let engine =
        MemoryEngine::with_backend(Arc::new(InMemoryGraph::new()), config).unwrap();

    let structure = "fn a_very_long_function_name_indeed() {}";
    engine
        .store()
        .remember(NewMemory::new("implementer", structure, MemoryCategory::Pattern, 0.5))
        .await
        .unwrap();

    let pattern = engine
        .patterns()
        .get_pattern(&signature_of(structure).hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pattern.sample.chars().count(), 16);
}
