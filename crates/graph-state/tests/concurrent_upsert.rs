//! Unique-index behaviour under concurrent creators.

use std::sync::Arc;

use chrono::Utc;
use graph_state::{CodePattern, MemoryBackend, StorageError, SurrealGraph};

#[tokio::test]
async fn concurrent_pattern_creates_leave_one_node() {
    let graph = Arc::new(SurrealGraph::in_memory().await.unwrap());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let graph = Arc::clone(&graph);
        handles.push(tokio::spawn(async move {
            graph
                .create_pattern(&CodePattern {
                    signature: "shared-signature".to_string(),
                    sample: "sample".to_string(),
                    first_seen: Utc::now(),
                })
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(StorageError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(graph.list_patterns().await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_agent_type_ensures_leave_one_node() {
    let graph = Arc::new(SurrealGraph::in_memory().await.unwrap());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let graph = Arc::clone(&graph);
        handles.push(tokio::spawn(async move {
            graph.ensure_agent_type("architect").await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(graph.list_agent_types().await.unwrap().len(), 1);
}
