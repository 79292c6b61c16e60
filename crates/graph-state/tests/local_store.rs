//! Embedded on-disk store.

use chrono::Utc;
use graph_state::{MemoryBackend, MemoryCategory, MemoryRecord, RecordFilter, SurrealGraph};
use tempfile::tempdir;

#[tokio::test]
async fn local_store_creates_directory_and_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    let graph = SurrealGraph::open_local(&path).await.unwrap();
    assert!(path.exists());
    graph.ping().await.unwrap();

    let record = MemoryRecord::new("architect", "Persist me", MemoryCategory::Procedural, 0.7);
    graph.insert_record(&record).await.unwrap();

    let active = graph
        .query_active(&RecordFilter::for_agent("architect"), Utc::now())
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, record.id);
}
