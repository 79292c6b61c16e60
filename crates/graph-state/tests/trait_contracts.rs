//! Contract tests for `MemoryBackend`.
//!
//! Every check runs against both the in-memory fake and SurrealDB's
//! embedded `mem://` engine. Any conforming implementation must pass these.

use chrono::{Duration, Utc};
use graph_state::fakes::InMemoryGraph;
use graph_state::{
    CodePattern, EdgeKind, InvalidationOutcome, MemoryBackend, MemoryCategory, MemoryEdge,
    MemoryRecord, PatternOccurrence, RecordFilter, StorageError, SurrealGraph,
};

async fn backends() -> Vec<(&'static str, Box<dyn MemoryBackend>)> {
    vec![
        ("fake", Box::new(InMemoryGraph::new())),
        ("surreal", Box::new(SurrealGraph::in_memory().await.unwrap())),
    ]
}

fn pattern(signature: &str) -> CodePattern {
    CodePattern {
        signature: signature.to_string(),
        sample: "fn ( ) { }".to_string(),
        first_seen: Utc::now(),
    }
}

// ===========================================================================
// Records
// ===========================================================================

#[tokio::test]
async fn inserted_record_is_readable() {
    for (name, backend) in backends().await {
        let record = MemoryRecord::new("architect", "Use token-based auth", MemoryCategory::Semantic, 0.9)
            .with_tags(vec!["auth"]);
        backend.insert_record(&record).await.unwrap();

        let fetched = backend.get_record(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, record.id, "{name}");
        assert_eq!(fetched.content, "Use token-based auth", "{name}");
        assert_eq!(fetched.category, MemoryCategory::Semantic, "{name}");
        assert_eq!(fetched.tags, vec!["auth".to_string()], "{name}");
        assert!(fetched.valid_until.is_none(), "{name}");
    }
}

#[tokio::test]
async fn missing_record_is_none() {
    for (name, backend) in backends().await {
        assert!(backend.get_record("no-such-id").await.unwrap().is_none(), "{name}");
    }
}

#[tokio::test]
async fn query_active_filters_and_orders_newest_first() {
    for (name, backend) in backends().await {
        let base = Utc::now() - Duration::hours(3);
        let old = MemoryRecord::new("architect", "old", MemoryCategory::Semantic, 0.8)
            .with_tags(vec!["db", "auth"])
            .with_created_at(base);
        let new = MemoryRecord::new("architect", "new", MemoryCategory::Semantic, 0.8)
            .with_tags(vec!["db"])
            .with_created_at(base + Duration::hours(1));
        let low = MemoryRecord::new("architect", "low", MemoryCategory::Semantic, 0.1)
            .with_created_at(base + Duration::hours(2));
        let other = MemoryRecord::new("builder", "other", MemoryCategory::Semantic, 0.8);
        for r in [&old, &new, &low, &other] {
            backend.insert_record(r).await.unwrap();
        }

        let now = Utc::now();
        let mut filter = RecordFilter::for_agent("architect");
        filter.min_quality = 0.5;
        let ids: Vec<String> = backend
            .query_active(&filter, now)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.content)
            .collect();
        assert_eq!(ids, vec!["new".to_string(), "old".to_string()], "{name}");

        filter.tags = vec!["auth".to_string(), "db".to_string()];
        let tagged = backend.query_active(&filter, now).await.unwrap();
        assert_eq!(tagged.len(), 1, "{name}");
        assert_eq!(tagged[0].content, "old", "{name}");

        let mut by_category = RecordFilter::for_agent("architect");
        by_category.category = Some(MemoryCategory::Episodic);
        assert!(backend.query_active(&by_category, now).await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn query_active_pages_cover_every_record_once() {
    for (name, backend) in backends().await {
        let base = Utc::now() - Duration::hours(1);
        let mut expected = Vec::new();
        for i in 0..7 {
            // Pairs share a timestamp so the id tie-break matters
            let record = MemoryRecord::new("architect", format!("note {i}"), MemoryCategory::Semantic, 0.5)
                .with_created_at(base + Duration::minutes(i / 2));
            backend.insert_record(&record).await.unwrap();
            expected.push(record.id);
        }

        let now = Utc::now();
        let filter = RecordFilter::for_agent("architect");
        let mut seen = Vec::new();
        let mut offset = 0;
        loop {
            let page = backend.query_active(&filter.page(offset, 3), now).await.unwrap();
            let len = page.len();
            seen.extend(page.into_iter().map(|r| r.id));
            if len < 3 {
                break;
            }
            offset += len;
        }

        assert_eq!(seen.len(), 7, "{name}");
        seen.sort();
        expected.sort();
        assert_eq!(seen, expected, "{name}");
    }
}

#[tokio::test]
async fn invalidation_is_idempotent_and_hides_record() {
    for (name, backend) in backends().await {
        let record = MemoryRecord::new("architect", "stale", MemoryCategory::Procedural, 0.7);
        backend.insert_record(&record).await.unwrap();

        let at = Utc::now();
        let first = backend.invalidate_record(&record.id, at).await.unwrap();
        assert!(matches!(first, InvalidationOutcome::Invalidated { .. }), "{name}");

        let second = backend
            .invalidate_record(&record.id, at + Duration::seconds(5))
            .await
            .unwrap();
        assert!(matches!(second, InvalidationOutcome::AlreadyInvalid { .. }), "{name}");

        let later = at + Duration::seconds(1);
        let active = backend
            .query_active(&RecordFilter::for_agent("architect"), later)
            .await
            .unwrap();
        assert!(active.is_empty(), "{name}");

        let still_there = backend.get_record(&record.id).await.unwrap().unwrap();
        assert!(still_there.valid_until.is_some(), "{name}");
    }
}

#[tokio::test]
async fn invalidate_unknown_is_not_found() {
    for (name, backend) in backends().await {
        let err = backend.invalidate_record("ghost", Utc::now()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }), "{name}");
    }
}

#[tokio::test]
async fn quality_adjustment_is_clamped() {
    for (name, backend) in backends().await {
        let record = MemoryRecord::new("architect", "q", MemoryCategory::Semantic, 0.9);
        backend.insert_record(&record).await.unwrap();

        let up = backend.adjust_quality(&record.id, 0.5).await.unwrap();
        assert!((up - 1.0).abs() < 1e-9, "{name}");

        let down = backend.adjust_quality(&record.id, -3.0).await.unwrap();
        assert!(down.abs() < 1e-9, "{name}");

        let err = backend.adjust_quality("ghost", 0.1).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }), "{name}");
    }
}

#[tokio::test]
async fn scale_touches_only_active_records() {
    for (name, backend) in backends().await {
        let keep = MemoryRecord::new("architect", "keep", MemoryCategory::Semantic, 0.8);
        let gone = MemoryRecord::new("architect", "gone", MemoryCategory::Semantic, 0.8);
        backend.insert_record(&keep).await.unwrap();
        backend.insert_record(&gone).await.unwrap();
        backend
            .invalidate_record(&gone.id, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();

        let touched = backend.scale_active_quality(0.5, Utc::now()).await.unwrap();
        assert_eq!(touched, 1, "{name}");

        let kept = backend.get_record(&keep.id).await.unwrap().unwrap();
        assert!((kept.quality_score - 0.4).abs() < 1e-9, "{name}");
        let frozen = backend.get_record(&gone.id).await.unwrap().unwrap();
        assert!((frozen.quality_score - 0.8).abs() < 1e-9, "{name}");
    }
}

// ===========================================================================
// Agent types and edges
// ===========================================================================

#[tokio::test]
async fn ensure_agent_type_is_singleton() {
    for (name, backend) in backends().await {
        let first = backend.ensure_agent_type("architect").await.unwrap();
        let second = backend.ensure_agent_type("architect").await.unwrap();
        backend.ensure_agent_type("builder").await.unwrap();

        assert_eq!(first, second, "{name}");
        let names: Vec<String> = backend
            .list_agent_types()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["architect".to_string(), "builder".to_string()], "{name}");
    }
}

#[tokio::test]
async fn edges_are_listed_by_source() {
    for (name, backend) in backends().await {
        backend
            .insert_edge(&MemoryEdge::new("rec-1", "architect", EdgeKind::PerformedBy))
            .await
            .unwrap();
        backend
            .insert_edge(&MemoryEdge::new("rec-1", "sig-1", EdgeKind::InstanceOf))
            .await
            .unwrap();
        backend
            .insert_edge(&MemoryEdge::new("rec-2", "architect", EdgeKind::PerformedBy))
            .await
            .unwrap();

        let edges = backend.edges_from("rec-1").await.unwrap();
        assert_eq!(edges.len(), 2, "{name}");
        assert!(edges.iter().any(|e| e.kind == EdgeKind::InstanceOf), "{name}");
    }
}

// ===========================================================================
// Patterns
// ===========================================================================

#[tokio::test]
async fn duplicate_pattern_create_conflicts() {
    for (name, backend) in backends().await {
        backend.create_pattern(&pattern("abc123")).await.unwrap();
        let err = backend.create_pattern(&pattern("abc123")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)), "{name}: {err}");
        assert_eq!(backend.list_patterns().await.unwrap().len(), 1, "{name}");
    }
}

#[tokio::test]
async fn occurrences_are_ordered_oldest_first() {
    for (name, backend) in backends().await {
        backend.create_pattern(&pattern("sig")).await.unwrap();
        let now = Utc::now();
        let mut late = PatternOccurrence::new("sig", "proj-b", "rec-2");
        late.observed_at = now;
        let mut early = PatternOccurrence::new("sig", "proj-a", "rec-1");
        early.observed_at = now - Duration::minutes(10);
        backend.add_occurrence(&late).await.unwrap();
        backend.add_occurrence(&early).await.unwrap();

        let projects: Vec<String> = backend
            .occurrences("sig")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.project_id)
            .collect();
        assert_eq!(projects, vec!["proj-a".to_string(), "proj-b".to_string()], "{name}");
        assert!(backend.occurrences("other").await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn stats_count_every_node_kind() {
    for (name, backend) in backends().await {
        backend.ensure_agent_type("architect").await.unwrap();
        let a = MemoryRecord::new("architect", "a", MemoryCategory::Semantic, 0.6);
        let b = MemoryRecord::new("architect", "b", MemoryCategory::Pattern, 0.8);
        backend.insert_record(&a).await.unwrap();
        backend.insert_record(&b).await.unwrap();
        backend
            .invalidate_record(&a.id, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        backend.create_pattern(&pattern("s1")).await.unwrap();
        backend
            .add_occurrence(&PatternOccurrence::new("s1", "p", &b.id))
            .await
            .unwrap();

        let stats = backend.stats(Utc::now()).await.unwrap();
        assert_eq!(stats.total_records, 2, "{name}");
        assert_eq!(stats.active_records, 1, "{name}");
        assert_eq!(stats.invalidated_records, 1, "{name}");
        assert_eq!(stats.agent_type_count, 1, "{name}");
        assert_eq!(stats.pattern_count, 1, "{name}");
        assert_eq!(stats.occurrence_count, 1, "{name}");
        assert!((stats.mean_active_quality - 0.8).abs() < 1e-9, "{name}");
    }
}

#[tokio::test]
async fn empty_store_stats_are_zero() {
    for (name, backend) in backends().await {
        let stats = backend.stats(Utc::now()).await.unwrap();
        assert_eq!(stats.total_records, 0, "{name}");
        assert_eq!(stats.pattern_count, 0, "{name}");
        assert_eq!(stats.mean_active_quality, 0.0, "{name}");
    }
}
