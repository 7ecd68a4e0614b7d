//! End-to-end engine tests
//!
//! Covers: session capture to long-term storage, graph-augmented recall,
//! eviction with the safety cap, episodic-to-semantic promotion, and graph
//! snapshot persistence across engine restarts.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use common::{build_engine, AxisProvider, ConfidentGenerator};
use engram::graph::KnowledgeGraph;
use engram::record::{MemoryRecord, MemoryType};
use engram::session::{InMemorySessionStore, Role, SessionStore};
use engram::storage::{MemoryFilter, MemoryStore};
use engram::{AddOptions, MemoryConfig, MemoryEngine};

fn stale_conversation(content: &str, topic: &str) -> MemoryRecord {
    let mut r = MemoryRecord::new(content.to_string(), vec![1.0; 8], MemoryType::Conversation);
    r.importance = 0.2;
    r.created_at = Utc::now() - Duration::days(30);
    r.last_accessed_at = r.created_at;
    r.repetitions = 2;
    r.key_topics = vec![topic.to_string()];
    r
}

#[tokio::test]
async fn session_to_long_term_flow() {
    let t = build_engine(None);
    let buffer = t.engine.new_session();

    t.engine
        .observe(&buffer, Role::User, "I started learning cello".to_string());
    t.engine
        .observe(&buffer, Role::Assistant, "That's great!".to_string());
    t.engine
        .observe(&buffer, Role::User, "my tutor lives in Porto".to_string());
    t.engine
        .observe(&buffer, Role::Assistant, "Nice city.".to_string());

    assert_eq!(buffer.turn_count(), 2);
    assert_eq!(buffer.copy_count(), 0);

    let archived = t.engine.end_session(Uuid::new_v4(), &buffer).await.unwrap();
    assert_eq!(archived, 4);

    // Both user turns became memories through one batched insert
    let stats = t.engine.stats().await.unwrap();
    assert_eq!(stats.total_records, 2);
    assert_eq!(t.store.ops.inserts.load(Ordering::SeqCst), 1);

    let session_stats = t.sessions.get_stats().await.unwrap();
    assert_eq!(session_stats.archived_sessions, 1);
    assert_eq!(session_stats.total_messages, 4);
}

#[tokio::test]
async fn recall_prefers_graph_connected_memories() {
    let t = build_engine(None);

    let linked = t
        .engine
        .remember(
            "\u{8}linked note",
            AddOptions {
                key_topics: vec!["cello".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    t.engine
        .remember("\u{10}plain note", AddOptions::default())
        .await
        .unwrap();

    let results = t
        .engine
        .recall("anything about cello", 2, &MemoryFilter::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].record.id, linked.id);
}

#[tokio::test]
async fn eviction_caps_and_batches() {
    let config = MemoryConfig {
        eviction_safety_cap: 4,
        ..Default::default()
    };
    let t = build_engine(Some(config));

    let mut doomed = Vec::new();
    for i in 0..12 {
        let mut r = stale_conversation(&format!("noise {i}"), "noise");
        r.repetitions = 0; // evictable
        doomed.push(r);
    }
    t.store.insert_batch(doomed).await.unwrap();

    let report = t.engine.run_eviction().await.unwrap();
    assert_eq!(report.evicted, 4);
    assert!(report.capped);
    assert_eq!(t.store.total_count().await.unwrap(), 8);
    assert_eq!(t.store.ops.deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn promotion_distills_repeated_episodes() {
    let t = build_engine(None);

    let records: Vec<MemoryRecord> = (0..3)
        .map(|i| stale_conversation(&format!("espresso ritual {i}"), "espresso"))
        .collect();
    t.store.insert_batch(records).await.unwrap();

    let report = t.engine.run_promotion().await.unwrap();
    assert_eq!(report.groups, 1);
    assert_eq!(report.promoted, 1);
    assert_eq!(report.failures, 0);

    let stats = t.engine.stats().await.unwrap();
    assert_eq!(stats.records_by_type[&MemoryType::Insight], 1);
}

#[tokio::test]
async fn graph_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = MemoryConfig {
        graph_snapshot_path: dir.path().join("graph.json"),
        ..Default::default()
    };

    let store = Arc::new(engram::storage::InMemoryStore::new());
    let first = MemoryEngine::new(
        config.clone(),
        store.clone(),
        Arc::new(AxisProvider::new()),
        Arc::new(ConfidentGenerator::new()),
        Arc::new(InMemorySessionStore::new()),
    )
    .unwrap();

    first
        .remember(
            "I adopted a cat",
            AddOptions {
                key_topics: vec!["cat".to_string(), "pets".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    first.shutdown().await.unwrap();

    let second = MemoryEngine::new(
        config,
        store,
        Arc::new(AxisProvider::new()),
        Arc::new(ConfidentGenerator::new()),
        Arc::new(InMemorySessionStore::new()),
    )
    .unwrap();

    let stats = second.graph().get_stats();
    assert_eq!(stats.entity_count, 2);
    assert_eq!(stats.relation_count, 1);

    // Entity resolution still dedups against the restored graph
    let id = second.graph().resolve_entity("cat", "topic");
    assert_eq!(
        second.graph().get_entity(&id).unwrap().mention_count,
        2,
        "restored entity was reused, not duplicated"
    );

    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn graph_round_trip_is_lossless() {
    let t = build_engine(None);
    t.engine
        .remember(
            "weekly climbing session",
            AddOptions {
                key_topics: vec!["climbing".to_string(), "exercise".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let before = t.engine.graph().get_stats();
    let path = t.dir.path().join("roundtrip.json");
    t.engine.graph().save_to(&path).unwrap();
    let restored = KnowledgeGraph::load_from(&path).unwrap();
    let after = restored.get_stats();

    assert_eq!(before.entity_count, after.entity_count);
    assert_eq!(before.relation_count, after.relation_count);
    assert_eq!(before.entities_by_type, after.entities_by_type);
}
