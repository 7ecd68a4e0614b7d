//! Core data model: memory records and their metadata
//!
//! A memory record is the stored unit of long-term recall. Importance is the
//! central mutable field: decay rescales it, access renews it, eviction keys
//! off it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of memory types
///
/// Every decision point (decay multiplier, promotion eligibility, dedup)
/// matches exhaustively over this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Conversation,
    Fact,
    Preference,
    Insight,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Insight => "insight",
        }
    }
}

/// Task tag for embedding requests
///
/// Providers embed documents and queries into slightly different subspaces;
/// the tag is part of the cache key so the two never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetrievalDocument => "retrieval_document",
            Self::RetrievalQuery => "retrieval_query",
        }
    }
}

/// A stored long-term memory record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub content: String,

    /// Fixed-dimension embedding, tagged RetrievalDocument at creation
    pub embedding: Vec<f32>,

    /// Current importance in [0, 1]
    pub importance: f32,

    pub memory_type: MemoryType,

    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,

    /// Number of times this record was returned by a query
    #[serde(default)]
    pub access_count: u32,

    /// Distinct channels this memory was mentioned in
    #[serde(default)]
    pub channel_mentions: u32,

    /// Times a near-duplicate add merged into this record
    #[serde(default)]
    pub repetitions: u32,

    /// Exempt from eviction
    #[serde(default)]
    pub preserved: bool,

    /// Topic tags extracted at store time, used for promotion grouping
    #[serde(default)]
    pub key_topics: Vec<String>,
}

impl MemoryRecord {
    pub fn new(content: String, embedding: Vec<f32>, memory_type: MemoryType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content,
            embedding,
            importance: 0.5,
            memory_type,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            channel_mentions: 0,
            repetitions: 0,
            preserved: false,
            key_topics: Vec::new(),
        }
    }

    /// Age in fractional hours at `now`
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds() as f64 / 3_600_000.0
    }

    /// Hours since the last access at `now`
    pub fn last_access_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_accessed_at).num_milliseconds() as f64 / 3_600_000.0
    }
}

/// Immutable view of the fields the decay calculator reads
///
/// Connection count comes from the caller's shared graph snapshot; the
/// calculator never touches the graph itself.
#[derive(Debug, Clone, Copy)]
pub struct DecaySnapshot {
    pub importance: f32,
    pub memory_type: MemoryType,
    pub hours_passed: f64,
    pub last_access_hours: f64,
    pub access_count: u32,
    pub connection_count: u32,
    pub channel_mentions: u32,
}

impl DecaySnapshot {
    /// Snapshot a record at `now` with a caller-supplied connection count
    pub fn of(record: &MemoryRecord, connection_count: u32, now: DateTime<Utc>) -> Self {
        Self {
            importance: record.importance,
            memory_type: record.memory_type,
            hours_passed: record.age_hours(now),
            last_access_hours: record.last_access_hours(now),
            access_count: record.access_count,
            connection_count,
            channel_mentions: record.channel_mentions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_record_defaults() {
        let r = MemoryRecord::new("hi".to_string(), vec![0.0; 4], MemoryType::Fact);
        assert_eq!(r.access_count, 0);
        assert_eq!(r.repetitions, 0);
        assert!(!r.preserved);
        assert!((r.importance - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_age_hours() {
        let mut r = MemoryRecord::new("hi".to_string(), vec![], MemoryType::Conversation);
        let now = Utc::now();
        r.created_at = now - Duration::hours(3);
        assert!((r.age_hours(now) - 3.0).abs() < 0.01);
    }

    #[test]
    fn test_type_round_trip() {
        let json = serde_json::to_string(&MemoryType::Preference).unwrap();
        assert_eq!(json, "\"preference\"");
        let back: MemoryType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MemoryType::Preference);
    }
}
