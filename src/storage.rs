//! Durable storage collaborator
//!
//! The engine owns no storage format. [`MemoryStore`] is the narrow contract
//! a backend must meet: cursor-paginated scans, batched insert/update/delete
//! with partial-success reporting, grouped aggregate counts, and similarity
//! search with a metadata filter. [`InMemoryStore`] is the reference
//! implementation, instrumented with per-operation call counters so batch
//! discipline is testable.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::errors::Result;
use crate::record::{MemoryRecord, MemoryType};
use crate::similarity::top_k_similar;

/// Partial-success report for a batched operation
///
/// A failed batch still reports which ids went through; callers never lose
/// that information.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded: Vec<Uuid>,
    /// Ids that were requested but not present / not applied
    pub missing: Vec<Uuid>,
    /// Items skipped before reaching storage, one reason per item
    pub failed: Vec<String>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.missing.is_empty() && self.failed.is_empty()
    }
}

/// Sparse metadata update applied in a batch
#[derive(Debug, Clone)]
pub struct MetadataUpdate {
    pub id: Uuid,
    pub importance: Option<f32>,
    pub preserved: Option<bool>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count_delta: u32,
    pub repetitions_delta: u32,
}

impl MetadataUpdate {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            importance: None,
            preserved: None,
            last_accessed_at: None,
            access_count_delta: 0,
            repetitions_delta: 0,
        }
    }

    pub fn importance(mut self, value: f32) -> Self {
        self.importance = Some(value);
        self
    }

    pub fn preserved(mut self, value: bool) -> Self {
        self.preserved = Some(value);
        self
    }

    pub fn touch(mut self, at: DateTime<Utc>, accesses: u32) -> Self {
        self.last_accessed_at = Some(at);
        self.access_count_delta = accesses;
        self
    }

    pub fn repetition(mut self) -> Self {
        self.repetitions_delta += 1;
        self
    }
}

/// Metadata filter for similarity search
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub memory_type: Option<MemoryType>,
    pub min_importance: Option<f32>,
}

/// One page of a cursor-based scan
#[derive(Debug, Clone)]
pub struct ScanPage {
    pub records: Vec<MemoryRecord>,
    /// Pass back to fetch the next page; `None` means the scan is complete
    pub next_cursor: Option<Uuid>,
}

/// A similarity-scored record
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub score: f32,
    pub record: MemoryRecord,
}

/// Contract for durable memory storage backends
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert records in one batch
    async fn insert_batch(&self, records: Vec<MemoryRecord>) -> Result<BatchReport>;

    /// Apply sparse metadata updates in one batch
    async fn update_batch(&self, updates: Vec<MetadataUpdate>) -> Result<BatchReport>;

    /// Delete by id list in one batch
    async fn delete_batch(&self, ids: &[Uuid]) -> Result<BatchReport>;

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>>;

    /// Cursor-paginated scan in stable id order
    async fn scan_page(&self, cursor: Option<Uuid>, limit: usize) -> Result<ScanPage>;

    /// Record counts grouped by memory type, one aggregate query
    async fn count_by_type(&self) -> Result<HashMap<MemoryType, usize>>;

    async fn total_count(&self) -> Result<usize>;

    /// Top-k similarity search over stored vectors with a metadata filter
    async fn similarity_search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<ScoredRecord>>;
}

/// Per-operation call counters, for batch-discipline assertions
#[derive(Debug, Default)]
pub struct OpCounts {
    pub inserts: AtomicU64,
    pub updates: AtomicU64,
    pub deletes: AtomicU64,
    pub scans: AtomicU64,
    pub searches: AtomicU64,
}

/// In-memory reference store backed by an ordered map
///
/// Id order gives the scan cursor a stable, restart-free ordering.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<Uuid, MemoryRecord>>,
    pub ops: OpCounts,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn insert_batch(&self, records: Vec<MemoryRecord>) -> Result<BatchReport> {
        self.ops.inserts.fetch_add(1, Ordering::SeqCst);
        let mut map = self.records.write();
        let mut report = BatchReport::default();
        for record in records {
            report.succeeded.push(record.id);
            map.insert(record.id, record);
        }
        Ok(report)
    }

    async fn update_batch(&self, updates: Vec<MetadataUpdate>) -> Result<BatchReport> {
        self.ops.updates.fetch_add(1, Ordering::SeqCst);
        let mut map = self.records.write();
        let mut report = BatchReport::default();
        for update in updates {
            match map.get_mut(&update.id) {
                Some(record) => {
                    if let Some(importance) = update.importance {
                        record.importance = importance;
                    }
                    if let Some(preserved) = update.preserved {
                        record.preserved = preserved;
                    }
                    if let Some(at) = update.last_accessed_at {
                        record.last_accessed_at = at;
                    }
                    record.access_count += update.access_count_delta;
                    record.repetitions += update.repetitions_delta;
                    report.succeeded.push(update.id);
                }
                None => report.missing.push(update.id),
            }
        }
        Ok(report)
    }

    async fn delete_batch(&self, ids: &[Uuid]) -> Result<BatchReport> {
        self.ops.deletes.fetch_add(1, Ordering::SeqCst);
        let mut map = self.records.write();
        let mut report = BatchReport::default();
        for id in ids {
            if map.remove(id).is_some() {
                report.succeeded.push(*id);
            } else {
                report.missing.push(*id);
            }
        }
        Ok(report)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn scan_page(&self, cursor: Option<Uuid>, limit: usize) -> Result<ScanPage> {
        self.ops.scans.fetch_add(1, Ordering::SeqCst);
        let map = self.records.read();
        let iter: Box<dyn Iterator<Item = &MemoryRecord>> = match cursor {
            Some(after) => Box::new(
                map.range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                    .map(|(_, r)| r),
            ),
            None => Box::new(map.values()),
        };
        let records: Vec<MemoryRecord> = iter.take(limit).cloned().collect();
        let next_cursor = if records.len() == limit {
            records.last().map(|r| r.id)
        } else {
            None
        };
        Ok(ScanPage {
            records,
            next_cursor,
        })
    }

    async fn count_by_type(&self) -> Result<HashMap<MemoryType, usize>> {
        let map = self.records.read();
        let mut counts = HashMap::new();
        for record in map.values() {
            *counts.entry(record.memory_type).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn total_count(&self) -> Result<usize> {
        Ok(self.records.read().len())
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<ScoredRecord>> {
        self.ops.searches.fetch_add(1, Ordering::SeqCst);
        let map = self.records.read();
        let candidates: Vec<(Vec<f32>, MemoryRecord)> = map
            .values()
            .filter(|r| {
                filter
                    .memory_type
                    .map(|t| r.memory_type == t)
                    .unwrap_or(true)
                    && filter
                        .min_importance
                        .map(|min| r.importance >= min)
                        .unwrap_or(true)
            })
            .map(|r| (r.embedding.clone(), r.clone()))
            .collect();
        Ok(top_k_similar(embedding, &candidates, k)
            .into_iter()
            .map(|(score, record)| ScoredRecord { score, record })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryType;

    fn record(content: &str, embedding: Vec<f32>) -> MemoryRecord {
        MemoryRecord::new(content.to_string(), embedding, MemoryType::Conversation)
    }

    #[tokio::test]
    async fn test_batch_delete_is_one_call() {
        let store = InMemoryStore::new();
        let records: Vec<MemoryRecord> =
            (0..20).map(|i| record(&format!("m{i}"), vec![1.0])).collect();
        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        store.insert_batch(records).await.unwrap();

        let report = store.delete_batch(&ids).await.unwrap();
        assert_eq!(report.succeeded.len(), 20);
        assert_eq!(store.ops.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(store.total_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_reports_missing_ids() {
        let store = InMemoryStore::new();
        let r = record("kept", vec![1.0]);
        let id = r.id;
        store.insert_batch(vec![r]).await.unwrap();

        let ghost = Uuid::new_v4();
        let report = store.delete_batch(&[id, ghost]).await.unwrap();
        assert_eq!(report.succeeded, vec![id]);
        assert_eq!(report.missing, vec![ghost]);
        assert!(!report.all_succeeded());
    }

    #[tokio::test]
    async fn test_scan_pagination_covers_all_records() {
        let store = InMemoryStore::new();
        let records: Vec<MemoryRecord> =
            (0..25).map(|i| record(&format!("m{i}"), vec![1.0])).collect();
        store.insert_batch(records).await.unwrap();

        let mut seen = 0;
        let mut cursor = None;
        loop {
            let page = store.scan_page(cursor, 10).await.unwrap();
            seen += page.records.len();
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, 25);
    }

    #[tokio::test]
    async fn test_update_batch_applies_sparse_fields() {
        let store = InMemoryStore::new();
        let r = record("m", vec![1.0]);
        let id = r.id;
        store.insert_batch(vec![r]).await.unwrap();

        let update = MetadataUpdate::new(id).importance(0.9).preserved(true);
        store.update_batch(vec![update]).await.unwrap();

        let got = store.get(id).await.unwrap().unwrap();
        assert!((got.importance - 0.9).abs() < f32::EPSILON);
        assert!(got.preserved);
        assert_eq!(got.access_count, 0);
    }

    #[tokio::test]
    async fn test_similarity_search_filters_by_type() {
        let store = InMemoryStore::new();
        let mut fact = record("fact", vec![1.0, 0.0]);
        fact.memory_type = MemoryType::Fact;
        let conv = record("conv", vec![1.0, 0.0]);
        store.insert_batch(vec![fact, conv]).await.unwrap();

        let filter = MemoryFilter {
            memory_type: Some(MemoryType::Fact),
            min_importance: None,
        };
        let results = store.similarity_search(&[1.0, 0.0], 10, &filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.memory_type, MemoryType::Fact);
    }
}
