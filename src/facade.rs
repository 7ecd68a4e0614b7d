//! Vector store facade: the single entry point for add/query/dedup/stats
//!
//! Owns the single-embedding-per-add invariant: one document-tagged vector is
//! computed per `add` and reused for both duplicate detection and storage.
//! Query-side accesses accumulate in the tracker and flush as one batch.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ordered_float::OrderedFloat;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::access_tracker::AccessTracker;
use crate::config::MemoryConfig;
use crate::embedding_cache::{CacheStats, EmbeddingCache};
use crate::errors::{MemoryError, Result};
use crate::graph::{GraphStats, KnowledgeGraph};
use crate::record::{MemoryRecord, MemoryType, TaskType};
use crate::storage::{
    BatchReport, MemoryFilter, MemoryStore, MetadataUpdate, ScoredRecord,
};

/// Metadata supplied with a new memory
#[derive(Debug, Clone)]
pub struct AddOptions {
    pub memory_type: MemoryType,
    pub importance: f32,
    /// Topic tags; they seed knowledge-graph entities and promotion grouping
    pub key_topics: Vec<String>,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            memory_type: MemoryType::Conversation,
            importance: 0.5,
            key_topics: Vec::new(),
        }
    }
}

/// Result of an `add`: the record id and whether it merged into an existing one
#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub id: Uuid,
    pub deduplicated: bool,
}

/// Aggregate engine statistics
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub total_records: usize,
    pub records_by_type: HashMap<MemoryType, usize>,
    pub cache: CacheStats,
    pub graph: GraphStats,
}

pub struct VectorMemory {
    store: Arc<dyn MemoryStore>,
    cache: Arc<EmbeddingCache>,
    graph: Arc<KnowledgeGraph>,
    tracker: AccessTracker,
    config: MemoryConfig,
}

impl VectorMemory {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        cache: Arc<EmbeddingCache>,
        graph: Arc<KnowledgeGraph>,
        config: MemoryConfig,
    ) -> Self {
        let tracker = AccessTracker::new(config.access_flush_threshold);
        Self {
            store,
            cache,
            graph,
            tracker,
            config,
        }
    }

    /// Store a memory, merging into a near-duplicate when one exists.
    ///
    /// Exactly one embedding is computed; the same vector drives the
    /// duplicate search and, when no duplicate is found, the insert. A
    /// duplicate bumps repetition and access counters on the existing record
    /// via one metadata update.
    pub async fn add(&self, content: &str, options: AddOptions) -> Result<AddOutcome> {
        if content.trim().is_empty() {
            return Err(MemoryError::InvalidInput {
                field: "content".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let embedding = self
            .cache
            .get_embedding(content, TaskType::RetrievalDocument)
            .await?;

        let filter = MemoryFilter {
            memory_type: Some(options.memory_type),
            min_importance: None,
        };
        let nearest = self.store.similarity_search(&embedding, 1, &filter).await?;

        if let Some(hit) = nearest.first() {
            if hit.score >= self.config.duplicate_threshold {
                let id = hit.record.id;
                let update = MetadataUpdate::new(id).touch(Utc::now(), 1).repetition();
                self.store.update_batch(vec![update]).await?;
                debug!(%id, score = hit.score, "MEM store merged duplicate");
                return Ok(AddOutcome {
                    id,
                    deduplicated: true,
                });
            }
        }

        let mut record = MemoryRecord::new(content.to_string(), embedding, options.memory_type);
        record.importance = options.importance.clamp(0.0, 1.0);
        record.key_topics = options.key_topics.clone();
        let id = record.id;

        self.store.insert_batch(vec![record]).await?;
        self.link_topics(id, &options.key_topics);

        debug!(%id, memory_type = options.memory_type.as_str(), "MEM store");
        Ok(AddOutcome {
            id,
            deduplicated: false,
        })
    }

    /// Store many memories: batched embedding, then one batched insert.
    ///
    /// Embeddings resolve concurrently but results recombine in request
    /// order. An item whose embedding fails after retries is skipped and
    /// reported; the rest of the batch still stores.
    pub async fn add_batch(&self, items: Vec<(String, AddOptions)>) -> Result<BatchReport> {
        if items.is_empty() {
            return Ok(BatchReport::default());
        }

        let embeddings = futures::future::join_all(
            items
                .iter()
                .map(|(content, _)| self.cache.get_embedding(content, TaskType::RetrievalDocument)),
        )
        .await;

        let mut records = Vec::with_capacity(items.len());
        let mut topic_links = Vec::new();
        let mut failed = Vec::new();
        for ((content, options), embedding) in items.into_iter().zip(embeddings) {
            let embedding = match embedding {
                Ok(embedding) => embedding,
                Err(err) => {
                    warn!(error = %err, "MEM store batch item skipped");
                    failed.push(err.to_string());
                    continue;
                }
            };
            let mut record = MemoryRecord::new(content, embedding, options.memory_type);
            record.importance = options.importance.clamp(0.0, 1.0);
            record.key_topics = options.key_topics.clone();
            topic_links.push((record.id, options.key_topics));
            records.push(record);
        }

        if records.is_empty() {
            return Ok(BatchReport {
                failed,
                ..BatchReport::default()
            });
        }

        let mut report = self.store.insert_batch(records).await?;
        report.failed = failed;
        for (id, topics) in topic_links {
            self.link_topics(id, &topics);
        }
        info!(count = report.succeeded.len(), "MEM store batch");
        Ok(report)
    }

    /// Seed graph entities from topic tags and link them to the memory
    fn link_topics(&self, memory_id: Uuid, topics: &[String]) {
        if topics.is_empty() {
            return;
        }
        let entity_ids: Vec<String> = topics
            .iter()
            .map(|t| self.graph.resolve_entity(t, "topic"))
            .collect();
        for pair in entity_ids.windows(2) {
            // Entities were just resolved, so the id lookups cannot miss
            let _ = self.graph.add_relation(&pair[0], &pair[1], "co_occurs_with");
        }
        self.graph.link_memory(memory_id, &entity_ids);
    }

    /// Rank stored memories against a query text.
    ///
    /// One query-tagged embedding; cosine score descending, ties broken by
    /// last access (recent first), then importance (high first). Accesses
    /// accumulate in the tracker and flush once the threshold trips.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<ScoredRecord>> {
        let embedding = self
            .cache
            .get_embedding(text, TaskType::RetrievalQuery)
            .await?;

        let mut results = self.store.similarity_search(&embedding, k, filter).await?;
        results.sort_by(|a, b| {
            OrderedFloat(b.score)
                .cmp(&OrderedFloat(a.score))
                .then_with(|| {
                    b.record
                        .last_accessed_at
                        .cmp(&a.record.last_accessed_at)
                })
                .then_with(|| {
                    OrderedFloat(b.record.importance).cmp(&OrderedFloat(a.record.importance))
                })
        });

        let mut flush_due = false;
        for result in &results {
            flush_due |= self.tracker.record_access(result.record.id);
        }
        if flush_due {
            self.flush_access_updates().await?;
        }

        Ok(results)
    }

    /// Commit pending access touches as one batched update
    pub async fn flush_access_updates(&self) -> Result<BatchReport> {
        self.tracker.flush(&self.store).await
    }

    /// Aggregate counts; grouped query plus maintained counters, no full scan
    pub async fn get_stats(&self) -> Result<MemoryStats> {
        let records_by_type = self.store.count_by_type().await?;
        let total_records = records_by_type.values().sum();
        Ok(MemoryStats {
            total_records,
            records_by_type,
            cache: self.cache.stats(),
            graph: self.graph.get_stats(),
        })
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<KnowledgeGraph> {
        &self.graph
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }
}

// Keeps the tie-break comparator in one place for reuse by recall merging
pub(crate) fn rank_cmp(a: &ScoredRecord, b: &ScoredRecord) -> CmpOrdering {
    OrderedFloat(b.score)
        .cmp(&OrderedFloat(a.score))
        .then_with(|| b.record.last_accessed_at.cmp(&a.record.last_accessed_at))
        .then_with(|| OrderedFloat(b.record.importance).cmp(&OrderedFloat(a.record.importance)))
}
