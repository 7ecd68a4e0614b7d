//! Consolidation and eviction engine
//!
//! Two periodic batch processes over the long-term store:
//!
//! - [`ConsolidationEngine::smart_eviction`] rescores every record with the
//!   decay model against one shared graph snapshot and removes the hopeless
//!   tail, under a hard per-run cap.
//! - [`ConsolidationEngine::episodic_to_semantic`] groups repeated episodic
//!   memories by topic and distills them into semantic insights through the
//!   generation collaborator, with bounded fan-out.
//!
//! Both touch storage in batches only: one preserve update, one survivor
//! update, one delete per eviction run; one batched insert per promotion run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::constants::{
    EVICTION_MAX_ACCESS_COUNT, EVICTION_MAX_REPETITIONS, EVICTION_MIN_AGE_HOURS,
    PRESERVE_REPETITIONS, PROMOTED_IMPORTANCE, PROMOTION_MIN_AGE_DAYS,
    PROMOTION_MIN_CONFIDENCE, PROMOTION_MIN_GROUP_SIZE, PROMOTION_MIN_REPETITIONS,
};
use crate::decay;
use crate::errors::{MemoryError, Result};
use crate::facade::{AddOptions, VectorMemory};
use crate::providers::{GenerateOptions, GenerationProvider};
use crate::record::{DecaySnapshot, MemoryRecord, MemoryType, TaskType};
use crate::storage::{MemoryFilter, MetadataUpdate};

/// Outcome of one eviction run
#[derive(Debug, Clone, Default)]
pub struct EvictionReport {
    pub scanned: usize,
    pub evicted: usize,
    pub newly_preserved: usize,
    pub rescored: usize,
    /// True when the safety cap cut the eviction list short
    pub capped: bool,
}

/// Outcome of one promotion run
#[derive(Debug, Clone, Default)]
pub struct PromotionReport {
    pub groups: usize,
    pub promoted: usize,
    pub merged_duplicates: usize,
    /// Generation calls that failed or timed out and were skipped
    pub failures: usize,
}

#[derive(Debug, Deserialize)]
struct ExtractedInsight {
    insight: String,
    confidence: f32,
}

pub struct ConsolidationEngine {
    facade: Arc<VectorMemory>,
    generator: Arc<dyn GenerationProvider>,
    /// Fixed-size bound on concurrent generation calls
    generation_limit: Arc<Semaphore>,
}

impl ConsolidationEngine {
    pub fn new(facade: Arc<VectorMemory>, generator: Arc<dyn GenerationProvider>) -> Self {
        let permits = facade.config().promotion_max_concurrent;
        Self {
            facade,
            generator,
            generation_limit: Arc::new(Semaphore::new(permits)),
        }
    }

    fn config(&self) -> &MemoryConfig {
        self.facade.config()
    }

    /// Rescore all records and evict the decayed tail.
    ///
    /// Cursor-paginated scan; decay runs on the blocking pool per page
    /// against the single shared graph. Partitions each page into newly
    /// preserved, evicted, and surviving (importance rewritten to the
    /// decayed score). The safety cap bounds evictions unconditionally.
    pub async fn smart_eviction(&self) -> Result<EvictionReport> {
        let config = self.config().clone();
        let graph = self.facade.graph().clone();
        let store = self.facade.store().clone();
        let now = Utc::now();

        let mut report = EvictionReport::default();
        let mut preserve_updates: Vec<MetadataUpdate> = Vec::new();
        let mut survivor_updates: Vec<MetadataUpdate> = Vec::new();
        let mut evict_ids: Vec<Uuid> = Vec::new();

        let mut cursor = None;
        loop {
            let page = store.scan_page(cursor, config.eviction_page_size).await?;
            report.scanned += page.records.len();

            let snapshots: Vec<DecaySnapshot> = page
                .records
                .iter()
                .map(|r| DecaySnapshot::of(r, graph.connection_count(r.id), now))
                .collect();
            let decay_config = config.decay.clone();
            let scores = tokio::task::spawn_blocking(move || {
                decay::calculate_batch(&snapshots, &decay_config)
            })
            .await
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;

            for (record, decayed) in page.records.iter().zip(scores) {
                if record.preserved {
                    continue;
                }

                if record.repetitions >= PRESERVE_REPETITIONS
                    || decayed >= config.preserve_threshold
                {
                    preserve_updates.push(MetadataUpdate::new(record.id).preserved(true));
                    continue;
                }

                let evictable = decayed < config.eviction_threshold
                    && record.repetitions < EVICTION_MAX_REPETITIONS
                    && record.access_count < EVICTION_MAX_ACCESS_COUNT
                    && record.age_hours(now) > EVICTION_MIN_AGE_HOURS;

                if evictable && evict_ids.len() < config.eviction_safety_cap {
                    evict_ids.push(record.id);
                } else {
                    if evictable {
                        report.capped = true;
                    }
                    if (decayed - record.importance).abs() > f32::EPSILON {
                        survivor_updates
                            .push(MetadataUpdate::new(record.id).importance(decayed));
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        report.newly_preserved = preserve_updates.len();
        report.rescored = survivor_updates.len();
        report.evicted = evict_ids.len();

        // Exactly one call per kind, regardless of counts
        if !preserve_updates.is_empty() {
            store.update_batch(preserve_updates).await?;
        }
        if !survivor_updates.is_empty() {
            store.update_batch(survivor_updates).await?;
        }
        if !evict_ids.is_empty() {
            let delete_report = store.delete_batch(&evict_ids).await?;
            graph.unlink_memories(&delete_report.succeeded);
        }

        info!(
            scanned = report.scanned,
            evicted = report.evicted,
            preserved = report.newly_preserved,
            capped = report.capped,
            "MEM eviction run complete"
        );
        Ok(report)
    }

    /// Promote repeated episodic memories into semantic insights.
    ///
    /// Eligible conversation records group by their leading topic; each
    /// group of two or more goes to the generation provider under the
    /// semaphore with a per-call timeout. A failed call is logged and
    /// skipped, never aborting the rest. Accepted insights are deduplicated
    /// against the store and written through one batched add.
    pub async fn episodic_to_semantic(&self) -> Result<PromotionReport> {
        let config = self.config().clone();
        let store = self.facade.store().clone();
        let now = Utc::now();

        // Collect eligible episodic records, paginated
        let mut groups: HashMap<String, Vec<MemoryRecord>> = HashMap::new();
        let mut cursor = None;
        loop {
            let page = store.scan_page(cursor, config.eviction_page_size).await?;
            for record in page.records {
                let eligible = record.memory_type == MemoryType::Conversation
                    && record.repetitions >= PROMOTION_MIN_REPETITIONS
                    && (now - record.created_at).num_days() >= PROMOTION_MIN_AGE_DAYS;
                if !eligible {
                    continue;
                }
                let Some(topic) = record.key_topics.first().cloned() else {
                    continue;
                };
                groups.entry(topic).or_default().push(record);
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        groups.retain(|_, records| records.len() >= PROMOTION_MIN_GROUP_SIZE);

        let mut report = PromotionReport {
            groups: groups.len(),
            ..Default::default()
        };
        if groups.is_empty() {
            return Ok(report);
        }

        let timeout = Duration::from_secs(config.promotion_call_timeout_secs);

        // Bounded fan-out; results recombine in request order
        let extractions = futures::future::join_all(groups.into_iter().map(|(topic, records)| {
            let generator = self.generator.clone();
            let limit = self.generation_limit.clone();
            async move {
                let _permit = limit.acquire().await.ok();
                let outcome = Self::extract_insight(&generator, &topic, &records, timeout).await;
                (topic, outcome)
            }
        }))
        .await;

        let mut to_store: Vec<(String, AddOptions)> = Vec::new();
        for (topic, outcome) in extractions {
            match outcome {
                Ok(Some(insight)) => {
                    to_store.push((
                        insight,
                        AddOptions {
                            memory_type: MemoryType::Insight,
                            importance: PROMOTED_IMPORTANCE,
                            key_topics: vec![topic],
                        },
                    ));
                }
                Ok(None) => {
                    debug!(topic, "MEM promotion: low-confidence insight discarded");
                }
                Err(err) => {
                    warn!(topic, "MEM promotion call skipped: {err}");
                    report.failures += 1;
                }
            }
        }

        if to_store.is_empty() {
            return Ok(report);
        }

        // Dedup before the batched insert; a duplicate merges repetitions on
        // the existing record. Embeddings land in the cache, so the batched
        // add below reuses them at no provider cost.
        let mut merge_updates: Vec<MetadataUpdate> = Vec::new();
        let mut fresh: Vec<(String, AddOptions)> = Vec::new();
        for (content, options) in to_store {
            let embedding = match self
                .facade
                .cache()
                .get_embedding(&content, TaskType::RetrievalDocument)
                .await
            {
                Ok(embedding) => embedding,
                Err(err) => {
                    warn!("MEM promotion insight dropped, embed failed: {err}");
                    report.failures += 1;
                    continue;
                }
            };
            let filter = MemoryFilter {
                memory_type: Some(MemoryType::Insight),
                min_importance: None,
            };
            let nearest = store.similarity_search(&embedding, 1, &filter).await?;
            match nearest.first() {
                Some(hit) if hit.score >= config.duplicate_threshold => {
                    merge_updates.push(MetadataUpdate::new(hit.record.id).repetition());
                    report.merged_duplicates += 1;
                }
                _ => fresh.push((content, options)),
            }
        }

        if !merge_updates.is_empty() {
            store.update_batch(merge_updates).await?;
        }
        if !fresh.is_empty() {
            let add_report = self.facade.add_batch(fresh).await?;
            report.promoted = add_report.succeeded.len();
            report.failures += add_report.failed.len();
        }

        info!(
            groups = report.groups,
            promoted = report.promoted,
            failures = report.failures,
            "MEM promotion run complete"
        );
        Ok(report)
    }

    async fn extract_insight(
        generator: &Arc<dyn GenerationProvider>,
        topic: &str,
        records: &[MemoryRecord],
        timeout: Duration,
    ) -> Result<Option<String>> {
        let mut prompt = format!(
            "These memories share the topic \"{topic}\". State the single stable \
             fact or insight they support, as JSON {{\"insight\": \"...\", \
             \"confidence\": 0.0-1.0}}.\n"
        );
        for record in records {
            prompt.push_str("- ");
            prompt.push_str(&record.content);
            prompt.push('\n');
        }

        let raw = tokio::time::timeout(
            timeout,
            generator.generate(&prompt, &GenerateOptions::default(), timeout),
        )
        .await
        .map_err(|_| MemoryError::ProviderTimeout {
            provider: generator.name().to_string(),
            after_secs: timeout.as_secs(),
        })??;

        let cleaned = raw.replace("```json", "").replace("```", "");
        let parsed: ExtractedInsight =
            serde_json::from_str(cleaned.trim()).map_err(|e| MemoryError::TransientProvider {
                provider: generator.name().to_string(),
                reason: format!("unparseable insight: {e}"),
            })?;

        if parsed.confidence > PROMOTION_MIN_CONFIDENCE && !parsed.insight.trim().is_empty() {
            Ok(Some(parsed.insight))
        } else {
            Ok(None)
        }
    }
}
