//! Top-level engine wiring and graph-augmented recall
//!
//! [`MemoryEngine`] owns the shared components for one process: the graph
//! and its debounced writer, the embedding cache, the facade, the
//! consolidation engine, and the session store. Construct it once at startup
//! and pass it by `Arc`; nothing here is rebuilt per call.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::consolidation::{ConsolidationEngine, EvictionReport, PromotionReport};
use crate::embedding_cache::EmbeddingCache;
use crate::errors::{MemoryError, Result};
use crate::facade::{rank_cmp, AddOptions, AddOutcome, MemoryStats, VectorMemory};
use crate::graph::{GraphWriter, KnowledgeGraph};
use crate::providers::{EmbeddingProvider, GenerationProvider};
use crate::session::{Role, SessionBuffer, SessionMessage, SessionStore};
use crate::storage::{MemoryFilter, MemoryStore, ScoredRecord};

/// Score bonus per graph connection between a result and the query's entities
const GRAPH_MATCH_BONUS: f32 = 0.05;

/// Graph hops explored during recall
const RECALL_GRAPH_DEPTH: usize = 2;

pub struct MemoryEngine {
    facade: Arc<VectorMemory>,
    consolidation: ConsolidationEngine,
    graph: Arc<KnowledgeGraph>,
    graph_writer: Option<GraphWriter>,
    session_store: Arc<dyn SessionStore>,
    config: MemoryConfig,
}

impl MemoryEngine {
    /// Wire up an engine from its collaborators.
    ///
    /// Loads the graph snapshot from disk and starts the debounced writer.
    pub fn new(
        config: MemoryConfig,
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        session_store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let graph = Arc::new(KnowledgeGraph::load_from(&config.graph_snapshot_path)?);
        let graph_writer = Some(GraphWriter::spawn(
            graph.clone(),
            config.graph_snapshot_path.clone(),
        ));

        let cache = Arc::new(EmbeddingCache::new(
            embedder,
            config.embedding_cache_capacity,
            config.embedding_max_concurrent,
        ));
        let facade = Arc::new(VectorMemory::new(
            store,
            cache,
            graph.clone(),
            config.clone(),
        ));
        let consolidation = ConsolidationEngine::new(facade.clone(), generator);

        config.log();
        Ok(Self {
            facade,
            consolidation,
            graph,
            graph_writer,
            session_store,
            config,
        })
    }

    /// Store one memory through the facade
    pub async fn remember(&self, content: &str, options: AddOptions) -> Result<AddOutcome> {
        self.facade.add(content, options).await
    }

    /// Graph-augmented recall.
    ///
    /// Similarity candidates come from the facade; query keywords resolve to
    /// graph entities whose BFS neighborhood boosts connected candidates.
    /// The merged list re-ranks under the standard comparator. A missing or
    /// empty graph degrades to plain similarity ranking.
    ///
    /// Fuzzy matching and BFS take graph locks and are CPU-bound, so the
    /// traversal runs on the blocking pool, never on the async scheduler.
    pub async fn recall(
        &self,
        text: &str,
        k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<ScoredRecord>> {
        let mut results = self.facade.query(text, k * 2, filter).await?;

        let graph = self.graph.clone();
        let query_text = text.to_string();
        let connected =
            tokio::task::spawn_blocking(move || connected_memories(&graph, &query_text))
                .await
                .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        if !connected.is_empty() {
            for result in &mut results {
                if connected.contains(&result.record.id) {
                    result.score += GRAPH_MATCH_BONUS;
                }
            }
            results.sort_by(rank_cmp);
        }

        results.truncate(k);
        Ok(results)
    }

    /// Start a session buffer sized from config
    pub fn new_session(&self) -> SessionBuffer {
        SessionBuffer::new(self.config.session_capacity)
    }

    /// End a session: archive its messages and feed user turns into
    /// long-term memory through the batched add path.
    pub async fn end_session(&self, session_id: Uuid, buffer: &SessionBuffer) -> Result<usize> {
        let messages = buffer.drain();
        if messages.is_empty() {
            return Ok(0);
        }

        let count = self
            .session_store
            .archive_session(session_id, &messages)
            .await?;

        let items: Vec<(String, AddOptions)> = messages
            .into_iter()
            .filter(|m| m.role == Role::User)
            .map(|m| (m.content, AddOptions::default()))
            .collect();
        if !items.is_empty() {
            let report = self.facade.add_batch(items).await?;
            if !report.all_succeeded() {
                warn!(
                    missing = report.missing.len(),
                    failed = report.failed.len(),
                    "MEM session turns partially stored"
                );
            }
        }

        info!(%session_id, count, "MEM session ended");
        Ok(count)
    }

    /// Record one message into an active session buffer
    pub fn observe(&self, buffer: &SessionBuffer, role: Role, content: String) {
        buffer.push(SessionMessage::new(role, content));
    }

    pub async fn run_eviction(&self) -> Result<EvictionReport> {
        self.consolidation.smart_eviction().await
    }

    pub async fn run_promotion(&self) -> Result<PromotionReport> {
        self.consolidation.episodic_to_semantic().await
    }

    /// Recompute graph relation weights from co-occurrence counters
    pub fn reweight_graph(&self) {
        self.graph.recalculate_weights();
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        self.facade.get_stats().await
    }

    pub fn facade(&self) -> &Arc<VectorMemory> {
        &self.facade
    }

    pub fn graph(&self) -> &Arc<KnowledgeGraph> {
        &self.graph
    }

    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.session_store
    }

    /// Flush pending state and stop background tasks.
    ///
    /// Drains the access tracker and forces a final graph snapshot write.
    pub async fn shutdown(mut self) -> Result<()> {
        self.facade.flush_access_updates().await?;
        if let Some(writer) = self.graph_writer.take() {
            writer.shutdown().await?;
        }
        info!("MEM engine shut down");
        Ok(())
    }
}

/// Memory ids linked to the query's entity neighborhood
fn connected_memories(graph: &KnowledgeGraph, text: &str) -> HashSet<Uuid> {
    let mut seeds: Vec<String> = Vec::new();
    for word in text.split_whitespace().filter(|w| w.len() > 2) {
        for entity in graph.find_entities_by_name(word) {
            seeds.push(entity.id);
        }
    }
    if seeds.is_empty() {
        return HashSet::new();
    }

    let mut neighborhood = graph.bfs_neighbors(&seeds, RECALL_GRAPH_DEPTH);
    neighborhood.extend(seeds);
    graph.memories_for_entities(&neighborhood)
}
