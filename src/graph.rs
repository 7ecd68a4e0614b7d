//! Knowledge graph: entity/relation arena with indexed lookup
//!
//! Entities and relations live in flat maps keyed by stable string ids;
//! relations store ids, never references, so the ownership structure is
//! acyclic even though the logical graph has cycles. Three indexes are
//! maintained incrementally: normalized-name buckets for O(1) entity
//! resolution, per-entity adjacency for O(1) relation retrieval, and a
//! memory-to-entity map backing connection counts for the decay model.
//!
//! The in-memory graph is the source of truth for the process lifetime;
//! persistence is a debounced write-behind JSON snapshot (see [`GraphWriter`]).

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::{
    BASELINE_WEIGHT_SHARE, ENTITY_MATCH_THRESHOLD, GRAPH_WRITE_DEBOUNCE_MS, TFIDF_WEIGHT_SHARE,
};
use crate::errors::{MemoryError, Result};
use crate::text::{string_similarity, string_similarity_batch, NameNormalizer};

/// A node in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    /// Lowercased, whitespace-collapsed form used for fuzzy comparison
    pub normalized_name: String,
    pub entity_type: String,
    #[serde(default)]
    pub mention_count: u64,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// An edge in the knowledge graph, referencing entities by id only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    /// Co-occurrence-derived weight in [0, 1]
    pub weight: f64,
    #[serde(default)]
    pub cooccurrence_count: u64,
}

/// Aggregate graph statistics
#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relation_count: usize,
    pub entities_by_type: HashMap<String, usize>,
    pub avg_connections: f64,
}

/// Serializable snapshot, the on-disk format
///
/// Round-trips losslessly; indexes are rebuilt on load.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    /// Co-occurrence counts keyed by "a||b" with a < b
    #[serde(default)]
    pub cooccurrence: HashMap<String, u64>,
    #[serde(default)]
    pub entity_mentions: HashMap<String, u64>,
    #[serde(default)]
    pub memory_refs: HashMap<Uuid, Vec<String>>,
}

#[derive(Default)]
struct GraphInner {
    entities: HashMap<String, Entity>,
    relations: HashMap<String, Relation>,
    /// Stemmed index key -> entity ids in that bucket
    name_index: HashMap<String, Vec<String>>,
    /// Entity id -> relation ids touching it (both directions)
    relation_index: HashMap<String, Vec<String>>,
    /// Sorted entity-id pair -> co-occurrence count
    cooccurrence: HashMap<(String, String), u64>,
    /// Entity id -> total mentions across all memories
    entity_mentions: HashMap<String, u64>,
    /// Memory id -> entities extracted from it, backing connection counts
    memory_refs: HashMap<Uuid, HashSet<String>>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// The shared knowledge graph, one instance per process
pub struct KnowledgeGraph {
    inner: RwLock<GraphInner>,
    normalizer: NameNormalizer,
    dirty: AtomicBool,
    changed: Notify,
}

impl Default for KnowledgeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphInner::default()),
            normalizer: NameNormalizer::new(),
            dirty: AtomicBool::new(false),
            changed: Notify::new(),
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        self.changed.notify_one();
    }

    /// Resolve an extracted name to an entity id, fuzzily.
    ///
    /// Candidates come from the normalized-name bucket only; the similarity
    /// comparison never scans the full entity set. A match increments
    /// mention_count and records the raw name as an alias; a miss inserts.
    pub fn resolve_entity(&self, name: &str, entity_type: &str) -> String {
        let normalized = self.normalizer.normalize(name);
        let key = self.normalizer.index_key(name);

        let mut inner = self.inner.write();

        if let Some(bucket) = inner.name_index.get(&key) {
            // Score the whole bucket at once; buckets are small by design
            let candidates: Vec<(&String, &str)> = bucket
                .iter()
                .filter_map(|id| {
                    inner
                        .entities
                        .get(id)
                        .map(|e| (id, e.normalized_name.as_str()))
                })
                .collect();
            let names: Vec<&str> = candidates.iter().map(|(_, name)| *name).collect();
            let matched = string_similarity_batch(&normalized, &names)
                .into_iter()
                .zip(&candidates)
                .find(|(score, _)| *score >= ENTITY_MATCH_THRESHOLD)
                .map(|(_, (id, _))| (*id).clone());

            if let Some(id) = matched {
                if let Some(entity) = inner.entities.get_mut(&id) {
                    entity.mention_count += 1;
                    if entity.normalized_name != normalized
                        && !entity.aliases.iter().any(|a| a == &normalized)
                    {
                        entity.aliases.push(normalized);
                    }
                }
                *inner.entity_mentions.entry(id.clone()).or_insert(0) += 1;
                drop(inner);
                self.mark_dirty();
                return id;
            }
        }

        let id = Uuid::new_v4().to_string();
        let entity = Entity {
            id: id.clone(),
            name: name.trim().to_string(),
            normalized_name: normalized,
            entity_type: entity_type.to_string(),
            mention_count: 1,
            aliases: Vec::new(),
        };
        inner.entities.insert(id.clone(), entity);
        inner.name_index.entry(key).or_default().push(id.clone());
        inner.entity_mentions.insert(id.clone(), 1);
        drop(inner);
        self.mark_dirty();
        id
    }

    /// Insert or reinforce a relation between two existing entities.
    ///
    /// A duplicate bumps the co-occurrence counters instead of inserting.
    pub fn add_relation(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: &str,
    ) -> Result<String> {
        let mut inner = self.inner.write();

        if !inner.entities.contains_key(source_id) {
            return Err(MemoryError::EntityNotFound(source_id.to_string()));
        }
        if !inner.entities.contains_key(target_id) {
            return Err(MemoryError::EntityNotFound(target_id.to_string()));
        }

        let id = format!("{source_id}--{relation_type}-->{target_id}");
        let pair = pair_key(source_id, target_id);
        *inner.cooccurrence.entry(pair).or_insert(0) += 1;

        if let Some(relation) = inner.relations.get_mut(&id) {
            relation.cooccurrence_count += 1;
        } else {
            inner.relations.insert(
                id.clone(),
                Relation {
                    id: id.clone(),
                    source_id: source_id.to_string(),
                    target_id: target_id.to_string(),
                    relation_type: relation_type.to_string(),
                    weight: 0.5,
                    cooccurrence_count: 1,
                },
            );
            inner
                .relation_index
                .entry(source_id.to_string())
                .or_default()
                .push(id.clone());
            inner
                .relation_index
                .entry(target_id.to_string())
                .or_default()
                .push(id.clone());
        }

        drop(inner);
        self.mark_dirty();
        Ok(id)
    }

    /// Record which entities a memory references, backing connection counts
    pub fn link_memory(&self, memory_id: Uuid, entity_ids: &[String]) {
        let mut inner = self.inner.write();
        inner
            .memory_refs
            .entry(memory_id)
            .or_default()
            .extend(entity_ids.iter().cloned());
        drop(inner);
        self.mark_dirty();
    }

    /// Drop references from removed memories; entities persist
    pub fn unlink_memories(&self, memory_ids: &[Uuid]) {
        let mut inner = self.inner.write();
        for id in memory_ids {
            inner.memory_refs.remove(id);
        }
        drop(inner);
        self.mark_dirty();
    }

    /// Number of relations touching the entities a memory references
    pub fn connection_count(&self, memory_id: Uuid) -> u32 {
        let inner = self.inner.read();
        let Some(entity_ids) = inner.memory_refs.get(&memory_id) else {
            return 0;
        };
        let mut seen: HashSet<&String> = HashSet::new();
        for entity_id in entity_ids {
            if let Some(relation_ids) = inner.relation_index.get(entity_id) {
                seen.extend(relation_ids.iter());
            }
        }
        seen.len() as u32
    }

    /// Breadth-first neighbor search bounded by depth.
    ///
    /// Returns all entity ids reachable from the start set within
    /// `max_depth` hops, excluding the starts themselves. Relations
    /// referencing a missing entity are pruned in place and logged.
    pub fn bfs_neighbors(&self, start_entities: &[String], max_depth: usize) -> HashSet<String> {
        let mut inner = self.inner.write();
        let mut visited: HashSet<String> = start_entities.iter().cloned().collect();
        let mut queue: VecDeque<(String, usize)> = start_entities
            .iter()
            .filter(|id| inner.entities.contains_key(*id))
            .map(|id| (id.clone(), 0))
            .collect();
        let mut dangling: Vec<String> = Vec::new();

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }

            let relation_ids = match inner.relation_index.get(&node) {
                Some(ids) => ids.clone(),
                None => continue,
            };

            for relation_id in relation_ids {
                let Some(relation) = inner.relations.get(&relation_id) else {
                    continue;
                };
                let other = if relation.source_id == node {
                    relation.target_id.clone()
                } else {
                    relation.source_id.clone()
                };

                if !inner.entities.contains_key(&other) {
                    dangling.push(relation_id);
                    continue;
                }

                if visited.insert(other.clone()) {
                    queue.push_back((other, depth + 1));
                }
            }
        }

        // Lazy pruning: dangling edges are dropped here, not eagerly on delete
        if !dangling.is_empty() {
            warn!(count = dangling.len(), "MEM pruning dangling relations");
            for relation_id in &dangling {
                Self::remove_relation_inner(&mut inner, relation_id);
            }
        }

        for id in start_entities {
            visited.remove(id);
        }

        drop(inner);
        if !dangling.is_empty() {
            self.mark_dirty();
        }
        visited
    }

    /// Shortest path between two entities via BFS, bounded by depth
    pub fn find_path(
        &self,
        source_id: &str,
        target_id: &str,
        max_depth: usize,
    ) -> Option<Vec<String>> {
        let inner = self.inner.read();
        if !inner.entities.contains_key(source_id) || !inner.entities.contains_key(target_id) {
            return None;
        }
        if source_id == target_id {
            return Some(vec![source_id.to_string()]);
        }

        let mut parent: HashMap<String, String> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(source_id.to_string());
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((source_id.to_string(), 0));

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(relation_ids) = inner.relation_index.get(&node) else {
                continue;
            };
            for relation_id in relation_ids {
                let Some(relation) = inner.relations.get(relation_id) else {
                    continue;
                };
                let other = if relation.source_id == node {
                    &relation.target_id
                } else {
                    &relation.source_id
                };
                if !inner.entities.contains_key(other) || !visited.insert(other.clone()) {
                    continue;
                }
                parent.insert(other.clone(), node.clone());

                if other == target_id {
                    let mut path = vec![target_id.to_string()];
                    let mut current = target_id.to_string();
                    while let Some(p) = parent.get(&current) {
                        path.push(p.clone());
                        current = p.clone();
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back((other.clone(), depth + 1));
            }
        }

        None
    }

    /// Recompute relation weights from co-occurrence statistics.
    ///
    /// Single pass: a pre-pass accumulates each entity's distinct
    /// co-occurrence partner count, then every relation is re-weighted as
    /// `clamp(0.7 * tf * idf + 0.3 * baseline, 0, 1)`. Never per-pair in a
    /// nested loop.
    pub fn recalculate_weights(&self) {
        let mut inner = self.inner.write();
        let total_entities = inner.entities.len();
        if total_entities == 0 {
            return;
        }

        let mut partner_counts: HashMap<String, u64> = HashMap::new();
        for (a, b) in inner.cooccurrence.keys() {
            *partner_counts.entry(a.clone()).or_insert(0) += 1;
            *partner_counts.entry(b.clone()).or_insert(0) += 1;
        }

        let cooccurrence = inner.cooccurrence.clone();
        let entity_mentions = inner.entity_mentions.clone();

        for relation in inner.relations.values_mut() {
            let pair = pair_key(&relation.source_id, &relation.target_id);
            let pair_count = cooccurrence.get(&pair).copied().unwrap_or(0) as f64;
            let source_mentions = entity_mentions
                .get(&relation.source_id)
                .copied()
                .unwrap_or(0)
                .max(1) as f64;
            let partners = partner_counts
                .get(&relation.source_id)
                .copied()
                .unwrap_or(0) as f64;

            let tf = pair_count / source_mentions;
            let idf = (total_entities as f64 / (1.0 + partners)).ln().max(0.0);

            relation.weight = (TFIDF_WEIGHT_SHARE * tf * idf
                + BASELINE_WEIGHT_SHARE * relation.weight)
                .clamp(0.0, 1.0);
        }

        drop(inner);
        self.mark_dirty();
        debug!("MEM relation weights recalculated");
    }

    fn remove_relation_inner(inner: &mut GraphInner, relation_id: &str) {
        if let Some(relation) = inner.relations.remove(relation_id) {
            for endpoint in [&relation.source_id, &relation.target_id] {
                if let Some(ids) = inner.relation_index.get_mut(endpoint) {
                    ids.retain(|id| id != relation_id);
                }
            }
        }
    }

    pub fn get_entity(&self, entity_id: &str) -> Option<Entity> {
        self.inner.read().entities.get(entity_id).cloned()
    }

    /// Read-only fuzzy lookup by name; never inserts
    pub fn find_entities_by_name(&self, name: &str) -> Vec<Entity> {
        let normalized = self.normalizer.normalize(name);
        let key = self.normalizer.index_key(name);
        let inner = self.inner.read();
        inner
            .name_index
            .get(&key)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter_map(|id| inner.entities.get(id))
                    .filter(|e| {
                        string_similarity(&e.normalized_name, &normalized)
                            >= ENTITY_MATCH_THRESHOLD
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Memory ids referencing any of the given entities
    pub fn memories_for_entities(&self, entity_ids: &HashSet<String>) -> HashSet<Uuid> {
        let inner = self.inner.read();
        inner
            .memory_refs
            .iter()
            .filter(|(_, linked)| !linked.is_disjoint(entity_ids))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Relations touching an entity
    pub fn relations_for(&self, entity_id: &str) -> Vec<Relation> {
        let inner = self.inner.read();
        inner
            .relation_index
            .get(entity_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.relations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_stats(&self) -> GraphStats {
        let inner = self.inner.read();
        let mut entities_by_type: HashMap<String, usize> = HashMap::new();
        for entity in inner.entities.values() {
            *entities_by_type.entry(entity.entity_type.clone()).or_insert(0) += 1;
        }
        let entity_count = inner.entities.len();
        let relation_count = inner.relations.len();
        GraphStats {
            entity_count,
            relation_count,
            entities_by_type,
            avg_connections: if entity_count == 0 {
                0.0
            } else {
                2.0 * relation_count as f64 / entity_count as f64
            },
        }
    }

    /// Serialize the full graph state
    pub fn snapshot(&self) -> GraphSnapshot {
        let inner = self.inner.read();
        GraphSnapshot {
            entities: inner.entities.values().cloned().collect(),
            relations: inner.relations.values().cloned().collect(),
            cooccurrence: inner
                .cooccurrence
                .iter()
                .map(|((a, b), count)| (format!("{a}||{b}"), *count))
                .collect(),
            entity_mentions: inner.entity_mentions.clone(),
            memory_refs: inner
                .memory_refs
                .iter()
                .map(|(id, set)| (*id, set.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Replace graph state from a snapshot, rebuilding all indexes
    pub fn restore(&self, snapshot: GraphSnapshot) {
        let mut inner = self.inner.write();
        *inner = GraphInner::default();

        for entity in snapshot.entities {
            let key = self.normalizer.index_key(&entity.name);
            inner
                .name_index
                .entry(key)
                .or_default()
                .push(entity.id.clone());
            inner.entities.insert(entity.id.clone(), entity);
        }
        for relation in snapshot.relations {
            inner
                .relation_index
                .entry(relation.source_id.clone())
                .or_default()
                .push(relation.id.clone());
            inner
                .relation_index
                .entry(relation.target_id.clone())
                .or_default()
                .push(relation.id.clone());
            inner.relations.insert(relation.id.clone(), relation);
        }
        for (key, count) in snapshot.cooccurrence {
            if let Some((a, b)) = key.split_once("||") {
                inner
                    .cooccurrence
                    .insert((a.to_string(), b.to_string()), count);
            }
        }
        inner.entity_mentions = snapshot.entity_mentions;
        inner.memory_refs = snapshot
            .memory_refs
            .into_iter()
            .map(|(id, list)| (id, list.into_iter().collect()))
            .collect();
    }

    /// Write the snapshot to disk now
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        let json = serde_json::to_string(&snapshot)?;
        std::fs::write(path, json)?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Load a graph from a snapshot file; a missing file yields an empty graph
    pub fn load_from(path: &Path) -> Result<Self> {
        let graph = Self::new();
        match std::fs::read_to_string(path) {
            Ok(json) => {
                let snapshot: GraphSnapshot = serde_json::from_str(&json)?;
                graph.restore(snapshot);
                info!(path = %path.display(), "MEM graph snapshot loaded");
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "MEM no graph snapshot, starting empty");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(graph)
    }
}

/// Debounced write-behind persister for the graph snapshot.
///
/// Mutations notify the writer task; it waits out a quiet window so a burst
/// of mutations coalesces into one JSON write. Durability is last-writer-wins
/// with a guaranteed flush on shutdown, a deliberate simplification.
pub struct GraphWriter {
    graph: Arc<KnowledgeGraph>,
    path: PathBuf,
    handle: JoinHandle<()>,
}

impl GraphWriter {
    pub fn spawn(graph: Arc<KnowledgeGraph>, path: PathBuf) -> Self {
        let task_graph = graph.clone();
        let task_path = path.clone();
        let handle = tokio::spawn(async move {
            loop {
                task_graph.changed.notified().await;
                tokio::time::sleep(Duration::from_millis(GRAPH_WRITE_DEBOUNCE_MS)).await;
                if task_graph.dirty.load(Ordering::Acquire) {
                    if let Err(err) = task_graph.save_to(&task_path) {
                        warn!("MEM graph snapshot write failed: {err}");
                    } else {
                        debug!("MEM graph snapshot flushed (debounced)");
                    }
                }
            }
        });
        Self {
            graph,
            path,
            handle,
        }
    }

    /// Flush immediately, then stop the background task
    pub async fn shutdown(self) -> Result<()> {
        self.handle.abort();
        if self.graph.dirty.load(Ordering::Acquire) {
            self.graph.save_to(&self.path)?;
            info!("MEM graph snapshot flushed on shutdown");
        }
        Ok(())
    }
}
