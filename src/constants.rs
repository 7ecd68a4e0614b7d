//! Documented constants for the memory engine
//!
//! This module contains all tunable parameters with justification for their values.
//! Centralizing constants prevents magic numbers and makes tuning easier.

// =============================================================================
// DECAY MODEL CONSTANTS
// Importance decays exponentially with age, modulated by access history,
// graph connectivity, memory type, and channel diversity.
// =============================================================================

/// Base decay rate per hour
///
/// Justification:
/// - 0.002/hour halves an untouched conversation memory in ~14 days
/// - Slow enough that a week of silence keeps ~70% of importance
/// - All other factors scale this rate down, never up
pub const BASE_DECAY_RATE: f64 = 0.002;

/// Minimum retention floor as a fraction of original importance
///
/// Decayed importance never falls below `importance * MIN_RETENTION`,
/// so a memory can always be recovered by renewed access.
pub const MIN_RETENTION: f64 = 0.1;

/// Access stability coefficient
///
/// Each access slows decay logarithmically:
/// `stability = 1 + k * ln(1 + access_count)`.
///
/// Justification:
/// - Logarithmic so the 100th access matters far less than the 2nd
/// - k = 0.5 gives a 10x-accessed memory roughly twice the staying power
pub const ACCESS_STABILITY_K: f64 = 0.5;

/// Relation resistance coefficient
///
/// Graph connectivity resists decay linearly, capped at full resistance:
/// `resistance = min(1, connection_count * k)`.
///
/// Justification:
/// - k = 0.1 means 10 graph connections make a memory effectively permanent
/// - Well-connected memories are the skeleton of the knowledge graph
pub const RELATION_RESISTANCE_K: f64 = 0.1;

/// Channel diversity coefficient
///
/// A memory mentioned across more channels decays slower:
/// `channel_boost = 1 / (1 + k * channel_mentions)`.
pub const CHANNEL_DIVERSITY_K: f64 = 0.2;

/// Recency-paradox boost multiplier
///
/// An old memory (age > one week) accessed within the last day is clearly
/// still relevant despite its age; its decayed score is boosted by 30%
/// before the retention floor is applied.
pub const RECENCY_PARADOX_BOOST: f64 = 1.3;

/// Age threshold (hours) for the recency-paradox boost
pub const RECENCY_PARADOX_MIN_AGE_HOURS: f64 = 168.0;

/// Last-access threshold (hours) for the recency-paradox boost
pub const RECENCY_PARADOX_MAX_ACCESS_HOURS: f64 = 24.0;

/// Batch decay chunk width
///
/// The batch path processes records in fixed-width chunks of the scalar
/// function. Chunking keeps cache lines hot without changing results:
/// batch output is bit-identical to per-element scalar calls.
pub const DECAY_BATCH_CHUNK: usize = 64;

// =============================================================================
// EMBEDDING CACHE CONSTANTS
// =============================================================================

/// Default embedding cache capacity (entries)
///
/// Justification:
/// - 1000 entries at 384 dims ≈ 1.5MB of vectors, cheap for the hit rate
/// - Conversation workloads re-embed the same content prefix constantly
pub const DEFAULT_EMBEDDING_CACHE_CAPACITY: usize = 1000;

/// Content prefix length (bytes) hashed into the cache key
///
/// Texts identical in their first 500 bytes embed to near-identical vectors;
/// hashing only the prefix bounds key computation on huge inputs.
pub const CACHE_KEY_PREFIX_BYTES: usize = 500;

/// Maximum concurrent embedding provider calls
///
/// Misses acquire a semaphore permit before calling out. Suspension is
/// cooperative; a full semaphore never blocks a scheduler thread.
pub const EMBEDDING_MAX_CONCURRENT: usize = 4;

/// Retry attempts for transient provider failures
pub const PROVIDER_MAX_RETRIES: u32 = 3;

/// Initial backoff (milliseconds) between provider retries, doubled per retry
pub const PROVIDER_RETRY_BACKOFF_MS: u64 = 200;

// =============================================================================
// KNOWLEDGE GRAPH CONSTANTS
// =============================================================================

/// Fuzzy entity resolution similarity threshold
///
/// Normalized names within this Levenshtein similarity merge into one entity.
///
/// Justification:
/// - 0.85 merges "postgres"/"postgre" but keeps "postgres"/"process" apart
/// - Applied only within the same normalized-name bucket, never globally
pub const ENTITY_MATCH_THRESHOLD: f64 = 0.85;

/// TF-IDF weight share in relation re-weighting
///
/// `new_weight = clamp(0.7 * tf * idf + 0.3 * baseline, 0, 1)`.
/// The baseline share keeps manually-seeded weights from vanishing.
pub const TFIDF_WEIGHT_SHARE: f64 = 0.7;
pub const BASELINE_WEIGHT_SHARE: f64 = 0.3;

/// Debounce window (milliseconds) for the graph snapshot writer
///
/// Rapid successive mutations coalesce into a single JSON write once the
/// graph has been quiet for this long. Shutdown flushes unconditionally.
pub const GRAPH_WRITE_DEBOUNCE_MS: u64 = 2000;

// =============================================================================
// FACADE / DEDUP CONSTANTS
// =============================================================================

/// Cosine similarity threshold for duplicate detection
///
/// Justification:
/// - 0.92 catches paraphrases of the same fact while keeping genuinely
///   distinct memories separate
/// - A duplicate merges counters on the existing record; it never inserts
pub const DUPLICATE_SIMILARITY_THRESHOLD: f32 = 0.92;

/// Pending access touches that trigger a batched flush
pub const ACCESS_FLUSH_THRESHOLD: usize = 50;

/// Maximum age (seconds) of pending access touches before a flush
pub const ACCESS_FLUSH_INTERVAL_SECS: u64 = 60;

// =============================================================================
// CONSOLIDATION / EVICTION CONSTANTS
// =============================================================================

/// Page size for the cursor-based eviction scan
///
/// Justification:
/// - 200 records per page bounds peak memory during a scan
/// - Full-table loads are never performed by the eviction path
pub const EVICTION_PAGE_SIZE: usize = 200;

/// Decayed-importance threshold below which a record is eviction-eligible
pub const EVICTION_THRESHOLD: f32 = 0.1;

/// Decayed-importance threshold above which a record is flagged preserved
pub const PRESERVE_THRESHOLD: f32 = 0.7;

/// Repetition count that preserves a record from eviction
pub const PRESERVE_REPETITIONS: u32 = 3;

/// Access count below which a record is eviction-eligible
pub const EVICTION_MAX_ACCESS_COUNT: u32 = 3;

/// Repetition count below which a record is eviction-eligible
pub const EVICTION_MAX_REPETITIONS: u32 = 2;

/// Minimum age (hours) before a record is eviction-eligible
pub const EVICTION_MIN_AGE_HOURS: f64 = 168.0;

/// Hard cap on evictions per run
///
/// Enforced unconditionally as a last-resort guard: a misconfigured
/// threshold can flag everything, but one run never deletes more than this.
pub const EVICTION_SAFETY_CAP: usize = 100;

/// Minimum age (days) before an episodic memory is promotion-eligible
pub const PROMOTION_MIN_AGE_DAYS: i64 = 2;

/// Minimum repetitions before an episodic memory is promotion-eligible
pub const PROMOTION_MIN_REPETITIONS: u32 = 2;

/// Minimum group size for topic-grouped semantic extraction
pub const PROMOTION_MIN_GROUP_SIZE: usize = 2;

/// Maximum concurrent generation calls during promotion
///
/// Fixed-size semaphore; promotion fan-out is never unbounded.
pub const PROMOTION_MAX_CONCURRENT: usize = 3;

/// Per-call timeout (seconds) for generation during promotion
pub const PROMOTION_CALL_TIMEOUT_SECS: u64 = 30;

/// Confidence below which an extracted insight is discarded
pub const PROMOTION_MIN_CONFIDENCE: f32 = 0.5;

/// Importance assigned to newly promoted semantic memories
pub const PROMOTED_IMPORTANCE: f32 = 0.8;

// =============================================================================
// SESSION CONSTANTS
// =============================================================================

/// Default session buffer capacity (messages)
pub const DEFAULT_SESSION_CAPACITY: usize = 200;
