//! Configuration management for the memory engine
//!
//! All configurable parameters in one place with environment variable overrides.
//! Follows the principle: sensible defaults, configurable in production.

use std::env;
use std::path::PathBuf;
use tracing::info;

use crate::constants::*;
use crate::record::MemoryType;

/// Decay model parameters
#[derive(Debug, Clone)]
pub struct DecayConfig {
    /// Base decay rate per hour
    pub base_decay_rate: f64,
    /// Floor as a fraction of original importance
    pub min_retention: f64,
    /// Access stability coefficient
    pub access_stability_k: f64,
    /// Relation resistance coefficient
    pub relation_resistance_k: f64,
    /// Channel diversity coefficient
    pub channel_diversity_k: f64,
    /// Per-type decay rate multipliers
    pub type_multipliers: TypeMultipliers,
}

/// Decay rate multipliers per memory type
///
/// Facts decay slowest (they stay true), conversations fastest.
#[derive(Debug, Clone)]
pub struct TypeMultipliers {
    pub conversation: f64,
    pub fact: f64,
    pub preference: f64,
    pub insight: f64,
}

impl TypeMultipliers {
    /// Exhaustive multiplier lookup for a memory type
    pub fn for_type(&self, memory_type: MemoryType) -> f64 {
        match memory_type {
            MemoryType::Conversation => self.conversation,
            MemoryType::Fact => self.fact,
            MemoryType::Preference => self.preference,
            MemoryType::Insight => self.insight,
        }
    }
}

impl Default for TypeMultipliers {
    fn default() -> Self {
        Self {
            conversation: 1.0,
            fact: 0.3,
            preference: 0.5,
            insight: 0.7,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            base_decay_rate: BASE_DECAY_RATE,
            min_retention: MIN_RETENTION,
            access_stability_k: ACCESS_STABILITY_K,
            relation_resistance_k: RELATION_RESISTANCE_K,
            channel_diversity_k: CHANNEL_DIVERSITY_K,
            type_multipliers: TypeMultipliers::default(),
        }
    }
}

impl DecayConfig {
    /// Load decay parameters from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("ENGRAM_DECAY_RATE") {
            if let Ok(n) = val.parse::<f64>() {
                config.base_decay_rate = n.clamp(0.0, 1.0);
            }
        }

        if let Ok(val) = env::var("ENGRAM_MIN_RETENTION") {
            if let Ok(n) = val.parse::<f64>() {
                config.min_retention = n.clamp(0.0, 1.0);
            }
        }

        config
    }
}

/// Engine configuration loaded from environment with defaults
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Path of the knowledge graph snapshot file
    pub graph_snapshot_path: PathBuf,

    /// Embedding cache capacity (entries, default: 1000)
    pub embedding_cache_capacity: usize,

    /// Maximum concurrent embedding provider calls (default: 4)
    pub embedding_max_concurrent: usize,

    /// Cosine similarity threshold for duplicate detection (default: 0.92)
    pub duplicate_threshold: f32,

    /// Pending access touches that trigger a batched flush (default: 50)
    pub access_flush_threshold: usize,

    /// Page size for the cursor-based eviction scan (default: 200)
    pub eviction_page_size: usize,

    /// Decayed-importance threshold for eviction eligibility (default: 0.1)
    pub eviction_threshold: f32,

    /// Decayed-importance threshold for the preserved flag (default: 0.7)
    pub preserve_threshold: f32,

    /// Hard cap on evictions per run (default: 100)
    ///
    /// Enforced unconditionally; bounds worst-case data loss from a
    /// misconfigured threshold.
    pub eviction_safety_cap: usize,

    /// Maximum concurrent generation calls during promotion (default: 3)
    pub promotion_max_concurrent: usize,

    /// Per-call generation timeout in seconds (default: 30)
    pub promotion_call_timeout_secs: u64,

    /// Session buffer capacity in messages (default: 200)
    pub session_capacity: usize,

    /// Decay parameters
    pub decay: DecayConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            graph_snapshot_path: PathBuf::from("./engram_graph.json"),
            embedding_cache_capacity: DEFAULT_EMBEDDING_CACHE_CAPACITY,
            embedding_max_concurrent: EMBEDDING_MAX_CONCURRENT,
            duplicate_threshold: DUPLICATE_SIMILARITY_THRESHOLD,
            access_flush_threshold: ACCESS_FLUSH_THRESHOLD,
            eviction_page_size: EVICTION_PAGE_SIZE,
            eviction_threshold: EVICTION_THRESHOLD,
            preserve_threshold: PRESERVE_THRESHOLD,
            eviction_safety_cap: EVICTION_SAFETY_CAP,
            promotion_max_concurrent: PROMOTION_MAX_CONCURRENT,
            promotion_call_timeout_secs: PROMOTION_CALL_TIMEOUT_SECS,
            session_capacity: DEFAULT_SESSION_CAPACITY,
            decay: DecayConfig::default(),
        }
    }
}

impl MemoryConfig {
    /// Load configuration from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)] // Environment overrides require mutable config
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("ENGRAM_GRAPH_PATH") {
            config.graph_snapshot_path = PathBuf::from(val);
        }

        if let Ok(val) = env::var("ENGRAM_CACHE_CAPACITY") {
            if let Ok(n) = val.parse::<usize>() {
                config.embedding_cache_capacity = n.max(1);
            }
        }

        if let Ok(val) = env::var("ENGRAM_EMBED_CONCURRENCY") {
            if let Ok(n) = val.parse::<usize>() {
                config.embedding_max_concurrent = n.clamp(1, 64);
            }
        }

        if let Ok(val) = env::var("ENGRAM_DUP_THRESHOLD") {
            if let Ok(n) = val.parse::<f32>() {
                config.duplicate_threshold = n.clamp(0.5, 1.0);
            }
        }

        if let Ok(val) = env::var("ENGRAM_EVICTION_PAGE_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                config.eviction_page_size = n.clamp(1, 10_000);
            }
        }

        if let Ok(val) = env::var("ENGRAM_EVICTION_CAP") {
            if let Ok(n) = val.parse::<usize>() {
                config.eviction_safety_cap = n;
            }
        }

        if let Ok(val) = env::var("ENGRAM_PROMOTION_CONCURRENCY") {
            if let Ok(n) = val.parse::<usize>() {
                config.promotion_max_concurrent = n.clamp(1, 16);
            }
        }

        if let Ok(val) = env::var("ENGRAM_SESSION_CAPACITY") {
            if let Ok(n) = val.parse::<usize>() {
                config.session_capacity = n.max(2);
            }
        }

        config.decay = DecayConfig::from_env();

        config
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("Configuration:");
        info!("   Graph snapshot: {:?}", self.graph_snapshot_path);
        info!(
            "   Embedding cache: {} entries, {} concurrent calls",
            self.embedding_cache_capacity, self.embedding_max_concurrent
        );
        info!("   Duplicate threshold: {:.2}", self.duplicate_threshold);
        info!(
            "   Eviction: page {}, threshold {:.2}, cap {}",
            self.eviction_page_size, self.eviction_threshold, self.eviction_safety_cap
        );
        info!(
            "   Promotion: {} concurrent, {}s timeout",
            self.promotion_max_concurrent, self.promotion_call_timeout_secs
        );
        info!(
            "   Decay: base rate {:.4}/h, retention floor {:.2}",
            self.decay.base_decay_rate, self.decay.min_retention
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MemoryConfig::default();
        assert_eq!(config.embedding_cache_capacity, 1000);
        assert_eq!(config.eviction_page_size, 200);
        assert_eq!(config.eviction_safety_cap, 100);
        assert!((config.duplicate_threshold - 0.92).abs() < f32::EPSILON);
    }

    #[test]
    fn test_env_override() {
        env::set_var("ENGRAM_CACHE_CAPACITY", "64");
        env::set_var("ENGRAM_EVICTION_CAP", "10");

        let config = MemoryConfig::from_env();
        assert_eq!(config.embedding_cache_capacity, 64);
        assert_eq!(config.eviction_safety_cap, 10);

        env::remove_var("ENGRAM_CACHE_CAPACITY");
        env::remove_var("ENGRAM_EVICTION_CAP");
    }

    #[test]
    fn test_type_multiplier_lookup() {
        let m = TypeMultipliers::default();
        assert!((m.for_type(MemoryType::Conversation) - 1.0).abs() < f64::EPSILON);
        assert!((m.for_type(MemoryType::Fact) - 0.3).abs() < f64::EPSILON);
        assert!((m.for_type(MemoryType::Preference) - 0.5).abs() < f64::EPSILON);
        assert!((m.for_type(MemoryType::Insight) - 0.7).abs() < f64::EPSILON);
    }
}
