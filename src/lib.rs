//! Long-term memory engine for a conversational assistant
//!
//! Stores, deduplicates, decays, consolidates and recalls memory records,
//! combining vector similarity search with a relational knowledge graph.
//!
//! Components, leaves first:
//! - [`embedding_cache`]: deduplicating LRU in front of the embedding provider
//! - [`graph`]: entity/relation arena with BFS traversal and TF-IDF weighting
//! - [`decay`]: pure importance decay, scalar and batch
//! - [`facade`]: the single add/query/dedup/stats entry point
//! - [`consolidation`]: periodic eviction and episodic-to-semantic promotion
//! - [`session`]: per-conversation buffer and recent-session repository
//!
//! External collaborators (embedding, generation, durable storage) are
//! async traits in [`providers`] and [`storage`]; the engine owns no
//! transport and no storage format.

pub mod access_tracker;
pub mod config;
pub mod consolidation;
pub mod constants;
pub mod decay;
pub mod embedding_cache;
pub mod engine;
pub mod errors;
pub mod facade;
pub mod graph;
pub mod providers;
pub mod record;
pub mod session;
pub mod similarity;
pub mod storage;
pub mod text;
pub mod tracing_setup;

pub use config::{DecayConfig, MemoryConfig};
pub use engine::MemoryEngine;
pub use errors::{MemoryError, Result};
pub use facade::{AddOptions, AddOutcome, MemoryStats, VectorMemory};
pub use record::{MemoryRecord, MemoryType, TaskType};

// Re-export dependencies to ensure tests use the same version
pub use chrono;
pub use uuid;
