//! Structured error types with machine-readable codes
//!
//! Transient provider failures, storage batch failures, cache corruption and
//! graph inconsistencies each carry a distinct recovery policy; the variants
//! here keep those policies decidable at the call site.

use std::fmt;
use uuid::Uuid;

/// Engine error types with proper categorization
#[derive(Debug)]
pub enum MemoryError {
    // Validation
    InvalidInput { field: String, reason: String },
    EntityNotFound(String),

    // Transient provider failures (embedding/generation): retried with
    // bounded backoff; exhausted retries skip the item and report it
    TransientProvider { provider: String, reason: String },
    ProviderTimeout { provider: String, after_secs: u64 },

    // Storage failures: fatal for the batch, but succeeded ids are reported
    Storage(String),
    BatchFailed { reason: String, succeeded: Vec<Uuid> },

    // Malformed cache entry: degrades to a miss, never a crash
    CacheCorruption(String),

    // Relation referencing a missing entity: pruned lazily, logged
    GraphInconsistency(String),

    Serialization(String),

    // Generic wrapper for external errors
    Internal(anyhow::Error),
}

impl MemoryError {
    /// Get error code for log/client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::EntityNotFound(_) => "ENTITY_NOT_FOUND",
            Self::TransientProvider { .. } => "TRANSIENT_PROVIDER",
            Self::ProviderTimeout { .. } => "PROVIDER_TIMEOUT",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::BatchFailed { .. } => "BATCH_FAILED",
            Self::CacheCorruption(_) => "CACHE_CORRUPTION",
            Self::GraphInconsistency(_) => "GRAPH_INCONSISTENCY",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a bounded retry is worthwhile
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientProvider { .. } | Self::ProviderTimeout { .. }
        )
    }

    /// Get detailed error message
    pub fn message(&self) -> String {
        match self {
            Self::InvalidInput { field, reason } => {
                format!("Invalid input for field '{field}': {reason}")
            }
            Self::EntityNotFound(id) => format!("Entity not found: {id}"),
            Self::TransientProvider { provider, reason } => {
                format!("Transient failure from provider '{provider}': {reason}")
            }
            Self::ProviderTimeout {
                provider,
                after_secs,
            } => format!("Provider '{provider}' timed out after {after_secs}s"),
            Self::Storage(msg) => format!("Storage error: {msg}"),
            Self::BatchFailed { reason, succeeded } => format!(
                "Batch failed after {} successful item(s): {reason}",
                succeeded.len()
            ),
            Self::CacheCorruption(msg) => format!("Cache entry corrupt: {msg}"),
            Self::GraphInconsistency(msg) => format!("Graph inconsistency: {msg}"),
            Self::Serialization(msg) => format!("Serialization error: {msg}"),
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for MemoryError {}

impl From<anyhow::Error> for MemoryError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for MemoryError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Type alias for Results using MemoryError
pub type Result<T> = std::result::Result<T, MemoryError>;
