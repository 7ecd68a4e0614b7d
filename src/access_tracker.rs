//! Batched access tracking
//!
//! Every query result is an access, but writing `last_accessed_at` per read
//! would double the storage traffic. Touches accumulate here and flush as a
//! single batched metadata update once enough are pending or enough time has
//! passed.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::constants::{ACCESS_FLUSH_INTERVAL_SECS, ACCESS_FLUSH_THRESHOLD};
use crate::errors::Result;
use crate::storage::{BatchReport, MemoryStore, MetadataUpdate};

pub struct AccessTracker {
    /// Pending touch counts per memory id
    pending: DashMap<Uuid, u32>,
    last_flush: Mutex<Instant>,
    flush_threshold: usize,
}

impl AccessTracker {
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            pending: DashMap::new(),
            last_flush: Mutex::new(Instant::now()),
            flush_threshold,
        }
    }

    /// Record one access; returns true when a flush is due
    pub fn record_access(&self, id: Uuid) -> bool {
        *self.pending.entry(id).or_insert(0) += 1;
        self.pending.len() >= self.flush_threshold
            || self.last_flush.lock().elapsed().as_secs() >= ACCESS_FLUSH_INTERVAL_SECS
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Commit all pending touches as one batched update
    pub async fn flush(&self, store: &Arc<dyn MemoryStore>) -> Result<BatchReport> {
        let now = Utc::now();
        let keys: Vec<Uuid> = self.pending.iter().map(|e| *e.key()).collect();
        let mut updates = Vec::with_capacity(keys.len());
        for id in keys {
            if let Some((_, count)) = self.pending.remove(&id) {
                updates.push(MetadataUpdate::new(id).touch(now, count));
            }
        }
        *self.last_flush.lock() = Instant::now();

        if updates.is_empty() {
            return Ok(BatchReport::default());
        }

        debug!(touches = updates.len(), "MEM flush access updates");
        store.update_batch(updates).await
    }
}

impl Default for AccessTracker {
    fn default() -> Self {
        Self::new(ACCESS_FLUSH_THRESHOLD)
    }
}
