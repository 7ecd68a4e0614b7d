//! LRU embedding cache with deterministic keys and bounded provider concurrency
//!
//! Embedding the same content twice is pure waste; the cache keys on a SHA256
//! of a bounded content prefix plus the task type. SHA256 rather than the
//! runtime hasher: keys must be stable across restarts so a persisted cache
//! or log stays meaningful. Eviction is true LRU on access order, not FIFO on
//! insertion order.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::constants::{CACHE_KEY_PREFIX_BYTES, PROVIDER_MAX_RETRIES, PROVIDER_RETRY_BACKOFF_MS};
use crate::errors::{MemoryError, Result};
use crate::providers::EmbeddingProvider;
use crate::record::TaskType;

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Deduplicating LRU cache in front of an embedding provider
pub struct EmbeddingCache {
    cache: Mutex<LruCache<String, Vec<f32>>>,
    provider: Arc<dyn EmbeddingProvider>,
    /// Bounds concurrent provider calls; waiting suspends cooperatively
    rate_limiter: Semaphore,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        capacity: usize,
        max_concurrent: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            provider,
            rate_limiter: Semaphore::new(max_concurrent.max(1)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Deterministic cache key: SHA256 over a bounded content prefix + task type
    fn cache_key(text: &str, task_type: TaskType) -> String {
        let prefix = &text.as_bytes()[..text.len().min(CACHE_KEY_PREFIX_BYTES)];
        let digest = Sha256::digest(prefix);
        format!("{:x}:{}", digest, task_type.as_str())
    }

    /// Get an embedding, serving from cache when possible.
    ///
    /// A hit promotes the entry to most-recently-used. A miss calls the
    /// provider under the rate limiter with bounded retry, then inserts,
    /// evicting the least-recently-used entry at capacity.
    pub async fn get_embedding(&self, text: &str, task_type: TaskType) -> Result<Vec<f32>> {
        let key = Self::cache_key(text, task_type);
        let expected_dim = self.provider.dimension();

        // LruCache::get promotes to MRU
        if let Some(vector) = self.cache.lock().get(&key).cloned() {
            if vector.len() == expected_dim {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(vector);
            }
            // Corrupt entry: drop it and fall through to recomputation
            warn!(
                key = %key,
                got = vector.len(),
                expected = expected_dim,
                "MEM cache entry has wrong dimension, degrading to miss"
            );
            self.cache.lock().pop(&key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);

        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| MemoryError::Storage("rate limiter closed".to_string()))?;

        let vector = self.embed_with_retry(text, task_type).await?;

        if vector.len() != expected_dim {
            return Err(MemoryError::CacheCorruption(format!(
                "provider returned {} dims, expected {}",
                vector.len(),
                expected_dim
            )));
        }

        self.cache.lock().put(key, vector.clone());
        Ok(vector)
    }

    async fn embed_with_retry(&self, text: &str, task_type: TaskType) -> Result<Vec<f32>> {
        let mut backoff = Duration::from_millis(PROVIDER_RETRY_BACKOFF_MS);
        let mut last_err = None;

        for attempt in 0..=PROVIDER_MAX_RETRIES {
            match self.provider.embed(text, task_type.as_str()).await {
                Ok(vector) => return Ok(vector),
                Err(err) if err.is_transient() && attempt < PROVIDER_MAX_RETRIES => {
                    debug!(
                        provider = self.provider.name(),
                        attempt,
                        "MEM embed retry after transient failure: {err}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            MemoryError::TransientProvider {
                provider: self.provider.name().to_string(),
                reason: "retries exhausted".to_string(),
            }
        }))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingProvider {
        calls: AtomicUsize,
        dim: usize,
    }

    impl CountingProvider {
        fn new(dim: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                dim,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str, _task_type: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Deterministic pseudo-embedding from content length
            let seed = text.len() as f32;
            Ok((0..self.dim).map(|i| seed + i as f32).collect())
        }

        fn dimension(&self) -> usize {
            self.dim
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn cache_with(capacity: usize) -> (Arc<CountingProvider>, EmbeddingCache) {
        let provider = Arc::new(CountingProvider::new(4));
        let cache = EmbeddingCache::new(provider.clone(), capacity, 2);
        (provider, cache)
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let (provider, cache) = cache_with(10);

        let first = cache
            .get_embedding("hello", TaskType::RetrievalDocument)
            .await
            .unwrap();
        let second = cache
            .get_embedding("hello", TaskType::RetrievalDocument)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_task_type_separates_keys() {
        let (provider, cache) = cache_with(10);

        cache
            .get_embedding("hello", TaskType::RetrievalDocument)
            .await
            .unwrap();
        cache
            .get_embedding("hello", TaskType::RetrievalQuery)
            .await
            .unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_true_lru_eviction() {
        // Capacity 2: insert A, insert B, access A, insert C.
        // B is the least recently used, so B is evicted; A and C remain.
        let (provider, cache) = cache_with(2);

        cache
            .get_embedding("A", TaskType::RetrievalDocument)
            .await
            .unwrap();
        cache
            .get_embedding("BB", TaskType::RetrievalDocument)
            .await
            .unwrap();
        cache
            .get_embedding("A", TaskType::RetrievalDocument)
            .await
            .unwrap(); // promote A
        cache
            .get_embedding("CCC", TaskType::RetrievalDocument)
            .await
            .unwrap(); // evicts B

        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        // A and C hit; B misses again
        cache
            .get_embedding("A", TaskType::RetrievalDocument)
            .await
            .unwrap();
        cache
            .get_embedding("CCC", TaskType::RetrievalDocument)
            .await
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        cache
            .get_embedding("BB", TaskType::RetrievalDocument)
            .await
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_key_uses_bounded_prefix() {
        // Texts identical in their first 500 bytes share a cache entry
        let (provider, cache) = cache_with(10);
        let base = "x".repeat(600);
        let longer = format!("{}{}", "x".repeat(600), "tail");

        cache
            .get_embedding(&base, TaskType::RetrievalDocument)
            .await
            .unwrap();
        cache
            .get_embedding(&longer, TaskType::RetrievalDocument)
            .await
            .unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_on_transient_failure() {
        struct FlakyProvider {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl EmbeddingProvider for FlakyProvider {
            async fn embed(&self, _text: &str, _task_type: &str) -> Result<Vec<f32>> {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(MemoryError::TransientProvider {
                        provider: "flaky".to_string(),
                        reason: "rate limit".to_string(),
                    })
                } else {
                    Ok(vec![1.0, 2.0])
                }
            }

            fn dimension(&self) -> usize {
                2
            }

            fn name(&self) -> &'static str {
                "flaky"
            }
        }

        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
        });
        let cache = EmbeddingCache::new(provider.clone(), 10, 2);

        let vector = cache
            .get_embedding("hi", TaskType::RetrievalDocument)
            .await
            .unwrap();
        assert_eq!(vector, vec![1.0, 2.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
