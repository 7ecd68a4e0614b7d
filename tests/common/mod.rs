//! Shared test fixtures: deterministic providers and engine wiring
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use engram::providers::{EmbeddingProvider, GenerateOptions, GenerationProvider};
use engram::session::InMemorySessionStore;
use engram::storage::InMemoryStore;
use engram::{MemoryConfig, MemoryEngine, Result};

/// Deterministic embedder: one-hot axis keyed on content byte sum.
/// Identical text embeds identically; different text is usually orthogonal.
pub struct AxisProvider {
    pub calls: AtomicUsize,
}

impl AxisProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for AxisProvider {
    async fn embed(&self, text: &str, _task_type: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sum: usize = text.bytes().map(|b| b as usize).sum();
        let mut v = vec![0.0f32; 8];
        v[sum % 8] = 1.0;
        Ok(v)
    }

    fn dimension(&self) -> usize {
        8
    }

    fn name(&self) -> &'static str {
        "axis"
    }
}

/// Generator that always returns a confident JSON insight
pub struct ConfidentGenerator {
    pub calls: AtomicUsize,
}

impl ConfidentGenerator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GenerationProvider for ConfidentGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerateOptions,
        _timeout: Duration,
    ) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "{{\"insight\": \"stable insight {n}\", \"confidence\": 0.9}}"
        ))
    }

    fn name(&self) -> &'static str {
        "confident"
    }
}

pub struct TestEngine {
    pub engine: MemoryEngine,
    pub store: Arc<InMemoryStore>,
    pub sessions: Arc<InMemorySessionStore>,
    pub embedder: Arc<AxisProvider>,
    pub dir: TempDir,
}

/// Engine wired to in-memory stores and a fresh snapshot path
pub fn build_engine(config: Option<MemoryConfig>) -> TestEngine {
    let dir = TempDir::new().unwrap();
    let config = MemoryConfig {
        graph_snapshot_path: dir.path().join("graph.json"),
        ..config.unwrap_or_default()
    };
    let store = Arc::new(InMemoryStore::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let embedder = Arc::new(AxisProvider::new());
    let engine = MemoryEngine::new(
        config,
        store.clone(),
        embedder.clone(),
        Arc::new(ConfidentGenerator::new()),
        sessions.clone(),
    )
    .unwrap();
    TestEngine {
        engine,
        store,
        sessions,
        embedder,
        dir,
    }
}
