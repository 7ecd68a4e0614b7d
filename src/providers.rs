//! Collaborator traits for external providers
//!
//! Embedding and generation run against remote or on-device models; both are
//! abstracted behind async traits so the engine owns no transport. Providers
//! are long-lived and shared by `Arc`; no call path constructs a client per
//! invocation.

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::Result;

/// Options for a generation call
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: usize,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 512,
        }
    }
}

/// Trait for embedding providers
///
/// Implementations may fail with rate-limit or timeout errors; callers retry
/// transient failures with bounded backoff.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a text for the given task type
    async fn embed(&self, text: &str, task_type: &str) -> Result<Vec<f32>>;

    /// Embedding dimension produced by this provider
    fn dimension(&self) -> usize;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// Trait for generation providers (insight extraction, summarization)
///
/// Exposes both an async call and a blocking `generate_sync` wrapper for
/// synchronous call sites.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate text for a prompt under an enforced per-call timeout
    ///
    /// The timeout is enforced by the implementation, distinct from any
    /// transport-level timeout; callers additionally wrap calls in their own
    /// deadline when fanning out.
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        timeout: Duration,
    ) -> Result<String>;

    /// Blocking variant for callers outside an async context.
    ///
    /// Must not be called from an async task; run it on the blocking pool
    /// or a dedicated thread.
    fn generate_sync(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        timeout: Duration,
    ) -> Result<String> {
        futures::executor::block_on(self.generate(prompt, options, timeout))
    }

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoGenerator;

    #[async_trait]
    impl GenerationProvider for EchoGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _options: &GenerateOptions,
            _timeout: Duration,
        ) -> Result<String> {
            Ok(format!("echo: {prompt}"))
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    #[test]
    fn test_generate_sync_matches_async() {
        let provider = EchoGenerator;
        let out = provider
            .generate_sync("hello", &GenerateOptions::default(), Duration::from_secs(1))
            .unwrap();
        assert_eq!(out, "echo: hello");
    }
}
