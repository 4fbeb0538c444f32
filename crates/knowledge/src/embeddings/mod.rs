//! Embedding generation.
//!
//! Providers turn text into vectors; `EmbeddingGenerator` wraps one provider
//! with batching, a per-call timeout, retries and output validation.

pub mod config;
pub mod provider;
pub mod providers;

pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding provider failed: {0}")]
    Provider(String),

    #[error("provider returned {got} vectors for {expected} inputs")]
    Count { expected: usize, got: usize },

    #[error("provider returned a {got}-dimensional vector, expected {expected}")]
    Dimension { expected: usize, got: usize },
}

impl EmbeddingError {
    /// Malformed output is not worth retrying.
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Provider(_))
    }
}

/// Batched, retrying front end to an `EmbeddingProvider`.
#[derive(Debug, Clone)]
pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    timeout: Duration,
    max_retries: u32,
    initial_backoff: Duration,
}

impl EmbeddingGenerator {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            batch_size: config.batch_size.max(1),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed any number of texts, `batch_size` per provider call.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::Count {
            expected: 1,
            got: 0,
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut attempt = 0u32;
        loop {
            match self.call_once(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let backoff = self.initial_backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "Embedding batch failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.max_retries + 1,
                        backoff,
                        err
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn call_once(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = tokio::time::timeout(self.timeout, self.provider.embed_batch(batch))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.timeout))?
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;

        if vectors.len() != batch.len() {
            return Err(EmbeddingError::Count {
                expected: batch.len(),
                got: vectors.len(),
            });
        }

        let expected = self.provider.dimensions();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(EmbeddingError::Dimension {
                expected,
                got: bad.len(),
            });
        }

        tracing::debug!(
            "Embedded batch of {} texts with {}",
            batch.len(),
            self.provider.model_name()
        );
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::TrigramProvider;
    use repomind_core::{AppError, AppResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then answers with fixed vectors.
    #[derive(Debug)]
    struct FlakyProvider {
        failures: usize,
        calls: AtomicUsize,
        batch_sizes: std::sync::Mutex<Vec<usize>>,
        dims: usize,
        returned_dims: usize,
    }

    impl FlakyProvider {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                batch_sizes: std::sync::Mutex::new(Vec::new()),
                dims: 4,
                returned_dims: 4,
            }
        }
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for FlakyProvider {
        fn provider_name(&self) -> &str {
            "flaky"
        }

        fn model_name(&self) -> &str {
            "flaky-v1"
        }

        fn dimensions(&self) -> usize {
            self.dims
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(texts.len());
            if call < self.failures {
                return Err(AppError::Llm("connection refused".to_string()));
            }
            Ok(texts.iter().map(|_| vec![0.5; self.returned_dims]).collect())
        }
    }

    fn fast_config() -> EmbeddingConfig {
        EmbeddingConfig {
            batch_size: 3,
            initial_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {}", i)).collect()
    }

    #[tokio::test]
    async fn test_batches_by_batch_size() {
        let provider = Arc::new(FlakyProvider::new(0));
        let generator = EmbeddingGenerator::new(provider.clone(), &fast_config());

        let vectors = generator.embed(&texts(7)).await.unwrap();
        assert_eq!(vectors.len(), 7);
        assert_eq!(*provider.batch_sizes.lock().unwrap(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let provider = Arc::new(FlakyProvider::new(2));
        let generator = EmbeddingGenerator::new(provider.clone(), &fast_config());

        let vectors = generator.embed(&texts(2)).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        let provider = Arc::new(FlakyProvider::new(10));
        let generator = EmbeddingGenerator::new(provider.clone(), &fast_config());

        let err = generator.embed(&texts(1)).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Provider(_)));
        // One call plus three retries.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_fatal() {
        let provider = Arc::new(FlakyProvider {
            returned_dims: 3,
            ..FlakyProvider::new(0)
        });
        let generator = EmbeddingGenerator::new(provider.clone(), &fast_config());

        let err = generator.embed(&texts(1)).await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::Dimension {
                expected: 4,
                got: 3
            }
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_query_embedding_is_deterministic() {
        let generator = EmbeddingGenerator::new(
            Arc::new(TrigramProvider::new(384)),
            &EmbeddingConfig::default(),
        );
        let a = generator.embed_query("where is the retry loop").await.unwrap();
        let b = generator.embed_query("where is the retry loop").await.unwrap();
        assert_eq!(a.len(), 384);
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-6));
    }
}
