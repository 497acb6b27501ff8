//! Embedding Gate: batched, retried, dimension-checked embedding of chunk texts.

use backoff::{backoff::Backoff, ExponentialBackoff};
use kbsync_config::Config;
use kbsync_core::{BackendError, EmbeddingBackend, Error, Result};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Batching and retry settings.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub batch_size: usize,
    /// Retries after the first attempt of a batch.
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Expected vector dimension; learned from the first response when unset.
    pub dimensions: Option<usize>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            max_retries: 4,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
            dimensions: None,
        }
    }
}

impl GateConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.sync.embed_batch_size.max(1),
            max_retries: config.sync.embed_max_retries,
            initial_interval: Duration::from_millis(config.sync.retry_initial_ms),
            max_interval: Duration::from_millis(config.sync.retry_max_ms),
            dimensions: config.ollama.dimensions,
        }
    }
}

/// Wraps an embedding backend so a file's chunks embed all-or-nothing.
pub struct EmbeddingGate {
    backend: Arc<dyn EmbeddingBackend>,
    config: GateConfig,
    dimensions: OnceLock<usize>,
}

impl EmbeddingGate {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, config: GateConfig) -> Self {
        let dimensions = OnceLock::new();
        if let Some(d) = config.dimensions {
            let _ = dimensions.set(d);
        }
        Self {
            backend,
            config,
            dimensions,
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Dimension every vector must have, once known.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions.get().copied()
    }

    /// Embed `texts`, returning one vector per text in the same order.
    ///
    /// Any batch failing after retries fails the whole call.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let embedded = self.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                return Err(Error::EmbeddingFailed(format!(
                    "backend returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                )));
            }
            for vector in &embedded {
                self.check_dimensions(vector)?;
            }
            vectors.extend(embedded);
        }

        Ok(vectors)
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        let expected = *self.dimensions.get_or_init(|| vector.len());
        if vector.len() != expected {
            return Err(Error::EmbeddingFailed(format!(
                "expected {} dimensions from {}, got {}",
                expected,
                self.backend.model_name(),
                vector.len()
            )));
        }
        Ok(())
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.initial_interval,
            max_interval: self.config.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();

        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!(attempt = attempts, texts = batch.len(), "Embedding batch");

            let err = match self.backend.embed(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => e,
            };

            if !err.is_transient() || attempts > self.config.max_retries {
                return Err(embedding_failed(err, attempts));
            }

            match backoff.next_backoff() {
                Some(delay) => {
                    warn!(
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "Embedding backend unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(embedding_failed(err, attempts)),
            }
        }
    }
}

fn embedding_failed(err: BackendError, attempts: u32) -> Error {
    Error::EmbeddingFailed(format!("{} (after {} attempts)", err, attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HashEmbedder;
    use kbsync_core::ErrorKind;

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text number {}", i)).collect()
    }

    fn gate(backend: Arc<HashEmbedder>, batch_size: usize) -> EmbeddingGate {
        EmbeddingGate::new(
            backend,
            GateConfig {
                batch_size,
                max_retries: 3,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let backend = Arc::new(HashEmbedder::new(4));
        let gate = gate(backend.clone(), 2);
        let input = texts(5);

        let vectors = gate.embed(&input).await.unwrap();

        assert_eq!(vectors.len(), 5);
        for (text, vector) in input.iter().zip(&vectors) {
            assert_eq!(vector, &HashEmbedder::vector_for(text, 4));
        }
        assert_eq!(backend.calls(), 3);
        assert_eq!(gate.dimensions(), Some(4));
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let backend = Arc::new(HashEmbedder::new(4));
        let vectors = gate(backend.clone(), 8).embed(&[]).await.unwrap();
        assert!(vectors.is_empty());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let backend = Arc::new(HashEmbedder::new(4));
        backend.fail_next(2, BackendError::Unavailable("rate limited".into()));

        let vectors = gate(backend.clone(), 8).embed(&texts(3)).await.unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let backend = Arc::new(HashEmbedder::new(4));
        backend.fail_next(10, BackendError::Unavailable("down".into()));

        let err = gate(backend.clone(), 8).embed(&texts(1)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EmbeddingFailed);
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let backend = Arc::new(HashEmbedder::new(4));
        backend.fail_next(1, BackendError::InvalidInput("bad".into()));

        let err = gate(backend.clone(), 8).embed(&texts(1)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EmbeddingFailed);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails() {
        let backend = Arc::new(HashEmbedder::new(4));
        let gate = EmbeddingGate::new(
            backend,
            GateConfig {
                dimensions: Some(8),
                ..Default::default()
            },
        );

        let err = gate.embed(&texts(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmbeddingFailed);
    }

    #[tokio::test]
    async fn test_failed_later_batch_fails_whole_call() {
        let backend = Arc::new(HashEmbedder::new(4));
        backend.fail_after(1, BackendError::InvalidInput("too long".into()));

        let err = gate(backend.clone(), 2).embed(&texts(4)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EmbeddingFailed);
        assert_eq!(backend.calls(), 2);
    }
}
