pub mod text;
pub mod worker;

pub use text::{clean_text, compose_event_text, EmbeddingSource};
pub use worker::EmbeddingWorker;

use afisz_core::error::AfiszError;
use afisz_core::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use async_trait::async_trait;
use embed_client::{EmbedClient, EmbedError};

/// Seam over the embeddings provider; the worker and the similarity search
/// depend on this instead of the concrete client.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AfiszError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AfiszError>;
}

/// The embeddings client wrapped with the shared retry policy and a circuit
/// breaker. While the circuit is open, callers get
/// [`AfiszError::EmbeddingUnavailable`], which the read API maps to 503.
pub struct GuardedEmbedder {
    client: EmbedClient,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl GuardedEmbedder {
    pub fn new(client: EmbedClient, retry: RetryPolicy, breaker: CircuitBreakerConfig) -> Self {
        Self {
            client,
            retry,
            breaker: CircuitBreaker::new("embeddings", breaker),
        }
    }

    fn map_error(err: EmbedError) -> AfiszError {
        match err {
            // A wrong dimension means the model or deployment is
            // misconfigured; surface it as a configuration fault so the
            // operator sees it instead of a per-batch warning.
            EmbedError::Dimension { expected, got } => AfiszError::Config(format!(
                "embedding dimension mismatch: expected {expected}, got {got}"
            )),
            other => AfiszError::Embedding(other.to_string()),
        }
    }
}

#[async_trait]
impl EmbeddingService for GuardedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AfiszError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AfiszError::Embedding("no embedding in response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AfiszError> {
        if !self.breaker.try_acquire() {
            return Err(AfiszError::EmbeddingUnavailable);
        }
        let result = self
            .retry
            .run(|| self.client.embed_batch(texts), EmbedError::is_transient)
            .await;
        match result {
            Ok(vectors) => {
                self.breaker.record_success();
                Ok(vectors)
            }
            Err(err) => {
                if err.is_transient() {
                    self.breaker.record_failure();
                }
                Err(Self::map_error(err))
            }
        }
    }
}
