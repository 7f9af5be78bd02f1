//! Embedder contract and the batching adapter in front of it.
//!
//! The core never talks to a model provider directly; it sees only the
//! [`Embedder`] trait. The [`BatchedEmbedder`] adapter slices inputs into
//! batches, runs the batches concurrently, retries transient failures with
//! exponential backoff, enforces the per-call timeout, and L2-normalizes
//! every vector before anything downstream can observe it.

pub mod offline;

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pipeline::CancelToken;
use crate::stats;

/// Maximum attempts for one embedding batch.
pub const MAX_EMBED_ATTEMPTS: u32 = 3;
/// Base delay for exponential backoff between attempts.
pub const EMBED_BACKOFF_BASE_MS: u64 = 200;

/// Batched text-to-vector contract.
///
/// Implementations must preserve input order and be deterministic for a
/// given model id.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Stable identifier of the embedding model.
    fn model_id(&self) -> &str;
}

/// Contiguous arena of fixed-dimension embeddings, indexed by slot.
///
/// Embeddings dominate the run's memory; keeping them in one allocation and
/// handing out `&[f32]` slices keeps every downstream stage pointer-stable
/// and id-free.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingStore {
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    /// Build a store from row vectors, validating dimension consistency.
    pub fn from_vectors(vectors: Vec<Vec<f32>>) -> Result<Self> {
        let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
        let mut store = Self::new(dim);
        for v in vectors {
            store.push(&v)?;
        }
        Ok(store)
    }

    /// Append a vector; returns its slot index.
    pub fn push(&mut self, vector: &[f32]) -> Result<usize> {
        if self.dim == 0 {
            self.dim = vector.len();
        }
        if vector.len() != self.dim {
            return Err(Error::Invariant(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.dim,
                vector.len()
            )));
        }
        let slot = self.len();
        self.data.extend_from_slice(vector);
        Ok(slot)
    }

    pub fn get(&self, slot: usize) -> &[f32] {
        &self.data[slot * self.dim..(slot + 1) * self.dim]
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

/// Batching/retry adapter over an [`Embedder`].
#[derive(Clone)]
pub struct BatchedEmbedder {
    inner: Arc<dyn Embedder>,
    batch_size: usize,
    call_timeout: Duration,
}

impl BatchedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, batch_size: usize, call_timeout_ms: u64) -> Self {
        Self {
            inner,
            batch_size: batch_size.max(1),
            call_timeout: Duration::from_millis(call_timeout_ms),
        }
    }

    /// Embed all texts, batching transparently. Output order matches input
    /// order regardless of batch completion order; every vector comes back
    /// L2-normalized.
    pub async fn embed_all(
        &self,
        texts: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batches: Vec<&[String]> = texts.chunks(self.batch_size).collect();
        let futures = batches
            .iter()
            .enumerate()
            .map(|(index, batch)| self.embed_batch(index, batch, cancel));
        let mut out = Vec::with_capacity(texts.len());
        for result in join_all(futures).await {
            out.extend(result?);
        }
        if out.len() != texts.len() {
            return Err(Error::Invariant(format!(
                "embedder returned {} vectors for {} texts",
                out.len(),
                texts.len()
            )));
        }
        Ok(out)
    }

    async fn embed_batch(
        &self,
        index: usize,
        batch: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<f32>>> {
        let mut last_error = String::new();
        for attempt in 0..MAX_EMBED_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(Error::cancelled("embedding"));
            }
            if attempt > 0 {
                let delay = EMBED_BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
                debug!(batch = index, attempt, delay_ms = delay, "retrying embed batch");
                sleep(Duration::from_millis(delay)).await;
            }
            // Race the in-flight call against cancellation so a cancel
            // aborts the request instead of waiting it out.
            let call = timeout(self.call_timeout, self.inner.embed(batch));
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::cancelled("embedding")),
                outcome = call => outcome,
            };
            match outcome {
                Ok(Ok(mut vectors)) => {
                    if vectors.len() != batch.len() {
                        return Err(Error::Invariant(format!(
                            "embed batch {} returned {} vectors for {} texts",
                            index,
                            vectors.len(),
                            batch.len()
                        )));
                    }
                    for v in vectors.iter_mut() {
                        stats::l2_normalize(v);
                    }
                    return Ok(vectors);
                }
                Ok(Err(e)) => {
                    warn!(batch = index, attempt, error = %e, "embed batch failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(batch = index, attempt, "embed batch timed out");
                    last_error = format!("timeout after {}ms", self.call_timeout.as_millis());
                }
            }
        }
        Err(Error::embedding(last_error, MAX_EMBED_ATTEMPTS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingEmbedder {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(Error::embedding("transient transport failure", 1));
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0, 0.0]).collect())
        }

        fn model_id(&self) -> &str {
            "counting-test"
        }
    }

    #[test]
    fn test_store_slots_and_dimensions() {
        let mut store = EmbeddingStore::new(0);
        let a = store.push(&[1.0, 0.0]).unwrap();
        let b = store.push(&[0.0, 1.0]).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(store.len(), 2);
        assert_eq!(store.dim(), 2);
        assert_eq!(store.get(1), &[0.0, 1.0]);
        assert!(store.push(&[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_store_from_vectors() {
        let store = EmbeddingStore::from_vectors(vec![vec![1.0, 0.0], vec![0.5, 0.5]]).unwrap();
        assert_eq!(store.len(), 2);
        assert!(EmbeddingStore::from_vectors(vec![vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[tokio::test]
    async fn test_batching_preserves_order_and_normalizes() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let adapter = BatchedEmbedder::new(embedder, 2, 1_000);
        let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let vectors = adapter
            .embed_all(&texts, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(vectors.len(), 5);
        for (text, v) in texts.iter().zip(&vectors) {
            // Order: first component is the (normalized) text length.
            let expected = text.len() as f32 / ((text.len() * text.len()) as f32 + 1.0).sqrt();
            assert!((v[0] - expected).abs() < 1e-5);
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let adapter = BatchedEmbedder::new(embedder.clone(), 16, 1_000);
        let texts = vec!["hello".to_string()];
        let vectors = adapter
            .embed_all(&texts, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_embedding_error() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let adapter = BatchedEmbedder::new(embedder.clone(), 16, 1_000);
        let err = adapter
            .embed_all(&["x".to_string()], &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding { attempts, .. } if attempts == MAX_EMBED_ATTEMPTS));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), MAX_EMBED_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_cancellation_stops_embedding() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let adapter = BatchedEmbedder::new(embedder, 16, 1_000);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = adapter
            .embed_all(&["x".to_string()], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let adapter = BatchedEmbedder::new(embedder.clone(), 16, 1_000);
        let vectors = adapter.embed_all(&[], &CancelToken::new()).await.unwrap();
        assert!(vectors.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }
}
