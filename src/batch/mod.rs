//! Request batching over size and time windows.
//!
//! Callers submit individual requests; a worker task accumulates them and
//! flushes a batch when either the size cap is reached or the window timer
//! (started at the first queued item) expires. Each caller receives exactly
//! the response at its own batch position. Batches are independent: a failed
//! flush rejects only its own members, and flushes run detached from the
//! accumulator so a slow batch never delays the next window.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Flush thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Flush immediately once this many requests are queued.
    pub max_size: usize,
    /// Flush a partial batch this long after its first request arrived.
    pub max_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 16,
            max_delay: Duration::from_millis(100),
        }
    }
}

/// Batch failure delivered to every member of the affected batch.
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    /// The processor rejected the whole batch.
    #[error("Batch processing failed: {0}")]
    Processor(String),

    /// The processor returned a different number of responses than requests.
    /// The whole batch fails because no positional mapping is trustworthy.
    #[error("Batch response count mismatch: expected {expected}, got {got}")]
    CountMismatch { expected: usize, got: usize },

    /// The batcher worker is gone.
    #[error("Batcher closed")]
    Closed,
}

/// Executes one accumulated batch.
///
/// Implementations must return responses positionally: response `i` answers
/// request `i`.
#[async_trait]
pub trait BatchProcessor: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    async fn process(
        &self,
        batch: Vec<Self::Request>,
    ) -> Result<Vec<Self::Response>, BatchError>;
}

type Submission<P> = (
    <P as BatchProcessor>::Request,
    oneshot::Sender<Result<<P as BatchProcessor>::Response, BatchError>>,
);

/// Accumulates requests and flushes them through a `BatchProcessor`.
///
/// Cloneable handle; the worker task exits when every handle is dropped,
/// flushing whatever is still queued.
pub struct Batcher<P: BatchProcessor> {
    tx: mpsc::UnboundedSender<Submission<P>>,
}

impl<P: BatchProcessor> Clone for Batcher<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<P: BatchProcessor> Batcher<P> {
    pub fn new(processor: Arc<P>, config: BatchConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(processor, config, rx));
        Self { tx }
    }

    /// Queue one request and wait for its response.
    pub async fn submit(&self, request: P::Request) -> Result<P::Response, BatchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .map_err(|_| BatchError::Closed)?;
        reply_rx.await.map_err(|_| BatchError::Closed)?
    }
}

async fn worker<P: BatchProcessor>(
    processor: Arc<P>,
    config: BatchConfig,
    mut rx: mpsc::UnboundedReceiver<Submission<P>>,
) {
    let max_size = config.max_size.max(1);

    loop {
        // Block until a batch opens.
        let Some(first) = rx.recv().await else {
            return;
        };
        let mut pending = vec![first];
        let deadline = Instant::now() + config.max_delay;

        // Fill until the size cap, the window timer, or channel close.
        let mut closed = false;
        while pending.len() < max_size {
            tokio::select! {
                item = rx.recv() => match item {
                    Some(item) => pending.push(item),
                    None => {
                        closed = true;
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        tracing::debug!(size = pending.len(), "flushing batch");
        metrics::histogram!("turnstile_batch_size").record(pending.len() as f64);
        // Detach the flush so the next batch's window opens immediately.
        tokio::spawn(flush(Arc::clone(&processor), pending));

        if closed {
            return;
        }
    }
}

async fn flush<P: BatchProcessor>(processor: Arc<P>, pending: Vec<Submission<P>>) {
    let (requests, replies): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
    let expected = requests.len();

    match processor.process(requests).await {
        Ok(responses) if responses.len() == expected => {
            for (reply, response) in replies.into_iter().zip(responses) {
                let _ = reply.send(Ok(response));
            }
        }
        Ok(responses) => {
            let error = BatchError::CountMismatch {
                expected,
                got: responses.len(),
            };
            tracing::warn!(%error, "rejecting whole batch");
            for reply in replies {
                let _ = reply.send(Err(error.clone()));
            }
        }
        Err(error) => {
            tracing::warn!(%error, size = expected, "batch flush failed");
            for reply in replies {
                let _ = reply.send(Err(error.clone()));
            }
        }
    }
}

/// Batch processor that folds individual embedding lookups into one
/// backend call.
pub struct EmbedProcessor {
    backend: Arc<dyn crate::provider::GenerativeBackend>,
    model: String,
}

impl EmbedProcessor {
    pub fn new(
        backend: Arc<dyn crate::provider::GenerativeBackend>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }
}

#[async_trait]
impl BatchProcessor for EmbedProcessor {
    type Request = String;
    type Response = Vec<f32>;

    async fn process(&self, batch: Vec<String>) -> Result<Vec<Vec<f32>>, BatchError> {
        self.backend
            .embed(&self.model, &batch)
            .await
            .map_err(|e| BatchError::Processor(e.to_string()))
    }
}
