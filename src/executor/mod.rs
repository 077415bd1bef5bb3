//! Request execution with retry, deadline, and cancellation.
//!
//! Every upstream call goes through `RequestExecutor`, which layers three
//! behaviors over the raw backend future:
//!
//! - automatic retry with exponential backoff, but only for transient
//!   failures (`ProviderError::is_retryable`)
//! - an overall deadline spanning all attempts
//! - cooperative cancellation via `CancellationToken`
//!
//! A result that settles in the same poll as a cancellation wins: the
//! operation branch is polled first, so callers never lose a completed
//! response to a late cancel.

use crate::provider::{ProviderError, StreamChunk};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Retry schedule for transient upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. 2 retries = at most 3 attempts.
    pub max_retries: u32,
    /// First backoff delay; doubles per retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based): base * 2^retry.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry)
    }
}

/// Per-call deadline and cancellation handle.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overall deadline covering every attempt and backoff sleep.
    pub timeout: Option<Duration>,
    /// Cooperative cancellation. A cancelled token rejects the call unless
    /// the operation has already settled.
    pub cancel: CancellationToken,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            timeout: None,
            cancel,
        }
    }
}

/// Terminal outcome of an executed call.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("Call exceeded deadline of {0:?}")]
    Timeout(Duration),

    #[error("Call cancelled")]
    Cancelled,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Drives upstream calls through the retry/deadline/cancel envelope.
#[derive(Debug, Clone, Default)]
pub struct RequestExecutor {
    policy: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `attempt` until it succeeds, fails fatally, or the envelope
    /// (deadline or cancellation) closes. `attempt` is invoked once per try.
    pub async fn execute<T, F, Fut>(
        &self,
        options: &CallOptions,
        mut attempt: F,
    ) -> Result<T, ExecutorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let deadline = options.timeout.map(|t| Instant::now() + t);
        let mut retry = 0u32;

        loop {
            let operation = attempt();
            tokio::pin!(operation);

            // Biased toward the operation: a settled result wins over a
            // simultaneously fired cancel or deadline.
            let outcome = tokio::select! {
                biased;
                result = &mut operation => result,
                _ = options.cancel.cancelled() => return Err(ExecutorError::Cancelled),
                _ = sleep_until_opt(deadline) => {
                    return Err(ExecutorError::Timeout(options.timeout.unwrap_or_default()));
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retry < self.policy.max_retries => {
                    let delay = self.policy.delay_for(retry);
                    retry += 1;
                    tracing::warn!(
                        error = %e,
                        retry,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "transient upstream failure; backing off"
                    );
                    metrics::counter!("turnstile_retries").increment(1);

                    // Backoff sleeps stay inside the envelope too.
                    tokio::select! {
                        biased;
                        _ = options.cancel.cancelled() => return Err(ExecutorError::Cancelled),
                        _ = sleep_until_opt(deadline) => {
                            return Err(ExecutorError::Timeout(
                                options.timeout.unwrap_or_default(),
                            ));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Open a stream through the retry envelope. Retries apply to the open
    /// itself; once chunks are flowing, the stream is handed to the caller
    /// with chunk faults softened to empty placeholders.
    pub async fn open_stream<F, Fut>(
        &self,
        options: &CallOptions,
        attempt: F,
    ) -> Result<BoxStream<'static, StreamChunk>, ExecutorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<
            Output = Result<BoxStream<'static, Result<StreamChunk, ProviderError>>, ProviderError>,
        >,
    {
        let stream = self.execute(options, attempt).await?;
        let cancel = options.cancel.clone();
        Ok(tolerant_chunks(stream, cancel).boxed())
    }
}

/// Sleeps until `deadline`, or forever when no deadline is set.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Soften chunk-level faults and honor cancellation mid-stream.
///
/// An unreadable chunk becomes an empty placeholder so one bad frame does
/// not abort an otherwise healthy stream. Cancellation ends the stream at
/// the next chunk boundary.
pub fn tolerant_chunks<S>(
    stream: S,
    cancel: CancellationToken,
) -> impl Stream<Item = StreamChunk> + Send
where
    S: Stream<Item = Result<StreamChunk, ProviderError>> + Send + 'static,
{
    async_stream::stream! {
        tokio::pin!(stream);
        loop {
            let next = tokio::select! {
                biased;
                next = stream.next() => next,
                _ = cancel.cancelled() => break,
            };
            match next {
                Some(Ok(chunk)) => yield chunk,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "faulty stream chunk; yielding placeholder");
                    yield StreamChunk::empty();
                }
                None => break,
            }
        }
    }
}
