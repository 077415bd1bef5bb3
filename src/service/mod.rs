//! Caller-facing orchestration surface.
//!
//! `AiService` composes the full pipeline for one upstream call:
//!
//! 1. cache probe (a hit costs nothing and returns immediately)
//! 2. advisory budget gate
//! 3. single-flight coalescing keyed by request content
//! 4. retry/deadline/cancel execution of the backend call
//! 5. on success: spend recorded and the cache populated in the background
//!
//! Spend and cache population happen inside the winning flight only, so a
//! burst of identical requests is charged once and cached once. Failed
//! upstream calls are never cached and consume no budget.

use crate::cache::{request_key, ResponseCache};
use crate::coalesce::Coalescer;
use crate::executor::{CallOptions, ExecutorError, RequestExecutor};
use crate::provider::{GenerateRequest, GenerateResponse, GenerativeBackend, StreamChunk};
use crate::quota::QuotaGuard;
use futures_util::stream::BoxStream;
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub mod error;
pub mod structured;

pub use error::AiError;
pub use structured::{ParseMode, StructuredError};

/// Orchestrated generation service.
pub struct AiService {
    backend: Arc<dyn GenerativeBackend>,
    executor: RequestExecutor,
    cache: ResponseCache,
    coalescer: Coalescer<GenerateResponse, ExecutorError>,
    quota: Arc<QuotaGuard>,
}

impl AiService {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        executor: RequestExecutor,
        cache: ResponseCache,
        quota: Arc<QuotaGuard>,
    ) -> Self {
        Self {
            backend,
            executor,
            cache,
            coalescer: Coalescer::new(),
            quota,
        }
    }

    pub fn quota(&self) -> &QuotaGuard {
        &self.quota
    }

    /// Run one generation through the full pipeline.
    ///
    /// `cost_cents` is the caller's estimate of what this generation costs;
    /// it gates the daily budget up front and is recorded as spend after a
    /// successful upstream call.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        cost_cents: u64,
        options: &CallOptions,
    ) -> Result<GenerateResponse, AiError> {
        let request_id = uuid::Uuid::new_v4();
        let key = request_key(request);

        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!(%request_id, key = %key, "serving cached response");
            return Ok(hit);
        }
        tracing::debug!(%request_id, key = %key, model = %request.model, "cache miss; dispatching");

        self.quota.ensure_budget(cost_cents).await?;

        let response = self
            .coalescer
            .run(&key, || async {
                let response = self
                    .executor
                    .execute(options, || {
                        let backend = Arc::clone(&self.backend);
                        let request = request.clone();
                        async move { backend.generate(&request).await }
                    })
                    .await?;

                // Charged once per flight, after the call succeeded.
                if let Err(e) = self.quota.record_current_spend(cost_cents).await {
                    tracing::warn!(error = %e, "spend recording failed after success");
                }

                let cache = self.cache.clone();
                let key = key.clone();
                let cached = response.clone();
                tokio::spawn(async move {
                    cache.put(&key, cached).await;
                });

                Ok(response)
            })
            .await?;

        Ok(response)
    }

    /// Run a structured generation and parse the answer as JSON.
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        request: &GenerateRequest,
        cost_cents: u64,
        options: &CallOptions,
        mode: ParseMode,
    ) -> Result<T, AiError> {
        let response = self.generate(request, cost_cents, options).await?;
        Ok(structured::parse(&response.text(), mode)?)
    }

    /// Open a streaming generation.
    ///
    /// Streams bypass the cache and the coalescer: chunk timing is part of
    /// the observable result, so no two callers can share one stream. The
    /// budget gate still applies and spend is recorded once the stream
    /// opens successfully.
    pub async fn generate_stream(
        &self,
        request: &GenerateRequest,
        cost_cents: u64,
        options: &CallOptions,
    ) -> Result<BoxStream<'static, StreamChunk>, AiError> {
        self.quota.ensure_budget(cost_cents).await?;

        let stream = self
            .executor
            .open_stream(options, || {
                let backend = Arc::clone(&self.backend);
                let request = request.clone();
                async move { backend.generate_stream(&request).await }
            })
            .await?;

        if let Err(e) = self.quota.record_current_spend(cost_cents).await {
            tracing::warn!(error = %e, "spend recording failed after stream open");
        }

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryUsageStore;
    use crate::provider::{Candidate, Content, ProviderError};
    use crate::quota::StaticResolver;
    use crate::tier::MembershipTier;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingBackend {
        calls: AtomicU32,
        fail: bool,
        delay: Duration,
    }

    impl CountingBackend {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail: false,
                delay: Duration::ZERO,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail: true,
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail: false,
                delay,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerativeBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(ProviderError::Upstream {
                    status: 500,
                    message: "internal".into(),
                });
            }
            Ok(GenerateResponse {
                candidates: vec![Candidate {
                    content: Content::model(format!("echo: {}", request.contents[0].text())),
                    finish_reason: Some("STOP".into()),
                }],
                usage: None,
            })
        }

        async fn generate_stream(
            &self,
            _request: &GenerateRequest,
        ) -> Result<
            futures_util::stream::BoxStream<'static, Result<StreamChunk, ProviderError>>,
            ProviderError,
        > {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::Upstream {
                    status: 503,
                    message: "unavailable".into(),
                });
            }
            Ok(futures_util::stream::iter(vec![
                Ok(StreamChunk::text_only("a")),
                Ok(StreamChunk::text_only("b")),
            ])
            .boxed())
        }
    }

    fn service(backend: Arc<CountingBackend>, tier: MembershipTier) -> AiService {
        let quota = Arc::new(QuotaGuard::new(
            Arc::new(InMemoryUsageStore::new()),
            Arc::new(StaticResolver::new("u1", tier)),
        ));
        AiService::new(
            backend,
            RequestExecutor::default(),
            ResponseCache::in_memory(),
            quota,
        )
    }

    #[tokio::test]
    async fn repeated_request_is_served_from_cache() {
        let backend = CountingBackend::ok();
        let service = service(Arc::clone(&backend), MembershipTier::Pro);
        let request = GenerateRequest::from_prompt("m", "hello");

        let first = service
            .generate(&request, 10, &CallOptions::default())
            .await
            .unwrap();
        // Background cache population.
        tokio::task::yield_now().await;
        let second = service
            .generate(&request, 10, &CallOptions::default())
            .await
            .unwrap();

        assert_eq!(first.text(), second.text());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn cache_hit_consumes_no_budget() {
        let backend = CountingBackend::ok();
        let service = service(Arc::clone(&backend), MembershipTier::Free);
        let request = GenerateRequest::from_prompt("m", "hi");

        // Free tier budget is 100 cents; first call records 90.
        service
            .generate(&request, 90, &CallOptions::default())
            .await
            .unwrap();
        tokio::task::yield_now().await;

        // A second identical call at a cost that would bust the budget still
        // succeeds because it never leaves the cache.
        service
            .generate(&request, 90, &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn budget_cycles_to_exhaustion_with_exact_cents() {
        let backend = CountingBackend::ok();
        let service = service(Arc::clone(&backend), MembershipTier::Free);

        // Free tier: $1.00/day, 10 cents per call, distinct prompts so the
        // cache never short-circuits.
        for n in 0..10 {
            service
                .generate(
                    &GenerateRequest::from_prompt("m", format!("p{n}")),
                    10,
                    &CallOptions::default(),
                )
                .await
                .unwrap();
        }

        let err = service
            .generate(
                &GenerateRequest::from_prompt("m", "p10"),
                10,
                &CallOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AiError::Quota(crate::quota::QuotaError::BudgetExceeded {
                remaining_cents: 0,
                requested_cents: 10,
                ..
            })
        ));
        assert_eq!(backend.calls(), 10);
    }

    #[tokio::test]
    async fn oversized_cost_rejected_at_zero_spend() {
        let backend = CountingBackend::ok();
        let service = service(Arc::clone(&backend), MembershipTier::Free);

        let err = service
            .generate(
                &GenerateRequest::from_prompt("m", "big"),
                500,
                &CallOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AiError::Quota(crate::quota::QuotaError::BudgetExceeded {
                remaining_cents: 100,
                ..
            })
        ));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn failed_call_is_not_cached_and_consumes_no_budget() {
        let backend = CountingBackend::failing();
        let service = service(Arc::clone(&backend), MembershipTier::Free);
        let request = GenerateRequest::from_prompt("m", "doomed");

        assert!(service
            .generate(&request, 10, &CallOptions::default())
            .await
            .is_err());
        assert!(service
            .generate(&request, 10, &CallOptions::default())
            .await
            .is_err());

        // Both attempts reached upstream (no cache), and budget is intact:
        // a full-budget request still passes the gate.
        assert_eq!(backend.calls(), 2);
        assert!(service.quota().ensure_budget(100).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_identical_requests_coalesce_to_one_call() {
        let backend = CountingBackend::slow(Duration::from_millis(50));
        let service = Arc::new(service(Arc::clone(&backend), MembershipTier::Pro));
        let request = GenerateRequest::from_prompt("m", "shared");

        let mut handles = Vec::new();
        for _ in 0..5 {
            let service = Arc::clone(&service);
            let request = request.clone();
            handles.push(tokio::spawn(async move {
                service.generate(&request, 10, &CallOptions::default()).await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().text(), "echo: shared");
        }
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn structured_strict_rejects_non_json() {
        let backend = CountingBackend::ok();
        let service = service(backend, MembershipTier::Pro);

        let err = service
            .generate_structured::<serde_json::Value>(
                &GenerateRequest::from_prompt("m", "x"),
                1,
                &CallOptions::default(),
                ParseMode::Strict,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Structured(_)));
    }

    #[tokio::test]
    async fn stream_bypasses_cache_but_charges_budget() {
        let backend = CountingBackend::ok();
        let service = service(Arc::clone(&backend), MembershipTier::Free);
        let request = GenerateRequest::from_prompt("m", "stream me");

        let chunks: Vec<StreamChunk> = service
            .generate_stream(&request, 60, &CallOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks.len(), 2);

        // 60 of 100 cents spent; another 60 no longer fits.
        let denied = service
            .generate_stream(&request, 60, &CallOptions::default())
            .await;
        assert!(matches!(denied, Err(AiError::Quota(_))));
        assert_eq!(backend.calls(), 1);
    }
}
