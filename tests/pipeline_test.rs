//! End-to-end pipeline tests: service over the real HTTP backend.

use std::sync::Arc;
use std::time::Duration;
use turnstile::cache::ResponseCache;
use turnstile::executor::{CallOptions, RequestExecutor};
use turnstile::ledger::InMemoryUsageStore;
use turnstile::provider::{GenerateRequest, GoogleBackend};
use turnstile::quota::{QuotaError, QuotaGuard, StaticResolver};
use turnstile::service::{AiError, AiService};
use turnstile::tier::MembershipTier;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service_over(server: &MockServer, tier: MembershipTier) -> AiService {
    let backend = Arc::new(GoogleBackend::new(
        server.uri(),
        "test-key",
        Arc::new(reqwest::Client::new()),
        Duration::from_secs(5),
    ));
    let quota = Arc::new(QuotaGuard::new(
        Arc::new(InMemoryUsageStore::new()),
        Arc::new(StaticResolver::new("it-user", tier)),
    ));
    AiService::new(
        backend,
        RequestExecutor::default(),
        ResponseCache::in_memory(),
        quota,
    )
}

fn answer(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }]
    })
}

#[tokio::test]
async fn identical_request_hits_upstream_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(answer("cached answer")))
        .expect(1)
        .mount(&server)
        .await;

    let service = service_over(&server, MembershipTier::Pro);
    let request = GenerateRequest::from_prompt("gemini-pro", "repeat me");

    let first = service
        .generate(&request, 5, &CallOptions::default())
        .await
        .unwrap();
    tokio::task::yield_now().await;
    let second = service
        .generate(&request, 5, &CallOptions::default())
        .await
        .unwrap();

    assert_eq!(first.text(), "cached answer");
    assert_eq!(second.text(), "cached answer");
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(answer("shared"))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let service = Arc::new(service_over(&server, MembershipTier::Pro));
    let request = GenerateRequest::from_prompt("gemini-pro", "burst");

    let mut handles = Vec::new();
    for _ in 0..6 {
        let service = Arc::clone(&service);
        let request = request.clone();
        handles.push(tokio::spawn(async move {
            service.generate(&request, 5, &CallOptions::default()).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().text(), "shared");
    }
}

#[tokio::test]
async fn free_tier_budget_exhausts_after_ten_dime_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(answer("ok")))
        .expect(10)
        .mount(&server)
        .await;

    let service = service_over(&server, MembershipTier::Free);

    for n in 0..10 {
        service
            .generate(
                &GenerateRequest::from_prompt("gemini-pro", format!("call {n}")),
                10,
                &CallOptions::default(),
            )
            .await
            .unwrap();
    }

    let err = service
        .generate(
            &GenerateRequest::from_prompt("gemini-pro", "one too many"),
            10,
            &CallOptions::default(),
        )
        .await
        .unwrap_err();

    match err {
        AiError::Quota(QuotaError::BudgetExceeded {
            remaining_cents,
            requested_cents,
            message,
        }) => {
            assert_eq!(remaining_cents, 0);
            assert_eq!(requested_cents, 10);
            assert!(message.contains("Pro"));
        }
        other => panic!("expected budget exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn upstream_failure_leaves_budget_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let service = service_over(&server, MembershipTier::Free);

    let result = service
        .generate(
            &GenerateRequest::from_prompt("gemini-pro", "doomed"),
            50,
            &CallOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(AiError::Executor(_))));

    // Nothing was spent: a full-budget probe still passes.
    assert!(service.quota().ensure_budget(100).await.is_ok());
}
