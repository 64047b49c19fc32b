//! Wire-level retry behavior of the adapter + caller pair against a mock
//! server that fails a configurable number of times before succeeding.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use scenario_harness::provider::{
    AnthropicAdapter, GenerateRequest, ModelCaller, RetryPolicy,
};

struct FailThenSucceed {
    calls: AtomicU32,
    fail_first: u32,
    fail_status: u16,
}

impl Respond for FailThenSucceed {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            ResponseTemplate::new(self.fail_status).set_body_json(json!({
                "error": {"type": "overloaded_error", "message": "overloaded"}
            }))
        } else {
            ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_ok",
                "content": [{"type": "text", "text": "fine"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 1, "output_tokens": 1}
            }))
        }
    }
}

fn quick_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        jitter: false,
    }
}

fn request() -> GenerateRequest {
    GenerateRequest {
        model: "claude-test".into(),
        prompt_text: "hello".into(),
        temperature: 0.0,
        max_tokens: 16,
        top_p: 1.0,
    }
}

async fn caller_against(server: &MockServer, max_retries: u32) -> ModelCaller {
    let adapter =
        AnthropicAdapter::with_config("test-key", server.uri(), Duration::from_secs(5)).unwrap();
    ModelCaller::new(Arc::new(adapter), quick_policy(max_retries))
}

#[tokio::test]
async fn overload_then_success_consumes_one_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(FailThenSucceed {
            calls: AtomicU32::new(0),
            fail_first: 1,
            fail_status: 529,
        })
        .mount(&server)
        .await;

    let caller = caller_against(&server, 3).await;
    let outcome = caller.call(&request()).await;

    let resp = outcome.result.unwrap();
    assert_eq!(resp.text, "fine");
    assert_eq!(outcome.retry_count, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn rate_limit_exhausts_retries_and_reports_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(FailThenSucceed {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            fail_status: 429,
        })
        .mount(&server)
        .await;

    let caller = caller_against(&server, 2).await;
    let outcome = caller.call(&request()).await;

    let err = outcome.result.unwrap_err();
    assert_eq!(err.code(), "rate_limited");
    assert_eq!(outcome.retry_count, 2);
    // Initial attempt plus two retries.
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn invalid_request_never_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"type": "invalid_request_error", "message": "unknown model"}
        })))
        .mount(&server)
        .await;

    let caller = caller_against(&server, 5).await;
    let outcome = caller.call(&request()).await;

    let err = outcome.result.unwrap_err();
    assert_eq!(err.code(), "invalid_request");
    assert!(err.to_string().contains("unknown model"));
    assert_eq!(outcome.retry_count, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn auth_error_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"type": "authentication_error", "message": "bad key"}
        })))
        .mount(&server)
        .await;

    let caller = caller_against(&server, 5).await;
    let outcome = caller.call(&request()).await;

    assert_eq!(outcome.result.unwrap_err().code(), "auth_error");
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn multi_block_content_concatenates_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_blocks",
            "content": [
                {"type": "text", "text": "part one "},
                {"type": "tool_use", "id": "t1", "name": "noop", "input": {}},
                {"type": "text", "text": "part two"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 2}
        })))
        .mount(&server)
        .await;

    let caller = caller_against(&server, 0).await;
    let outcome = caller.call(&request()).await;

    let resp = outcome.result.unwrap();
    assert_eq!(resp.text, "part one part two");
    assert_eq!(resp.request_id.as_deref(), Some("msg_blocks"));
}
