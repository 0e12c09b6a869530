//! Wire tests for the OpenAI adapter against a mock HTTP server.

#![allow(clippy::unwrap_used)]

use anotherai::domain::{Message, Role};
use anotherai::providers::{ProviderAdapter, ProviderRequest, StreamingContext};
use anotherai_openai::OpenAiAdapter;
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn adapter(server: &MockServer) -> OpenAiAdapter {
    OpenAiAdapter::new("test-key", Some(format!("{}/chat/completions", server.uri()))).unwrap()
}

fn request() -> ProviderRequest {
    ProviderRequest {
        model: "gpt-4.1-mini".into(),
        messages: vec![Message::with_text(Role::User, "What is the meaning of life?")],
        ..Default::default()
    }
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test-123",
        "object": "chat.completion",
        "model": "gpt-4.1-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": 11,
            "completion_tokens": 7,
            "prompt_tokens_details": {"cached_tokens": 0},
            "completion_tokens_details": {"reasoning_tokens": 0},
        },
    })
}

#[tokio::test]
async fn buffered_completion_parses_content_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "gpt-4.1-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("42.")))
        .mount(&server)
        .await;

    let result = adapter(&server).complete(&request()).await.unwrap();
    assert_eq!(result.text.as_deref(), Some("42."));
    assert_eq!(result.usage.prompt_token_count, Some(11.0));
    assert_eq!(result.usage.completion_token_count, Some(7.0));
    assert_eq!(result.finish_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn rate_limit_is_classified_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "21")
                .set_body_json(json!({"error": {"message": "Rate limit reached"}})),
        )
        .mount(&server)
        .await;

    let err = adapter(&server).complete(&request()).await.err().unwrap();
    assert!(err.retryable());
    assert!(err.to_string().contains("Rate limit reached"));
    assert!(err.to_string().contains("retry_after=21"));
}

#[tokio::test]
async fn auth_failure_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "Incorrect API key"}})),
        )
        .mount(&server)
        .await;

    let err = adapter(&server).complete(&request()).await.err().unwrap();
    assert!(!err.retryable());
    assert_eq!(err.status_code(), 401);
}

#[tokio::test]
async fn sse_stream_is_parsed_into_chunks() {
    let server = MockServer::start().await;
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_raw(sse, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let mut stream = adapter(&server).stream(&request()).await.unwrap();
    let mut ctx = StreamingContext::new();
    while let Some(chunk) = stream.next().await {
        ctx.add_chunk(chunk.unwrap());
    }
    let done = ctx.finalize();
    assert_eq!(done.text.as_deref(), Some("Hello"));
    assert_eq!(done.usage.prompt_token_count, Some(5.0));
    assert_eq!(done.finish_reason.as_deref(), Some("stop"));
}
