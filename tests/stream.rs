//! Integration tests for the streaming chat endpoint.
//!
//! The mock backend answers with an NDJSON body; the proxy must turn it into
//! server-sent events that end with exactly one `done` or `error` event.

use std::time::Duration;

use axum::body::Body;
use http::Request;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ollama_proxy::config::{BackendConfig, Config};
use ollama_proxy::proxy::{create_router, AppState};

fn setup_app(backend_url: &str, stream_idle_timeout_secs: u64) -> axum::Router {
    let config = Config {
        backend: BackendConfig {
            url: backend_url.to_string(),
            stream_idle_timeout_secs,
            ..Default::default()
        },
        ..Default::default()
    };
    create_router(AppState::new(config).unwrap()).unwrap()
}

fn content_line(content: &str) -> String {
    format!(
        "{}\n",
        json!({"message": {"role": "assistant", "content": content}, "done": false})
    )
}

fn done_line() -> String {
    format!(
        "{}\n",
        json!({"message": {"role": "assistant", "content": ""}, "done": true, "eval_count": 12})
    )
}

async fn mount_stream(backend: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(backend)
        .await;
}

/// POST to the stream endpoint and collect the event payloads in order.
async fn stream_events(app: axum::Router, body: Value) -> (http::StatusCode, http::HeaderMap, Vec<Value>) {
    let request = Request::post("/api/chat/stream")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    let events = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim_start()).unwrap())
        .collect();
    (status, headers, events)
}

#[tokio::test]
async fn test_stream_relays_fragments_in_order() {
    let backend = MockServer::start().await;
    mount_stream(
        &backend,
        [content_line("Hel"), content_line("lo"), done_line()].concat(),
    )
    .await;

    let (status, headers, events) =
        stream_events(setup_app(&backend.uri(), 5), json!({"message": "hi"})).await;

    assert_eq!(status, http::StatusCode::OK);
    assert!(headers
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
    assert_eq!(
        events,
        vec![
            json!({"content": "Hel"}),
            json!({"content": "lo"}),
            json!({"done": true}),
        ]
    );
}

#[tokio::test]
async fn test_stream_ignores_trailing_lines_after_done() {
    let backend = MockServer::start().await;
    mount_stream(
        &backend,
        [content_line("A"), done_line(), content_line("ghost")].concat(),
    )
    .await;

    let (_, _, events) = stream_events(setup_app(&backend.uri(), 5), json!({"message": "hi"})).await;

    assert_eq!(events, vec![json!({"content": "A"}), json!({"done": true})]);
}

#[tokio::test]
async fn test_stream_skips_malformed_lines() {
    let backend = MockServer::start().await;
    mount_stream(
        &backend,
        [
            content_line("A"),
            "not json at all\n".to_string(),
            "\n".to_string(),
            content_line("B"),
            done_line(),
        ]
        .concat(),
    )
    .await;

    let (_, _, events) = stream_events(setup_app(&backend.uri(), 5), json!({"message": "hi"})).await;

    assert_eq!(
        events,
        vec![json!({"content": "A"}), json!({"content": "B"}), json!({"done": true})]
    );
}

#[tokio::test]
async fn test_stream_without_done_ends_in_error() {
    let backend = MockServer::start().await;
    mount_stream(&backend, [content_line("A"), content_line("B")].concat()).await;

    let (_, _, events) = stream_events(setup_app(&backend.uri(), 5), json!({"message": "hi"})).await;

    assert_eq!(
        events,
        vec![
            json!({"content": "A"}),
            json!({"content": "B"}),
            json!({"error": "stream failed"}),
        ]
    );
}

#[tokio::test]
async fn test_stream_backend_error_line() {
    let backend = MockServer::start().await;
    mount_stream(
        &backend,
        [content_line("A"), "{\"error\":\"model crashed\"}\n".to_string()].concat(),
    )
    .await;

    let (_, _, events) = stream_events(setup_app(&backend.uri(), 5), json!({"message": "hi"})).await;

    assert_eq!(
        events,
        vec![json!({"content": "A"}), json!({"error": "model crashed"})]
    );
}

#[tokio::test]
async fn test_stream_upstream_status_is_in_band() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&backend)
        .await;

    let (status, _, events) =
        stream_events(setup_app(&backend.uri(), 5), json!({"message": "hi"})).await;

    assert_eq!(status, http::StatusCode::OK, "headers are committed before connecting");
    assert_eq!(events, vec![json!({"error": "Failed to connect to AI model"})]);
}

#[tokio::test]
async fn test_stream_unreachable_backend_is_in_band() {
    let (status, _, events) =
        stream_events(setup_app("http://127.0.0.1:1", 5), json!({"message": "hi"})).await;

    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(events, vec![json!({"error": "Failed to connect to AI model"})]);
}

#[tokio::test]
async fn test_stream_stall_ends_in_error() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(done_line(), "application/x-ndjson")
                .set_delay(Duration::from_secs(4)),
        )
        .mount(&backend)
        .await;

    let (_, _, events) = stream_events(setup_app(&backend.uri(), 1), json!({"message": "hi"})).await;

    assert_eq!(events, vec![json!({"error": "stream stalled"})]);
}

#[tokio::test]
async fn test_stream_blank_message_is_400_json() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;

    let request = Request::post("/api/chat/stream")
        .header("content-type", "application/json")
        .body(Body::from(json!({"message": "  "}).to_string()))
        .unwrap();
    let response = setup_app(&backend.uri(), 5).oneshot(request).await.unwrap();

    assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["fallback"], false);
}

#[tokio::test]
async fn test_stream_endpoint_forces_streaming() {
    let backend = MockServer::start().await;
    mount_stream(&backend, [content_line("ok"), done_line()].concat()).await;

    let (_, _, events) = stream_events(
        setup_app(&backend.uri(), 5),
        json!({"message": "hi", "stream": false}),
    )
    .await;

    assert_eq!(events, vec![json!({"content": "ok"}), json!({"done": true})]);
}
