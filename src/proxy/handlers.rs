//! HTTP request handlers.

use std::convert::Infallible;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Extension, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri},
    response::{sse::Sse, IntoResponse, Response},
    Json,
};
use futures::StreamExt;

use super::adapter::adapt;
use super::server::{AppState, RequestId};
use super::stream::relay;
use super::types::{ChatRequest, HealthResponse, ModelsResponse};
use crate::backend::{is_hop_by_hop, BackendInvocation};
use crate::error::Error;

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Unwrap a JSON body, turning a rejection into a validation error.
fn parse_chat_request(
    payload: Result<Json<ChatRequest>, JsonRejection>,
    request_id: RequestId,
) -> Result<ChatRequest, Error> {
    payload.map(|Json(request)| request).map_err(|rejection| {
        tracing::warn!(request_id = %request_id.0, error = %rejection, "Rejected chat body");
        Error::Validation(rejection.body_text())
    })
}

fn adapt_logged(
    state: &AppState,
    request: &ChatRequest,
    request_id: RequestId,
) -> Result<BackendInvocation, Error> {
    let invocation = adapt(request, &state.config.backend.model, &state.system_prompt)
        .map_err(|e| {
            tracing::warn!(request_id = %request_id.0, error = %e, "Rejected chat request");
            e
        })?;

    tracing::info!(
        request_id = %request_id.0,
        model = %invocation.model,
        stream = invocation.streaming,
        message_chars = request.message.chars().count(),
        temperature = invocation.sampling.temperature,
        "Received chat request"
    );
    Ok(invocation)
}

/// Handle GET /
pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "ollama-proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "backend": state.backend.base_url(),
        "default_model": state.config.backend.model,
    }))
}

/// Handle GET /health
///
/// Always answers 200; backend problems show up as `"unhealthy"`.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = state.backend.health().await;

    Json(HealthResponse {
        status: if report.reachable { "healthy" } else { "unhealthy" }.to_string(),
        host: state.backend.base_url().to_string(),
        model: state.config.backend.model.clone(),
        timestamp: timestamp(),
        error: report.error,
        available_models: report.reachable.then_some(report.models),
    })
}

/// Handle POST /api/chat
///
/// Requests with `"stream": true` get the same event stream as
/// `/api/chat/stream`.
pub async fn chat(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, Error> {
    let request = parse_chat_request(payload, request_id)?;
    let invocation = adapt_logged(&state, &request, request_id)?;

    if invocation.streaming {
        return Ok(stream_response(&state, invocation));
    }

    let start = Instant::now();
    match state.backend.chat_once(invocation).await {
        Ok(result) => {
            tracing::info!(
                request_id = %request_id.0,
                latency_ms = start.elapsed().as_millis() as u64,
                reply_chars = result.message.chars().count(),
                "Chat request completed"
            );
            Ok(Json(result).into_response())
        }
        Err(err) => {
            tracing::error!(
                request_id = %request_id.0,
                error = %err,
                detail = err.detail(),
                latency_ms = start.elapsed().as_millis() as u64,
                "Chat request failed"
            );
            Err(err.into())
        }
    }
}

/// Handle POST /api/chat/stream
pub async fn chat_stream(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, Error> {
    let request = ChatRequest {
        stream: true,
        ..parse_chat_request(payload, request_id)?
    };
    let invocation = adapt_logged(&state, &request, request_id)?;
    Ok(stream_response(&state, invocation))
}

/// Start the backend stream and wrap the relay in an SSE response.
///
/// Headers are committed here; every later failure travels in-band.
fn stream_response(state: &AppState, invocation: BackendInvocation) -> Response {
    let fragments = state.backend.chat_stream(invocation);
    let events = relay(fragments, state.config.backend.stream_idle_timeout())
        .map(|event| Ok::<_, Infallible>(event.to_sse()));

    let mut response = Sse::new(events).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    // Keep reverse proxies such as nginx from buffering the stream
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

/// Handle GET /api/models
pub async fn list_models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, Error> {
    let models = state.backend.list_models().await.map_err(|err| {
        tracing::error!(error = %err, detail = err.detail(), "Failed to list models");
        Error::from(err)
    })?;
    Ok(Json(ModelsResponse { models }))
}

/// Handle ANY /api/{path} by forwarding it to the backend.
///
/// Also answers the methods the chat and model routes do not handle.
pub async fn passthrough(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, Error> {
    let path = uri.path().strip_prefix("/api/").unwrap_or_default();

    tracing::debug!(method = %method, path = %path, "Forwarding request to backend");

    let upstream = state
        .backend
        .forward(method.clone(), path, uri.query(), &headers, body)
        .await
        .map_err(|err| {
            tracing::error!(
                method = %method,
                path = %path,
                error = %err,
                detail = err.detail(),
                "Passthrough request failed"
            );
            Error::from(err)
        })?;

    let mut response = Response::builder().status(upstream.status());
    for (name, value) in upstream.headers() {
        // CORS headers are owned by our own layer
        if is_hop_by_hop(name)
            || name == header::CONTENT_LENGTH
            || name.as_str().starts_with("access-control-")
        {
            continue;
        }
        response = response.header(name, value);
    }

    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| Error::Internal(format!("Failed to build passthrough response: {}", e)))
}
