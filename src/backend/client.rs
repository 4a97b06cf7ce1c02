//! HTTP client for the Ollama backend.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use axum::body::{Body, HttpBody};
use axum::http::{HeaderMap, HeaderName, Method};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use futures::Stream;

use super::ndjson::NdjsonDecoder;
use super::types::{
    BackendInvocation, ChatResult, ChatWireResponse, HealthReport, ModelDescriptor,
    ResponseFragment, TagsResponse,
};
use crate::config::BackendConfig;
use crate::error::{BackendError, Error};

/// Lazy, finite sequence of streamed reply fragments. Dropping it aborts the
/// backend request.
pub type FragmentStream = BoxStream<'static, ResponseFragment>;

/// In-band error when the streaming call cannot be started.
pub const CONNECT_FAILED: &str = "Failed to connect to AI model";
/// In-band error when the stream breaks before a final fragment.
pub const STREAM_FAILED: &str = "stream failed";

/// Request headers that describe the client connection rather than the request.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a header must not be copied between the two legs of the proxy.
pub(crate) fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Shared handle to the inference backend.
///
/// Holds no per-call state; the inner `reqwest::Client` pools connections and
/// is cheap to share across tasks.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl BackendClient {
    /// Build the client once at startup.
    pub fn new(config: &BackendConfig) -> Result<Self, Error> {
        // No overall timeout on the client: streaming calls run as long as the
        // backend keeps producing. Single-shot calls are bounded per call.
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
            request_timeout: config.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| BackendError::Timeout)?
    }

    /// Probe the backend. Never fails: problems are reported in the result.
    pub async fn health(&self) -> HealthReport {
        match self.list_models().await {
            Ok(models) => HealthReport {
                reachable: true,
                models: models.into_iter().map(|m| m.name).collect(),
                error: None,
            },
            Err(err) => {
                tracing::warn!(error = %err, detail = err.detail(), "Backend health check failed");
                HealthReport {
                    reachable: false,
                    models: Vec::new(),
                    error: Some(err.summary()),
                }
            }
        }
    }

    /// Models installed on the backend, in the order it reports them.
    pub async fn list_models(&self) -> Result<Vec<ModelDescriptor>, BackendError> {
        let url = self.url("/api/tags");
        self.bounded(async {
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| BackendError::from_transport(&e))?;
            let response = ensure_success(response).await?;
            let tags = response
                .json::<TagsResponse>()
                .await
                .map_err(|e| decode_error(&e))?;
            Ok(tags.models)
        })
        .await
    }

    /// Single-shot chat call.
    pub async fn chat_once(&self, invocation: BackendInvocation) -> Result<ChatResult, BackendError> {
        let url = self.url("/api/chat");
        let body = invocation.to_wire(false);

        tracing::debug!(url = %url, model = %invocation.model, "Sending chat request to backend");

        let reply: ChatWireResponse = self
            .bounded(async {
                let response = self
                    .http
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| BackendError::from_transport(&e))?;
                let response = ensure_success(response).await?;
                response
                    .json::<ChatWireResponse>()
                    .await
                    .map_err(|e| decode_error(&e))
            })
            .await?;

        if let Some(error) = reply.error.as_deref() {
            return Err(BackendError::Upstream {
                status: None,
                detail: error.to_string(),
            });
        }

        let message = reply
            .content()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BackendError::Malformed {
                detail: "reply has no message content".to_string(),
            })?;

        Ok(ChatResult {
            message: message.to_string(),
            model: invocation.model,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Streaming chat call. Nothing is sent until the stream is first polled.
    pub fn chat_stream(&self, invocation: BackendInvocation) -> FragmentStream {
        let url = self.url("/api/chat");
        let request = self.http.post(&url).json(&invocation.to_wire(true));
        let model = invocation.model;

        let connect = async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(model = %model, "Backend stream opened");
                    Ok(response.bytes_stream())
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    tracing::error!(status = %status, body = %body, "Backend refused streaming chat");
                    Err(ResponseFragment::failed(CONNECT_FAILED))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to reach backend for streaming chat");
                    Err(ResponseFragment::failed(CONNECT_FAILED))
                }
            }
        };

        stream::once(connect)
            .flat_map(|outcome| match outcome {
                Ok(body) => decode_fragments(body).boxed(),
                Err(fragment) => stream::iter([fragment]).boxed(),
            })
            .boxed()
    }

    /// Forward an arbitrary request to `/api/{path}` on the backend.
    ///
    /// Sending the request body and waiting for the response head are bounded;
    /// the response body is left for the caller to stream.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<reqwest::Response, BackendError> {
        let mut url = self.url(&format!("/api/{}", path.trim_start_matches('/')));
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        let mut forwarded = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            if name == axum::http::header::HOST
                || name == axum::http::header::CONTENT_LENGTH
                || is_hop_by_hop(name)
            {
                continue;
            }
            forwarded.append(name.clone(), value.clone());
        }

        let mut request = self.http.request(method, &url).headers(forwarded);
        if body.size_hint().exact() != Some(0) {
            // Streamed as it arrives, with no size cap
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        self.bounded(async {
            request
                .send()
                .await
                .map_err(|e| BackendError::from_transport(&e))
        })
        .await
    }
}

/// Turn a non-success reply into `BackendError::Upstream`, keeping the body for logs.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, body = %body, "Backend returned error");
    Err(BackendError::Upstream {
        status: Some(status.as_u16()),
        detail: format!("backend returned {}: {}", status, body),
    })
}

fn decode_error(err: &reqwest::Error) -> BackendError {
    if err.is_decode() {
        BackendError::Malformed {
            detail: err.to_string(),
        }
    } else {
        BackendError::from_transport(err)
    }
}

struct DecodeState<S> {
    body: Option<Pin<Box<S>>>,
    decoder: NdjsonDecoder,
    ready: VecDeque<ResponseFragment>,
    finished: bool,
}

/// Decode a raw NDJSON byte stream into fragments.
///
/// The output always ends with exactly one terminal fragment: the backend's
/// own, or a synthesized `STREAM_FAILED` when the body errors or ends early.
/// Once a terminal fragment is produced the body is dropped unread.
pub(crate) fn decode_fragments<S, E>(body: S) -> impl Stream<Item = ResponseFragment> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = DecodeState {
        body: Some(Box::pin(body)),
        decoder: NdjsonDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            if let Some(fragment) = state.ready.pop_front() {
                if fragment.is_terminal() {
                    state.finished = true;
                    state.body = None;
                    state.ready.clear();
                }
                return Some((fragment, state));
            }

            let Some(body) = state.body.as_mut() else {
                tracing::warn!(
                    skipped = state.decoder.skipped(),
                    "Backend stream ended without a final message"
                );
                state.finished = true;
                return Some((ResponseFragment::failed(STREAM_FAILED), state));
            };

            match body.next().await {
                Some(Ok(bytes)) => {
                    let fragments = state.decoder.push(&bytes);
                    state.ready.extend(fragments);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Error reading backend stream");
                    state.finished = true;
                    state.body = None;
                    return Some((ResponseFragment::failed(STREAM_FAILED), state));
                }
                None => {
                    state.body = None;
                    let tail = state.decoder.finish();
                    state.ready.extend(tail);
                }
            }
        }
    })
}
