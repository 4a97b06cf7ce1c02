//! Stream relay: backend fragments in, server-sent events out.
//!
//! Implements the Open -> Done / Failed lifecycle for one streaming call:
//! - **Open**: fragments are pulled one at a time; non-empty content is
//!   forwarded as a `{"content": ..}` event
//! - **Done**: the backend signalled completion; one `{"done": true}` event,
//!   then the stream ends
//! - **Failed**: backend error, early end of input, or an idle window with no
//!   fragment; one `{"error": ..}` event, then the stream ends
//!
//! The relay is pull driven: the HTTP body asks for the next event, and only
//! then is the next fragment read. When the caller disconnects, hyper drops
//! the body, which drops the relay and with it the backend stream, aborting
//! the upstream request.

use std::time::Duration;

use axum::response::sse::Event;
use futures::stream::{self, Stream, StreamExt};

use crate::backend::{FragmentStream, STREAM_FAILED};

/// In-band error when the backend goes quiet for longer than the idle window.
pub const STREAM_STALLED: &str = "stream stalled";

/// One event delivered to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Content(String),
    Done,
    Error(String),
}

impl RelayEvent {
    /// JSON payload carried in the event's `data:` field.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RelayEvent::Content(content) => serde_json::json!({ "content": content }),
            RelayEvent::Done => serde_json::json!({ "done": true }),
            RelayEvent::Error(message) => serde_json::json!({ "error": message }),
        }
    }

    pub fn to_sse(&self) -> Event {
        Event::default().data(self.to_json().to_string())
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Content(_))
    }
}

struct Relay {
    /// `None` once a terminal event has been produced.
    fragments: Option<FragmentStream>,
    /// At most one event waiting behind the one just returned.
    pending: Option<RelayEvent>,
    idle_timeout: Duration,
    forwarded: usize,
}

impl Relay {
    fn close(mut self, last: RelayEvent) -> (RelayEvent, Relay) {
        self.fragments = None;
        (last, self)
    }

    fn fail(self, message: impl Into<String>) -> (RelayEvent, Relay) {
        self.close(RelayEvent::Error(message.into()))
    }

    async fn step(mut self) -> Option<(RelayEvent, Relay)> {
        if let Some(event) = self.pending.take() {
            return Some((event, self));
        }

        loop {
            let next = {
                let fragments = self.fragments.as_mut()?;
                tokio::time::timeout(self.idle_timeout, fragments.next()).await
            };

            let fragment = match next {
                Ok(Some(fragment)) => fragment,
                Ok(None) => {
                    tracing::warn!(
                        forwarded = self.forwarded,
                        "Backend stream ended without completion"
                    );
                    return Some(self.fail(STREAM_FAILED));
                }
                Err(_) => {
                    tracing::warn!(
                        forwarded = self.forwarded,
                        idle_timeout = ?self.idle_timeout,
                        "Backend stream stalled"
                    );
                    return Some(self.fail(STREAM_STALLED));
                }
            };

            if let Some(error) = fragment.error {
                tracing::warn!(error = %error, forwarded = self.forwarded, "Backend stream failed");
                return Some(self.fail(error));
            }

            let content = fragment
                .content
                .filter(|c| !c.is_empty())
                .map(RelayEvent::Content);

            if fragment.done {
                tracing::debug!(forwarded = self.forwarded, "Backend stream completed");
                return Some(match content {
                    Some(content) => {
                        self.pending = Some(RelayEvent::Done);
                        self.forwarded += 1;
                        self.close(content)
                    }
                    None => self.close(RelayEvent::Done),
                });
            }

            if let Some(content) = content {
                self.forwarded += 1;
                return Some((content, self));
            }
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if self.fragments.is_some() {
            tracing::info!(
                forwarded = self.forwarded,
                "Caller disconnected mid-stream, cancelling backend request"
            );
        }
    }
}

/// Relay `fragments` as caller events, ending after exactly one terminal event.
///
/// Each wait for a fragment is bounded by `idle_timeout`.
pub fn relay(
    fragments: FragmentStream,
    idle_timeout: Duration,
) -> impl Stream<Item = RelayEvent> + Send {
    let relay = Relay {
        fragments: Some(fragments),
        pending: None,
        idle_timeout,
        forwarded: 0,
    };
    stream::unfold(relay, Relay::step).fuse()
}
