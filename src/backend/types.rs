//! Backend call shapes and the Ollama wire format they map to.

use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in the conversation sent to the backend.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters, passed to the backend unclamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: i64,
}

/// A fully-formed backend call. Built per request and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendInvocation {
    pub model: String,
    pub turns: Vec<ConversationTurn>,
    pub sampling: SamplingParams,
    pub streaming: bool,
}

impl BackendInvocation {
    /// Ollama `/api/chat` request body. `stream` is forced by the caller.
    pub(crate) fn to_wire(&self, stream: bool) -> ChatWireRequest<'_> {
        ChatWireRequest {
            model: &self.model,
            messages: &self.turns,
            stream,
            options: WireOptions {
                temperature: self.sampling.temperature,
                top_p: self.sampling.top_p,
                num_predict: self.sampling.max_tokens,
            },
        }
    }
}

/// One increment of a streamed reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseFragment {
    pub content: Option<String>,
    pub done: bool,
    pub error: Option<String>,
}

impl ResponseFragment {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Whether this fragment ends the sequence.
    pub fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }
}

/// Terminal value of a non-streaming chat call.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatResult {
    pub message: String,
    pub model: String,
    pub timestamp: String,
}

/// Backend liveness as seen by the proxy. Always produced, even on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub reachable: bool,
    pub models: Vec<String>,
    pub error: Option<String>,
}

/// A model entry from `/api/tags`; unknown fields are kept as-is.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Ollama wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct ChatWireRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ConversationTurn],
    pub stream: bool,
    pub options: WireOptions,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub num_predict: i64,
}

/// Non-streaming `/api/chat` reply, and each NDJSON line of a streamed one.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChatWireResponse {
    #[serde(default)]
    pub message: Option<WireMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatWireResponse {
    pub fn content(&self) -> Option<&str> {
        self.message.as_ref().and_then(|m| m.content.as_deref())
    }

    pub fn into_fragment(self) -> ResponseFragment {
        if let Some(error) = self.error {
            return ResponseFragment::failed(error);
        }
        ResponseFragment {
            content: self.message.and_then(|m| m.content).filter(|c| !c.is_empty()),
            done: self.done,
            error: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_request_maps_max_tokens_to_num_predict() {
        let invocation = BackendInvocation {
            model: "llama3".to_string(),
            turns: vec![ConversationTurn::system("sys"), ConversationTurn::user("hi")],
            sampling: SamplingParams {
                temperature: -1.5,
                top_p: 0.9,
                max_tokens: -1,
            },
            streaming: false,
        };

        let json = serde_json::to_value(invocation.to_wire(true)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llama3",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "hi"}
                ],
                "stream": true,
                "options": {"temperature": -1.5, "top_p": 0.9, "num_predict": -1}
            })
        );
    }

    #[test]
    fn test_stream_line_with_content() {
        let line: ChatWireResponse = serde_json::from_str(
            r#"{"model":"llama3","message":{"role":"assistant","content":"Hel"},"done":false}"#,
        )
        .unwrap();
        assert_eq!(line.into_fragment(), ResponseFragment::content("Hel"));
    }

    #[test]
    fn test_final_stream_line_is_done_without_content() {
        let line: ChatWireResponse = serde_json::from_str(
            r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true,"eval_count":12}"#,
        )
        .unwrap();
        let fragment = line.into_fragment();
        assert!(fragment.done);
        assert!(fragment.content.is_none());
        assert!(fragment.is_terminal());
    }

    #[test]
    fn test_error_line_becomes_failed_fragment() {
        let line: ChatWireResponse =
            serde_json::from_str(r#"{"error":"model 'nope' not found"}"#).unwrap();
        assert_eq!(
            line.into_fragment(),
            ResponseFragment::failed("model 'nope' not found")
        );
    }

    #[test]
    fn test_model_descriptor_keeps_unknown_fields() {
        let tags: TagsResponse = serde_json::from_str(
            r#"{"models":[{"name":"llama3:8b","size":4661224676,"details":{"family":"llama"}}]}"#,
        )
        .unwrap();
        assert_eq!(tags.models[0].name, "llama3:8b");
        assert_eq!(tags.models[0].extra["size"], 4661224676u64);

        let back = serde_json::to_value(&tags.models[0]).unwrap();
        assert_eq!(back["details"]["family"], "llama");
    }
}
