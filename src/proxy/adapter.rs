//! Turns an inbound [`ChatRequest`] into a [`BackendInvocation`].

use super::types::ChatRequest;
use crate::backend::{BackendInvocation, ConversationTurn, SamplingParams};
use crate::error::{Error, Result};

/// Validate `request` and build the backend call.
///
/// The system turn always comes first. Sampling values are passed through as
/// given; the backend decides what ranges it accepts.
pub fn adapt(request: &ChatRequest, model: &str, system_prompt: &str) -> Result<BackendInvocation> {
    if request.message.trim().is_empty() {
        return Err(Error::Validation("empty message".to_string()));
    }

    Ok(BackendInvocation {
        model: model.to_string(),
        turns: vec![
            ConversationTurn::system(system_prompt),
            ConversationTurn::user(request.message.as_str()),
        ],
        sampling: SamplingParams {
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
        },
        streaming: request.stream,
    })
}
