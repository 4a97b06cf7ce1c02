//! Request and response bodies of the browser-facing API.

use serde::{Deserialize, Serialize};

use crate::backend::ModelDescriptor;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_MAX_TOKENS: i64 = 1000;

/// Chat request sent by the front end.
///
/// A missing `message` deserializes as empty so it is rejected by the adapter
/// with the same error as a blank one.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_top_p() -> f64 {
    DEFAULT_TOP_P
}

fn default_max_tokens() -> i64 {
    DEFAULT_MAX_TOKENS
}

impl ChatRequest {
    /// Request with the given message and default sampling.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stream: false,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "unhealthy"
    pub status: String,
    pub host: String,
    pub model: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_models: Option<Vec<String>>,
}

/// Body of `GET /api/models`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelDescriptor>,
}
