//! Error types for ollama-proxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for ollama-proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ollama-proxy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures talking to the inference backend, normalized at the client boundary.
///
/// Display strings are short and safe to show to callers; upstream detail is
/// carried separately for logging.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("timeout")]
    Timeout,

    #[error("upstream failure")]
    Upstream {
        /// Backend HTTP status, when the backend answered at all
        status: Option<u16>,
        detail: String,
    },

    #[error("malformed response")]
    Malformed { detail: String },
}

impl BackendError {
    /// Upstream detail for logs. Never sent to callers.
    pub fn detail(&self) -> &str {
        match self {
            BackendError::Timeout => "backend did not answer in time",
            BackendError::Upstream { detail, .. } => detail,
            BackendError::Malformed { detail } => detail,
        }
    }

    /// One-line description safe for status output: the variant plus the
    /// backend's HTTP status when there was one, never the backend body.
    pub fn summary(&self) -> String {
        match self {
            BackendError::Upstream {
                status: Some(status),
                ..
            } => format!("{}: backend returned HTTP {}", self, status),
            _ => self.to_string(),
        }
    }

    /// Classify a transport error from reqwest.
    pub(crate) fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Upstream {
                status: err.status().map(|s| s.as_u16()),
                detail: err.to_string(),
            }
        }
    }
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Backend(BackendError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            Error::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        // Callers get a generic headline plus a short reason. `fallback` tells
        // the front end it may switch to its offline answer.
        let body = match &self {
            Error::Validation(reason) => serde_json::json!({
                "error": "Invalid request",
                "message": reason,
                "fallback": false,
            }),
            Error::Backend(err) => {
                let headline = match err {
                    BackendError::Timeout => "AI model did not respond in time",
                    BackendError::Upstream { .. } => "Failed to get response from AI model",
                    BackendError::Malformed { .. } => "Invalid response format from AI model",
                };
                serde_json::json!({
                    "error": headline,
                    "message": err.to_string(),
                    "fallback": true,
                })
            }
            Error::Config(_) | Error::Internal(_) => serde_json::json!({
                "error": "Internal server error",
                "message": "Failed to process chat request",
                "fallback": true,
            }),
        };

        (status, axum::Json(body)).into_response()
    }
}
