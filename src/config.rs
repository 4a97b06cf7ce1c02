//! Configuration parsing and validation for ollama-proxy.

use axum::http::HeaderValue;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides `backend.url`.
pub const ENDPOINT_ENV_VAR: &str = "OLLAMA_ENDPOINT";
/// Environment variable that overrides `backend.model`.
pub const MODEL_ENV_VAR: &str = "OLLAMA_MODEL";

/// System prompt used when neither `prompt.text` nor `prompt.file` is set.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant embedded in a personal \
portfolio website. Answer questions about the site owner's background, skills and projects \
using only the information you have been given. Format replies with clean Markdown.";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:5950")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:5950".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Inference backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the Ollama server; `${VAR}` references are expanded
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Model used for every chat call
    #[serde(default = "default_model")]
    pub model: String,
    /// Bound on single-shot calls (chat, health, model listing)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Bound on establishing a TCP connection to the backend
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Longest wait for the next streamed fragment before the stream is failed
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "gpt-oss:20b".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_stream_idle_timeout() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            model: default_model(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

/// Cross-origin policy for browser callers.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Exact origins allowed to call the proxy; `"*"` allows any origin
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Whether browsers may send credentials (ignored for `"*"`)
    #[serde(default = "default_true")]
    pub allow_credentials: bool,
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:8594".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allow_credentials: true,
        }
    }
}

impl CorsConfig {
    /// True when the allow-list contains the `"*"` wildcard.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }

    /// Parse the allow-list into header values.
    pub fn origin_values(&self) -> Result<Vec<HeaderValue>, ConfigError> {
        self.allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|_| {
                    ConfigError::Validation(format!("Invalid CORS origin '{}'", origin))
                })
            })
            .collect()
    }
}

/// Source of the fixed system prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptConfig {
    /// Inline prompt text
    pub text: Option<String>,
    /// Path to a file holding the prompt text
    pub file: Option<String>,
}

impl PromptConfig {
    /// Resolve the prompt text. The content is opaque and returned unmodified.
    pub fn resolve(&self) -> Result<String, ConfigError> {
        match (&self.text, &self.file) {
            (Some(text), None) => Ok(text.clone()),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            }),
            (None, None) => Ok(DEFAULT_SYSTEM_PROMPT.to_string()),
            (Some(_), Some(_)) => Err(ConfigError::Validation(
                "prompt.text and prompt.file are mutually exclusive".to_string(),
            )),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, expanding `${VAR}` references and
    /// applying environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str_with(&content, |name| std::env::var(name).ok())
    }

    /// Defaults plus environment overrides, for running without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Load from `path` when given, otherwise from the environment alone.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_env(),
        }
    }

    /// Parse configuration from a TOML string without consulting the environment.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse_str_with(content, |_| None)
    }

    /// Parse configuration from a TOML string using a custom variable lookup.
    pub fn parse_str_with<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.resolve_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        config.resolve_env(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Expand `${VAR}` in the backend URL, then apply the
    /// `OLLAMA_ENDPOINT` / `OLLAMA_MODEL` overrides.
    fn resolve_env<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.backend.url = expand_env_vars_with(&self.backend.url, "backend.url", lookup)?;

        if let Some(url) = lookup(ENDPOINT_ENV_VAR).filter(|v| !v.is_empty()) {
            self.backend.url = url;
        }
        if let Some(model) = lookup(MODEL_ENV_VAR).filter(|v| !v.is_empty()) {
            self.backend.model = model;
        }
        Ok(())
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.url.is_empty() {
            return Err(ConfigError::Validation("backend.url is empty".to_string()));
        }
        if !self.backend.url.starts_with("http://") && !self.backend.url.starts_with("https://")
        {
            return Err(ConfigError::Validation(format!(
                "backend.url '{}' must start with http:// or https://",
                self.backend.url
            )));
        }
        if self.backend.model.trim().is_empty() {
            return Err(ConfigError::Validation("backend.model is empty".to_string()));
        }
        if self.backend.request_timeout_secs == 0
            || self.backend.connect_timeout_secs == 0
            || self.backend.stream_idle_timeout_secs == 0
        {
            return Err(ConfigError::Validation(
                "backend timeouts must be greater than zero".to_string(),
            ));
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - browsers will be refused");
        }
        self.cors.origin_values()?;

        if self.prompt.text.is_some() && self.prompt.file.is_some() {
            return Err(ConfigError::Validation(
                "prompt.text and prompt.file are mutually exclusive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for '{field}': {message}")]
    EnvVar {
        var: String,
        field: String,
        message: String,
    },
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}:11434`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, field: &str, lookup: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            field: field.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                field: field.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            field: field.to_string(),
            message: format!("Environment variable '{}' is not set", var_name),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}
