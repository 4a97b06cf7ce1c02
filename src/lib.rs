//! ollama-proxy - CORS-enabled chat proxy for a local Ollama server
//!
//! This library provides the core functionality for the proxy: configuration,
//! the backend client, request adaptation, and the streaming relay.

pub mod backend;
pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::{BackendError, Error, Result};
