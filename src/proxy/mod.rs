//! HTTP proxy server module.
//!
//! This module provides the browser-facing API: it validates chat requests,
//! forwards them to the backend, and relays replies as JSON or as an event
//! stream.

pub mod adapter;
mod handlers;
mod server;
pub mod stream;
pub mod types;

pub use adapter::adapt;
pub use server::{create_router, cors_layer, run_server, AppState, RequestId, REQUEST_ID_HEADER};
pub use stream::{relay, RelayEvent, STREAM_STALLED};
pub use types::{ChatRequest, HealthResponse, ModelsResponse};
