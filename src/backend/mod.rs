//! Inference backend access.
//!
//! [`BackendClient`] is the only place that talks to Ollama. It turns backend
//! failures into [`BackendError`](crate::error::BackendError) and streamed
//! replies into a lazy [`FragmentStream`].

mod client;
mod ndjson;
pub mod types;

pub(crate) use client::is_hop_by_hop;
pub use client::{BackendClient, FragmentStream, CONNECT_FAILED, STREAM_FAILED};
pub use types::{
    BackendInvocation, ChatResult, ConversationTurn, HealthReport, ModelDescriptor,
    ResponseFragment, Role, SamplingParams,
};
