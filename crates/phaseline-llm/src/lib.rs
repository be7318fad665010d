//! Execution backends for phaseline.
//!
//! - [`BackendRegistry`]: the immutable catalog of [`BackendProfile`]s.
//! - [`LlmBackend`]: the transport trait every provider implements.
//! - [`AgentExecutor`]: the timeout/cancellation boundary that picks the
//!   text or tool-invocation path from the profile's capability flag.

mod anthropic_backend;
mod executor;
mod factory;
mod http_client;
mod ollama_backend;
mod openrouter_backend;
mod profile;
mod scripted_backend;
mod tools;
mod types;

pub use executor::{AgentExecutor, ExecutorOutput, ExecutorPayload, InvocationContext};
pub use factory::{UnavailableBackend, build_backend};
pub use profile::{BackendProfile, BackendRegistry, CostModel};
pub use scripted_backend::{ScriptStep, ScriptedBackend};
pub use tools::{
    CURRENT_SPECIFICATION, READ_RESOURCE, ResourceProvider, ToolCall, ToolRequest, ToolResponse,
    ToolSpec, WRITE_ARTIFACT,
};
pub use types::{LlmBackend, LlmInvocation, LlmResult, Message, Role, TokenUsage};
