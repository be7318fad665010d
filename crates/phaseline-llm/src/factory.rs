//! Provider selection: turns a [`BackendProfile`] into a live backend

use async_trait::async_trait;
use phaseline_utils::BackendError;
use std::sync::Arc;

use crate::anthropic_backend::AnthropicBackend;
use crate::ollama_backend::OllamaBackend;
use crate::openrouter_backend::OpenRouterBackend;
use crate::profile::BackendProfile;
use crate::scripted_backend::ScriptedBackend;
use crate::types::{LlmBackend, LlmInvocation, LlmResult};

/// Construct the transport for `profile.provider`.
///
/// # Errors
///
/// Returns `BackendError::Misconfiguration` for unknown providers, missing
/// API keys or missing models.
pub fn build_backend(profile: &BackendProfile) -> Result<Arc<dyn LlmBackend>, BackendError> {
    let backend: Arc<dyn LlmBackend> = match profile.provider.as_str() {
        "anthropic" => Arc::new(AnthropicBackend::from_profile(profile)?),
        "openrouter" => Arc::new(OpenRouterBackend::from_profile(profile)?),
        "ollama" => Arc::new(OllamaBackend::from_profile(profile)?),
        "scripted" => Arc::new(ScriptedBackend::echo()),
        other => {
            return Err(BackendError::Misconfiguration(format!(
                "unknown provider '{other}' for backend '{}'",
                profile.id
            )));
        }
    };
    Ok(backend)
}

/// Stand-in for a backend that could not be constructed.
///
/// Every call fails with the construction error, which is not retryable, so
/// the orchestrator moves straight on to the next routing candidate.
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LlmBackend for UnavailableBackend {
    async fn complete(&self, _inv: LlmInvocation) -> Result<LlmResult, BackendError> {
        Err(BackendError::Misconfiguration(self.reason.clone()))
    }

    async fn invoke_tools(
        &self,
        _inv: LlmInvocation,
        _tools: &[crate::tools::ToolSpec],
    ) -> Result<crate::tools::ToolResponse, BackendError> {
        Err(BackendError::Misconfiguration(self.reason.clone()))
    }
}
