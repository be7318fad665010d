//! Agent executor: the timeout and cancellation boundary around backends.
//!
//! The profile's `supports_structured_output` flag picks the path. Tool-capable
//! backends go through the tool-invocation boundary and their operations are
//! returned as-is; everything else gets a plain completion whose text is
//! returned untouched. Content is never interpreted here.

use phaseline_utils::BackendError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::factory::{UnavailableBackend, build_backend};
use crate::profile::{BackendProfile, BackendRegistry};
use crate::scripted_backend::ScriptedBackend;
use crate::tools::{ResourceProvider, ToolCall, ToolRequest, ToolSpec};
use crate::types::{LlmBackend, LlmInvocation, Message, TokenUsage};

/// Upper bound on resource-read round trips within one invocation
pub const MAX_RESOURCE_ROUNDS: usize = 3;

/// What the executor sends to a backend for one phase attempt
#[derive(Clone)]
pub struct InvocationContext {
    pub run_id: String,
    pub phase: String,
    pub messages: Vec<Message>,
    /// Backs resource reads on the structured path
    pub resources: Option<Arc<dyn ResourceProvider>>,
}

impl InvocationContext {
    #[must_use]
    pub fn new(run_id: impl Into<String>, phase: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            run_id: run_id.into(),
            phase: phase.into(),
            messages,
            resources: None,
        }
    }

    #[must_use]
    pub fn with_resources(mut self, resources: Arc<dyn ResourceProvider>) -> Self {
        self.resources = Some(resources);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorPayload {
    /// Operations from a tool-capable backend
    Structured {
        calls: Vec<ToolCall>,
        text: Option<String>,
    },
    /// Free text for the artifact extractor
    RawText(String),
}

impl ExecutorPayload {
    /// Any human-readable text in the payload
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Structured { text, .. } => text.as_deref(),
            Self::RawText(text) => Some(text),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorOutput {
    pub backend_id: String,
    pub payload: ExecutorPayload,
    pub usage: Option<TokenUsage>,
    pub elapsed: Duration,
}

/// Maps backend ids onto live transports
#[derive(Clone, Default)]
pub struct AgentExecutor {
    backends: HashMap<String, Arc<dyn LlmBackend>>,
}

impl AgentExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a transport for every registry entry.
    ///
    /// Backends that cannot be constructed (e.g. missing API key) are
    /// registered as unavailable so routing can fall past them. With
    /// `dry_run`, every backend is replaced by the echo backend.
    #[must_use]
    pub fn from_registry(registry: &BackendRegistry, dry_run: bool) -> Self {
        let mut executor = Self::new();
        for profile in registry.iter() {
            let backend: Arc<dyn LlmBackend> = if dry_run {
                Arc::new(ScriptedBackend::echo())
            } else {
                match build_backend(profile) {
                    Ok(backend) => backend,
                    Err(e) => {
                        warn!(backend = %profile.id, error = %e, "Backend unavailable");
                        Arc::new(UnavailableBackend::new(e.to_string()))
                    }
                }
            };
            executor.register(profile.id.clone(), backend);
        }
        executor
    }

    pub fn register(&mut self, id: impl Into<String>, backend: Arc<dyn LlmBackend>) {
        self.backends.insert(id.into(), backend);
    }

    #[must_use]
    pub fn with_backend(mut self, id: impl Into<String>, backend: Arc<dyn LlmBackend>) -> Self {
        self.register(id, backend);
        self
    }

    #[must_use]
    pub fn has_backend(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    /// Invoke `profile`'s backend with `ctx`, bounded by `timeout` and `cancel`.
    ///
    /// # Errors
    ///
    /// - `BackendError::Timeout` when the whole invocation exceeds `timeout`
    /// - `BackendError::Cancelled` when `cancel` fires first
    /// - `BackendError::Misconfiguration` when no transport is registered
    /// - any transport error returned by the backend
    pub async fn invoke(
        &self,
        profile: &BackendProfile,
        ctx: &InvocationContext,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutorOutput, BackendError> {
        let backend = self.backends.get(&profile.id).cloned().ok_or_else(|| {
            BackendError::Misconfiguration(format!("no transport registered for '{}'", profile.id))
        })?;
        debug!(
            run_id = %ctx.run_id,
            phase = %ctx.phase,
            backend = %profile.id,
            structured = profile.supports_structured_output,
            timeout_secs = timeout.as_secs(),
            "Invoking backend"
        );

        let started = Instant::now();
        let work = async {
            if profile.supports_structured_output {
                invoke_structured(backend.as_ref(), profile, ctx, timeout).await
            } else {
                let inv = build_invocation(profile, ctx, timeout, ctx.messages.clone());
                let result = backend.complete(inv).await?;
                Ok((ExecutorPayload::RawText(result.text), result.usage))
            }
        };

        let (payload, usage) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(BackendError::Cancelled),
            outcome = tokio::time::timeout(timeout, work) => match outcome {
                Ok(result) => result?,
                Err(_) => return Err(BackendError::Timeout { duration: timeout }),
            },
        };

        Ok(ExecutorOutput {
            backend_id: profile.id.clone(),
            payload,
            usage,
            elapsed: started.elapsed(),
        })
    }
}

fn build_invocation(
    profile: &BackendProfile,
    ctx: &InvocationContext,
    timeout: Duration,
    messages: Vec<Message>,
) -> LlmInvocation {
    let inv = LlmInvocation::new(&ctx.run_id, &ctx.phase, &profile.model, timeout, messages);
    match profile.max_output_tokens {
        Some(max) => inv.with_metadata("max_tokens", serde_json::json!(max)),
        None => inv,
    }
}

async fn invoke_structured(
    backend: &dyn LlmBackend,
    profile: &BackendProfile,
    ctx: &InvocationContext,
    timeout: Duration,
) -> Result<(ExecutorPayload, Option<TokenUsage>), BackendError> {
    let mut tools = vec![ToolSpec::write_artifact()];
    if let Some(resources) = &ctx.resources {
        let names = resources.resource_names();
        if !names.is_empty() {
            tools.push(ToolSpec::read_resource(&names));
        }
    }

    let mut messages = ctx.messages.clone();
    let mut calls = Vec::new();
    let mut texts = Vec::new();
    let mut usage: Option<TokenUsage> = None;

    for round in 0..=MAX_RESOURCE_ROUNDS {
        let inv = build_invocation(profile, ctx, timeout, messages.clone());
        let response = backend.invoke_tools(inv, &tools).await?;
        if let Some(u) = response.usage {
            usage = Some(usage.unwrap_or_default() + u);
        }
        if let Some(text) = response.text {
            texts.push(text);
        }

        let mut reads = Vec::new();
        for call in response.calls {
            match ToolRequest::classify(call) {
                ToolRequest::Call(call) => calls.push(call),
                ToolRequest::ReadResource { name } => reads.push(name),
            }
        }
        if reads.is_empty() {
            break;
        }
        if round == MAX_RESOURCE_ROUNDS {
            warn!(phase = %ctx.phase, pending = reads.len(), "Resource read limit reached");
            break;
        }
        for name in reads {
            let body = ctx
                .resources
                .as_ref()
                .and_then(|r| r.read_resource(&name))
                .unwrap_or_else(|| format!("(resource `{name}` is not available)"));
            debug!(phase = %ctx.phase, resource = %name, bytes = body.len(), "Serving resource read");
            messages.push(Message::user(format!("Resource `{name}`:\n\n{body}")));
        }
    }

    let text = (!texts.is_empty()).then(|| texts.join("\n\n"));
    Ok((ExecutorPayload::Structured { calls, text }, usage))
}
