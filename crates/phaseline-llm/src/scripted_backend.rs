//! Deterministic in-process backend
//!
//! Plays back a fixed script of replies. `--dry-run` uses the echo mode so a
//! whole workflow can be exercised without network access; tests use scripts
//! to stage timeouts, failures and specific outputs.

use async_trait::async_trait;
use phaseline_utils::BackendError;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::tools::{ToolCall, ToolResponse, ToolSpec};
use crate::types::{LlmBackend, LlmInvocation, LlmResult, TokenUsage};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Text(String),
    TextWithUsage(String, TokenUsage),
    Tools(Vec<ToolCall>),
    Fail(BackendError),
    /// Never answers; only a timeout or cancellation ends the call
    Hang,
}

pub struct ScriptedBackend {
    steps: Mutex<VecDeque<ScriptStep>>,
    /// Reply used once the script runs out
    fallback: Option<ScriptStep>,
    echo: bool,
    delay: Duration,
    calls: AtomicUsize,
    invocations: Mutex<Vec<LlmInvocation>>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback: None,
            echo: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Same reply for every call
    #[must_use]
    pub fn repeating(step: ScriptStep) -> Self {
        let mut backend = Self::new([]);
        backend.fallback = Some(step);
        backend
    }

    /// Describe the call instead of doing work
    #[must_use]
    pub fn echo() -> Self {
        let mut backend = Self::new([]);
        backend.echo = true;
        backend
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every invocation received so far
    #[must_use]
    pub fn invocations(&self) -> Vec<LlmInvocation> {
        self.invocations
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    async fn next_step(&self, inv: &LlmInvocation) -> ScriptStep {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.invocations.lock() {
            seen.push(inv.clone());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.steps.lock().ok().and_then(|mut q| q.pop_front());
        match scripted.or_else(|| self.fallback.clone()) {
            Some(step) => step,
            None if self.echo => ScriptStep::TextWithUsage(echo_text(inv), estimate_usage(inv)),
            None => ScriptStep::Fail(BackendError::InvalidResponse(
                "scripted backend has no replies left".to_string(),
            )),
        }
    }
}

fn echo_text(inv: &LlmInvocation) -> String {
    let request: String = inv
        .last_user_message()
        .unwrap_or_default()
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect();
    format!(
        "[dry-run] phase `{}` received {} message(s).\n\nFirst request line: {}\n",
        inv.phase,
        inv.messages.len(),
        request
    )
}

fn estimate_usage(inv: &LlmInvocation) -> TokenUsage {
    let chars: usize = inv.messages.iter().map(|m| m.content.chars().count()).sum();
    TokenUsage {
        input_tokens: chars.div_ceil(4) as u64,
        output_tokens: 64,
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    async fn complete(&self, inv: LlmInvocation) -> Result<LlmResult, BackendError> {
        match self.next_step(&inv).await {
            ScriptStep::Text(text) => Ok(LlmResult::new(text, "scripted", inv.model)),
            ScriptStep::TextWithUsage(text, usage) => {
                let mut result = LlmResult::new(text, "scripted", inv.model);
                result.usage = Some(usage);
                Ok(result)
            }
            ScriptStep::Tools(_) => Err(BackendError::InvalidResponse(
                "tool calls returned on the text path".to_string(),
            )),
            ScriptStep::Fail(err) => Err(err),
            ScriptStep::Hang => std::future::pending().await,
        }
    }

    async fn invoke_tools(
        &self,
        inv: LlmInvocation,
        _tools: &[ToolSpec],
    ) -> Result<ToolResponse, BackendError> {
        match self.next_step(&inv).await {
            ScriptStep::Text(text) => Ok(ToolResponse {
                calls: Vec::new(),
                text: Some(text),
                usage: None,
            }),
            ScriptStep::TextWithUsage(text, usage) => Ok(ToolResponse {
                calls: Vec::new(),
                text: Some(text),
                usage: Some(usage),
            }),
            ScriptStep::Tools(calls) => Ok(ToolResponse {
                calls,
                text: None,
                usage: None,
            }),
            ScriptStep::Fail(err) => Err(err),
            ScriptStep::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn inv() -> LlmInvocation {
        LlmInvocation::new(
            "run",
            "design",
            "",
            Duration::from_secs(1),
            vec![Message::user("Build a CLI\nmore detail")],
        )
    }

    #[tokio::test]
    async fn test_plays_script_in_order_then_fails() {
        let backend = ScriptedBackend::new([
            ScriptStep::Fail(BackendError::Transport("boom".into())),
            ScriptStep::Text("ok".into()),
        ]);
        assert!(backend.complete(inv()).await.is_err());
        assert_eq!(backend.complete(inv()).await.unwrap().text, "ok");
        assert!(matches!(
            backend.complete(inv()).await,
            Err(BackendError::InvalidResponse(_))
        ));
        assert_eq!(backend.call_count(), 3);
        assert_eq!(backend.invocations().len(), 3);
    }

    #[tokio::test]
    async fn test_echo_is_deterministic() {
        let backend = ScriptedBackend::echo();
        let a = backend.complete(inv()).await.unwrap();
        let b = backend.complete(inv()).await.unwrap();
        assert_eq!(a.text, b.text);
        assert!(a.text.contains("design"));
        assert!(a.text.contains("Build a CLI"));
        assert!(!a.text.contains("more detail"));
        assert!(a.usage.is_some());
    }

    #[tokio::test]
    async fn test_repeating_tools() {
        let backend =
            ScriptedBackend::repeating(ScriptStep::Tools(vec![ToolCall::write_artifact("a", "b")]));
        for _ in 0..2 {
            let response = backend.invoke_tools(inv(), &[]).await.unwrap();
            assert_eq!(response.calls.len(), 1);
        }
    }
}
