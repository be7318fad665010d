//! Core types for the backend abstraction

use async_trait::async_trait;
use phaseline_utils::BackendError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Add;
use std::time::Duration;

use crate::tools::{ToolResponse, ToolSpec};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Input to a single backend call
#[derive(Debug, Clone)]
pub struct LlmInvocation {
    /// Run the call belongs to, for log correlation
    pub run_id: String,
    pub phase: String,
    /// Model to use; empty means the backend's configured model
    pub model: String,
    pub timeout: Duration,
    pub messages: Vec<Message>,
    /// Provider-specific knobs (`max_tokens`, `temperature`)
    pub metadata: HashMap<String, serde_json::Value>,
}

impl LlmInvocation {
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        phase: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            phase: phase.into(),
            model: model.into(),
            timeout,
            messages,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Text of the last user message, if any
    #[must_use]
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Token counts reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.saturating_add(rhs.input_tokens),
            output_tokens: self.output_tokens.saturating_add(rhs.output_tokens),
        }
    }
}

/// Result of a plain text completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResult {
    pub text: String,
    /// Provider name (e.g. "anthropic", "ollama")
    pub provider: String,
    pub model_used: String,
    pub usage: Option<TokenUsage>,
}

impl LlmResult {
    #[must_use]
    pub fn new(
        text: impl Into<String>,
        provider: impl Into<String>,
        model_used: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            provider: provider.into(),
            model_used: model_used.into(),
            usage: None,
        }
    }

    #[must_use]
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(TokenUsage {
            input_tokens,
            output_tokens,
        });
        self
    }
}

/// Transport to one execution backend.
///
/// Implementations only move bytes; they never interpret the content.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Plain text completion
    async fn complete(&self, inv: LlmInvocation) -> Result<LlmResult, BackendError>;

    /// Tool-invocation request. Text-only backends keep the default.
    async fn invoke_tools(
        &self,
        inv: LlmInvocation,
        tools: &[ToolSpec],
    ) -> Result<ToolResponse, BackendError> {
        let _ = (inv, tools);
        Err(BackendError::Unsupported(
            "backend does not accept tool invocations".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_user_message() {
        let inv = LlmInvocation::new(
            "run",
            "phase",
            "",
            Duration::from_secs(5),
            vec![
                Message::system("sys"),
                Message::user("first"),
                Message::assistant("reply"),
                Message::user("second"),
            ],
        );
        assert_eq!(inv.last_user_message(), Some("second"));
    }

    #[test]
    fn test_usage_adds() {
        let total = TokenUsage {
            input_tokens: 10,
            output_tokens: 2,
        } + TokenUsage {
            input_tokens: 5,
            output_tokens: 3,
        };
        assert_eq!(total.input_tokens, 15);
        assert_eq!(total.output_tokens, 5);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
