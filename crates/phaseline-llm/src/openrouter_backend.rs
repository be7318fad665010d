//! OpenRouter backend (OpenAI-compatible chat completions, text only)

use async_trait::async_trait;
use phaseline_utils::BackendError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http_client::HttpClient;
use crate::profile::BackendProfile;
use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message, Role};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";
const DEFAULT_TITLE: &str = "phaseline";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Clone)]
pub(crate) struct OpenRouterBackend {
    client: HttpClient,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenRouterBackend {
    pub fn from_profile(profile: &BackendProfile) -> Result<Self, BackendError> {
        let api_key_env = profile
            .api_key_env
            .as_deref()
            .unwrap_or(DEFAULT_API_KEY_ENV);
        let api_key = std::env::var(api_key_env).map_err(|_| {
            BackendError::Misconfiguration(format!(
                "OpenRouter API key not found in environment variable '{api_key_env}' \
                 (backend '{}')",
                profile.id
            ))
        })?;
        if profile.model.is_empty() {
            return Err(BackendError::Misconfiguration(format!(
                "backend '{}' does not name a model",
                profile.id
            )));
        }
        Ok(Self {
            client: HttpClient::new()?,
            base_url: profile
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            model: profile.model.clone(),
            max_tokens: profile.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }

    fn convert_messages(messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|m| OpenAiMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: m.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl LlmBackend for OpenRouterBackend {
    async fn complete(&self, inv: LlmInvocation) -> Result<LlmResult, BackendError> {
        let model = if inv.model.is_empty() {
            self.model.clone()
        } else {
            inv.model.clone()
        };
        debug!(provider = "openrouter", model = %model, "Invoking OpenRouter backend");

        let body = OpenRouterRequest {
            model: model.clone(),
            messages: Self::convert_messages(&inv.messages),
            max_tokens: self.max_tokens,
        };
        let request = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", DEFAULT_TITLE)
            .header("Content-Type", "application/json")
            .json(&body);

        let response = self.client.send(request, inv.timeout, "openrouter").await?;
        let parsed: OpenRouterResponse = response.json().await.map_err(|e| {
            BackendError::InvalidResponse(format!("Failed to parse OpenRouter response: {e}"))
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                BackendError::InvalidResponse(
                    "OpenRouter response missing content in choices[0]".to_string(),
                )
            })?;

        let mut result = LlmResult::new(content, "openrouter", model);
        if let Some(usage) = parsed.usage {
            result = result.with_usage(usage.prompt_tokens, usage.completion_tokens);
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct OpenRouterRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenRouterResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_messages_keeps_roles() {
        let converted = OpenRouterBackend::convert_messages(&[
            Message::system("s"),
            Message::user("u"),
        ]);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
        assert_eq!(converted[1].content, "u");
    }

    #[test]
    fn test_parse_response_with_usage() {
        let parsed: OpenRouterResponse = serde_json::from_value(serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "done" } }],
            "usage": { "prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10 }
        }))
        .unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("done"));
        assert_eq!(parsed.usage.map(|u| u.completion_tokens), Some(3));
    }
}
