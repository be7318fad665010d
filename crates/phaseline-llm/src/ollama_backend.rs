//! Local Ollama backend (`/api/chat`, non-streaming, text only)

use async_trait::async_trait;
use phaseline_utils::BackendError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http_client::HttpClient;
use crate::profile::BackendProfile;
use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message, Role};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Clone)]
pub(crate) struct OllamaBackend {
    client: HttpClient,
    endpoint: String,
    model: String,
}

impl OllamaBackend {
    pub fn from_profile(profile: &BackendProfile) -> Result<Self, BackendError> {
        if profile.model.is_empty() {
            return Err(BackendError::Misconfiguration(format!(
                "backend '{}' does not name a model",
                profile.id
            )));
        }
        let base = profile
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        Ok(Self {
            client: HttpClient::new()?,
            endpoint: format!("{base}/api/chat"),
            model: profile.model.clone(),
        })
    }

    fn convert_messages(messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|m| OllamaMessage {
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
impl LlmBackend for OllamaBackend {
    async fn complete(&self, inv: LlmInvocation) -> Result<LlmResult, BackendError> {
        let model = if inv.model.is_empty() {
            self.model.clone()
        } else {
            inv.model.clone()
        };
        debug!(provider = "ollama", model = %model, endpoint = %self.endpoint, "Invoking Ollama backend");

        let body = OllamaRequest {
            model: model.clone(),
            messages: Self::convert_messages(&inv.messages),
            stream: false,
        };
        let request = self.client.post(&self.endpoint).json(&body);
        let response = self.client.send(request, inv.timeout, "ollama").await?;
        let parsed: OllamaResponse = response.json().await.map_err(|e| {
            BackendError::InvalidResponse(format!("Failed to parse Ollama response: {e}"))
        })?;

        let mut result = LlmResult::new(parsed.message.content, "ollama", model);
        if let (Some(input), Some(output)) = (parsed.prompt_eval_count, parsed.eval_count) {
            result = result.with_usage(input, output);
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaResponse {
    message: OllamaResponseMessage,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use phaseline_utils::Tier;

    #[test]
    fn test_endpoint_from_base_url() {
        let profile = BackendProfile {
            id: "local".to_string(),
            tier: Tier::Local,
            provider: "ollama".to_string(),
            model: "deepseek-coder-v2:16b".to_string(),
            supports_structured_output: false,
            cost: crate::profile::CostModel::FREE,
            context_limit: 16_384,
            max_output_tokens: None,
            base_url: Some("http://gpu-box:11434/".to_string()),
            api_key_env: None,
        };
        let backend = OllamaBackend::from_profile(&profile).unwrap();
        assert_eq!(backend.endpoint, "http://gpu-box:11434/api/chat");
    }

    #[test]
    fn test_parse_response() {
        let parsed: OllamaResponse = serde_json::from_value(serde_json::json!({
            "model": "m",
            "message": { "role": "assistant", "content": "ok" },
            "done": true,
            "prompt_eval_count": 11,
            "eval_count": 4
        }))
        .unwrap();
        assert_eq!(parsed.message.content, "ok");
        assert_eq!(parsed.eval_count, Some(4));
    }
}
