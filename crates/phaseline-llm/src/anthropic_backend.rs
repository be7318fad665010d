//! Anthropic Messages API backend
//!
//! Supports both paths: plain text completion and tool use. Tool use maps
//! each `tool_use` content block onto a [`ToolCall`].

use async_trait::async_trait;
use phaseline_utils::BackendError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http_client::HttpClient;
use crate::profile::BackendProfile;
use crate::tools::{ToolCall, ToolResponse, ToolSpec};
use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message, Role, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone)]
pub(crate) struct HttpParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.2,
        }
    }
}

#[derive(Clone)]
pub(crate) struct AnthropicBackend {
    client: HttpClient,
    base_url: String,
    api_key: String,
    default_model: String,
    default_params: HttpParams,
}

impl AnthropicBackend {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        default_model: String,
        default_params: HttpParams,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            client: HttpClient::new()?,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            default_model,
            default_params,
        })
    }

    /// # Errors
    ///
    /// Returns `BackendError::Misconfiguration` if the API key variable is
    /// unset or the profile names no model.
    pub fn from_profile(profile: &BackendProfile) -> Result<Self, BackendError> {
        let api_key_env = profile
            .api_key_env
            .as_deref()
            .unwrap_or(DEFAULT_API_KEY_ENV);
        let api_key = std::env::var(api_key_env).map_err(|_| {
            BackendError::Misconfiguration(format!(
                "Anthropic API key not found in environment variable '{api_key_env}' \
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
        let params = HttpParams {
            max_tokens: profile
                .max_output_tokens
                .unwrap_or(HttpParams::default().max_tokens),
            ..HttpParams::default()
        };
        Self::new(
            api_key,
            profile.base_url.clone(),
            profile.model.clone(),
            params,
        )
    }

    /// `inv.model` and `inv.metadata` override the backend defaults.
    fn resolve_params(&self, inv: &LlmInvocation) -> (String, HttpParams) {
        let model = if inv.model.is_empty() {
            self.default_model.clone()
        } else {
            inv.model.clone()
        };
        let max_tokens = inv
            .metadata
            .get("max_tokens")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(self.default_params.max_tokens);
        let temperature = inv
            .metadata
            .get("temperature")
            .and_then(serde_json::Value::as_f64)
            .map_or(self.default_params.temperature, |v| v as f32);
        (
            model,
            HttpParams {
                max_tokens,
                temperature,
            },
        )
    }

    /// Split system messages into the top-level `system` field.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_prompt: Option<String> = None;
        let mut converted = Vec::new();
        for msg in messages {
            match msg.role {
                Role::System => match system_prompt.as_mut() {
                    Some(existing) => {
                        existing.push_str("\n\n");
                        existing.push_str(&msg.content);
                    }
                    None => system_prompt = Some(msg.content.clone()),
                },
                Role::User | Role::Assistant => converted.push(AnthropicMessage {
                    role: if msg.role == Role::User {
                        "user"
                    } else {
                        "assistant"
                    },
                    content: msg.content.clone(),
                }),
            }
        }
        (system_prompt, converted)
    }

    async fn post(
        &self,
        inv: &LlmInvocation,
        tools: Option<&[ToolSpec]>,
    ) -> Result<(String, AnthropicResponse), BackendError> {
        let (model, params) = self.resolve_params(inv);
        let (system, messages) = Self::convert_messages(&inv.messages);
        debug!(
            provider = "anthropic",
            model = %model,
            max_tokens = params.max_tokens,
            tools = tools.map_or(0, <[ToolSpec]>::len),
            "Invoking Anthropic backend"
        );

        let body = AnthropicRequest {
            model: model.clone(),
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            system,
            tools: tools.map(|t| {
                t.iter()
                    .map(|spec| AnthropicTool {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        input_schema: spec.input_schema.clone(),
                    })
                    .collect()
            }),
        };
        let request = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let response = self.client.send(request, inv.timeout, "anthropic").await?;
        let parsed: AnthropicResponse = response.json().await.map_err(|e| {
            BackendError::InvalidResponse(format!("Failed to parse Anthropic response: {e}"))
        })?;
        Ok((model, parsed))
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn complete(&self, inv: LlmInvocation) -> Result<LlmResult, BackendError> {
        let (model, response) = self.post(&inv, None).await?;
        let text = response.text();
        if text.is_empty() {
            return Err(BackendError::InvalidResponse(
                "Anthropic response missing text content".to_string(),
            ));
        }
        let mut result = LlmResult::new(text, "anthropic", model);
        result.usage = response.usage.map(Usage::into_token_usage);
        Ok(result)
    }

    async fn invoke_tools(
        &self,
        inv: LlmInvocation,
        tools: &[ToolSpec],
    ) -> Result<ToolResponse, BackendError> {
        let (_, response) = self.post(&inv, Some(tools)).await?;
        let calls = response
            .content
            .iter()
            .filter(|block| block.content_type == "tool_use")
            .filter_map(|block| {
                Some(ToolCall {
                    id: block.id.clone(),
                    name: block.name.clone()?,
                    arguments: block.input.clone().unwrap_or(serde_json::Value::Null),
                })
            })
            .collect();
        let text = response.text();
        Ok(ToolResponse {
            calls,
            text: (!text.is_empty()).then_some(text),
            usage: response.usage.map(Usage::into_token_usage),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

impl AnthropicResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.content_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl Usage {
    fn into_token_usage(self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}
